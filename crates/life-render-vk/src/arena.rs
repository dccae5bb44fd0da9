// SPDX-License-Identifier: CEPL-1.0
//! One host-visible allocation shared by every buffer.
//!
//! Layout, in this order: cell buffers (front, back), the quad vertex buffer,
//! then one camera uniform buffer per swapchain image. Each resource starts at
//! the running cursor rounded up to its own alignment; the cursor then moves by
//! the resource's size.

use anyhow::{Context, Result};
use ash::{vk, Instance};
use bytemuck::Pod;
use life_render::schema::{CameraUniform, Cell, Vertex, CAMERA_UNIFORM_SIZE, QUAD};
use life_render::GridSeed;
use std::mem::{align_of, size_of};
use tracing::{debug, info};

use crate::device::AcceleratorContext;
use crate::error::SetupError;

/// Front is drawn; back is reserved for a compute pass writing the next generation.
pub const CELL_BUFFERS: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaPlan {
    pub offsets: Vec<vk::DeviceSize>,
    pub size: vk::DeviceSize,
}

pub fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Offsets for `reqs` packed in order. Padding only ever goes before a resource.
pub fn plan_arena(reqs: &[vk::MemoryRequirements]) -> ArenaPlan {
    let mut cursor = 0;
    let offsets = reqs
        .iter()
        .map(|r| {
            let offset = align_up(cursor, r.alignment);
            cursor = offset + r.size;
            offset
        })
        .collect();
    ArenaPlan {
        offsets,
        size: cursor,
    }
}

/// First host-visible + host-coherent type, which every resource must accept.
pub fn choose_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    reqs: &[(&str, vk::MemoryRequirements)],
) -> Result<u32, SetupError> {
    let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    let type_index = props.memory_types[..count]
        .iter()
        .position(|t| t.property_flags.contains(wanted))
        .ok_or(SetupError::NoHostVisibleMemory)? as u32;

    for (name, req) in reqs {
        if req.memory_type_bits & (1 << type_index) == 0 {
            return Err(SetupError::MemoryTypeMismatch {
                resource: (*name).to_owned(),
                type_index,
                type_bits: req.memory_type_bits,
            });
        }
    }
    Ok(type_index)
}

/// One instance per cell, so the cell count has to fit the draw's `u32`.
pub fn instance_count(grid: &GridSeed) -> Result<u32, SetupError> {
    u32::try_from(grid.cell_count()).map_err(|_| SetupError::GridTooLarge { size: grid.size })
}

/// Whether fresh camera buffers can reuse the planned slots: each one aligned,
/// inside its slot, and accepting the arena's memory type.
pub fn camera_slots_fit(
    slots: &[vk::DeviceSize],
    arena_size: vk::DeviceSize,
    type_index: u32,
    reqs: &[vk::MemoryRequirements],
) -> bool {
    reqs.len() <= slots.len()
        && reqs.iter().enumerate().all(|(i, r)| {
            let offset = slots[i];
            let slot_end = slots.get(i + 1).copied().unwrap_or(arena_size);
            offset % r.alignment.max(1) == 0
                && offset + r.size <= slot_end
                && r.memory_type_bits & (1 << type_index) != 0
        })
}

#[derive(Clone, Copy, Debug)]
pub struct Binding {
    pub buffer: vk::Buffer,
    pub requirements: vk::MemoryRequirements,
    pub offset: vk::DeviceSize,
}

pub struct MemoryArena {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    type_index: u32,
    cells: Vec<Binding>,
    vertex: Binding,
    /// Planned camera slots; `cameras` never holds more than this.
    camera_slots: Vec<vk::DeviceSize>,
    cameras: Vec<Binding>,
    cell_count: usize,
    instances: u32,
}

impl MemoryArena {
    /// Creates, plans, allocates, binds and uploads in one go.
    pub unsafe fn new(
        ctx: &AcceleratorContext,
        instance: &Instance,
        grid: &GridSeed,
        camera_count: usize,
        camera: &CameraUniform,
    ) -> Result<Self> {
        if grid.size == 0 {
            return Err(SetupError::ZeroGrid.into());
        }
        let instances = instance_count(grid)?;
        let device = ctx.device();
        let families = sharing_families(ctx);
        let cell_count = grid.cell_count();
        let cell_bytes = (cell_count * size_of::<Cell>()) as vk::DeviceSize;

        // 1) buffers + requirements, in arena order
        let mut buffers = Vec::with_capacity(CELL_BUFFERS + 1 + camera_count);
        if let Err(e) =
            unsafe { create_arena_buffers(device, &mut buffers, cell_bytes, camera_count, &families) }
        {
            unsafe { release(device, &buffers, vk::DeviceMemory::null()) };
            return Err(e);
        }
        let reqs: Vec<vk::MemoryRequirements> = buffers
            .iter()
            .map(|&b| unsafe { device.get_buffer_memory_requirements(b) })
            .collect();

        // 2) + 3) one memory type, accepted by everyone
        let named: Vec<(&str, vk::MemoryRequirements)> = reqs
            .iter()
            .enumerate()
            .map(|(i, r)| (resource_name(i), *r))
            .collect();
        let mem_props = unsafe { instance.get_physical_device_memory_properties(ctx.phys()) };
        let type_index = match choose_memory_type(&mem_props, &named) {
            Ok(t) => t,
            Err(e) => {
                unsafe { release(device, &buffers, vk::DeviceMemory::null()) };
                return Err(e.into());
            }
        };

        // 4) offsets
        let plan = plan_arena(&reqs);

        // 5) allocate + bind
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: plan.size,
            memory_type_index: type_index,
            ..Default::default()
        };
        let memory = match unsafe { device.allocate_memory(&mai, None) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { release(device, &buffers, vk::DeviceMemory::null()) };
                return Err(anyhow::Error::from(e).context("allocate arena"));
            }
        };
        let bindings: Vec<Binding> = buffers
            .iter()
            .zip(&reqs)
            .zip(&plan.offsets)
            .map(|((&buffer, &requirements), &offset)| Binding {
                buffer,
                requirements,
                offset,
            })
            .collect();
        for b in &bindings {
            if let Err(e) = unsafe { device.bind_buffer_memory(b.buffer, memory, b.offset) } {
                unsafe { release(device, &buffers, memory) };
                return Err(anyhow::Error::from(e).context("bind_buffer_memory"));
            }
        }

        let mut arena = Self {
            memory,
            size: plan.size,
            type_index,
            cells: bindings[..CELL_BUFFERS].to_vec(),
            vertex: bindings[CELL_BUFFERS],
            camera_slots: plan.offsets[CELL_BUFFERS + 1..].to_vec(),
            cameras: bindings[CELL_BUFFERS + 1..].to_vec(),
            cell_count,
            instances,
        };

        // Initial upload, before any rendering.
        if let Err(e) = unsafe { arena.upload(device, grid, camera) } {
            unsafe { arena.destroy(device) };
            return Err(e);
        }

        info!(
            "arena: {} bytes in memory type {type_index} ({} cells x {CELL_BUFFERS}, {camera_count} camera buffers)",
            arena.size, cell_count
        );
        Ok(arena)
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn front_cells(&self) -> vk::Buffer {
        self.cells[0].buffer
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex.buffer
    }

    pub fn camera_buffers(&self) -> Vec<vk::Buffer> {
        self.cameras.iter().map(|c| c.buffer).collect()
    }

    pub fn instance_count(&self) -> u32 {
        self.instances
    }

    unsafe fn upload(&self, device: &ash::Device, grid: &GridSeed, camera: &CameraUniform) -> Result<()> {
        for i in 0..CELL_BUFFERS {
            unsafe { self.populate_cells(device, i, grid)? };
        }
        unsafe { self.write(device, &self.vertex, &QUAD)? };
        for c in &self.cameras {
            unsafe { self.write(device, c, std::slice::from_ref(camera))? };
        }
        Ok(())
    }

    /// Recreates `count` camera buffers in the reserved camera slots.
    ///
    /// Returns `Ok(false)` when they do not fit; the caller must rebuild the arena.
    pub unsafe fn ensure_cameras(
        &mut self,
        ctx: &AcceleratorContext,
        count: usize,
        camera: &CameraUniform,
    ) -> Result<bool> {
        if self.cameras.len() == count {
            return Ok(true);
        }
        let device = ctx.device();
        unsafe { self.destroy_cameras(device) };
        if count > self.camera_slots.len() {
            debug!(
                "arena: {count} camera buffers requested, {} reserved",
                self.camera_slots.len()
            );
            return Ok(false);
        }

        let families = sharing_families(ctx);
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            match unsafe {
                create_buffer(
                    device,
                    CAMERA_UNIFORM_SIZE,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    &families,
                )
            } {
                Ok(b) => buffers.push(b),
                Err(e) => {
                    unsafe { release(device, &buffers, vk::DeviceMemory::null()) };
                    return Err(e.context("camera buffer"));
                }
            }
        }
        let reqs: Vec<vk::MemoryRequirements> = buffers
            .iter()
            .map(|&b| unsafe { device.get_buffer_memory_requirements(b) })
            .collect();
        if !camera_slots_fit(&self.camera_slots, self.size, self.type_index, &reqs) {
            debug!("arena: new camera buffers do not fit their slots");
            unsafe { release(device, &buffers, vk::DeviceMemory::null()) };
            return Ok(false);
        }

        // Tracked before binding, so a failure below still destroys every buffer.
        self.cameras = buffers
            .iter()
            .zip(&reqs)
            .zip(&self.camera_slots)
            .map(|((&buffer, &requirements), &offset)| Binding {
                buffer,
                requirements,
                offset,
            })
            .collect();
        for c in &self.cameras {
            unsafe { device.bind_buffer_memory(c.buffer, self.memory, c.offset) }
                .context("bind camera buffer")?;
            unsafe { self.write(device, c, std::slice::from_ref(camera))? };
        }
        Ok(true)
    }

    pub unsafe fn write_camera(
        &self,
        device: &ash::Device,
        image: usize,
        camera: &CameraUniform,
    ) -> Result<()> {
        let binding = self
            .cameras
            .get(image)
            .with_context(|| format!("no camera buffer for image {image}"))?;
        unsafe { self.write(device, binding, std::slice::from_ref(camera)) }
    }

    /// Scoped map of one binding's range; unmapped before returning.
    unsafe fn write<T: Pod>(&self, device: &ash::Device, binding: &Binding, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len() as vk::DeviceSize;
        let ptr = unsafe {
            device.map_memory(self.memory, binding.offset, len, vk::MemoryMapFlags::empty())
        }
        .context("map_memory")?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Seeds the grid straight into mapped memory.
    unsafe fn populate_cells(&self, device: &ash::Device, index: usize, grid: &GridSeed) -> Result<()> {
        let binding = &self.cells[index];
        let len = self.cell_count * size_of::<Cell>();
        let ptr = unsafe {
            device.map_memory(
                self.memory,
                binding.offset,
                len as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )
        }
        .context("map_memory(cells)")?;
        if (ptr as usize) % align_of::<Cell>() == 0 {
            let cells = unsafe { std::slice::from_raw_parts_mut(ptr as *mut Cell, self.cell_count) };
            grid.populate(cells);
        } else {
            // Mapping is not 4-byte aligned; seed on the host and copy.
            let mut cells = vec![Cell::default(); self.cell_count];
            grid.populate(&mut cells);
            let bytes: &[u8] = bytemuck::cast_slice(&cells);
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, len) };
        }
        unsafe { device.unmap_memory(self.memory) };
        Ok(())
    }

    pub unsafe fn destroy_cameras(&mut self, device: &ash::Device) {
        for c in self.cameras.drain(..) {
            unsafe { device.destroy_buffer(c.buffer, None) };
        }
    }

    /// Buffers first, memory last. Safe to call twice.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            self.destroy_cameras(device);
            device.destroy_buffer(self.vertex.buffer, None);
            for c in self.cells.drain(..) {
                device.destroy_buffer(c.buffer, None);
            }
            device.free_memory(self.memory, None);
        }
        self.vertex.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
    }
}

/// Partial-construction cleanup. `memory` may be null.
unsafe fn release(device: &ash::Device, buffers: &[vk::Buffer], memory: vk::DeviceMemory) {
    unsafe {
        for &b in buffers {
            device.destroy_buffer(b, None);
        }
        if memory != vk::DeviceMemory::null() {
            device.free_memory(memory, None);
        }
    }
}

/// Pushes each buffer as it is created; on error `buffers` holds the ones to release.
unsafe fn create_arena_buffers(
    device: &ash::Device,
    buffers: &mut Vec<vk::Buffer>,
    cell_bytes: vk::DeviceSize,
    camera_count: usize,
    families: &[u32],
) -> Result<()> {
    for _ in 0..CELL_BUFFERS {
        buffers.push(unsafe {
            create_buffer(
                device,
                cell_bytes,
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
                families,
            )?
        });
    }
    buffers.push(unsafe {
        create_buffer(
            device,
            size_of::<[Vertex; 6]>() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            families,
        )?
    });
    for _ in 0..camera_count {
        buffers.push(unsafe {
            create_buffer(
                device,
                CAMERA_UNIFORM_SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                families,
            )?
        });
    }
    Ok(())
}

fn resource_name(index: usize) -> &'static str {
    match index {
        0 => "front cell buffer",
        1 => "back cell buffer",
        2 => "vertex buffer",
        _ => "camera uniform buffer",
    }
}

/// Families a buffer is shared between: graphics reads it, compute would write it.
fn sharing_families(ctx: &AcceleratorContext) -> Vec<u32> {
    let f = ctx.families();
    let mut v = vec![f.graphics, f.compute];
    v.dedup();
    v
}

unsafe fn create_buffer(
    device: &ash::Device,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    families: &[u32],
) -> Result<vk::Buffer> {
    let (sharing_mode, count, indices) = if families.len() > 1 {
        (
            vk::SharingMode::CONCURRENT,
            families.len() as u32,
            families.as_ptr(),
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
    };
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode,
        queue_family_index_count: count,
        p_queue_family_indices: indices,
        ..Default::default()
    };
    unsafe { device.create_buffer(&bci, None) }.context("create_buffer")
}
