// SPDX-License-Identifier: CEPL-1.0
//! One binary layout per GPU-visible entity.
//!
//! The arena sizes buffers from `size_of::<T>()` and the pipeline builds its
//! vertex-input state from [`GpuLayout::LAYOUT`], so both read the same
//! description. Bump [`SCHEMA_VERSION`] whenever a field moves.

use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeFormat {
    /// Two 32-bit floats.
    Vec2F32,
    /// One 32-bit unsigned integer.
    U32,
}

impl AttributeFormat {
    pub const fn size(self) -> u32 {
        match self {
            AttributeFormat::Vec2F32 => 8,
            AttributeFormat::U32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputRate {
    Vertex,
    Instance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub location: u32,
    pub offset: u32,
    pub format: AttributeFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub binding: u32,
    pub stride: u32,
    pub rate: InputRate,
    pub attributes: &'static [Attribute],
}

/// A `Pod` record that is fed to the vertex stage.
pub trait GpuLayout: Pod {
    const LAYOUT: VertexLayout;
}

/// One corner of the unit quad drawn per cell.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub corner: [f32; 2],
}

impl GpuLayout for Vertex {
    const LAYOUT: VertexLayout = VertexLayout {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        rate: InputRate::Vertex,
        attributes: &[Attribute {
            location: 0,
            offset: offset_of!(Vertex, corner) as u32,
            format: AttributeFormat::Vec2F32,
        }],
    };
}

/// Two triangles covering `[0, 1]²`.
pub const QUAD: [Vertex; 6] = [
    Vertex { corner: [0.0, 0.0] },
    Vertex { corner: [0.0, 1.0] },
    Vertex { corner: [1.0, 0.0] },
    Vertex { corner: [0.0, 1.0] },
    Vertex { corner: [1.0, 1.0] },
    Vertex { corner: [1.0, 0.0] },
];

/// One grid cell, drawn as an instance of [`QUAD`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Cell {
    pub pos: [f32; 2],
    /// 0 = dead, anything else = alive.
    pub alive: u32,
}

impl GpuLayout for Cell {
    const LAYOUT: VertexLayout = VertexLayout {
        binding: 1,
        stride: size_of::<Cell>() as u32,
        rate: InputRate::Instance,
        attributes: &[
            Attribute {
                location: 1,
                offset: offset_of!(Cell, pos) as u32,
                format: AttributeFormat::Vec2F32,
            },
            Attribute {
                location: 2,
                offset: offset_of!(Cell, alive) as u32,
                format: AttributeFormat::U32,
            },
        ],
    };
}

/// std140 view of the camera: `vec2 center; float zoom;`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub center: [f32; 2],
    pub zoom: f32,
}

pub const CAMERA_UNIFORM_SIZE: u64 = size_of::<CameraUniform>() as u64;

/// Bindings in the order the pipeline declares them.
pub const VERTEX_LAYOUTS: [VertexLayout; 2] = [Vertex::LAYOUT, Cell::LAYOUT];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_match_rust_layout() {
        assert_eq!(Vertex::LAYOUT.stride, 8);
        assert_eq!(Cell::LAYOUT.stride, 12);
        assert_eq!(CAMERA_UNIFORM_SIZE, 12);
    }

    #[test]
    fn attributes_fit_inside_stride() {
        for layout in VERTEX_LAYOUTS {
            for attr in layout.attributes {
                assert!(attr.offset + attr.format.size() <= layout.stride);
            }
        }
    }

    #[test]
    fn locations_are_unique_across_bindings() {
        let mut locs: Vec<u32> = VERTEX_LAYOUTS
            .iter()
            .flat_map(|l| l.attributes.iter().map(|a| a.location))
            .collect();
        locs.sort_unstable();
        locs.dedup();
        assert_eq!(locs, vec![0, 1, 2]);
    }

    #[test]
    fn cell_alive_follows_position() {
        assert_eq!(Cell::LAYOUT.attributes[1].offset, 8);
        assert_eq!(Cell::LAYOUT.rate, InputRate::Instance);
    }

    #[test]
    fn quad_covers_unit_square() {
        let bytes: &[u8] = bytemuck::cast_slice(&QUAD);
        assert_eq!(bytes.len(), 6 * 8);
        assert!(QUAD.iter().all(|v| v.corner.iter().all(|c| *c == 0.0 || *c == 1.0)));
    }
}
