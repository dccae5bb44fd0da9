// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use life_render::schema::{AttributeFormat, InputRate, VertexLayout, VERTEX_LAYOUTS};
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SetupError;

pub const VERT_FILE: &str = "cells.vert.spv";
pub const FRAG_FILE: &str = "cells.frag.spv";

/// Where build.rs left the compiled shaders.
pub fn default_shader_dir() -> PathBuf {
    PathBuf::from(env!("LIFE_SHADER_DIR"))
}

/// SPIR-V words for both stages, read once from disk.
#[derive(Debug)]
pub struct ShaderCode {
    vert: Vec<u32>,
    frag: Vec<u32>,
}

impl ShaderCode {
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            vert: read_shader(&dir.join(VERT_FILE))?,
            frag: read_shader(&dir.join(FRAG_FILE))?,
        })
    }
}

fn read_shader(path: &Path) -> Result<Vec<u32>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SetupError::ShaderMissing {
                path: path.to_path_buf(),
            }
            .into())
        }
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let words = read_spv(&mut Cursor::new(&bytes[..]))
        .with_context(|| format!("{} is not SPIR-V", path.display()))?;
    debug!("loaded {} ({} words)", path.display(), words.len());
    Ok(words)
}

pub fn vk_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Vec2F32 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::U32 => vk::Format::R32_UINT,
    }
}

/// Vertex-input state straight from the shared schema.
pub fn vertex_input(
    layouts: &[VertexLayout],
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let bindings = layouts
        .iter()
        .map(|l| vk::VertexInputBindingDescription {
            binding: l.binding,
            stride: l.stride,
            input_rate: match l.rate {
                InputRate::Vertex => vk::VertexInputRate::VERTEX,
                InputRate::Instance => vk::VertexInputRate::INSTANCE,
            },
        })
        .collect();
    let attributes = layouts
        .iter()
        .flat_map(|l| {
            l.attributes
                .iter()
                .map(move |a| vk::VertexInputAttributeDescription {
                    location: a.location,
                    binding: l.binding,
                    format: vk_format(a.format),
                    offset: a.offset,
                })
        })
        .collect();
    (bindings, attributes)
}

/// Single color attachment, cleared, handed to presentation.
pub unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    // The image is only ours once the acquire semaphore wait at this stage completes.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rp_info, None) }.context("create_render_pass")
}

/// The grid side is baked in as specialization constant 0, so a new grid
/// size needs a new pipeline.
pub unsafe fn create_pipeline(
    device: &ash::Device,
    shaders: &ShaderCode,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    grid_size: u32,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let vs_ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: shaders.vert.as_ptr(),
        code_size: shaders.vert.len() * 4,
        ..Default::default()
    };
    let fs_ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: shaders.frag.as_ptr(),
        code_size: shaders.frag.len() * 4,
        ..Default::default()
    };
    let vs = unsafe { device.create_shader_module(&vs_ci, None) }.context("vertex shader module")?;
    let fs = match unsafe { device.create_shader_module(&fs_ci, None) } {
        Ok(m) => m,
        Err(e) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(anyhow!("fragment shader module: {e:?}"));
        }
    };
    let entry = c"main";

    let spec_entry = vk::SpecializationMapEntry {
        constant_id: 0,
        offset: 0,
        size: std::mem::size_of::<u32>(),
    };
    let spec_data = grid_size.to_ne_bytes();
    let spec_info = vk::SpecializationInfo {
        map_entry_count: 1,
        p_map_entries: &spec_entry,
        data_size: spec_data.len(),
        p_data: spec_data.as_ptr().cast(),
        ..Default::default()
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            p_specialization_info: &spec_info,
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let (vb, va) = vertex_input(&VERTEX_LAYOUTS);
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: vb.len() as u32,
        p_vertex_binding_descriptions: vb.as_ptr(),
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // Viewport/scissor are set at record time.
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        ..Default::default()
    };
    let layout = unsafe { device.create_pipeline_layout(&layout_info, None) };
    let layout = match layout {
        Ok(l) => l,
        Err(e) => {
            unsafe {
                device.destroy_shader_module(vs, None);
                device.destroy_shader_module(fs, None);
            }
            return Err(anyhow!("create_pipeline_layout: {e:?}"));
        }
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let created = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    };
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }
    match created {
        Ok(p) => Ok((layout, p[0])),
        Err((_, err)) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(anyhow!("create_graphics_pipelines failed: {:?}", err))
        }
    }
}

pub unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(views.len());
    for view in views {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        match unsafe { device.create_framebuffer(&fb_info, None) } {
            Ok(fb) => framebuffers.push(fb),
            Err(e) => {
                for fb in framebuffers {
                    unsafe { device.destroy_framebuffer(fb, None) };
                }
                return Err(anyhow::Error::from(e).context("create_framebuffer"));
            }
        }
    }
    Ok(framebuffers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_input_matches_schema() {
        let (bindings, attrs) = vertex_input(&VERTEX_LAYOUTS);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(bindings[1].stride, 12);

        let alive = attrs.iter().find(|a| a.location == 2).unwrap();
        assert_eq!(alive.binding, 1);
        assert_eq!(alive.offset, 8);
        assert_eq!(alive.format, vk::Format::R32_UINT);
        assert_eq!(attrs[0].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn missing_shader_is_a_setup_error() {
        let dir = std::env::temp_dir().join("life-no-shaders-here");
        let err = ShaderCode::load(&dir).unwrap_err();
        match err.downcast_ref::<SetupError>() {
            Some(SetupError::ShaderMissing { path }) => assert!(path.ends_with(VERT_FILE)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn garbage_is_not_spirv() {
        let path = std::env::temp_dir().join(format!("life-bad-{}.spv", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(read_shader(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn build_script_shaders_parse() {
        let code = ShaderCode::load(&default_shader_dir()).unwrap();
        assert_eq!(code.vert[0], 0x0723_0203);
        assert_eq!(code.frag[0], 0x0723_0203);
    }
}
