// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info};

use crate::error::{GfxError, VkResultExt};
use crate::resource::GfxResource;
use crate::shader::ShaderSet;
use crate::swapchain::SwapchainState;

const ENTRY_POINT: &CStr = c"main";

/// Binding 0, per vertex, 12-byte stride.
pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<flicker_render::Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// Location 0: three floats at offset 0.
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 1] {
    [vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: 0,
    }]
}

pub fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

unsafe fn create_descriptor_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout, GfxError> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    device
        .create_descriptor_set_layout(&ci, None)
        .call("create_descriptor_set_layout")
}

/// One colour attachment: cleared on load, stored, handed to present.
unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass, GfxError> {
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

    // the layout transition must wait for the acquire semaphore's stage
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
    device
        .create_render_pass(&rp_info, None)
        .call("create_render_pass")
}

/// Objects that survive swapchain recreation. The render pass only depends
/// on the surface format and is rebuilt if that ever changes.
#[derive(Debug, Default)]
pub struct StaticPipeline {
    pub descriptor_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub format: vk::Format,
}

impl StaticPipeline {
    pub unsafe fn create(device: &ash::Device, format: vk::Format) -> Result<Self, GfxError> {
        let mut out = Self {
            format,
            ..Default::default()
        };
        if let Err(e) = out.build(device) {
            out.destroy(device);
            return Err(e);
        }
        Ok(out)
    }

    unsafe fn build(&mut self, device: &ash::Device) -> Result<(), GfxError> {
        self.descriptor_layout = create_descriptor_set_layout(device)?;

        let pl_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &self.descriptor_layout,
            ..Default::default()
        };
        self.pipeline_layout = device
            .create_pipeline_layout(&pl_info, None)
            .call("create_pipeline_layout")?;

        self.render_pass = create_render_pass(device, self.format)?;
        Ok(())
    }

    /// Returns true if the render pass had to be rebuilt.
    pub unsafe fn ensure_format(&mut self, device: &ash::Device, format: vk::Format) -> Result<bool, GfxError> {
        if format == self.format {
            return Ok(false);
        }
        info!("vk: surface format changed {:?} -> {:?}, rebuilding render pass", self.format, format);
        let render_pass = create_render_pass(device, format)?;
        device.destroy_render_pass(self.render_pass, None);
        self.render_pass = render_pass;
        self.format = format;
        Ok(true)
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.pipeline_layout = vk::PipelineLayout::null();
        }
        if self.descriptor_layout != vk::DescriptorSetLayout::null() {
            device.destroy_descriptor_set_layout(self.descriptor_layout, None);
            self.descriptor_layout = vk::DescriptorSetLayout::null();
        }
    }
}

/// One pool per swapchain generation; one set per image, each pointing at
/// that image's uniform buffer.
#[derive(Debug, Default)]
pub struct DescriptorState {
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
}

impl DescriptorState {
    pub unsafe fn create(
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        uniforms: &[GfxResource],
    ) -> Result<Self, GfxError> {
        let count = uniforms.len() as u32;
        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        };
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        let pool = device
            .create_descriptor_pool(&pool_info, None)
            .call("create_descriptor_pool")?;

        let layouts = vec![layout; uniforms.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: count,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = match device.allocate_descriptor_sets(&alloc_info) {
            Ok(sets) => sets,
            Err(e) => {
                device.destroy_descriptor_pool(pool, None);
                return Err(GfxError::from_vk("allocate_descriptor_sets", e));
            }
        };

        for (&set, ubo) in sets.iter().zip(uniforms) {
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: ubo.buffer,
                offset: 0,
                range: ubo.size,
            };
            let write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &buffer_info,
                ..Default::default()
            };
            device.update_descriptor_sets(std::slice::from_ref(&write), &[]);
        }

        Ok(Self { pool, sets })
    }

    /// Destroying the pool releases the sets with it.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.pool, None);
            self.pool = vk::DescriptorPool::null();
        }
        self.sets.clear();
    }
}

/// What every pre-recorded command buffer draws.
pub struct DrawParams<'a> {
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub clear: [f32; 4],
}

/// Extent-dependent objects: rebuilt with every swapchain generation.
#[derive(Debug, Default)]
pub struct ExtentPipeline {
    pub pipeline: vk::Pipeline,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub command_buffers: Vec<vk::CommandBuffer>,
}

impl ExtentPipeline {
    pub unsafe fn create(
        device: &ash::Device,
        statics: &StaticPipeline,
        shaders: &ShaderSet,
        swapchain: &SwapchainState,
        cmd_pool: vk::CommandPool,
        draw: &DrawParams<'_>,
    ) -> Result<Self, GfxError> {
        let mut out = Self {
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            command_buffers: Vec::new(),
        };
        if let Err(e) = out.build(device, statics, shaders, swapchain, cmd_pool, draw) {
            out.destroy(device, cmd_pool);
            return Err(e);
        }
        debug!(
            "vk: pipeline + {} framebuffers at {}x{}",
            out.framebuffers.len(),
            swapchain.extent.width,
            swapchain.extent.height
        );
        Ok(out)
    }

    unsafe fn build(
        &mut self,
        device: &ash::Device,
        statics: &StaticPipeline,
        shaders: &ShaderSet,
        swapchain: &SwapchainState,
        cmd_pool: vk::CommandPool,
        draw: &DrawParams<'_>,
    ) -> Result<(), GfxError> {
        self.pipeline = create_graphics_pipeline(device, statics, shaders, swapchain.extent)?;

        for &view in &swapchain.image_views {
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: statics.render_pass,
                attachment_count: 1,
                p_attachments: &view,
                width: swapchain.extent.width,
                height: swapchain.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = device
                .create_framebuffer(&fb_info, None)
                .call("create_framebuffer")?;
            self.framebuffers.push(fb);
        }

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: self.framebuffers.len() as u32,
            ..Default::default()
        };
        self.command_buffers = device
            .allocate_command_buffers(&alloc_info)
            .call("allocate_command_buffers")?;

        self.record(device, statics, swapchain.extent, draw)
    }

    /// One buffer per image, recorded once and replayed every frame.
    unsafe fn record(
        &self,
        device: &ash::Device,
        statics: &StaticPipeline,
        extent: vk::Extent2D,
        draw: &DrawParams<'_>,
    ) -> Result<(), GfxError> {
        let clears = [vk::ClearValue {
            color: vk::ClearColorValue { float32: draw.clear },
        }];

        for (i, &cmd) in self.command_buffers.iter().enumerate() {
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &begin)
                .call("begin_command_buffer")?;

            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: statics.render_pass,
                framebuffer: self.framebuffers[i],
                render_area: scissor_for(extent),
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };

            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                statics.pipeline_layout,
                0,
                &draw.descriptor_sets[i..=i],
                &[],
            );
            device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .call("end_command_buffer")?;
        }
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device, cmd_pool: vk::CommandPool) {
        if !self.command_buffers.is_empty() {
            device.free_command_buffers(cmd_pool, &self.command_buffers);
            self.command_buffers.clear();
        }
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb, None);
        }
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
    }
}

/// Fixed viewport/scissor baked in, so the pipeline is per extent.
unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    statics: &StaticPipeline,
    shaders: &ShaderSet,
    extent: vk::Extent2D,
) -> Result<vk::Pipeline, GfxError> {
    let vert = shaders.vertex.create_module(device)?;
    let frag = match shaders.fragment.create_module(device) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vert, None);
            return Err(e);
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vert,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: frag,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        },
    ];

    let binding = vertex_binding();
    let attributes = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };

    let viewport = viewport_for(extent);
    let scissor = scissor_for(extent);
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };

    // blending off: plain write of all four channels
    let blend_att = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        ..Default::default()
    };
    let blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &blend_att,
        ..Default::default()
    };

    let ci = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &blend,
        layout: statics.pipeline_layout,
        render_pass: statics.render_pass,
        subpass: 0,
        ..Default::default()
    };

    let res = device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&ci), None);

    // modules are only needed while the pipeline is being built
    device.destroy_shader_module(frag, None);
    device.destroy_shader_module(vert, None);

    match res {
        Ok(pipelines) => Ok(pipelines[0]),
        Err((pipelines, e)) => {
            for p in pipelines {
                if p != vk::Pipeline::null() {
                    device.destroy_pipeline(p, None);
                }
            }
            Err(GfxError::from_vk("create_graphics_pipelines", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_one_vec3() {
        let b = vertex_binding();
        assert_eq!(b.binding, 0);
        assert_eq!(b.stride, 12);
        assert_eq!(b.input_rate, vk::VertexInputRate::VERTEX);

        let [a] = vertex_attributes();
        assert_eq!(a.location, 0);
        assert_eq!(a.binding, 0);
        assert_eq!(a.format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(a.offset, 0);
    }

    #[test]
    fn viewport_covers_the_extent() {
        let extent = vk::Extent2D { width: 1200, height: 800 };
        let vp = viewport_for(extent);
        assert_eq!((vp.x, vp.y), (0.0, 0.0));
        assert_eq!((vp.width, vp.height), (1200.0, 800.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));

        let sc = scissor_for(extent);
        assert_eq!((sc.offset.x, sc.offset.y), (0, 0));
        assert_eq!((sc.extent.width, sc.extent.height), (1200, 800));
    }
}
