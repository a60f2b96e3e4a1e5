// SPDX-License-Identifier: CEPL-1.0
use anyhow::{bail, Context, Result};
use ash::vk;
use flicker_render::{FrameStatus, GfxConfig, RenderSize, Renderer, Ubo, Vertex, WindowSurface};
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::{GfxError, VkResultExt};
use crate::frame::{Acquired, FrameOps, FrameScheduler, FrameSync, Presented};
use crate::pipeline::{DescriptorState, DrawParams, ExtentPipeline, StaticPipeline};
use crate::resource::{GfxResource, HOST_SHARED};
use crate::shader::ShaderSet;
use crate::swapchain::{choose_extent, choose_surface_format, SurfaceSupport, SwapchainPrefs, SwapchainState};

/// Everything tied to one swapchain. Replaced wholesale on recreation.
struct SwapchainGeneration {
    swapchain: SwapchainState,
    uniforms: Vec<GfxResource>,
    descriptors: DescriptorState,
    pipeline: ExtentPipeline,
}

impl SwapchainGeneration {
    /// Command buffers, framebuffers, pipeline, descriptors, uniforms, views,
    /// swapchain. Device must be idle.
    unsafe fn destroy(&mut self, ctx: &DeviceContext, cmd_pool: vk::CommandPool) {
        self.pipeline.destroy(&ctx.device, cmd_pool);
        self.descriptors.destroy(&ctx.device);
        for mut u in self.uniforms.drain(..) {
            u.destroy(ctx);
        }
        self.swapchain.destroy(ctx);
    }
}

struct Gpu {
    ctx: DeviceContext,
    prefs: SwapchainPrefs,
    shaders: ShaderSet,
    statics: StaticPipeline,
    cmd_pool: vk::CommandPool,
    vertices: GfxResource,
    vertex_count: u32,
    clear: [f32; 4],
    sync: FrameSync,
    /// `None` while the surface has a zero extent.
    generation: Option<SwapchainGeneration>,
    target: RenderSize,
    resize_pending: bool,
}

impl Gpu {
    unsafe fn new(window: &dyn WindowSurface, vertices: &[Vertex], cfg: &GfxConfig) -> Result<Self, GfxError> {
        let shaders = ShaderSet::load(&cfg.shader_dir)?;
        let ctx = DeviceContext::create(window, cfg)?;

        let mut gpu = Self {
            ctx,
            prefs: SwapchainPrefs { vsync: cfg.vsync },
            shaders,
            statics: StaticPipeline::default(),
            cmd_pool: vk::CommandPool::null(),
            vertices: GfxResource::default(),
            vertex_count: vertices.len() as u32,
            clear: cfg.clear_color,
            sync: FrameSync::default(),
            generation: None,
            target: window.framebuffer_size(),
            resize_pending: false,
        };
        if let Err(e) = gpu.build(vertices) {
            gpu.destroy();
            return Err(e);
        }
        Ok(gpu)
    }

    unsafe fn build(&mut self, vertices: &[Vertex]) -> Result<(), GfxError> {
        let support = SurfaceSupport::query(&self.ctx)?;
        let format = choose_surface_format(&support.formats).ok_or(GfxError::NoSurfaceFormats)?;
        self.statics = StaticPipeline::create(&self.ctx.device, format.format)?;

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: self.ctx.physical.queue_family,
            ..Default::default()
        };
        self.cmd_pool = self
            .ctx
            .device
            .create_command_pool(&pool_info, None)
            .call("create_command_pool")?;

        // a zero-sized buffer is invalid; an empty mesh still gets one vertex of storage
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len().max(std::mem::size_of::<Vertex>()) as vk::DeviceSize;
        self.vertices = GfxResource::allocate(&self.ctx, size, vk::BufferUsageFlags::VERTEX_BUFFER, HOST_SHARED)?;
        self.vertices.write_bytes(&self.ctx, bytes)?;
        debug!("vk: vertex buffer {} vertices, {} bytes", self.vertex_count, size);

        self.sync = FrameSync::create(&self.ctx.device)?;
        self.generation = self.build_generation(&support)?;
        Ok(())
    }

    /// Swapchain, uniforms, descriptors, then pipeline with framebuffers and
    /// recorded command buffers. `None` if the surface extent is zero.
    unsafe fn build_generation(&mut self, support: &SurfaceSupport) -> Result<Option<SwapchainGeneration>, GfxError> {
        let extent = choose_extent(&support.caps, self.target);
        if extent.width == 0 || extent.height == 0 {
            info!("vk: surface extent is zero, deferring swapchain");
            return Ok(None);
        }

        let mut swapchain = SwapchainState::create(&self.ctx, support, self.target, self.prefs)?;
        if let Err(e) = self.statics.ensure_format(&self.ctx.device, swapchain.format.format) {
            swapchain.destroy(&self.ctx);
            return Err(e);
        }

        let mut gen = SwapchainGeneration {
            swapchain,
            uniforms: Vec::new(),
            descriptors: DescriptorState::default(),
            pipeline: ExtentPipeline::default(),
        };
        if let Err(e) = self.fill_generation(&mut gen) {
            gen.destroy(&self.ctx, self.cmd_pool);
            return Err(e);
        }
        Ok(Some(gen))
    }

    unsafe fn fill_generation(&self, gen: &mut SwapchainGeneration) -> Result<(), GfxError> {
        let ubo_size = std::mem::size_of::<Ubo>() as vk::DeviceSize;
        for _ in 0..gen.swapchain.image_count() {
            let u = GfxResource::allocate(&self.ctx, ubo_size, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_SHARED)?;
            gen.uniforms.push(u);
        }

        gen.descriptors = DescriptorState::create(&self.ctx.device, self.statics.descriptor_layout, &gen.uniforms)?;

        let draw = DrawParams {
            vertex_buffer: self.vertices.buffer,
            vertex_count: self.vertex_count,
            descriptor_sets: &gen.descriptors.sets,
            clear: self.clear,
        };
        gen.pipeline = ExtentPipeline::create(
            &self.ctx.device,
            &self.statics,
            &self.shaders,
            &gen.swapchain,
            self.cmd_pool,
            &draw,
        )?;
        Ok(())
    }

    fn extent(&self) -> Option<RenderSize> {
        self.generation.as_ref().map(|g| RenderSize {
            width: g.swapchain.extent.width,
            height: g.swapchain.extent.height,
        })
    }

    fn generation(&self) -> Result<&SwapchainGeneration, GfxError> {
        self.generation.as_ref().ok_or(GfxError::NoSwapchain)
    }

    /// Reverse creation order; tolerates a partially built engine.
    unsafe fn destroy(&mut self) {
        self.ctx.device.device_wait_idle().ok();
        if let Some(mut gen) = self.generation.take() {
            gen.destroy(&self.ctx, self.cmd_pool);
        }
        self.sync.destroy(&self.ctx.device);
        self.vertices.destroy(&self.ctx);
        if self.cmd_pool != vk::CommandPool::null() {
            self.ctx.device.destroy_command_pool(self.cmd_pool, None);
            self.cmd_pool = vk::CommandPool::null();
        }
        self.statics.destroy(&self.ctx.device);
        self.ctx.destroy();
    }
}

impl FrameOps for Gpu {
    fn image_count(&self) -> usize {
        self.generation.as_ref().map_or(0, |g| g.swapchain.image_count())
    }

    fn wait_slot(&mut self, slot: usize) -> Result<(), GfxError> {
        let fence = self.sync.slots[slot].in_flight;
        unsafe { self.ctx.device.wait_for_fences(&[fence], true, u64::MAX) }.call("wait_for_fences")
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), GfxError> {
        let fence = self.sync.slots[slot].in_flight;
        unsafe { self.ctx.device.reset_fences(&[fence]) }.call("reset_fences")
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquired, GfxError> {
        let Some(gen) = self.generation.as_ref() else {
            return Ok(Acquired::Stale);
        };
        let res = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                gen.swapchain.handle,
                u64::MAX,
                self.sync.slots[slot].image_available,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::Stale),
            Ok((index, false)) => Ok(Acquired::Image(index as usize)),
            Err(e) => Err(GfxError::from_vk("acquire_next_image", e)),
        }
    }

    fn write_uniform(&mut self, image: usize, bytes: &[u8]) -> Result<(), GfxError> {
        let gen = self.generation()?;
        unsafe { gen.uniforms[image].write_bytes(&self.ctx, bytes) }
    }

    fn submit(&mut self, slot: usize, image: usize) -> Result<(), GfxError> {
        let gen = self.generation()?;
        let sync = self.sync.slots[slot];
        let cmd = gen.pipeline.command_buffers[image];
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.queue, std::slice::from_ref(&submit), sync.in_flight)
        }
        .call("queue_submit")
    }

    fn present(&mut self, slot: usize, image: usize) -> Result<Presented, GfxError> {
        let gen = self.generation()?;
        let wait = self.sync.slots[slot].render_finished;
        let index = image as u32;

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &gen.swapchain.handle,
            p_image_indices: &index,
            ..Default::default()
        };
        match unsafe { self.ctx.swapchain_loader.queue_present(self.ctx.queue, &present) } {
            Ok(false) => Ok(Presented::Ok),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::Stale),
            Err(e) => Err(GfxError::from_vk("queue_present", e)),
        }
    }

    fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.resize_pending)
    }

    fn framebuffer_is_zero(&self) -> bool {
        self.target.is_zero()
    }

    fn has_swapchain(&self) -> bool {
        self.generation.is_some()
    }

    fn wait_idle(&mut self) -> Result<(), GfxError> {
        unsafe { self.ctx.wait_idle() }
    }

    fn recreate(&mut self) -> Result<(), GfxError> {
        unsafe {
            if let Some(mut gen) = self.generation.take() {
                gen.destroy(&self.ctx, self.cmd_pool);
            }
            self.sync.destroy(&self.ctx.device);
            self.sync = FrameSync::create(&self.ctx.device)?;
            self.resize_pending = false;

            let support = SurfaceSupport::query(&self.ctx)?;
            self.generation = self.build_generation(&support)?;
        }
        if let Some(size) = self.extent() {
            info!("vk: swapchain recreated at {}x{}", size.width, size.height);
        }
        Ok(())
    }
}

/// Vulkan implementation of [`Renderer`]. Owned by the app; no global state.
pub struct VkEngine {
    scheduler: FrameScheduler,
    gpu: Option<Gpu>,
}

impl VkEngine {
    /// Current swapchain extent, `None` while suspended or after `deinit`.
    pub fn extent(&self) -> Option<RenderSize> {
        self.gpu.as_ref().and_then(Gpu::extent)
    }

    pub fn device_name(&self) -> Option<&str> {
        self.gpu.as_ref().map(|g| g.ctx.physical().name.as_str())
    }
}

impl Renderer for VkEngine {
    fn init(window: &dyn WindowSurface, vertices: &[Vertex], cfg: &GfxConfig) -> Result<Self> {
        let gpu = unsafe { Gpu::new(window, vertices, cfg) }.context("vulkan init")?;
        let scheduler = FrameScheduler::new(gpu.image_count());
        if let Some(size) = gpu.extent() {
            info!("Vulkan engine ready ({}x{}, {} images)", size.width, size.height, gpu.image_count());
        }
        Ok(Self {
            scheduler,
            gpu: Some(gpu),
        })
    }

    fn deinit(&mut self) {
        if let Some(mut gpu) = self.gpu.take() {
            unsafe { gpu.destroy() };
            info!("Vulkan engine torn down");
        }
    }

    fn resize(&mut self, size: RenderSize) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.target = size;
            gpu.resize_pending = true;
        }
    }

    fn draw_frame(&mut self, window: &dyn WindowSurface, ubo: &Ubo) -> Result<FrameStatus> {
        let Some(gpu) = self.gpu.as_mut() else {
            bail!("draw_frame called after deinit");
        };

        gpu.target = window.framebuffer_size();
        self.scheduler
            .draw_frame(gpu, ubo.as_bytes())
            .context("draw_frame")
    }
}

impl Drop for VkEngine {
    fn drop(&mut self) {
        self.deinit();
    }
}
