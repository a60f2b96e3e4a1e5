// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use flicker_render::RenderSize;
use tracing::info;

use crate::device::DeviceContext;
use crate::error::{GfxError, VkResultExt};

/// 8-bit BGRA in the sRGB non-linear colour space.
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct SwapchainPrefs {
    /// Only FIFO when set.
    pub vsync: bool,
}

/// Everything the surface reports for one physical device.
pub struct SurfaceSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub unsafe fn query(ctx: &DeviceContext) -> Result<Self, GfxError> {
        let phys = ctx.physical.handle;
        let caps = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(phys, ctx.surface)
            .call("get_physical_device_surface_capabilities")?;
        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(phys, ctx.surface)
            .call("get_physical_device_surface_formats")?;
        let modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(phys, ctx.surface)
            .call("get_physical_device_surface_present_modes")?;
        Ok(Self {
            caps,
            formats,
            modes,
        })
    }
}

/// A lone `UNDEFINED` entry means the surface takes anything, so use ours.
/// Otherwise our preferred pair if listed, else whatever comes first.
/// `None` only for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(PREFERRED_FORMAT);
        }
    }
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
        .or_else(|| formats.first().copied())
}

/// MAILBOX, then IMMEDIATE, then FIFO (always supported). `vsync` pins FIFO.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefs: SwapchainPrefs) -> vk::PresentModeKHR {
    if prefs.vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `current_extent` verbatim when the surface defines it, else the
/// framebuffer size clamped into the surface bounds.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

// Info only
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// One swapchain plus its images and views.
pub struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

impl SwapchainState {
    pub unsafe fn create(
        ctx: &DeviceContext,
        support: &SurfaceSupport,
        framebuffer: RenderSize,
        prefs: SwapchainPrefs,
    ) -> Result<Self, GfxError> {
        let caps = &support.caps;
        let format = choose_surface_format(&support.formats).ok_or(GfxError::NoSurfaceFormats)?;
        let present_mode = choose_present_mode(&support.modes, prefs);
        let extent = choose_extent(caps, framebuffer);

        info!(
            "vk: swapchain {:?}/{:?}, present_mode {}, extent {}x{}, min images {}",
            format.format,
            format.color_space,
            pm_name(present_mode),
            extent.width,
            extent.height,
            caps.min_image_count
        );

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: caps.min_image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE, // single graphics queue family
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let handle = ctx
            .swapchain_loader
            .create_swapchain(&swap_info, None)
            .call("create_swapchain")?;
        let images = match ctx.swapchain_loader.get_swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                ctx.swapchain_loader.destroy_swapchain(handle, None);
                return Err(GfxError::from_vk("get_swapchain_images", e));
            }
        };

        let mut state = Self {
            handle,
            format,
            present_mode,
            extent,
            images,
            image_views: Vec::new(),
        };

        // View format MUST match the swapchain image format.
        for i in 0..state.images.len() {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: state.images[i],
                view_type: vk::ImageViewType::TYPE_2D,
                format: format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            match ctx.device.create_image_view(&iv_info, None) {
                Ok(view) => state.image_views.push(view),
                Err(e) => {
                    state.destroy(ctx);
                    return Err(GfxError::from_vk("create_image_view", e));
                }
            }
        }

        Ok(state)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views first, then the swapchain. Caller guarantees device idle.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        for iv in self.image_views.drain(..) {
            ctx.device.destroy_image_view(iv, None);
        }
        if self.handle != vk::SwapchainKHR::null() {
            ctx.swapchain_loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }
}
