// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{CStr, CString};

use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use flicker_render::{GfxConfig, WindowSurface};
use raw_window_handle::RawDisplayHandle;
use tracing::info;

use crate::debug::{DebugMessenger, VALIDATION_LAYER};
use crate::error::{GfxError, VkResultExt};

/// The GPU and queue family picked at init. Never changes afterwards.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub queue_family: u32,
    pub queue_props: vk::QueueFamilyProperties,
    pub name: String,
}

/// Instance/device-level objects. Lives as long as the engine.
pub struct DeviceContext {
    _entry: Entry,
    pub(crate) instance: Instance,
    debug: Option<DebugMessenger>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) physical: PhysicalDeviceInfo,
    pub(crate) memory_props: vk::PhysicalDeviceMemoryProperties,
    pub(crate) device: ash::Device,
    pub(crate) queue: vk::Queue,
    pub(crate) swapchain_loader: swapchain::Device,
}

/// First family (in enumeration order) that has a graphics queue and can
/// present. No preference between families or devices beyond that.
pub fn select_queue_family<F>(
    families: &[vk::QueueFamilyProperties],
    mut presents: F,
) -> Result<Option<u32>, GfxError>
where
    F: FnMut(u32) -> Result<bool, GfxError>,
{
    for (i, q) in families.iter().enumerate() {
        if q.queue_count == 0 || !q.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }
        if presents(i as u32)? {
            return Ok(Some(i as u32));
        }
    }
    Ok(None)
}

/// Validation is all or nothing: requested but not installed is an error.
pub fn validation_enabled(requested: bool, installed: bool) -> Result<bool, GfxError> {
    if requested && !installed {
        return Err(GfxError::MissingLayer(VALIDATION_LAYER.to_string_lossy().into_owned()));
    }
    Ok(requested)
}

/// The device features the pipeline relies on, and nothing else.
pub fn required_features(supported: &vk::PhysicalDeviceFeatures) -> Result<vk::PhysicalDeviceFeatures, GfxError> {
    if supported.logic_op == vk::FALSE {
        return Err(GfxError::MissingFeature("logicOp"));
    }
    Ok(vk::PhysicalDeviceFeatures {
        logic_op: vk::TRUE,
        ..Default::default()
    })
}

unsafe fn layer_available(entry: &Entry, name: &CStr) -> Result<bool, GfxError> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .call("enumerate_instance_layer_properties")?;
    Ok(layers
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == name))
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    cfg: &GfxConfig,
) -> Result<(Instance, bool), GfxError> {
    // interior NULs cannot come from a sane config; drop them rather than fail
    let app = CString::new(cfg.app_name.replace('\0', "")).unwrap_or_default();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: app.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let ext_slice = ash_window::enumerate_required_extensions(display_raw)
        .call("enumerate_required_extensions")?;
    let mut ext_vec = ext_slice.to_vec();

    let installed = cfg.validation && layer_available(entry, VALIDATION_LAYER)?;
    let validation = validation_enabled(cfg.validation, installed)?;
    if validation {
        ext_vec.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    let layers = [VALIDATION_LAYER.as_ptr()];

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: if validation { layers.len() as u32 } else { 0 },
        pp_enabled_layer_names: if validation {
            layers.as_ptr()
        } else {
            std::ptr::null()
        },
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .call("create_instance")?;
    Ok((instance, validation))
}

unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<PhysicalDeviceInfo, GfxError> {
    let devices = instance
        .enumerate_physical_devices()
        .call("enumerate_physical_devices")?;

    for phys in devices {
        let families = instance.get_physical_device_queue_family_properties(phys);
        let picked = select_queue_family(&families, |i| {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .call("get_physical_device_surface_support")
        })?;

        if let Some(queue_family) = picked {
            let props = instance.get_physical_device_properties(phys);
            let name = CStr::from_ptr(props.device_name.as_ptr())
                .to_string_lossy()
                .into_owned();
            return Ok(PhysicalDeviceInfo {
                handle: phys,
                queue_family,
                queue_props: families[queue_family as usize],
                name,
            });
        }
    }
    Err(GfxError::NoSuitableDevice)
}

unsafe fn create_logical_device(
    instance: &Instance,
    physical: &PhysicalDeviceInfo,
) -> Result<(ash::Device, vk::Queue), GfxError> {
    // every queue the family offers, all at the same priority
    let priorities = vec![1.0_f32; physical.queue_props.queue_count as usize];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: physical.queue_family,
        queue_count: priorities.len() as u32,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let supported = instance.get_physical_device_features(physical.handle);
    let features = required_features(&supported)?;

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device = instance
        .create_device(physical.handle, &dinfo, None)
        .call("create_device")?;
    let queue = device.get_device_queue(physical.queue_family, 0);
    Ok((device, queue))
}

/// Runs `undo` when `res` is an error, then hands `res` back.
fn or_undo<T, E>(res: Result<T, E>, undo: impl FnOnce()) -> Result<T, E> {
    if res.is_err() {
        undo();
    }
    res
}

/// Instance-level teardown: surface, messenger, instance.
unsafe fn release(
    instance: &Instance,
    debug: Option<DebugMessenger>,
    surface: Option<(&surface::Instance, vk::SurfaceKHR)>,
) {
    if let Some((loader, handle)) = surface {
        loader.destroy_surface(handle, None);
    }
    if let Some(mut debug) = debug {
        debug.destroy();
    }
    instance.destroy_instance(None);
}

impl DeviceContext {
    // STRICT ORDER:
    // 1) instance (WSI extensions + optional debug utils / validation)
    // 2) debug messenger
    // 3) surface from THIS instance
    // 4) physical device + queue family checked against THIS surface
    // 5) logical device + queue
    pub unsafe fn create(window: &dyn WindowSurface, cfg: &GfxConfig) -> Result<Self, GfxError> {
        let dh = window.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let entry = Entry::linked();
        let (instance, validation) = create_instance(&entry, dh, cfg)?;

        let mut debug = None;
        if validation {
            let created = DebugMessenger::create(&entry, &instance);
            debug = Some(or_undo(created, || release(&instance, None, None))?);
        }

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = or_undo(
            ash_window::create_surface(&entry, &instance, dh, wh, None).call("create_surface"),
            || release(&instance, debug.take(), None),
        )?;

        let physical = or_undo(pick_device_and_queue(&instance, &surface_loader, surface), || {
            release(&instance, debug.take(), Some((&surface_loader, surface)))
        })?;
        let memory_props = instance.get_physical_device_memory_properties(physical.handle);
        let (device, queue) = or_undo(create_logical_device(&instance, &physical), || {
            release(&instance, debug.take(), Some((&surface_loader, surface)))
        })?;
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        info!(
            "vk: device = {}, queue family {} ({} queues), validation = {}",
            physical.name, physical.queue_family, physical.queue_props.queue_count, validation
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            physical,
            memory_props,
            device,
            queue,
            swapchain_loader,
        })
    }

    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    pub(crate) unsafe fn wait_idle(&self) -> Result<(), GfxError> {
        self.device.device_wait_idle().call("device_wait_idle")
    }

    /// Reverse creation order. Everything built on top of the device must be
    /// gone already.
    pub(crate) unsafe fn destroy(&mut self) {
        self.device.device_wait_idle().ok();
        self.device.destroy_device(None);
        release(&self.instance, self.debug.take(), Some((&self.surface_loader, self.surface)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn first_graphics_and_present_family_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 16),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let picked = select_queue_family(&families, |_| Ok(true)).unwrap();
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn graphics_without_present_is_skipped() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 4),
            family(vk::QueueFlags::COMPUTE, 2),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let mut asked = Vec::new();
        let picked = select_queue_family(&families, |i| {
            asked.push(i);
            Ok(i == 2)
        })
        .unwrap();
        assert_eq!(picked, Some(2));
        // present support is only queried for graphics-capable families
        assert_eq!(asked, vec![0, 2]);
    }

    #[test]
    fn no_family_means_none() {
        let families = [family(vk::QueueFlags::COMPUTE, 1)];
        assert_eq!(select_queue_family(&families, |_| Ok(true)).unwrap(), None);
        assert_eq!(select_queue_family(&[], |_| Ok(true)).unwrap(), None);
    }

    #[test]
    fn present_query_failure_is_fatal() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let res = select_queue_family(&families, |_| {
            Err(GfxError::from_vk(
                "get_physical_device_surface_support",
                vk::Result::ERROR_SURFACE_LOST_KHR,
            ))
        });
        assert!(res.is_err());
    }

    #[test]
    fn missing_validation_layer_is_fatal_only_when_requested() {
        assert!(!validation_enabled(false, false).unwrap());
        assert!(!validation_enabled(false, true).unwrap());
        assert!(validation_enabled(true, true).unwrap());

        let err = validation_enabled(true, false).unwrap_err();
        assert!(matches!(err, GfxError::MissingLayer(ref name) if name == "VK_LAYER_KHRONOS_validation"));
    }

    #[test]
    fn logic_op_is_required_and_nothing_else_is_enabled() {
        let supported = vk::PhysicalDeviceFeatures {
            logic_op: vk::TRUE,
            geometry_shader: vk::TRUE,
            ..Default::default()
        };
        let enabled = required_features(&supported).unwrap();
        assert_eq!(enabled.logic_op, vk::TRUE);
        assert_eq!(enabled.geometry_shader, vk::FALSE);

        let err = required_features(&vk::PhysicalDeviceFeatures::default()).unwrap_err();
        assert!(matches!(err, GfxError::MissingFeature("logicOp")));
        assert_eq!(err.to_string(), "device feature logicOp is not supported");
    }

    #[test]
    fn undo_runs_only_on_failure() {
        let mut undone = 0;
        let ok: Result<u32, GfxError> = or_undo(Ok(7), || undone += 1);
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(undone, 0);

        let failed: Result<u32, GfxError> = or_undo(Err(GfxError::NoSuitableDevice), || undone += 1);
        assert!(matches!(failed, Err(GfxError::NoSuitableDevice)));
        assert_eq!(undone, 1);
    }
}
