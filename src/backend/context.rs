// Vulkan Context - instance, surface, adapter and logical device
//
// Responsibilities:
// - Instance creation (Vulkan 1.1+), validation layers in debug builds
// - Window surface via ash-window
// - Physical device selection (prefer discrete GPU, one graphics+present queue)
// - Logical device + queue creation
//
// Each handle lives in its own owner with a Drop impl. A failed step drops
// the owners created so far, so no partially built context ever escapes.

use crate::error::ContextInitError;
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use winit::raw_window_handle_05::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

/// Oldest Vulkan version the engine runs on
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_1;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Loaded Vulkan library, instance and optional debug messenger
pub struct Instance {
    pub raw: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub entry: Entry,
}

impl Instance {
    fn new(app_name: &str, window: &Window, enable_validation: bool) -> Result<Self, ContextInitError> {
        let entry = unsafe { Entry::load() }?;

        let version = entry
            .try_enumerate_instance_version()
            .map_err(ContextInitError::Instance)?
            .unwrap_or(vk::API_VERSION_1_0);
        if version < MIN_API_VERSION {
            return Err(ContextInitError::UnsupportedApiVersion {
                major: vk::api_version_major(version),
                minor: vk::api_version_minor(version),
            });
        }

        let app_name_cstr = CString::new(app_name).map_err(|_| ContextInitError::InvalidAppName)?;
        let engine_name = c"vk-bootstrap-engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(MIN_API_VERSION);

        // Surface extensions for whatever window system winit is running on
        let mut extensions =
            ash_window::enumerate_required_extensions(window.raw_display_handle())
                .map_err(ContextInitError::WindowHandle)?
                .to_vec();

        let enable_validation = enable_validation && validation_layer_available(&entry);
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(ContextInitError::Instance)?;

        let mut instance = Self {
            raw,
            debug_utils: None,
            entry,
        };

        if enable_validation {
            instance.debug_utils = Some(instance.setup_debug_messenger()?);
            log::info!("Validation layers enabled");
        }

        Ok(instance)
    }

    fn setup_debug_messenger(
        &self,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT), ContextInitError> {
        let debug_utils = DebugUtils::new(&self.entry, &self.raw);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(ContextInitError::DebugMessenger)?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                log::debug!("Destroying debug messenger");
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            log::debug!("Destroying instance");
            self.raw.destroy_instance(None);
        }
    }
}

fn validation_layer_available(entry: &Entry) -> bool {
    let available = entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

    if !available {
        log::warn!(
            "{} not installed, continuing without validation",
            VALIDATION_LAYER.to_string_lossy()
        );
    }
    available
}

/// Presentation surface of the window
pub struct Surface {
    pub loader: khr::Surface,
    pub raw: vk::SurfaceKHR,
}

impl Surface {
    fn new(instance: &Instance, window: &Window) -> Result<Self, ContextInitError> {
        let loader = khr::Surface::new(&instance.entry, &instance.raw);

        let raw = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.raw,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(ContextInitError::Surface)?;

        Ok(Self { loader, raw })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        unsafe { self.loader.destroy_surface(self.raw, None) };
    }
}

/// The single queue used for both graphics and presentation
#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family: u32,
}

/// Logical device on the chosen adapter
pub struct Device {
    pub raw: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue: Queue,
    pub properties: vk::PhysicalDeviceProperties,
}

impl Device {
    fn new(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<Self, ContextInitError> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let raw = unsafe { instance.raw.create_device(physical_device, &create_info, None) }
            .map_err(ContextInitError::Device)?;

        let handle = unsafe { raw.get_device_queue(queue_family, 0) };
        let properties = unsafe { instance.raw.get_physical_device_properties(physical_device) };

        Ok(Self {
            raw,
            physical_device,
            queue: Queue {
                handle,
                family: queue_family,
            },
            properties,
        })
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.raw.device_wait_idle() }
    }

    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::debug!("Destroying device");
        unsafe { self.raw.destroy_device(None) };
    }
}

/// One GPU session: everything else is created from and destroyed before it
pub struct Context {
    // Field order is drop order: device, then surface, then instance
    pub device: Device,
    pub surface: Surface,
    pub instance: Instance,
}

impl Context {
    /// Build the context for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    pub fn new(
        app_name: &str,
        window: &Window,
        enable_validation: bool,
    ) -> Result<Self, ContextInitError> {
        log::info!("Creating Vulkan context: {}", app_name);

        let instance = Instance::new(app_name, window, enable_validation)?;
        let surface = Surface::new(&instance, window)?;

        let physical_devices = unsafe { instance.raw.enumerate_physical_devices() }
            .map_err(ContextInitError::Enumerate)?;
        let candidates = physical_devices
            .iter()
            .map(|&physical_device| describe_adapter(&instance, &surface, physical_device))
            .collect::<Result<Vec<_>, _>>()?;

        let (chosen, queue_family) = select_adapter(&candidates)?;
        let device = Device::new(&instance, physical_devices[chosen], queue_family)?;

        log::info!("Selected GPU: {}", device.name());
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(device.properties.api_version),
            vk::api_version_minor(device.properties.api_version),
            vk::api_version_patch(device.properties.api_version)
        );
        log::info!("Graphics/present queue family: {}", queue_family);

        Ok(Self {
            device,
            surface,
            instance,
        })
    }
}

/// What adapter selection needs to know about one physical device
#[derive(Debug, Clone)]
pub struct AdapterCandidate {
    pub api_version: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub supports_swapchain: bool,
    /// Per queue family: (graphics, present to the surface)
    pub queue_families: Vec<(bool, bool)>,
}

fn describe_adapter(
    instance: &Instance,
    surface: &Surface,
    physical_device: vk::PhysicalDevice,
) -> Result<AdapterCandidate, ContextInitError> {
    let props = unsafe { instance.raw.get_physical_device_properties(physical_device) };

    let extensions = unsafe {
        instance
            .raw
            .enumerate_device_extension_properties(physical_device)
    }
    .map_err(ContextInitError::Enumerate)?;
    let supports_swapchain = extensions
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == khr::Swapchain::name());

    let families = unsafe {
        instance
            .raw
            .get_physical_device_queue_family_properties(physical_device)
    };
    let queue_families = families
        .iter()
        .enumerate()
        .map(|(index, family)| {
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = unsafe {
                surface.loader.get_physical_device_surface_support(
                    physical_device,
                    index as u32,
                    surface.raw,
                )
            }
            .map_err(ContextInitError::Enumerate)?;
            Ok::<_, ContextInitError>((graphics, present))
        })
        .collect::<Result<Vec<_>, ContextInitError>>()?;

    Ok(AdapterCandidate {
        api_version: props.api_version,
        device_type: props.device_type,
        supports_swapchain,
        queue_families,
    })
}

/// Pick the adapter and queue family to use.
///
/// Adapters must support Vulkan 1.1 and the swapchain extension. Among those
/// with a queue family doing both graphics and present, discrete GPUs beat
/// integrated ones beat the rest; ties go to the first enumerated.
pub fn select_adapter(candidates: &[AdapterCandidate]) -> Result<(usize, u32), ContextInitError> {
    let mut capable_seen = false;
    let mut best: Option<(usize, u32)> = None;
    let mut best_score = 0;

    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.api_version < MIN_API_VERSION || !candidate.supports_swapchain {
            continue;
        }
        capable_seen = true;

        let Some(family) = candidate
            .queue_families
            .iter()
            .position(|&(graphics, present)| graphics && present)
        else {
            continue;
        };

        let score = match candidate.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 1,
        };

        if score > best_score {
            best_score = score;
            best = Some((index, family as u32));
        }
    }

    match best {
        Some(choice) => Ok(choice),
        None if capable_seen => Err(ContextInitError::NoGraphicsQueue),
        None => Err(ContextInitError::NoSuitableDevice),
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(
        api_version: u32,
        device_type: vk::PhysicalDeviceType,
        queue_families: Vec<(bool, bool)>,
    ) -> AdapterCandidate {
        AdapterCandidate {
            api_version,
            device_type,
            supports_swapchain: true,
            queue_families,
        }
    }

    #[test]
    fn prefers_discrete_gpu() {
        let candidates = [
            adapter(
                vk::API_VERSION_1_3,
                vk::PhysicalDeviceType::INTEGRATED_GPU,
                vec![(true, true)],
            ),
            adapter(
                vk::API_VERSION_1_2,
                vk::PhysicalDeviceType::DISCRETE_GPU,
                vec![(false, true), (true, true)],
            ),
        ];
        assert_eq!(select_adapter(&candidates).unwrap(), (1, 1));
    }

    #[test]
    fn ties_go_to_first_enumerated() {
        let candidates = [
            adapter(
                vk::API_VERSION_1_1,
                vk::PhysicalDeviceType::DISCRETE_GPU,
                vec![(true, true)],
            ),
            adapter(
                vk::API_VERSION_1_3,
                vk::PhysicalDeviceType::DISCRETE_GPU,
                vec![(true, true)],
            ),
        ];
        assert_eq!(select_adapter(&candidates).unwrap(), (0, 0));
    }

    #[test]
    fn skips_adapters_below_minimum_version() {
        let candidates = [
            adapter(
                vk::API_VERSION_1_0,
                vk::PhysicalDeviceType::DISCRETE_GPU,
                vec![(true, true)],
            ),
            adapter(
                vk::API_VERSION_1_1,
                vk::PhysicalDeviceType::CPU,
                vec![(true, true)],
            ),
        ];
        assert_eq!(select_adapter(&candidates).unwrap(), (1, 0));
    }

    #[test]
    fn split_graphics_and_present_is_no_graphics_queue() {
        let candidates = [adapter(
            vk::API_VERSION_1_2,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vec![(true, false), (false, true)],
        )];
        assert!(matches!(
            select_adapter(&candidates),
            Err(ContextInitError::NoGraphicsQueue)
        ));
    }

    #[test]
    fn no_capable_adapter_is_no_suitable_device() {
        assert!(matches!(
            select_adapter(&[]),
            Err(ContextInitError::NoSuitableDevice)
        ));

        let mut without_swapchain = adapter(
            vk::API_VERSION_1_3,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vec![(true, true)],
        );
        without_swapchain.supports_swapchain = false;
        assert!(matches!(
            select_adapter(&[without_swapchain]),
            Err(ContextInitError::NoSuitableDevice)
        ));
    }
}
