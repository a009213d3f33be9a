// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Frame pacing wins over latency here: FIFO (vsync) unless configured
// otherwise and supported.

use super::{timeout_nanos, Context};
use crate::error::{FrameError, PresentationError};
use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    context: Arc<Context>,
}

impl Swapchain {
    pub fn new(
        context: Arc<Context>,
        desired_extent: vk::Extent2D,
        preferred_mode: vk::PresentModeKHR,
    ) -> Result<Self, PresentationError> {
        let device = &context.device;
        let surface = &context.surface;

        // Query surface capabilities
        let surface_caps = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(device.physical_device, surface.raw)
        }
        .map_err(PresentationError::SurfaceQuery)?;

        // Query supported formats
        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(device.physical_device, surface.raw)
        }
        .map_err(PresentationError::SurfaceQuery)?;

        // Query supported present modes
        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(device.physical_device, surface.raw)
        }
        .map_err(PresentationError::SurfaceQuery)?;

        let surface_format =
            choose_surface_format(&formats).ok_or(PresentationError::NoSurfaceFormat)?;
        let present_mode = choose_present_mode(&present_modes, preferred_mode);
        let extent = choose_extent(&surface_caps, desired_extent);
        let image_count = choose_image_count(&surface_caps);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let swapchain_loader = khr::Swapchain::new(&context.instance.raw, &device.raw);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.raw)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(PresentationError::Swapchain)?;

        // From here on, Drop cleans up whatever has been created
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            context,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(this.swapchain) }
            .map_err(PresentationError::Swapchain)?;

        log::info!("Created swapchain with {} images", this.images.len());

        for &image in &this.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(this.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { this.context.device.raw.create_image_view(&create_info, None) }
                .map_err(PresentationError::ImageView)?;
            this.image_views.push(view);
        }

        Ok(this)
    }

    /// Acquire next image for rendering, signalling `semaphore` when it is ready
    pub fn acquire_next_image(
        &self,
        timeout: Duration,
        semaphore: vk::Semaphore,
    ) -> Result<u32, FrameError> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_nanos(timeout),
                semaphore,
                vk::Fence::null(),
            )
        };

        map_acquire_result(result, timeout)
    }

    /// Present rendered image to screen. `Ok(true)` means suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, FrameError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SwapchainOutOfDate),
            Err(e) => Err(FrameError::Present(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::debug!(
            "Destroying {} image views and swapchain",
            self.image_views.len()
        );
        unsafe {
            for &view in &self.image_views {
                self.context.device.raw.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Timeouts and out-of-date are fatal frame errors
pub fn map_acquire_result(
    result: VkResult<(u32, bool)>,
    timeout: Duration,
) -> Result<u32, FrameError> {
    match result {
        // A suboptimal image is still a valid image to render into
        Ok((index, _suboptimal)) => Ok(index),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
            Err(FrameError::SwapchainAcquireTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SwapchainOutOfDate),
        Err(result) => Err(FrameError::Device {
            stage: "acquire",
            result,
        }),
    }
}

/// Prefer 8-bit BGRA sRGB, else whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode if the surface offers it. FIFO is always supported.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's own extent when it dictates one, else `desired` clamped
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: desired
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: desired
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        image_count = caps.max_image_count;
    }
    image_count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn picks_srgb_bgra_when_offered() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::FIFO),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_follows_surface_or_clamps_desired() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 700,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 4096,
            },
            ..Default::default()
        };
        let desired = vk::Extent2D {
            width: 1280,
            height: 700,
        };
        assert_eq!(choose_extent(&caps, desired), caps.current_extent);

        caps.current_extent.width = u32::MAX;
        let clamped = choose_extent(&caps, desired);
        assert_eq!((clamped.width, clamped.height), (1024, 700));
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn acquire_errors_map_to_frame_errors() {
        let timeout = Duration::from_millis(250);

        assert_eq!(map_acquire_result(Ok((2, false)), timeout).unwrap(), 2);
        assert_eq!(map_acquire_result(Ok((1, true)), timeout).unwrap(), 1);

        for result in [vk::Result::TIMEOUT, vk::Result::NOT_READY] {
            assert!(matches!(
                map_acquire_result(Err(result), timeout),
                Err(FrameError::SwapchainAcquireTimeout { timeout_ms: 250 })
            ));
        }
        assert!(matches!(
            map_acquire_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), timeout),
            Err(FrameError::SwapchainOutOfDate)
        ));
        assert!(matches!(
            map_acquire_result(Err(vk::Result::ERROR_DEVICE_LOST), timeout),
            Err(FrameError::Device {
                stage: "acquire",
                result: vk::Result::ERROR_DEVICE_LOST
            })
        ));
    }
}
