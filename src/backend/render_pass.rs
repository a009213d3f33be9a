// Render pass and framebuffers
//
// One colour attachment matching the swapchain format, cleared on load and
// stored for presentation. One framebuffer per swapchain image view.

use super::{Context, Swapchain};
use crate::error::PresentationError;
use ash::vk;
use std::sync::Arc;

/// Render pass plus the framebuffers bound to it
pub struct RenderTargets {
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    context: Arc<Context>,
}

impl RenderTargets {
    pub fn new(context: Arc<Context>, swapchain: &Swapchain) -> Result<Self, PresentationError> {
        let render_pass = create_render_pass(&context.device.raw, swapchain.format)?;

        let mut targets = Self {
            render_pass,
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
            context,
        };

        // Any failure drops `targets`, releasing the framebuffers built so far
        for (index, &image_view) in swapchain.image_views.iter().enumerate() {
            let attachments = [image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            // On error `targets` drops here, destroying framebuffers 0..index
            let framebuffer =
                unsafe { targets.context.device.raw.create_framebuffer(&framebuffer_info, None) }
                    .map_err(|result| PresentationError::Framebuffer { index, result })?;
            targets.framebuffers.push(framebuffer);
        }

        check_counts(
            swapchain.images.len(),
            swapchain.image_views.len(),
            targets.framebuffers.len(),
        )?;

        log::info!("Created {} framebuffers", targets.framebuffers.len());

        Ok(targets)
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        log::debug!(
            "Destroying {} framebuffers and render pass",
            self.framebuffers.len()
        );
        let device = &self.context.device.raw;
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// The swapchain image being rendered to: cleared, kept, handed to present
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()
}

fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> Result<vk::RenderPass, PresentationError> {
    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments)
        .build();

    // The layout transition waits for the acquire semaphore's stage
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = [color_attachment(format)];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }
        .map_err(PresentationError::RenderPass)
}

/// Every swapchain image needs exactly one view and one framebuffer
pub fn check_counts(
    images: usize,
    views: usize,
    framebuffers: usize,
) -> Result<(), PresentationError> {
    if images == views && views == framebuffers {
        Ok(())
    } else {
        Err(PresentationError::CountMismatch {
            images,
            views,
            framebuffers,
        })
    }
}
