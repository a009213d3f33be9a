// Synchronization primitives and the frame's command buffer
//
// Exactly one set: the engine keeps a single frame in flight, so one fence,
// two semaphores and one reusable command buffer cover every frame.

use super::{timeout_nanos, Context, Presentation};
use crate::error::{FrameError, SyncInitError};
use crate::frame::FrameOps;
use ash::vk;
use glam::Vec4;
use std::sync::Arc;
use std::time::Duration;

/// Command pool/buffer plus the fence and semaphores of the one frame in flight
pub struct FrameSync {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// CPU waits on this before touching the command buffer again
    pub render_fence: vk::Fence,
    /// Acquire -> submit
    pub present_semaphore: vk::Semaphore,
    /// Submit -> present
    pub render_semaphore: vk::Semaphore,
    wait_stages: [vk::PipelineStageFlags; 1],
    context: Arc<Context>,
}

impl FrameSync {
    pub fn new(context: Arc<Context>) -> Result<Self, SyncInitError> {
        // Null handles are valid to destroy, so Drop can clean up a partial set
        let mut sync = Self {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            render_fence: vk::Fence::null(),
            present_semaphore: vk::Semaphore::null(),
            render_semaphore: vk::Semaphore::null(),
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            context,
        };
        let device = sync.context.device.raw.clone();

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(sync.context.device.queue.family)
            // RESET: the one buffer is reset and re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        sync.command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(SyncInitError::CommandPool)?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(sync.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        sync.command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(SyncInitError::CommandBuffer)?[0];

        let fence_info = vk::FenceCreateInfo::builder()
            // Start signaled so the first frame's wait returns immediately
            .flags(vk::FenceCreateFlags::SIGNALED);
        sync.render_fence = unsafe { device.create_fence(&fence_info, None) }
            .map_err(SyncInitError::Fence)?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        sync.present_semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(SyncInitError::Semaphore)?;
        sync.render_semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(SyncInitError::Semaphore)?;

        Ok(sync)
    }

    fn device(&self) -> &ash::Device {
        &self.context.device.raw
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still uses it. This wait is
        // unbounded: after a fence timeout it returns only once the driver
        // finishes the work or reports the device lost.
        if let Err(e) = self.context.device.wait_idle() {
            log::error!("device_wait_idle failed during teardown: {}", e);
        }

        log::debug!("Destroying command pool, fence and semaphores");
        let device = self.device();
        unsafe {
            // Also frees the command buffer
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_fence(self.render_fence, None);
            device.destroy_semaphore(self.present_semaphore, None);
            device.destroy_semaphore(self.render_semaphore, None);
        }
    }
}

impl FrameOps for FrameSync {
    type Target = Presentation;

    fn wait_for_fence(&mut self, timeout: Duration) -> Result<(), FrameError> {
        let result = unsafe {
            self.device()
                .wait_for_fences(&[self.render_fence], true, timeout_nanos(timeout))
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(FrameError::GpuHangSuspected {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(result) => Err(FrameError::Device {
                stage: "wait_fence",
                result,
            }),
        }
    }

    fn reset_fence(&mut self) -> Result<(), FrameError> {
        unsafe { self.device().reset_fences(&[self.render_fence]) }.map_err(|result| {
            FrameError::Device {
                stage: "reset_fence",
                result,
            }
        })
    }

    fn acquire_next_image(
        &mut self,
        target: &Presentation,
        timeout: Duration,
    ) -> Result<u32, FrameError> {
        target
            .swapchain
            .acquire_next_image(timeout, self.present_semaphore)
    }

    fn record(
        &mut self,
        target: &Presentation,
        image_index: u32,
        clear: Vec4,
    ) -> Result<(), FrameError> {
        let device = self.device();
        let cmd = self.command_buffer;
        let record_err = |result| FrameError::Device {
            stage: "record",
            result,
        };

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear.to_array(),
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(target.targets.render_pass)
            .framebuffer(target.targets.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.swapchain.extent,
            })
            .clear_values(&clear_values);

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            // The fence has signalled, so the GPU is done with this buffer
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(record_err)?;
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(record_err)?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            // No pipeline yet: the render pass only clears
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd).map_err(record_err)?;
        }

        Ok(())
    }

    fn submit(&mut self) -> Result<(), FrameError> {
        let wait_semaphores = [self.present_semaphore];
        let signal_semaphores = [self.render_semaphore];
        let command_buffers = [self.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device().queue_submit(
                self.context.device.queue.handle,
                &[submit_info.build()],
                // Signalled when the GPU finishes; next frame waits on it
                self.render_fence,
            )
        }
        .map_err(|result| FrameError::Device {
            stage: "submit",
            result,
        })
    }

    fn present(&mut self, target: &Presentation, image_index: u32) -> Result<bool, FrameError> {
        target.swapchain.present(
            self.context.device.queue.handle,
            image_index,
            &[self.render_semaphore],
        )
    }
}
