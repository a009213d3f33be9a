// Shader module loading
//
// Vulkan consumes SPIR-V as 4-byte words. The words come from the shader
// cache, already aligned, so no byte reinterpretation happens here.

use super::Context;
use crate::error::ShaderError;
use ash::vk;
use std::sync::Arc;

/// A shader module, destroyed on drop
pub struct ShaderModule {
    pub raw: vk::ShaderModule,
    context: Arc<Context>,
}

impl ShaderModule {
    pub fn new(context: Arc<Context>, code: &[u32]) -> Result<Self, ShaderError> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let raw = unsafe { context.device.raw.create_shader_module(&create_info, None) }
            .map_err(ShaderError::Module)?;

        Ok(Self { raw, context })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .raw
                .destroy_shader_module(self.raw, None)
        };
    }
}
