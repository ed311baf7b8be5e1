// Host-facing frame interface
//
// The engine never records draw commands itself. Each frame it hands the
// host renderer a begun command buffer plus the framebuffer bundle of the
// acquired image, and ends the buffer once the renderer returns.

use crate::backend::render_pass::{AttachmentPlan, AttachmentRole};
use crate::error::Result;
use ash::vk;

/// Snapshot of the live swap chain, passed to the renderer after every rebuild.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainInfo {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: usize,
    pub samples: vk::SampleCountFlags,
    pub render_pass: vk::RenderPass,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
}

impl SwapchainInfo {
    pub fn aspect_ratio(&self) -> f32 {
        if self.extent.height == 0 {
            return 1.0;
        }
        self.extent.width as f32 / self.extent.height as f32
    }
}

/// Everything the renderer needs to record one frame.
pub struct FrameContext<'a> {
    pub device: &'a ash::Device,
    /// Reset and begun; ended by the engine after `record` returns.
    pub command_buffer: vk::CommandBuffer,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub image_view: vk::ImageView,
    pub image_index: u32,
    pub frame_slot: usize,
    pub extent: vk::Extent2D,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub samples: vk::SampleCountFlags,
    pub attachments: AttachmentPlan,
}

impl FrameContext<'_> {
    /// Begin the swap chain render pass, clearing every attachment.
    pub fn begin_render_pass(&self, clear_color: [f32; 4]) {
        let clear_values = clear_values(self.attachments.roles(), clear_color);
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffer)
            .render_area(self.scissor)
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
    }

    /// Set dynamic viewport and scissor to the full swap chain extent.
    pub fn set_full_viewport(&self) {
        unsafe {
            self.device
                .cmd_set_viewport(self.command_buffer, 0, &[self.viewport]);
            self.device
                .cmd_set_scissor(self.command_buffer, 0, &[self.scissor]);
        }
    }
}

/// One clear value per attachment, in attachment order.
pub fn clear_values(roles: &[AttachmentRole], clear_color: [f32; 4]) -> Vec<vk::ClearValue> {
    roles
        .iter()
        .map(|role| match role {
            AttachmentRole::Color | AttachmentRole::Resolve => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            AttachmentRole::DepthStencil => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        })
        .collect()
}

/// Application strategy plugged into the presenter.
pub trait FrameRenderer {
    /// Record draw commands for one frame.
    fn record(&mut self, frame: &FrameContext<'_>) -> Result<()>;

    /// Called before the first frame recorded against a new swap chain.
    fn on_swapchain_rebuilt(&mut self, _info: &SwapchainInfo) {}

    /// Pointer moved by (dx, dy) pixels while dragging.
    fn on_pointer_moved(&mut self, _dx: f32, _dy: f32) {}

    /// Wheel / touchpad scroll.
    fn on_scroll(&mut self, _dx: f32, _dy: f32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_value_per_attachment() {
        let single = [AttachmentRole::Color, AttachmentRole::DepthStencil];
        let values = clear_values(&single, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(values.len(), 2);
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }

        let multi = [
            AttachmentRole::Color,
            AttachmentRole::DepthStencil,
            AttachmentRole::Resolve,
        ];
        assert_eq!(clear_values(&multi, [0.0; 4]).len(), 3);
    }

    #[test]
    fn aspect_ratio_handles_zero_height() {
        let mut info = SwapchainInfo {
            extent: vk::Extent2D {
                width: 1600,
                height: 900,
            },
            format: vk::Format::B8G8R8A8_UNORM,
            present_mode: vk::PresentModeKHR::FIFO,
            image_count: 3,
            samples: vk::SampleCountFlags::TYPE_1,
            render_pass: vk::RenderPass::null(),
            viewport: vk::Viewport::default(),
            scissor: vk::Rect2D::default(),
        };
        assert!((info.aspect_ratio() - 16.0 / 9.0).abs() < 1e-6);
        info.extent.height = 0;
        assert_eq!(info.aspect_ratio(), 1.0);
    }
}
