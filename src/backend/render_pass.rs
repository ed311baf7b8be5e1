// Render pass and framebuffers for the swap chain
//
// Attachment order is fixed: 0 = colour, 1 = depth-stencil, 2 = resolve.
// With MSAA the colour attachment is the multisampled target and the
// presentable image is the resolve target; without MSAA the presentable
// image is the colour attachment and there is no resolve.

use super::VulkanDevice;
use crate::error::{PresentError, Result};
use ash::vk;
use std::sync::Arc;

/// What an attachment slot of the swap chain render pass holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    Color,
    DepthStencil,
    Resolve,
}

const SINGLE_SAMPLED: &[AttachmentRole] = &[AttachmentRole::Color, AttachmentRole::DepthStencil];
const MULTISAMPLED: &[AttachmentRole] = &[
    AttachmentRole::Color,
    AttachmentRole::DepthStencil,
    AttachmentRole::Resolve,
];

/// Formats and sample count that fully determine the render pass layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentPlan {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

impl AttachmentPlan {
    pub fn new(
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            color_format,
            depth_format,
            samples,
        }
    }

    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    pub fn roles(&self) -> &'static [AttachmentRole] {
        if self.is_multisampled() {
            MULTISAMPLED
        } else {
            SINGLE_SAMPLED
        }
    }

    pub fn attachment_count(&self) -> usize {
        self.roles().len()
    }

    pub fn descriptions(&self) -> Vec<vk::AttachmentDescription> {
        self.roles()
            .iter()
            .map(|role| self.describe(*role))
            .collect()
    }

    fn describe(&self, role: AttachmentRole) -> vk::AttachmentDescription {
        match role {
            AttachmentRole::Color => vk::AttachmentDescription::builder()
                .format(self.color_format)
                .samples(self.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(if self.is_multisampled() {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::PRESENT_SRC_KHR
                })
                .build(),
            AttachmentRole::DepthStencil => vk::AttachmentDescription::builder()
                .format(self.depth_format)
                .samples(self.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::STORE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
            AttachmentRole::Resolve => vk::AttachmentDescription::builder()
                .format(self.color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .build(),
        }
    }

    /// Views for one framebuffer in attachment order.
    ///
    /// `msaa_color` is required exactly when the plan is multisampled.
    pub fn framebuffer_views(
        &self,
        presentable: vk::ImageView,
        msaa_color: Option<vk::ImageView>,
        depth: vk::ImageView,
    ) -> Result<Vec<vk::ImageView>> {
        match (self.is_multisampled(), msaa_color) {
            (true, Some(color)) => Ok(vec![color, depth, presentable]),
            (false, None) => Ok(vec![presentable, depth]),
            (true, None) => Err(PresentError::InvalidState(
                "multisampled pass without a colour target".into(),
            )),
            (false, Some(_)) => Err(PresentError::InvalidState(
                "colour target supplied for a single-sampled pass".into(),
            )),
        }
    }
}

/// Render pass handle tied to the device that created it.
pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub plan: AttachmentPlan,
    device: Arc<VulkanDevice>,
}

impl RenderPass {
    pub fn new(device: Arc<VulkanDevice>, plan: AttachmentPlan) -> Result<Self> {
        let attachments = plan.descriptions();

        let color_ref = [vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];
        let depth_ref = vk::AttachmentReference::builder()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();
        let resolve_ref = [vk::AttachmentReference::builder()
            .attachment(2)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref);
        if plan.is_multisampled() {
            subpass = subpass.resolve_attachments(&resolve_ref);
        }
        let subpasses = [subpass.build()];

        // Depth is shared by both frames in flight, so the dependency also
        // orders depth clears.
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe { device.device.create_render_pass(&render_pass_info, None) }?;

        log::debug!(
            "Render pass: {} attachment(s), {:?}",
            plan.attachment_count(),
            plan.samples
        );

        Ok(Self {
            handle,
            plan,
            device,
        })
    }

    /// One framebuffer over `views` (already in attachment order).
    pub fn create_framebuffer(
        &self,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        if views.len() != self.plan.attachment_count() {
            return Err(PresentError::InvalidState(format!(
                "framebuffer needs {} views, got {}",
                self.plan.attachment_count(),
                views.len()
            )));
        }

        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(self.handle)
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }?;
        Ok(framebuffer)
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_render_pass(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_UNORM;
    const DEPTH: vk::Format = vk::Format::D24_UNORM_S8_UINT;

    #[test]
    fn single_sampled_plan_has_two_attachments() {
        let plan = AttachmentPlan::new(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert!(!plan.is_multisampled());
        assert_eq!(plan.roles(), &[AttachmentRole::Color, AttachmentRole::DepthStencil]);

        let desc = plan.descriptions();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc[0].format, COLOR);
        assert_eq!(desc[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(desc[1].format, DEPTH);
        assert_eq!(desc[1].final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn multisampled_plan_resolves_into_presentable() {
        let plan = AttachmentPlan::new(COLOR, DEPTH, vk::SampleCountFlags::TYPE_4);
        assert_eq!(plan.attachment_count(), 3);

        let desc = plan.descriptions();
        assert_eq!(desc[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(desc[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc[2].load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(desc[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn depth_is_cleared_and_stored() {
        let plan = AttachmentPlan::new(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        let depth = plan.descriptions()[1];
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(depth.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn framebuffer_view_order() {
        let presentable = vk::ImageView::from_raw(1);
        let msaa = vk::ImageView::from_raw(2);
        let depth = vk::ImageView::from_raw(3);

        let single = AttachmentPlan::new(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            single.framebuffer_views(presentable, None, depth).unwrap(),
            vec![presentable, depth]
        );
        assert!(single.framebuffer_views(presentable, Some(msaa), depth).is_err());

        let multi = AttachmentPlan::new(COLOR, DEPTH, vk::SampleCountFlags::TYPE_8);
        assert_eq!(
            multi.framebuffer_views(presentable, Some(msaa), depth).unwrap(),
            vec![msaa, depth, presentable]
        );
        assert!(multi.framebuffer_views(presentable, None, depth).is_err());
    }
}
