// Swapchain - Window presentation
//
// Negotiation (format, present mode, extent, image count, sharing) is pure
// and runs against a queried `SurfaceSupport`. Everything derived from the
// swap chain lives in one bundle that is built and torn down as a unit:
// image views, MSAA colour target, depth target, render pass, framebuffers
// and the per-image acquire semaphores.

use super::allocator::AllocatedImage;
use super::attachments::AttachmentProvisioner;
use super::device::{DeviceFeatureConfig, QueueFamilyIndices};
use super::render_pass::{AttachmentPlan, RenderPass};
use super::slots::{AcquireCursor, SlotArray, IMAGE_SLOT_CAPACITY};
use super::surface::SurfaceSupport;
use super::VulkanDevice;
use crate::error::{PresentError, Result};
use ash::vk;
use std::sync::Arc;

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

// ─────────────────────────────────────────────────────────────────────────────
// NEGOTIATION
// ─────────────────────────────────────────────────────────────────────────────

/// 8-bit BGRA in the sRGB non-linear colour space, else the first format offered.
///
/// A single `UNDEFINED` entry means the surface has no preference.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    match formats {
        [] => Err(PresentError::SurfaceQuery("surface reports no formats".into())),
        [only] if only.format == vk::Format::UNDEFINED => Ok(PREFERRED_FORMAT),
        _ => Ok(formats
            .iter()
            .copied()
            .find(|f| {
                f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
            })
            .unwrap_or(formats[0])),
    }
}

/// FIFO when vsync is requested; otherwise MAILBOX, then IMMEDIATE, then FIFO.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    // FIFO is always supported
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, unless it reports the "window decides" sentinel,
/// in which case the requested size is clamped to the surface limits.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// min + 1, capped by the surface maximum (0 = unbounded) and the slot capacity.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR, capacity: usize) -> Result<u32> {
    let mut count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count = count.min(caps.max_image_count);
    }
    count = count.min(capacity as u32);

    if count < caps.min_image_count.max(1) {
        return Err(PresentError::SwapchainCreate(format!(
            "surface needs at least {} images, slot capacity is {}",
            caps.min_image_count, capacity
        )));
    }
    Ok(count)
}

/// Concurrent sharing across both families when they differ, exclusive otherwise.
pub fn choose_sharing(families: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_unified() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

/// Fully negotiated swap chain parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn negotiate(
        support: &SurfaceSupport,
        features: &DeviceFeatureConfig,
        requested: vk::Extent2D,
        families: &QueueFamilyIndices,
    ) -> Result<Self> {
        if support.present_modes.is_empty() {
            return Err(PresentError::SurfaceQuery("surface reports no present modes".into()));
        }
        let caps = &support.capabilities;
        let (sharing_mode, queue_family_indices) = choose_sharing(families);

        Ok(Self {
            surface_format: choose_surface_format(&support.formats)?,
            present_mode: choose_present_mode(&support.present_modes, features.vsync),
            extent: choose_extent(caps, requested),
            image_count: choose_image_count(caps, IMAGE_SLOT_CAPACITY)?,
            sharing_mode,
            queue_family_indices,
            pre_transform: caps.current_transform,
        })
    }

    /// A minimised window can report a 0x0 current extent; no swap chain can be built then.
    pub fn has_zero_extent(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

/// Full-extent viewport with the [0, 1] depth range.
pub fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BUNDLE
// ─────────────────────────────────────────────────────────────────────────────

/// One presentable image with its view, framebuffer and acquire semaphore.
pub struct ImageSlot {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    /// Signaled by the acquire that returned this image. Moves between slots,
    /// see [`AcquireCursor`].
    pub acquire_semaphore: vk::Semaphore,
    device: Arc<VulkanDevice>,
}

impl ImageSlot {
    fn destroy_acquire_semaphore(&mut self) {
        if self.acquire_semaphore != vk::Semaphore::null() {
            unsafe { self.device.device.destroy_semaphore(self.acquire_semaphore, None) };
            self.acquire_semaphore = vk::Semaphore::null();
        }
    }

    fn destroy_framebuffer(&mut self) {
        if self.framebuffer != vk::Framebuffer::null() {
            unsafe { self.device.device.destroy_framebuffer(self.framebuffer, None) };
            self.framebuffer = vk::Framebuffer::null();
        }
    }
}

impl Drop for ImageSlot {
    fn drop(&mut self) {
        self.destroy_acquire_semaphore();
        self.destroy_framebuffer();
        if self.view != vk::ImageView::null() {
            unsafe { self.device.device.destroy_image_view(self.view, None) };
        }
    }
}

/// Result of asking the swap chain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of handing an image back for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Displayed, but the swap chain should be rebuilt (suboptimal or out of date).
    NeedsRebuild,
}

/// Swap chain plus every object derived from it.
///
/// Fields are optional so teardown can run in strict reverse creation order
/// and so a partially built bundle cleans up after itself.
pub struct SwapchainBundle {
    pub plan: SwapchainPlan,
    pub attachments: AttachmentPlan,
    slots: SlotArray<ImageSlot, IMAGE_SLOT_CAPACITY>,
    render_pass: Option<RenderPass>,
    depth: Option<AllocatedImage>,
    msaa_color: Option<AllocatedImage>,
    swapchain: vk::SwapchainKHR,
    device: Arc<VulkanDevice>,
}

impl SwapchainBundle {
    /// Build order: swap chain, image list, MSAA colour target, image views,
    /// depth target, render pass, framebuffers, acquire semaphores.
    pub fn create(
        device: Arc<VulkanDevice>,
        provisioner: &AttachmentProvisioner<'_>,
        features: &DeviceFeatureConfig,
        plan: SwapchainPlan,
    ) -> Result<Self> {
        let samples = features.sample_count();
        let depth_format = provisioner.depth_format()?;
        let attachments = AttachmentPlan::new(plan.surface_format.format, depth_format, samples);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}, {} images, {:?}",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.present_mode,
            plan.image_count,
            samples
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface.handle)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing_mode)
            .queue_family_indices(&plan.queue_family_indices)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| PresentError::SwapchainCreate(e.to_string()))?;

        let mut bundle = Self {
            plan,
            attachments,
            slots: SlotArray::new(),
            render_pass: None,
            depth: None,
            msaa_color: None,
            swapchain,
            device,
        };
        bundle.populate(provisioner)?;

        log::info!("Created swapchain with {} images", bundle.slots.len());
        Ok(bundle)
    }

    fn populate(&mut self, provisioner: &AttachmentProvisioner<'_>) -> Result<()> {
        let device = Arc::clone(&self.device);
        let extent = self.plan.extent;
        let format = self.plan.surface_format.format;

        let images = unsafe { device.swapchain_loader.get_swapchain_images(self.swapchain) }?;
        if images.len() > IMAGE_SLOT_CAPACITY {
            return Err(PresentError::SwapchainCreate(format!(
                "driver returned {} images, slot capacity is {}",
                images.len(),
                IMAGE_SLOT_CAPACITY
            )));
        }

        if self.attachments.is_multisampled() {
            self.msaa_color =
                Some(provisioner.create_color_target(format, extent, self.attachments.samples)?);
        }

        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
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
            let view = unsafe { device.device.create_image_view(&view_info, None) }
                .map_err(|e| PresentError::SwapchainCreate(format!("image view: {}", e)))?;

            self.slots.push(ImageSlot {
                image,
                view,
                framebuffer: vk::Framebuffer::null(),
                acquire_semaphore: vk::Semaphore::null(),
                device: Arc::clone(&device),
            })?;
        }

        self.depth = Some(provisioner.create_depth_target(
            self.attachments.depth_format,
            extent,
            self.attachments.samples,
        )?);

        let render_pass = RenderPass::new(Arc::clone(&device), self.attachments)?;

        let msaa_view = self.msaa_color.as_ref().map(|c| c.view);
        let depth_view = self.depth.as_ref().map_or(vk::ImageView::null(), |d| d.view);
        for slot in self.slots.iter_mut() {
            let views = self
                .attachments
                .framebuffer_views(slot.view, msaa_view, depth_view)?;
            slot.framebuffer = render_pass.create_framebuffer(&views, extent)?;
        }
        self.render_pass = Some(render_pass);

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        for slot in self.slots.iter_mut() {
            slot.acquire_semaphore = unsafe { device.device.create_semaphore(&semaphore_info, None) }
                .map_err(|e| PresentError::SyncObject(format!("acquire semaphore: {}", e)))?;
        }

        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Result<&ImageSlot> {
        self.slots.slot(index)
    }

    pub fn render_pass(&self) -> Result<vk::RenderPass> {
        self.render_pass
            .as_ref()
            .map(|rp| rp.handle)
            .ok_or_else(|| PresentError::InvalidState("render pass not built".into()))
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn viewport(&self) -> vk::Viewport {
        viewport_for(self.plan.extent)
    }

    pub fn scissor(&self) -> vk::Rect2D {
        scissor_for(self.plan.extent)
    }

    fn acquire(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result.map_err(PresentError::from) {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(e) if e.is_out_of_date() => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e),
        }
    }

    fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.device.swapchain_loader.queue_present(queue, &present_info) };

        match result.map_err(PresentError::from) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::NeedsRebuild),
            Err(e) if e.is_out_of_date() => Ok(PresentOutcome::NeedsRebuild),
            Err(e) => Err(e),
        }
    }
}

/// Objects owned by a bundle, in the order `create` and `populate` build them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BundlePart {
    Swapchain,
    MsaaColor,
    ImageViews,
    Depth,
    RenderPass,
    Framebuffers,
    AcquireSemaphores,
}

const BUILD_ORDER: [BundlePart; 7] = [
    BundlePart::Swapchain,
    BundlePart::MsaaColor,
    BundlePart::ImageViews,
    BundlePart::Depth,
    BundlePart::RenderPass,
    BundlePart::Framebuffers,
    BundlePart::AcquireSemaphores,
];

fn teardown_order() -> impl Iterator<Item = BundlePart> {
    BUILD_ORDER.into_iter().rev()
}

impl SwapchainBundle {
    fn release(&mut self, part: BundlePart) {
        match part {
            BundlePart::AcquireSemaphores => {
                for slot in self.slots.iter_mut() {
                    slot.destroy_acquire_semaphore();
                }
            }
            BundlePart::Framebuffers => {
                for slot in self.slots.iter_mut() {
                    slot.destroy_framebuffer();
                }
            }
            BundlePart::RenderPass => drop(self.render_pass.take()),
            BundlePart::Depth => drop(self.depth.take()),
            BundlePart::ImageViews => self.slots.drain_reverse().for_each(drop),
            BundlePart::MsaaColor => drop(self.msaa_color.take()),
            BundlePart::Swapchain => {
                if self.swapchain != vk::SwapchainKHR::null() {
                    unsafe {
                        self.device
                            .swapchain_loader
                            .destroy_swapchain(self.swapchain, None)
                    };
                    self.swapchain = vk::SwapchainKHR::null();
                }
            }
        }
    }
}

impl Drop for SwapchainBundle {
    fn drop(&mut self) {
        for part in teardown_order() {
            self.release(part);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MANAGER
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the live bundle and the acquire cursor across rebuilds.
pub struct SwapchainManager {
    bundle: Option<SwapchainBundle>,
    cursor: AcquireCursor,
    device: Arc<VulkanDevice>,
}

impl SwapchainManager {
    pub fn new(device: Arc<VulkanDevice>) -> Self {
        Self {
            bundle: None,
            cursor: AcquireCursor::new(),
            device,
        }
    }

    /// Tear down the current bundle (after a device-idle barrier) and build a new one.
    ///
    /// Returns `false` without building when the surface reports a zero extent;
    /// the manager is then left without a bundle until the next attempt.
    pub fn recreate(
        &mut self,
        provisioner: &AttachmentProvisioner<'_>,
        features: &DeviceFeatureConfig,
        requested: vk::Extent2D,
    ) -> Result<bool> {
        self.destroy()?;
        self.cursor.reset();

        let support = self.device.surface.support(self.device.physical_device)?;
        let plan =
            SwapchainPlan::negotiate(&support, features, requested, &self.device.queue_families)?;
        if plan.has_zero_extent() {
            log::debug!("Surface extent is zero, swapchain not built");
            return Ok(false);
        }

        let bundle = SwapchainBundle::create(Arc::clone(&self.device), provisioner, features, plan)?;
        self.bundle = Some(bundle);
        Ok(true)
    }

    /// Destroy the bundle if one exists. Idempotent.
    pub fn destroy(&mut self) -> Result<()> {
        if self.bundle.is_some() {
            self.device.wait_idle()?;
            self.bundle = None;
        }
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.bundle.is_some()
    }

    pub fn bundle(&self) -> Result<&SwapchainBundle> {
        self.bundle
            .as_ref()
            .ok_or_else(|| PresentError::InvalidState("no swap chain".into()))
    }

    /// The acquired image between acquire and present; afterwards the slot
    /// whose semaphore the next acquire signals.
    pub fn current_image(&self) -> usize {
        self.cursor.current()
    }

    /// Acquire the next image, signaling the current slot's semaphore and
    /// re-pairing it with whichever image the driver returned.
    pub fn acquire(&mut self) -> Result<AcquireOutcome> {
        let bundle = self
            .bundle
            .as_mut()
            .ok_or_else(|| PresentError::InvalidState("no swap chain".into()))?;

        let semaphore = bundle.slots.slot(self.cursor.current())?.acquire_semaphore;
        let outcome = bundle.acquire(semaphore)?;

        if let AcquireOutcome::Acquired { index, .. } = outcome {
            self.cursor
                .settle(&mut bundle.slots, index as usize, |slot| &mut slot.acquire_semaphore)?;
        }
        Ok(outcome)
    }

    /// Present the current image once `wait` is signaled, then step the cursor.
    pub fn present(&mut self, queue: vk::Queue, wait: vk::Semaphore) -> Result<PresentOutcome> {
        let image_index = self.current_image() as u32;
        let bundle = self.bundle()?;
        let image_count = bundle.image_count();
        let result = bundle.present(queue, image_index, &[wait]);
        self.cursor.advance(image_count);
        result
    }

    /// Step the cursor past an image whose frame was abandoned after acquire.
    pub fn skip_image(&mut self) {
        if let Some(bundle) = self.bundle.as_ref() {
            self.cursor.advance(bundle.image_count());
        }
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::warn!("Swapchain teardown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn support(min: u32, max: u32, modes: &[vk::PresentModeKHR]) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: caps(min, max),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: modes.to_vec(),
        }
    }

    const UNIFIED: QueueFamilyIndices = QueueFamilyIndices {
        graphics: 0,
        present: 0,
    };

    const EXTENT_800X600: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn preferred_format_selected_when_present() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            PREFERRED_FORMAT,
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), PREFERRED_FORMAT);
    }

    #[test]
    fn undefined_only_format_means_free_choice() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(choose_surface_format(&formats).unwrap(), PREFERRED_FORMAT);
    }

    #[test]
    fn first_format_is_fallback() {
        let first = vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        let formats = [
            first,
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), first);
    }

    #[test]
    fn empty_format_list_is_an_error() {
        let err = choose_surface_format(&[]).unwrap_err();
        assert!(matches!(err, PresentError::SurfaceQuery(_)));
    }

    #[test]
    fn vsync_always_uses_fifo() {
        let modes = [
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn no_vsync_prefers_mailbox_then_immediate() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);

        let no_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&no_mailbox, false), vk::PresentModeKHR::IMMEDIATE);

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&fifo_only, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn current_extent_wins_unless_sentinel() {
        let c = caps(2, 3);
        let requested = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        assert_eq!(choose_extent(&c, requested), EXTENT_800X600);

        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        c.max_image_extent = vk::Extent2D {
            width: 1600,
            height: 900,
        };
        c.min_image_extent = vk::Extent2D {
            width: 100,
            height: 100,
        };
        assert_eq!(
            choose_extent(&c, requested),
            vk::Extent2D {
                width: 1600,
                height: 900
            }
        );
        assert_eq!(
            choose_extent(&c, vk::Extent2D { width: 10, height: 10 }),
            vk::Extent2D {
                width: 100,
                height: 100
            }
        );
    }

    #[test]
    fn image_count_is_min_plus_one_within_bounds() {
        assert_eq!(choose_image_count(&caps(2, 3), IMAGE_SLOT_CAPACITY).unwrap(), 3);
        assert_eq!(choose_image_count(&caps(2, 2), IMAGE_SLOT_CAPACITY).unwrap(), 2);
        // Unbounded surface maximum, capped by slots.
        assert_eq!(choose_image_count(&caps(3, 0), IMAGE_SLOT_CAPACITY).unwrap(), 3);
        assert_eq!(choose_image_count(&caps(1, 0), IMAGE_SLOT_CAPACITY).unwrap(), 2);
    }

    #[test]
    fn image_count_never_exceeds_limits() {
        for min in 1..=3u32 {
            for max in [0u32, min, min + 1, 8] {
                let c = caps(min, max);
                let count = choose_image_count(&c, IMAGE_SLOT_CAPACITY).unwrap();
                assert!(count >= min);
                assert!(count as usize <= IMAGE_SLOT_CAPACITY);
                if max > 0 {
                    assert!(count <= max);
                }
            }
        }
    }

    #[test]
    fn surface_needing_more_images_than_slots_is_rejected() {
        let err = choose_image_count(&caps(4, 8), IMAGE_SLOT_CAPACITY).unwrap_err();
        assert!(matches!(err, PresentError::SwapchainCreate(_)));
    }

    #[test]
    fn sharing_follows_queue_families() {
        assert_eq!(choose_sharing(&UNIFIED), (vk::SharingMode::EXCLUSIVE, vec![]));
        let split = QueueFamilyIndices {
            graphics: 0,
            present: 2,
        };
        assert_eq!(choose_sharing(&split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn vsync_on_two_to_three_images_negotiates_triple_fifo() {
        let features = DeviceFeatureConfig {
            vsync: true,
            msaa_enabled: false,
            ..Default::default()
        };
        let s = support(
            2,
            3,
            &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        );
        let plan = SwapchainPlan::negotiate(&s, &features, EXTENT_800X600, &UNIFIED).unwrap();
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(plan.extent, EXTENT_800X600);
        assert_eq!(plan.sharing_mode, vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    fn no_vsync_with_mailbox_negotiates_mailbox() {
        let features = DeviceFeatureConfig::default();
        let s = support(
            2,
            0,
            &[
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::MAILBOX,
            ],
        );
        let plan = SwapchainPlan::negotiate(&s, &features, EXTENT_800X600, &UNIFIED).unwrap();
        assert_eq!(plan.present_mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn empty_present_modes_fail_negotiation() {
        let s = support(2, 3, &[]);
        let err = SwapchainPlan::negotiate(&s, &DeviceFeatureConfig::default(), EXTENT_800X600, &UNIFIED)
            .unwrap_err();
        assert!(matches!(err, PresentError::SurfaceQuery(_)));
    }

    #[test]
    fn zero_surface_extent_is_reported_despite_nonzero_request() {
        let mut s = support(2, 3, &[vk::PresentModeKHR::FIFO]);
        s.capabilities.current_extent = vk::Extent2D {
            width: 0,
            height: 0,
        };
        let plan = SwapchainPlan::negotiate(&s, &DeviceFeatureConfig::default(), EXTENT_800X600, &UNIFIED)
            .unwrap();
        assert!(plan.has_zero_extent());

        let plan = SwapchainPlan::negotiate(
            &support(2, 3, &[vk::PresentModeKHR::FIFO]),
            &DeviceFeatureConfig::default(),
            EXTENT_800X600,
            &UNIFIED,
        )
        .unwrap();
        assert!(!plan.has_zero_extent());
    }

    #[test]
    fn teardown_releases_semaphores_first_and_swapchain_last() {
        let order: Vec<BundlePart> = teardown_order().collect();
        assert_eq!(order.first(), Some(&BundlePart::AcquireSemaphores));
        assert_eq!(order.last(), Some(&BundlePart::Swapchain));

        let position = |part| order.iter().position(|p| *p == part).unwrap();
        assert!(position(BundlePart::Framebuffers) < position(BundlePart::RenderPass));
        assert!(position(BundlePart::Framebuffers) < position(BundlePart::ImageViews));
        assert!(position(BundlePart::Depth) < position(BundlePart::ImageViews));
        assert!(position(BundlePart::MsaaColor) < position(BundlePart::Swapchain));
    }

    #[test]
    fn viewport_covers_extent_with_unit_depth() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let vp = viewport_for(extent);
        assert_eq!((vp.x, vp.y, vp.width, vp.height), (0.0, 0.0, 1280.0, 720.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
        let sc = scissor_for(extent);
        assert_eq!((sc.offset.x, sc.offset.y), (0, 0));
        assert_eq!(sc.extent, extent);
    }
}
