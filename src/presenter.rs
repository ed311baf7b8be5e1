// Presentation orchestrator
//
// Owns the device, allocator, frame slots and swap chain, and drives the
// per-frame protocol: acquire -> wait for slot -> record -> submit -> present.
// Rebuilds happen between frames, never inside one.

use crate::backend::attachments::AttachmentProvisioner;
use crate::backend::device::{DeviceDesc, DeviceFeatureConfig, DevicePolicy, VulkanDevice};
use crate::backend::surface::SurfaceProvider;
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome, SwapchainManager};
use crate::backend::sync::FrameSync;
use crate::backend::GpuAllocator;
use crate::error::{PresentError, Result};
use crate::host::{FrameContext, FrameRenderer, SwapchainInfo};
use ash::vk;
use std::sync::Arc;

/// Parameters for [`Presenter::initialize`].
#[derive(Debug, Clone)]
pub struct PresenterDesc {
    pub app_name: String,
    pub enable_validation: bool,
    pub device_policy: DevicePolicy,
    pub features: DeviceFeatureConfig,
}

/// Where the current frame is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    WaitingForSlot,
    Recording,
    Submitted,
    Presenting,
}

impl FrameState {
    pub fn successor(self) -> FrameState {
        match self {
            FrameState::Idle => FrameState::Acquiring,
            FrameState::Acquiring => FrameState::WaitingForSlot,
            FrameState::WaitingForSlot => FrameState::Recording,
            FrameState::Recording => FrameState::Submitted,
            FrameState::Submitted => FrameState::Presenting,
            FrameState::Presenting => FrameState::Idle,
        }
    }
}

fn transition(state: &mut FrameState, next: FrameState) {
    debug_assert_eq!(state.successor(), next, "frame state skipped a step");
    log::trace!("{:?} -> {:?}", state, next);
    *state = next;
}

/// Why the swap chain is being rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildTrigger {
    Initial,
    Resize,
    MsaaToggle,
    VsyncToggle,
    OutOfDate,
    Suboptimal,
    /// A frame was abandoned after acquiring its image.
    AbandonedFrame,
}

/// Rebuild needed after a completed frame, if any.
pub fn post_present_trigger(
    acquire_suboptimal: bool,
    present: PresentOutcome,
) -> Option<RebuildTrigger> {
    match (acquire_suboptimal, present) {
        (_, PresentOutcome::NeedsRebuild) => Some(RebuildTrigger::OutOfDate),
        (true, PresentOutcome::Presented) => Some(RebuildTrigger::Suboptimal),
        (false, PresentOutcome::Presented) => None,
    }
}

/// How to recover from a frame abandoned after its slot fence was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRecovery {
    /// Re-signal the slot fence, consume the acquire semaphore, then rebuild.
    ReleaseAndRebuild(RebuildTrigger),
    /// The device is gone; later frames are refused.
    Halt,
}

pub fn abandoned_frame_recovery(error: &PresentError) -> FrameRecovery {
    if error.is_device_lost() {
        FrameRecovery::Halt
    } else {
        FrameRecovery::ReleaseAndRebuild(RebuildTrigger::AbandonedFrame)
    }
}

/// Put an abandoned frame's slot back in a waitable state and step past its image.
///
/// Falls back to `Halt` when the release itself fails, since the slot fence
/// would otherwise never signal again.
fn abandon_frame(
    frames: &FrameSync,
    swapchain: &mut SwapchainManager,
    frame_slot: usize,
    acquire_semaphore: vk::Semaphore,
    error: &PresentError,
) -> FrameRecovery {
    let recovery = abandoned_frame_recovery(error);
    if let FrameRecovery::ReleaseAndRebuild(_) = recovery {
        if let Err(e) = frames.release_abandoned(frame_slot, acquire_semaphore) {
            log::error!("Could not release frame slot {}: {}", frame_slot, e);
            return FrameRecovery::Halt;
        }
        swapchain.skip_image();
    }
    recovery
}

/// What `render_frame` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { image_index: u32, frame_slot: usize },
    /// Window minimised or surface extent zero; nothing was rendered.
    Skipped,
    /// Acquire reported the swap chain stale; rebuilt before the next frame.
    OutOfDate,
}

pub struct Presenter {
    features: DeviceFeatureConfig,
    requested_extent: vk::Extent2D,
    state: FrameState,
    pending_rebuild: Option<RebuildTrigger>,
    halted: bool,
    generation: u64,
    notified_generation: u64,
    frames_submitted: u64,

    // Dropped in this order by `destroy`.
    swapchain: Option<SwapchainManager>,
    frames: Option<FrameSync>,
    allocator: Option<Arc<GpuAllocator>>,
    device: Option<Arc<VulkanDevice>>,
}

impl Presenter {
    /// Create the device, frame slots and first swap chain.
    pub fn initialize(desc: &PresenterDesc, provider: &dyn SurfaceProvider) -> Result<Self> {
        log::info!("Initializing presenter...");

        let device = VulkanDevice::new(
            &DeviceDesc {
                app_name: desc.app_name.clone(),
                enable_validation: desc.enable_validation,
                policy: desc.device_policy,
            },
            provider,
        )?;

        let mut features = desc.features;
        features.msaa_max_supported = device.max_msaa_samples;
        if features.msaa_enabled && features.msaa_requested > features.msaa_max_supported {
            log::warn!(
                "Requested {}x MSAA, device supports {}x",
                features.msaa_requested,
                features.msaa_max_supported
            );
        }

        let allocator = GpuAllocator::new(Arc::clone(&device))?;
        let frames = FrameSync::new(Arc::clone(&device))?;
        let swapchain = SwapchainManager::new(Arc::clone(&device));

        let mut presenter = Self {
            features,
            requested_extent: provider.client_extent(),
            state: FrameState::Idle,
            pending_rebuild: Some(RebuildTrigger::Initial),
            halted: false,
            generation: 0,
            notified_generation: 0,
            frames_submitted: 0,
            swapchain: Some(swapchain),
            frames: Some(frames),
            allocator: Some(allocator),
            device: Some(device),
        };

        if !presenter.is_minimized() {
            presenter.rebuild(RebuildTrigger::Initial)?;
        }

        log::info!("Presenter initialized");
        Ok(presenter)
    }

    fn is_minimized(&self) -> bool {
        self.requested_extent.width == 0 || self.requested_extent.height == 0
    }

    /// Tear down and rebuild the swap chain bundle. Deferred while minimised.
    fn rebuild(&mut self, trigger: RebuildTrigger) -> Result<()> {
        if self.is_minimized() {
            log::debug!("Deferring rebuild ({:?}) while minimised", trigger);
            self.pending_rebuild.get_or_insert(trigger);
            return Ok(());
        }

        let (Some(swapchain), Some(frames), Some(allocator)) = (
            self.swapchain.as_mut(),
            self.frames.as_ref(),
            self.allocator.as_ref(),
        ) else {
            return Err(PresentError::InvalidState("presenter destroyed".into()));
        };

        log::info!("Rebuilding swapchain ({:?})", trigger);
        // Stays set if the rebuild fails so a later resize retries.
        self.pending_rebuild = Some(trigger);

        let provisioner = AttachmentProvisioner::new(allocator, frames);
        if !swapchain.recreate(&provisioner, &self.features, self.requested_extent)? {
            log::debug!("Deferring rebuild ({:?}) until the surface has an extent", trigger);
            return Ok(());
        }

        self.pending_rebuild = None;
        self.generation += 1;
        Ok(())
    }

    /// Record a new client size and rebuild against it.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.requested_extent = vk::Extent2D { width, height };
        if self.is_minimized() {
            log::debug!("Window minimised, rendering paused");
            self.pending_rebuild.get_or_insert(RebuildTrigger::Resize);
            return Ok(());
        }
        log::info!("Resize requested: {}x{}", width, height);
        self.rebuild(RebuildTrigger::Resize)
    }

    /// Toggle multisampling. Rebuilds only when the flag changes.
    pub fn set_msaa_enabled(&mut self, enabled: bool) -> Result<()> {
        if self.features.msaa_enabled == enabled {
            return Ok(());
        }
        self.features.msaa_enabled = enabled;
        log::info!(
            "MSAA {} ({}x effective)",
            if enabled { "enabled" } else { "disabled" },
            self.features.effective_msaa_level()
        );
        self.rebuild(RebuildTrigger::MsaaToggle)
    }

    /// Toggle vsync. Rebuilds only when the flag changes.
    pub fn set_vsync_enabled(&mut self, enabled: bool) -> Result<()> {
        if self.features.vsync == enabled {
            return Ok(());
        }
        self.features.vsync = enabled;
        log::info!("VSync {}", if enabled { "enabled" } else { "disabled" });
        self.rebuild(RebuildTrigger::VsyncToggle)
    }

    /// True when MSAA is enabled and the device gives more than one sample.
    pub fn is_msaa_enabled(&self) -> bool {
        self.features.msaa_active()
    }

    pub fn is_vsync_enabled(&self) -> bool {
        self.features.vsync
    }

    pub fn features(&self) -> &DeviceFeatureConfig {
        &self.features
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn device(&self) -> Option<&Arc<VulkanDevice>> {
        self.device.as_ref()
    }

    /// Live swap chain parameters, `None` while minimised or destroyed.
    pub fn swapchain_info(&self) -> Option<SwapchainInfo> {
        let bundle = self.swapchain.as_ref()?.bundle().ok()?;
        Some(SwapchainInfo {
            extent: bundle.extent(),
            format: bundle.plan.surface_format.format,
            present_mode: bundle.plan.present_mode,
            image_count: bundle.image_count(),
            samples: bundle.attachments.samples,
            render_pass: bundle.render_pass().ok()?,
            viewport: bundle.viewport(),
            scissor: bundle.scissor(),
        })
    }

    /// Run one frame through the protocol.
    ///
    /// Errors leave the presenter idle and the caller decides whether to continue.
    /// After device loss every later frame fails with `InvalidState`.
    pub fn render_frame(&mut self, renderer: &mut dyn FrameRenderer) -> Result<FrameStatus> {
        let result = self.drive_frame(renderer);
        if result.is_err() {
            self.state = FrameState::Idle;
        }
        result
    }

    fn drive_frame(&mut self, renderer: &mut dyn FrameRenderer) -> Result<FrameStatus> {
        if self.device.is_none() {
            return Err(PresentError::InvalidState("presenter destroyed".into()));
        }
        if self.halted {
            return Err(PresentError::InvalidState("device lost, presenter halted".into()));
        }
        if self.is_minimized() {
            return Ok(FrameStatus::Skipped);
        }
        if let Some(trigger) = self.pending_rebuild {
            self.rebuild(trigger)?;
        }

        if self.notified_generation != self.generation {
            if let Some(info) = self.swapchain_info() {
                renderer.on_swapchain_rebuilt(&info);
            }
            self.notified_generation = self.generation;
        }

        let (Some(device), Some(swapchain), Some(frames)) = (
            self.device.as_ref(),
            self.swapchain.as_mut(),
            self.frames.as_mut(),
        ) else {
            return Err(PresentError::InvalidState("presenter destroyed".into()));
        };
        if !swapchain.is_live() {
            return Ok(FrameStatus::Skipped);
        }

        // ─── Acquire ─────────────────────────────────────────────────────────
        transition(&mut self.state, FrameState::Acquiring);
        let (image_index, acquire_suboptimal) = match swapchain.acquire()? {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::info!("Swapchain out of date on acquire, skipping frame");
                self.pending_rebuild = Some(RebuildTrigger::OutOfDate);
                self.state = FrameState::Idle;
                return Ok(FrameStatus::OutOfDate);
            }
        };

        let bundle = swapchain.bundle()?;
        let image = bundle.slot(image_index as usize)?;
        let acquire_semaphore = image.acquire_semaphore;

        // ─── Wait for frame slot ─────────────────────────────────────────────
        transition(&mut self.state, FrameState::WaitingForSlot);
        let frame_slot = frames.current_index();
        frames.wait_and_reset(frame_slot)?;
        let slot = frames.current()?;
        let command_buffer = slot.command_buffer;
        let render_finished = slot.render_finished;
        let in_flight = slot.in_flight;

        // ─── Record ──────────────────────────────────────────────────────────
        transition(&mut self.state, FrameState::Recording);
        let frame = FrameContext {
            device: &device.device,
            command_buffer,
            render_pass: bundle.render_pass()?,
            framebuffer: image.framebuffer,
            image_view: image.view,
            image_index,
            frame_slot,
            extent: bundle.extent(),
            viewport: bundle.viewport(),
            scissor: bundle.scissor(),
            samples: bundle.attachments.samples,
            attachments: bundle.attachments,
        };

        if let Err(e) = record_frame(&frame, renderer) {
            log::error!("Frame recording failed: {}", e);
            match abandon_frame(frames, swapchain, frame_slot, acquire_semaphore, &e) {
                FrameRecovery::ReleaseAndRebuild(trigger) => self.pending_rebuild = Some(trigger),
                FrameRecovery::Halt => self.halted = true,
            }
            return Err(e);
        }

        // ─── Submit ──────────────────────────────────────────────────────────
        transition(&mut self.state, FrameState::Submitted);
        let wait_semaphores = [acquire_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let submitted = unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], in_flight)
        };
        if let Err(e) = submitted {
            let e = PresentError::from(e);
            log::error!("Queue submit failed: {}", e);
            match abandon_frame(frames, swapchain, frame_slot, acquire_semaphore, &e) {
                FrameRecovery::ReleaseAndRebuild(trigger) => self.pending_rebuild = Some(trigger),
                FrameRecovery::Halt => self.halted = true,
            }
            return Err(e);
        }
        self.frames_submitted += 1;
        frames.advance();

        // ─── Present ─────────────────────────────────────────────────────────
        transition(&mut self.state, FrameState::Presenting);
        let presented = swapchain.present(device.present_queue, render_finished)?;

        if let Some(trigger) = post_present_trigger(acquire_suboptimal, presented) {
            log::info!("Swapchain needs rebuild after present ({:?})", trigger);
            self.pending_rebuild = Some(trigger);
        }

        transition(&mut self.state, FrameState::Idle);
        Ok(FrameStatus::Presented {
            image_index,
            frame_slot,
        })
    }

    /// Wait for the GPU and release everything. Safe to call more than once.
    pub fn destroy(&mut self) -> Result<()> {
        let Some(device) = self.device.as_ref() else {
            return Ok(());
        };

        log::info!("Destroying presenter...");
        if let Err(e) = device.wait_idle() {
            log::warn!("wait_idle during teardown: {}", e);
        }

        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy()?;
        }
        self.frames.take();
        if let Some(allocator) = self.allocator.take() {
            allocator.shutdown();
        }
        self.device.take();
        self.state = FrameState::Idle;

        log::info!("Presenter destroyed");
        Ok(())
    }
}

/// Reset, begin, hand to the renderer, end.
fn record_frame(frame: &FrameContext<'_>, renderer: &mut dyn FrameRenderer) -> Result<()> {
    let device = frame.device;
    unsafe {
        device.reset_command_buffer(frame.command_buffer, vk::CommandBufferResetFlags::empty())?;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(frame.command_buffer, &begin_info)?;
    }

    renderer.record(frame)?;

    unsafe { device.end_command_buffer(frame.command_buffer) }?;
    Ok(())
}

impl Drop for Presenter {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("Presenter teardown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::render_pass::AttachmentPlan;

    #[test]
    fn frame_states_cycle_back_to_idle() {
        let mut state = FrameState::Idle;
        let mut visited = vec![state];
        for _ in 0..6 {
            state = state.successor();
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                FrameState::Idle,
                FrameState::Acquiring,
                FrameState::WaitingForSlot,
                FrameState::Recording,
                FrameState::Submitted,
                FrameState::Presenting,
                FrameState::Idle,
            ]
        );
    }

    #[test]
    fn transition_follows_successor() {
        let mut state = FrameState::Idle;
        transition(&mut state, FrameState::Acquiring);
        transition(&mut state, FrameState::WaitingForSlot);
        assert_eq!(state, FrameState::WaitingForSlot);
    }

    #[test]
    fn stale_present_schedules_rebuild() {
        assert_eq!(post_present_trigger(false, PresentOutcome::Presented), None);
        assert_eq!(
            post_present_trigger(true, PresentOutcome::Presented),
            Some(RebuildTrigger::Suboptimal)
        );
        assert_eq!(
            post_present_trigger(false, PresentOutcome::NeedsRebuild),
            Some(RebuildTrigger::OutOfDate)
        );
    }

    #[test]
    fn abandoned_frame_is_released_unless_device_lost() {
        assert_eq!(
            abandoned_frame_recovery(&PresentError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY)),
            FrameRecovery::ReleaseAndRebuild(RebuildTrigger::AbandonedFrame)
        );
        assert_eq!(
            abandoned_frame_recovery(&PresentError::InvalidState("renderer failed".into())),
            FrameRecovery::ReleaseAndRebuild(RebuildTrigger::AbandonedFrame)
        );
        assert_eq!(
            abandoned_frame_recovery(&PresentError::Vulkan(vk::Result::ERROR_DEVICE_LOST)),
            FrameRecovery::Halt
        );
    }

    #[test]
    fn msaa_round_trip_restores_single_sampled_plan() {
        let color = vk::Format::B8G8R8A8_UNORM;
        let depth = vk::Format::D24_UNORM_S8_UINT;
        let mut features = DeviceFeatureConfig {
            msaa_requested: 4,
            msaa_max_supported: 8,
            ..Default::default()
        };
        let before = AttachmentPlan::new(color, depth, features.sample_count());

        features.msaa_enabled = true;
        let during = AttachmentPlan::new(color, depth, features.sample_count());
        assert_eq!(during.attachment_count(), 3);

        features.msaa_enabled = false;
        let after = AttachmentPlan::new(color, depth, features.sample_count());
        assert_eq!(before, after);
        assert_eq!(after.attachment_count(), 2);
        assert!(!after.is_multisampled());
    }
}
