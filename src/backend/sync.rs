// Synchronization primitives
//
// Per-frame command buffers, render-finished semaphores and in-flight fences.
// Frame slots are independent of swap chain images and survive rebuilds.

use super::slots::{SlotArray, FRAMES_IN_FLIGHT};
use super::VulkanDevice;
use crate::error::{PresentError, Result};
use ash::vk;
use std::sync::Arc;

/// Resources for one frame in flight.
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Round-robin index over frame slots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor<const N: usize> {
    index: usize,
}

impl<const N: usize> FrameCursor<N> {
    pub fn new() -> Self {
        Self { index: 0 }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % N;
    }
}

/// Owns the command pool and every frame slot.
pub struct FrameSync {
    slots: SlotArray<FrameSlot, FRAMES_IN_FLIGHT>,
    cursor: FrameCursor<FRAMES_IN_FLIGHT>,
    command_pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(|e| PresentError::SyncObject(format!("command pool: {}", e)))?;

        let mut sync = Self {
            slots: SlotArray::new(),
            cursor: FrameCursor::new(),
            command_pool,
            device,
        };

        for _ in 0..FRAMES_IN_FLIGHT {
            let slot = sync.create_slot()?;
            sync.slots.push(slot)?;
        }

        log::debug!("Created {} frame slots", sync.slots.len());
        Ok(sync)
    }

    fn create_slot(&self) -> Result<FrameSlot> {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| PresentError::SyncObject(format!("command buffer: {}", e)))?[0];

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let render_finished = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.free_command_buffers(self.command_pool, &[command_buffer]) };
                return Err(PresentError::SyncObject(format!("semaphore: {}", e)));
            }
        };

        // Start signaled so the first wait on each slot returns immediately.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let in_flight = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(render_finished, None);
                    device.free_command_buffers(self.command_pool, &[command_buffer]);
                }
                return Err(PresentError::SyncObject(format!("fence: {}", e)));
            }
        };

        Ok(FrameSlot {
            command_buffer,
            render_finished,
            in_flight,
        })
    }

    pub fn current_index(&self) -> usize {
        self.cursor.index()
    }

    pub fn current(&self) -> Result<&FrameSlot> {
        self.slots.slot(self.cursor.index())
    }

    /// Block until the slot's previous submission retired, then unsignal its fence.
    pub fn wait_and_reset(&self, index: usize) -> Result<()> {
        let slot = self.slots.slot(index)?;
        let fences = [slot.in_flight];
        unsafe {
            self.device.device.wait_for_fences(&fences, true, u64::MAX)?;
            self.device.device.reset_fences(&fences)?;
        }
        Ok(())
    }

    /// Re-signal a slot whose frame was abandoned after `wait_and_reset`.
    ///
    /// Submits an empty batch that consumes `acquire_semaphore` and signals the
    /// slot fence, so neither object is left in a state the next frame cannot use.
    pub fn release_abandoned(&self, index: usize, acquire_semaphore: vk::Semaphore) -> Result<()> {
        let slot = self.slots.slot(index)?;
        let wait_semaphores = [acquire_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit.build()],
                slot.in_flight,
            )?;
        }
        Ok(())
    }

    pub fn advance(&mut self) {
        self.cursor.advance();
    }

    /// Record and submit a throwaway command buffer, then wait for the queue.
    pub fn one_time_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }?[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;

            record(device, command_buffer);

            unsafe { device.end_command_buffer(command_buffer) }?;

            let command_buffers = [command_buffer];
            let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            unsafe {
                device.queue_submit(self.device.graphics_queue, &[submit.build()], vk::Fence::null())?;
                device.queue_wait_idle(self.device.graphics_queue)?;
            }
            Ok(())
        })();

        unsafe { device.free_command_buffers(self.command_pool, &[command_buffer]) };
        result
    }

    /// Destroy every slot and the pool. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.command_pool == vk::CommandPool::null() {
            return;
        }

        let device = &self.device.device;
        unsafe {
            for slot in self.slots.drain_reverse() {
                device.destroy_fence(slot.in_flight, None);
                device.destroy_semaphore(slot.render_finished, None);
            }
            // Command buffers go with the pool.
            device.destroy_command_pool(self.command_pool, None);
        }
        self.command_pool = vk::CommandPool::null();
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_starts_at_zero() {
        let cursor = FrameCursor::<FRAMES_IN_FLIGHT>::new();
        assert_eq!(cursor.index(), 0);
    }

    #[test]
    fn cursor_index_is_frame_count_mod_depth() {
        let mut cursor = FrameCursor::<FRAMES_IN_FLIGHT>::new();
        for frames in 1..=17usize {
            cursor.advance();
            assert_eq!(cursor.index(), frames % FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn cursor_wraps_for_other_depths() {
        let mut cursor = FrameCursor::<3>::new();
        let seen: Vec<usize> = (0..6)
            .map(|_| {
                let i = cursor.index();
                cursor.advance();
                i
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }
}
