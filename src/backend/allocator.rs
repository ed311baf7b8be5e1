// GPU memory for offscreen attachments
//
// Wraps gpu-allocator behind a lock so images can free themselves on drop.
// The allocator keeps the device alive and is released before it.

use super::VulkanDevice;
use crate::error::{PresentError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct GpuAllocator {
    inner: Mutex<Option<Allocator>>,
    device: Arc<VulkanDevice>,
}

impl GpuAllocator {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Arc<Self>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: device.instance.clone(),
            device: device.device.clone(),
            physical_device: device.physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Arc::new(Self {
            inner: Mutex::new(Some(allocator)),
            device,
        }))
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    /// Create a device-local image with a single-level view covering `aspect`.
    ///
    /// Anything created before a failing step is released by the returned
    /// guard's destructor.
    pub fn create_image(
        self: &Arc<Self>,
        create_info: &vk::ImageCreateInfo,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> Result<AllocatedImage> {
        let device = &self.device.device;

        let mut target = AllocatedImage {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            format: create_info.format,
            samples: create_info.samples,
            extent: vk::Extent2D {
                width: create_info.extent.width,
                height: create_info.extent.height,
            },
            aspect,
            allocation: None,
            allocator: Arc::clone(self),
        };

        target.image = unsafe { device.create_image(create_info, None) }
            .map_err(|e| PresentError::Attachment(format!("{}: create image: {}", name, e)))?;

        let requirements = unsafe { device.get_image_memory_requirements(target.image) };

        let allocation = self
            .inner
            .lock()
            .as_mut()
            .ok_or_else(|| PresentError::InvalidState("allocator already shut down".into()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;

        let image = target.image;
        adopt_then(&mut target.allocation, allocation, |allocation| {
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }?;
            Ok(())
        })?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(target.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(create_info.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        target.view = unsafe { device.create_image_view(&view_info, None) }
            .map_err(|e| PresentError::Attachment(format!("{}: create view: {}", name, e)))?;

        log::debug!(
            "Allocated {} {}x{} {:?} ({:?})",
            name,
            target.extent.width,
            target.extent.height,
            target.format,
            target.samples
        );

        Ok(target)
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.inner.lock().as_mut() {
            if let Err(e) = allocator.free(allocation) {
                log::warn!("Failed to free attachment memory: {}", e);
            }
        }
    }

    /// Release every memory block. Later frees become no-ops.
    pub fn shutdown(&self) {
        if let Some(allocator) = self.inner.lock().take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Store `value` in `owner`, then run `step` on it. The owner keeps the value
/// when `step` fails, so its destructor still releases it.
fn adopt_then<T, R>(
    owner: &mut Option<T>,
    value: T,
    step: impl FnOnce(&T) -> Result<R>,
) -> Result<R> {
    let adopted = owner.insert(value);
    step(adopted)
}

/// Image + view + memory, destroyed together.
pub struct AllocatedImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    allocation: Option<Allocation>,
    allocator: Arc<GpuAllocator>,
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        let device = &self.allocator.device.device;
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
            if self.image != vk::Image::null() {
                device.destroy_image(self.image, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_step_leaves_value_with_owner() {
        let mut owner: Option<u32> = None;
        let result: Result<()> = adopt_then(&mut owner, 7, |_| {
            Err(PresentError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        });
        assert!(result.is_err());
        assert_eq!(owner, Some(7));
    }

    #[test]
    fn step_sees_the_adopted_value() {
        let mut owner = Some(1u32);
        let doubled = adopt_then(&mut owner, 21, |v| Ok(v * 2)).unwrap();
        assert_eq!(doubled, 42);
        assert_eq!(owner, Some(21));
    }
}
