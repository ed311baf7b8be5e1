// Error taxonomy for the presentation engine
//
// Every fallible step returns one of these immediately; callers of
// Initialize / Resize decide how to surface the failure to the user.

use ash::vk;
use thiserror::Error;

/// Errors produced by the presentation engine.
#[derive(Error, Debug)]
pub enum PresentError {
    /// No suitable physical device, or a required extension/feature is missing.
    #[error("Device error: {0}")]
    Device(String),

    /// The surface reported an empty format or present-mode list.
    #[error("Surface query error: {0}")]
    SurfaceQuery(String),

    /// The host could not provide a presentation surface.
    #[error("Surface error: {0}")]
    Surface(String),

    /// Swap chain creation failed.
    #[error("Swap chain creation failed: {0}")]
    SwapchainCreate(String),

    /// Semaphore, fence or command buffer creation failed.
    #[error("Sync object creation failed: {0}")]
    SyncObject(String),

    /// No depth-stencil candidate supported, or an attachment could not be built.
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// The GPU memory allocator refused a request.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// A fixed-capacity slot container was asked to hold more than it can.
    #[error("Slot capacity exceeded: {len} > {capacity}")]
    SlotCapacity { len: usize, capacity: usize },

    /// Operation issued against a destroyed or uninitialised presenter.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Any other driver error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

impl PresentError {
    /// True when the swap chain no longer matches the surface and must be rebuilt.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, PresentError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
    }

    /// True when the logical device is gone and nothing submitted to it will complete.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, PresentError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
    }
}

impl From<gpu_allocator::AllocationError> for PresentError {
    fn from(e: gpu_allocator::AllocationError) -> Self {
        PresentError::Allocation(e.to_string())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, PresentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_classification() {
        assert!(PresentError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!PresentError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
        assert!(!PresentError::Device("none".into()).is_out_of_date());
    }

    #[test]
    fn device_lost_classification() {
        assert!(PresentError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(!PresentError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_device_lost());
        assert!(!PresentError::InvalidState("destroyed".into()).is_device_lost());
    }

    #[test]
    fn vk_result_converts() {
        let err: PresentError = vk::Result::ERROR_OUT_OF_HOST_MEMORY.into();
        assert!(matches!(err, PresentError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY)));
    }
}
