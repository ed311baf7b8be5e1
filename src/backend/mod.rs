// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash, one file per component
// Ownership: every GPU object holds an Arc to the device it came from

pub mod allocator;
pub mod attachments;
pub mod device;
pub mod render_pass;
pub mod slots;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use allocator::{AllocatedImage, GpuAllocator};
pub use device::{DeviceFeatureConfig, DevicePolicy, QueueFamilyIndices, VulkanDevice};
pub use surface::{SurfaceProvider, SurfaceSupport};
pub use swapchain::{SwapchainManager, SwapchainPlan};
pub use sync::FrameSync;
