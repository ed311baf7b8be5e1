// Vulkan presentation engine
//
// Owns the GPU device, the swap chain and the frame pacing protocol.
// Drawing is delegated to a host-supplied `FrameRenderer`.

pub mod backend;
pub mod config;
pub mod error;
pub mod host;
pub mod presenter;

pub use backend::{DeviceFeatureConfig, DevicePolicy, SurfaceProvider};
pub use error::{PresentError, Result};
pub use host::{FrameContext, FrameRenderer, SwapchainInfo};
pub use presenter::{FrameStatus, Presenter, PresenterDesc};
