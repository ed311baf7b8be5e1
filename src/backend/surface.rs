// Presentation surface
//
// The host owns the window; the engine only needs three things from it:
// the instance extensions its platform requires, a VkSurfaceKHR, and the
// current client-area size in pixels.

use crate::error::{PresentError, Result};
use ash::extensions::khr;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;

/// Host-side source of a presentation surface.
pub trait SurfaceProvider {
    /// Instance extensions needed to create a surface on this platform.
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Create the surface for `instance`.
    ///
    /// # Safety
    /// `instance` must have been created with every extension returned by
    /// [`SurfaceProvider::required_instance_extensions`], and the underlying
    /// window must outlive the returned surface.
    unsafe fn create_surface(&self, entry: &Entry, instance: &ash::Instance)
        -> Result<vk::SurfaceKHR>;

    /// Drawable size in pixels. Zero in either dimension means minimised.
    fn client_extent(&self) -> vk::Extent2D;
}

impl SurfaceProvider for winit::window::Window {
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>> {
        let display = self
            .display_handle()
            .map_err(|e| PresentError::Surface(format!("display handle unavailable: {}", e)))?;
        surface_extensions(display.as_raw())
    }

    unsafe fn create_surface(
        &self,
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let display = self
            .display_handle()
            .map_err(|e| PresentError::Surface(format!("display handle unavailable: {}", e)))?;
        let window = self
            .window_handle()
            .map_err(|e| PresentError::Surface(format!("window handle unavailable: {}", e)))?;
        create_platform_surface(entry, instance, display.as_raw(), window.as_raw())
    }

    fn client_extent(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

/// Instance extensions for the windowing system behind `display`.
pub fn surface_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => {
            return Err(PresentError::Surface(format!(
                "unsupported display platform: {:?}",
                other
            )))
        }
    };
    Ok(vec![khr::Surface::name(), platform])
}

/// Create a VkSurfaceKHR from raw platform handles.
///
/// # Safety
/// The handles must be valid and outlive the surface.
pub unsafe fn create_platform_surface(
    entry: &Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let surface = match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0);
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance as *const std::ffi::c_void)
                .hwnd(handle.hwnd.get() as *const std::ffi::c_void);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .map_or(std::ptr::null_mut(), |p| p.as_ptr());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut _)
                .window(handle.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .map_or(std::ptr::null_mut(), |p| p.as_ptr());
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection as *mut _)
                .window(handle.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr() as *mut _)
                .surface(handle.surface.as_ptr() as *mut _);
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)
        }
        (display, window) => {
            return Err(PresentError::Surface(format!(
                "unsupported handle pair: {:?} / {:?}",
                display, window
            )))
        }
    };

    surface.map_err(|e| PresentError::Surface(format!("surface creation failed: {}", e)))
}

/// Capabilities, formats and present modes of a surface on one GPU.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Owned surface plus its extension loader.
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: khr::Surface,
}

impl Surface {
    pub fn new(entry: &Entry, instance: &ash::Instance, handle: vk::SurfaceKHR) -> Self {
        Self {
            handle,
            loader: khr::Surface::new(entry, instance),
        }
    }

    /// Whether queue family `family` of `device` can present here.
    pub fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(device, family, self.handle)
        }?;
        Ok(supported)
    }

    /// Query everything swap chain negotiation needs.
    ///
    /// An empty format or present-mode list is an error; nothing can be built on it.
    pub fn support(&self, device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        let capabilities = unsafe {
            self.loader
                .get_physical_device_surface_capabilities(device, self.handle)
        }
        .map_err(|e| PresentError::SurfaceQuery(format!("capabilities: {}", e)))?;

        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(device, self.handle)
        }
        .map_err(|e| PresentError::SurfaceQuery(format!("formats: {}", e)))?;

        let present_modes = unsafe {
            self.loader
                .get_physical_device_surface_present_modes(device, self.handle)
        }
        .map_err(|e| PresentError::SurfaceQuery(format!("present modes: {}", e)))?;

        if formats.is_empty() {
            return Err(PresentError::SurfaceQuery("surface reports no formats".into()));
        }
        if present_modes.is_empty() {
            return Err(PresentError::SurfaceQuery(
                "surface reports no present modes".into(),
            ));
        }

        Ok(SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Destroy the surface. Safe to call more than once.
    ///
    /// # Safety
    /// No swap chain created from this surface may still be alive.
    pub unsafe fn destroy(&mut self) {
        if self.handle != vk::SurfaceKHR::null() {
            self.loader.destroy_surface(self.handle, None);
            self.handle = vk::SurfaceKHR::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, XlibDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn xlib_needs_surface_and_xlib_extensions() {
        let display = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let exts = surface_extensions(display).unwrap();
        assert_eq!(exts, vec![khr::Surface::name(), khr::XlibSurface::name()]);
    }

    #[test]
    fn wayland_needs_wayland_extension() {
        let mut dummy = 0u8;
        let ptr = NonNull::new(&mut dummy as *mut u8 as *mut std::ffi::c_void).unwrap();
        let display = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(ptr));
        let exts = surface_extensions(display).unwrap();
        assert!(exts.contains(&khr::WaylandSurface::name()));
        assert!(exts.contains(&khr::Surface::name()));
    }
}
