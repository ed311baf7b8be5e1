// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation through the host surface provider
// - Physical device selection (extensions, features, queues, device type)
// - Logical device + graphics/present queue creation
// - MSAA capability discovery

use super::surface::{Surface, SurfaceProvider};
use crate::error::{PresentError, Result};
use ash::{vk, Entry};
use serde::Deserialize;
use std::ffi::{CStr, CString};
use std::sync::Arc;

/// Device extensions every candidate must expose.
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Device features every candidate must expose; also enabled on the logical device.
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    geometry_shader: vk::TRUE,
    ..unsafe { std::mem::zeroed() }
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

// ─────────────────────────────────────────────────────────────────────────────
// FEATURE CONFIGURATION
// ─────────────────────────────────────────────────────────────────────────────

/// Host-requested presentation features plus the MSAA ceiling the selected
/// device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFeatureConfig {
    pub vsync: bool,
    pub msaa_enabled: bool,
    /// Requested samples per pixel.
    pub msaa_requested: u32,
    /// Highest sample count the device supports; 1 until a device is selected.
    pub msaa_max_supported: u32,
}

impl Default for DeviceFeatureConfig {
    fn default() -> Self {
        Self {
            vsync: false,
            msaa_enabled: false,
            msaa_requested: 1,
            msaa_max_supported: 1,
        }
    }
}

impl DeviceFeatureConfig {
    /// min(requested, max-supported), never below one sample.
    pub fn effective_msaa_level(&self) -> u32 {
        self.msaa_requested
            .min(self.msaa_max_supported)
            .max(1)
    }

    /// MSAA is live only when enabled and the effective level exceeds one sample.
    pub fn msaa_active(&self) -> bool {
        self.msaa_enabled && self.effective_msaa_level() > 1
    }

    /// Sample count used by every attachment of the swap chain render pass.
    pub fn sample_count(&self) -> vk::SampleCountFlags {
        if self.msaa_active() {
            sample_count_flags(self.effective_msaa_level())
        } else {
            vk::SampleCountFlags::TYPE_1
        }
    }
}

/// Largest Vulkan sample-count bit not exceeding `samples`.
pub fn sample_count_flags(samples: u32) -> vk::SampleCountFlags {
    match samples {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2..=3 => vk::SampleCountFlags::TYPE_2,
        4..=7 => vk::SampleCountFlags::TYPE_4,
        8..=15 => vk::SampleCountFlags::TYPE_8,
        16..=31 => vk::SampleCountFlags::TYPE_16,
        32..=63 => vk::SampleCountFlags::TYPE_32,
        _ => vk::SampleCountFlags::TYPE_64,
    }
}

/// Highest sample count usable for both colour and depth framebuffer attachments.
pub fn max_sample_count(color: vk::SampleCountFlags, depth: vk::SampleCountFlags) -> u32 {
    let shared = (color & depth).as_raw();
    if shared == 0 {
        return 1;
    }
    // Each flag bit encodes its own sample count.
    1 << (31 - shared.leading_zeros())
}

// ─────────────────────────────────────────────────────────────────────────────
// DEVICE SELECTION
// ─────────────────────────────────────────────────────────────────────────────

/// How strictly the device type constrains selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DevicePolicy {
    /// First suitable discrete GPU, otherwise the first suitable device of any type.
    #[default]
    PreferDiscrete,
    /// Only discrete GPUs qualify.
    RequireDiscrete,
}

/// Graphics and present queue families. Resolved once, immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// True when one family serves both graphics and presentation.
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, one queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_unified() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Locate graphics and present families.
///
/// The graphics family is the first one exposing graphics queues. Presentation
/// reuses it when it can present, otherwise the first present-capable family
/// is taken, so the two may differ.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> (Option<u32>, Option<u32>) {
    let graphics = families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let present = match graphics {
        Some(g) if supports_present(g) => Some(g),
        _ => (0..families.len() as u32).find(|&i| supports_present(i)),
    };

    (graphics, present)
}

/// Names of required features the device lacks.
pub fn missing_features(features: &vk::PhysicalDeviceFeatures) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if REQUIRED_DEVICE_FEATURES.geometry_shader == vk::TRUE && features.geometry_shader != vk::TRUE
    {
        missing.push("geometryShader");
    }
    missing
}

/// Names of required device extensions absent from `available`.
pub fn missing_extensions(available: &[vk::ExtensionProperties]) -> Vec<String> {
    required_device_extensions()
        .iter()
        .filter(|required| {
            !available.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                name == **required
            })
        })
        .map(|required| required.to_string_lossy().into_owned())
        .collect()
}

/// Everything selection needs to know about one physical device.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub missing_extensions: Vec<String>,
    pub missing_features: Vec<&'static str>,
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

/// Why a candidate was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingExtension(String),
    MissingFeature(&'static str),
    NoGraphicsQueue,
    NoPresentQueue,
    NotDiscrete(vk::PhysicalDeviceType),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MissingExtension(name) => write!(f, "missing extension {}", name),
            Rejection::MissingFeature(name) => write!(f, "missing feature {}", name),
            Rejection::NoGraphicsQueue => write!(f, "no graphics queue family"),
            Rejection::NoPresentQueue => write!(f, "no queue family can present to the surface"),
            Rejection::NotDiscrete(ty) => write!(f, "device type {:?} is not a discrete GPU", ty),
        }
    }
}

impl DeviceCandidate {
    /// Check every constraint except device-type preference.
    pub fn evaluate(&self, policy: DevicePolicy) -> std::result::Result<QueueFamilyIndices, Rejection> {
        if let Some(ext) = self.missing_extensions.first() {
            return Err(Rejection::MissingExtension(ext.clone()));
        }
        if let Some(&feature) = self.missing_features.first() {
            return Err(Rejection::MissingFeature(feature));
        }
        let graphics = self.graphics_family.ok_or(Rejection::NoGraphicsQueue)?;
        let present = self.present_family.ok_or(Rejection::NoPresentQueue)?;
        if policy == DevicePolicy::RequireDiscrete
            && self.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
        {
            return Err(Rejection::NotDiscrete(self.device_type));
        }
        Ok(QueueFamilyIndices { graphics, present })
    }
}

/// First candidate satisfying every constraint, honouring the discrete-GPU policy.
pub fn select_candidate(
    candidates: &[DeviceCandidate],
    policy: DevicePolicy,
) -> Option<(usize, QueueFamilyIndices)> {
    let suitable: Vec<(usize, QueueFamilyIndices)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match c.evaluate(policy) {
            Ok(families) => Some((i, families)),
            Err(reason) => {
                log::debug!("Skipping GPU '{}': {}", c.name, reason);
                None
            }
        })
        .collect();

    suitable
        .iter()
        .copied()
        .find(|&(i, _)| candidates[i].device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| suitable.first().copied())
}

// ─────────────────────────────────────────────────────────────────────────────
// DEVICE
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for device creation.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub app_name: String,
    pub enable_validation: bool,
    pub policy: DevicePolicy,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Vulkan handles (destroyed in Drop, reverse creation order)
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    pub swapchain_loader: ash::extensions::khr::Swapchain,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
    /// Highest sample count usable by colour and depth attachments together.
    pub max_msaa_samples: u32,
}

impl VulkanDevice {
    /// Create instance, surface and logical device.
    ///
    /// Fails with [`PresentError::Device`] when no physical device qualifies.
    pub fn new(desc: &DeviceDesc, provider: &dyn SurfaceProvider) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", desc.app_name);

        let entry = unsafe { Entry::load() }
            .map_err(|e| PresentError::Device(format!("failed to load Vulkan library: {}", e)))?;

        let instance = Self::create_instance(&entry, desc, provider)?;

        let debug_utils = if desc.enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface = match unsafe { provider.create_surface(&entry, &instance) } {
            Ok(handle) => Surface::new(&entry, &instance, handle),
            Err(e) => {
                unsafe { Self::destroy_instance(&instance, debug_utils) };
                return Err(e);
            }
        };

        let selected = Self::pick_physical_device(&instance, &surface, desc.policy);
        let (physical_device, queue_families) = match selected {
            Ok(found) => found,
            Err(e) => {
                unsafe {
                    let mut surface = surface;
                    surface.destroy();
                    Self::destroy_instance(&instance, debug_utils);
                }
                return Err(e);
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let max_msaa_samples = max_sample_count(
            properties.limits.framebuffer_color_sample_counts,
            properties.limits.framebuffer_depth_sample_counts,
        );

        let created = Self::create_logical_device(&instance, physical_device, queue_families);
        let (device, graphics_queue, present_queue) = match created {
            Ok(created) => created,
            Err(e) => {
                unsafe {
                    let mut surface = surface;
                    surface.destroy();
                    Self::destroy_instance(&instance, debug_utils);
                }
                return Err(e);
            }
        };

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&instance, &device);

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}{}",
            queue_families.graphics,
            queue_families.present,
            if queue_families.is_unified() { "" } else { " (concurrent sharing)" }
        );
        log::info!("Max MSAA samples: {}", max_msaa_samples);

        Ok(Arc::new(Self {
            device,
            physical_device,
            surface,
            instance,
            _entry: entry,
            swapchain_loader,
            graphics_queue,
            present_queue,
            queue_families,
            debug_utils,
            properties,
            max_msaa_samples,
        }))
    }

    fn create_instance(
        entry: &Entry,
        desc: &DeviceDesc,
        provider: &dyn SurfaceProvider,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(desc.app_name.as_str())
            .map_err(|e| PresentError::Device(format!("invalid application name: {}", e)))?;
        let engine_name = c"vk-presenter";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions: Vec<*const std::ffi::c_char> = provider
            .required_instance_extensions()?
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let validation = desc.enable_validation && Self::validation_layer_available(entry);
        if validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| PresentError::Device(format!("failed to create Vulkan instance: {}", e)))?;

        Ok(instance)
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
        let found = layers
            .iter()
            .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if !found {
            log::warn!(
                "Validation layer {} not found, continuing without it",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
        found
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: &Surface,
        policy: DevicePolicy,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            return Err(PresentError::Device("no Vulkan-capable GPU found".into()));
        }

        let mut candidates = Vec::with_capacity(devices.len());
        for &device in &devices {
            candidates.push(Self::describe(instance, surface, device)?);
        }

        let (index, families) = select_candidate(&candidates, policy).ok_or_else(|| {
            PresentError::Device(format!(
                "none of {} GPU(s) satisfies the requirements (policy {:?})",
                candidates.len(),
                policy
            ))
        })?;

        log::debug!("Chose '{}' ({:?})", candidates[index].name, candidates[index].device_type);
        Ok((devices[index], families))
    }

    fn describe(
        instance: &ash::Instance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<DeviceCandidate> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let available = unsafe { instance.enumerate_device_extension_properties(device) }?;
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let missing_extensions = missing_extensions(&available);

        // A failed support query counts as "cannot present" for that family.
        let (graphics_family, present_family) = find_queue_families(&families, |index| {
            surface.supports_present(device, index).unwrap_or(false)
        });

        Ok(DeviceCandidate {
            name: unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            device_type: props.device_type,
            missing_extensions,
            missing_features: missing_features(&features),
            graphics_family,
            present_family,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilyIndices,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const std::ffi::c_char> = required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&REQUIRED_DEVICE_FEATURES);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(|e| PresentError::Device(format!("failed to create logical device: {}", e)))?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    unsafe fn destroy_instance(
        instance: &ash::Instance,
        debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    ) {
        if let Some((debug_utils, messenger)) = debug_utils {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }
        instance.destroy_instance(None);
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    /// Format properties for `format` on the selected GPU.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
            self.surface.destroy();
            Self::destroy_instance(&self.instance, self.debug_utils.take());
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
