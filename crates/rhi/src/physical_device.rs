//! Physical device (GPU) selection and the runtime capability set.
//!
//! Selection happens once. Everything the renderer later needs to branch on
//! (wireframe support, depth format, a dedicated transfer queue) is resolved
//! here into a [`DeviceCapabilities`] value instead of compile-time toggles.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices used by the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
    /// A transfer-only family when the device has one, otherwise the graphics family.
    pub transfer_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Graphics and present are both required.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics_family, self.present_family, self.transfer_family]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// True when uploads can run on a queue separate from graphics.
    pub fn has_dedicated_transfer(&self) -> bool {
        self.transfer_family.is_some() && self.transfer_family != self.graphics_family
    }
}

/// Optional features resolved at device selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// `fillModeNonSolid`: line polygon mode for the wireframe pipeline variant.
    pub wireframe: bool,
    pub sampler_anisotropy: bool,
    pub max_sampler_anisotropy: u32,
    pub dedicated_transfer_queue: bool,
    pub depth_format: vk::Format,
    /// Upper bound on sampled images visible to one shader stage.
    pub max_per_stage_samplers: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            wireframe: true,
            sampler_anisotropy: false,
            max_sampler_anisotropy: 1,
            dedicated_transfer_queue: false,
            depth_format: vk::Format::D32_SFLOAT,
            max_per_stage_samplers: 128,
        }
    }
}

/// A selected GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    pub capabilities: DeviceCapabilities,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        // SAFETY: device_name is a NUL-terminated fixed array filled by the driver.
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Total device-local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        device_local_memory(&self.memory_properties)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Picks the highest-rated GPU that can render and present to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no device has graphics and present
/// queues, the swapchain extension, a usable surface format and a depth format.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .map(|info| {
            let score = rate_device(&info.properties, &info.memory_properties);
            debug!(
                "GPU '{}' ({}) - score {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    let Some((selected, score)) = best else {
        warn!("No GPU satisfies the renderer's requirements");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU: '{}' ({}), score {}, capabilities {:?}",
        selected.device_name(),
        selected.device_type_name(),
        score,
        selected.capabilities
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    // SAFETY: NUL-terminated fixed array filled by the driver.
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = find_queue_families(&families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    });

    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics or present queue", name);
        return None;
    }

    if !supports_swapchain_extension(instance, device) {
        debug!("GPU '{}' skipped: VK_KHR_swapchain not supported", name);
        return None;
    }

    match SwapchainSupportDetails::query(device, surface, surface_loader) {
        Ok(support) if support.is_adequate() => {}
        _ => {
            debug!("GPU '{}' skipped: no usable surface format or present mode", name);
            return None;
        }
    }

    let depth_format = choose_depth_format(|format| {
        let props = unsafe { instance.get_physical_device_format_properties(device, format) };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    });
    let Some(depth_format) = depth_format else {
        debug!("GPU '{}' skipped: no depth attachment format", name);
        return None;
    };

    let capabilities = DeviceCapabilities {
        wireframe: features.fill_mode_non_solid == vk::TRUE,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        max_sampler_anisotropy: properties.limits.max_sampler_anisotropy as u32,
        dedicated_transfer_queue: queue_families.has_dedicated_transfer(),
        depth_format,
        max_per_stage_samplers: properties.limits.max_per_stage_descriptor_samplers,
    };

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
        capabilities,
    })
}

fn supports_swapchain_extension(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions.iter().any(|ext| {
        // SAFETY: NUL-terminated fixed array filled by the driver.
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == ash::khr::swapchain::NAME
    })
}

/// Assigns queue families from the device's family list.
///
/// The first graphics family wins; present prefers the graphics family when it
/// can present; transfer prefers a family with neither graphics nor compute.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let mut dedicated_transfer = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let compute = family.queue_flags.contains(vk::QueueFlags::COMPUTE);
        let transfer = family.queue_flags.contains(vk::QueueFlags::TRANSFER);

        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }

        if transfer && !graphics && !compute && dedicated_transfer.is_none() {
            dedicated_transfer = Some(i);
        }

        if present_support(i) {
            let prefer = graphics && indices.graphics_family == Some(i);
            if indices.present_family.is_none() || prefer {
                indices.present_family = Some(i);
            }
        }
    }

    indices.transfer_family = dedicated_transfer.or(indices.graphics_family);
    indices
}

/// First candidate in [`DEPTH_FORMAT_CANDIDATES`] usable as a depth attachment.
pub fn choose_depth_format(supported: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| supported(format))
}

fn device_local_memory(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Higher is better. Discrete GPUs dominate; VRAM breaks ties.
fn rate_device(
    properties: &vk::PhysicalDeviceProperties,
    memory: &vk::PhysicalDeviceMemoryProperties,
) -> u32 {
    let type_score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    let vram_mb = (device_local_memory(memory) / (1024 * 1024)).min(16000) as u32;
    type_score + vram_mb + properties.limits.max_image_dimension2_d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
    }

    #[test]
    fn test_single_universal_family() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let indices = find_queue_families(&families, |_| true);

        assert!(indices.is_complete());
        assert_eq!(indices.transfer_family, Some(0));
        assert!(!indices.has_dedicated_transfer());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_dedicated_transfer_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = find_queue_families(&families, |i| i == 0);

        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
        assert_eq!(indices.transfer_family, Some(2));
        assert!(indices.has_dedicated_transfer());
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_present_prefers_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = find_queue_families(&families, |_| true);

        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_empty_family_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| true);

        assert_eq!(indices.graphics_family, Some(1));
    }

    #[test]
    fn test_no_present_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| false);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_choose_depth_format_preference() {
        assert_eq!(choose_depth_format(|_| true), Some(vk::Format::D32_SFLOAT));
        assert_eq!(
            choose_depth_format(|f| f == vk::Format::D24_UNORM_S8_UINT),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(choose_depth_format(|_| false), None);
    }

    #[test]
    fn test_rate_device_prefers_discrete() {
        let memory = vk::PhysicalDeviceMemoryProperties::default();
        let discrete = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        };
        let integrated = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..Default::default()
        };
        assert!(rate_device(&discrete, &memory) > rate_device(&integrated, &memory));
    }
}
