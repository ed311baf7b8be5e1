// Depth-stencil and multisampled colour targets
//
// Both are sized to the swap chain extent and recreated on every rebuild.

use super::allocator::{AllocatedImage, GpuAllocator};
use super::sync::FrameSync;
use crate::error::{PresentError, Result};
use ash::vk;
use std::sync::Arc;

/// Depth-stencil formats tried in order.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
];

/// First candidate whose optimal-tiling features include depth-stencil attachment use.
pub fn pick_depth_format(
    candidates: &[vk::Format],
    mut optimal_features: impl FnMut(vk::Format) -> vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            optimal_features(format).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| {
            PresentError::Attachment(format!(
                "none of {:?} supports depth-stencil attachment",
                candidates
            ))
        })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Aspect mask for views and barriers on a depth image of `format`.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

fn attachment_info(
    format: vk::Format,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
) -> vk::ImageCreateInfo {
    vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(samples)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .build()
}

/// Builds depth and colour targets for one swap chain generation.
pub struct AttachmentProvisioner<'a> {
    allocator: &'a Arc<GpuAllocator>,
    frames: &'a FrameSync,
}

impl<'a> AttachmentProvisioner<'a> {
    pub fn new(allocator: &'a Arc<GpuAllocator>, frames: &'a FrameSync) -> Self {
        Self { allocator, frames }
    }

    /// Depth format supported by the selected GPU.
    pub fn depth_format(&self) -> Result<vk::Format> {
        let device = self.allocator.device();
        pick_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
            device.format_properties(format).optimal_tiling_features
        })
    }

    /// Multisampled colour target that resolves into the presentable image.
    pub fn create_color_target(
        &self,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Result<AllocatedImage> {
        let info = attachment_info(
            format,
            extent,
            samples,
            vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        self.allocator
            .create_image(&info, vk::ImageAspectFlags::COLOR, "msaa color")
    }

    /// Depth-stencil target, transitioned to attachment-optimal layout before returning.
    pub fn create_depth_target(
        &self,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Result<AllocatedImage> {
        let info = attachment_info(
            format,
            extent,
            samples,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        let depth = self
            .allocator
            .create_image(&info, depth_aspect(format), "depth")?;

        let image = depth.image;
        let aspect = depth.aspect;
        self.frames.one_time_submit(|device, cmd| {
            let barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(
                    vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                );

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier.build()],
                );
            }
        })?;

        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supports(list: &'static [vk::Format]) -> impl FnMut(vk::Format) -> vk::FormatFeatureFlags {
        move |format| {
            if list.contains(&format) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::FormatFeatureFlags::SAMPLED_IMAGE
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        }
    }

    #[test]
    fn first_supported_candidate_wins() {
        let format = pick_depth_format(
            &DEPTH_FORMAT_CANDIDATES,
            supports(&[vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT]),
        )
        .unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn falls_back_when_packed_format_missing() {
        let format =
            pick_depth_format(&DEPTH_FORMAT_CANDIDATES, supports(&[vk::Format::D32_SFLOAT])).unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn no_candidate_is_an_attachment_error() {
        let err = pick_depth_format(&DEPTH_FORMAT_CANDIDATES, supports(&[])).unwrap_err();
        assert!(matches!(err, PresentError::Attachment(_)));
    }

    #[test]
    fn stencil_formats_get_stencil_aspect() {
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn attachment_info_matches_extent() {
        let extent = vk::Extent2D { width: 640, height: 480 };
        let info = attachment_info(
            vk::Format::D32_SFLOAT,
            extent,
            vk::SampleCountFlags::TYPE_4,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        assert_eq!((info.extent.width, info.extent.height, info.extent.depth), (640, 480, 1));
        assert_eq!(info.samples, vk::SampleCountFlags::TYPE_4);
    }
}
