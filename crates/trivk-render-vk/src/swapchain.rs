// SPDX-License-Identifier: CEPL-1.0
use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::info;

use crate::device::DeviceQueues;
use crate::error::{RenderError, Result, VkResultExt};
use crate::RenderSize;

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

// Info only
fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}
fn cs_name(c: vk::ColorSpaceKHR) -> &'static str {
    match c {
        vk::ColorSpaceKHR::SRGB_NONLINEAR => "SRGB_NONLINEAR",
        vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => "EXTENDED_SRGB_LINEAR",
        vk::ColorSpaceKHR::HDR10_ST2084_EXT => "HDR10_ST2084",
        vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT => "DISPLAY_P3_NONLINEAR",
        _ => "OTHER",
    }
}
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// sRGB BGRA8 wherever it sits in the list, else whatever the driver lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    if formats.contains(&PREFERRED_SURFACE_FORMAT) {
        return Ok(PREFERRED_SURFACE_FORMAT);
    }
    formats.first().copied().ok_or_else(|| {
        RenderError::Initialization("surface reports no supported formats".to_owned())
    })
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// `current_extent.width == u32::MAX` means the surface lets us pick.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 == no max).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

pub struct SwapchainBundle {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

pub unsafe fn create_swapchain_bundle(
    device: &ash::Device,
    surf_i: &surface::Instance,
    swap_d: &swapchain::Device,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    queues: &DeviceQueues,
    hint: RenderSize,
) -> Result<SwapchainBundle> {
    let caps = unsafe { surf_i.get_physical_device_surface_capabilities(phys, surface) }
        .call("get_physical_device_surface_capabilities")?;
    let formats = unsafe { surf_i.get_physical_device_surface_formats(phys, surface) }
        .call("get_physical_device_surface_formats")?;
    let modes = unsafe { surf_i.get_physical_device_surface_present_modes(phys, surface) }
        .call("get_physical_device_surface_present_modes")?;

    let surf_format = choose_surface_format(&formats)?;
    let present_mode = choose_present_mode(&modes);
    let extent = extent_from_caps(&caps, hint);
    let min_count = image_count(&caps);

    info!(
        "format: {}, color_space: {}, present_mode: {}, extent: {}x{}, images(min={} → picked={})",
        fmt_name(surf_format.format),
        cs_name(surf_format.color_space),
        pm_name(present_mode),
        extent.width,
        extent.height,
        caps.min_image_count,
        min_count
    );

    // Images are touched by both families when they differ.
    let family_indices = [queues.graphics_family, queues.present_family];
    let (sharing_mode, qf_count, qf_ptr) = if queues.graphics_family != queues.present_family {
        (vk::SharingMode::CONCURRENT, 2, family_indices.as_ptr())
    } else {
        (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
    };

    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface,
        min_image_count: min_count,
        image_format: surf_format.format,
        image_color_space: surf_format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing_mode,
        queue_family_index_count: qf_count,
        p_queue_family_indices: qf_ptr,
        pre_transform: caps.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain: vk::SwapchainKHR::null(),
        ..Default::default()
    };

    let swapchain =
        unsafe { swap_d.create_swapchain(&swap_info, None) }.call("create_swapchain")?;
    let images =
        unsafe { swap_d.get_swapchain_images(swapchain) }.call("get_swapchain_images")?;

    let mut views = Vec::with_capacity(images.len());
    for &img in &images {
        let sub = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: img,
            view_type: vk::ImageViewType::TYPE_2D,
            format: surf_format.format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            },
            subresource_range: sub,
            ..Default::default()
        };
        match unsafe { device.create_image_view(&iv_info, None) } {
            Ok(v) => views.push(v),
            Err(e) => {
                unsafe {
                    for &v in &views {
                        device.destroy_image_view(v, None);
                    }
                    swap_d.destroy_swapchain(swapchain, None);
                }
                return Err(RenderError::from_vk("create_image_view", e));
            }
        }
    }

    Ok(SwapchainBundle {
        swapchain,
        format: surf_format.format,
        extent,
        images,
        image_views: views,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn preferred_format_wins_anywhere_in_list() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            PREFERRED_SURFACE_FORMAT,
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn format_falls_back_to_first() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // right format, wrong colour space
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[0]);
    }

    #[test]
    fn empty_format_list_is_an_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RenderError::Initialization(_))
        ));
    }

    #[test]
    fn color_space_names() {
        assert_eq!(cs_name(vk::ColorSpaceKHR::SRGB_NONLINEAR), "SRGB_NONLINEAR");
        assert_eq!(cs_name(vk::ColorSpaceKHR::HDR10_ST2084_EXT), "HDR10_ST2084");
        assert_eq!(cs_name(vk::ColorSpaceKHR::from_raw(0x7fff_fff0)), "OTHER");
    }

    #[test]
    fn mailbox_preferred_else_fifo() {
        let with = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&with), vk::PresentModeKHR::MAILBOX);

        let without = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&without), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn current_extent_passes_through() {
        let c = caps((800, 600), (1, 1), (4096, 4096));
        let e = extent_from_caps(
            &c,
            RenderSize {
                width: 1024,
                height: 768,
            },
        );
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_request() {
        let c = caps((u32::MAX, u32::MAX), (200, 100), (1000, 700));
        let big = extent_from_caps(
            &c,
            RenderSize {
                width: 5000,
                height: 5000,
            },
        );
        assert_eq!((big.width, big.height), (1000, 700));

        let small = extent_from_caps(
            &c,
            RenderSize {
                width: 0,
                height: 50,
            },
        );
        assert_eq!((small.width, small.height), (200, 100));

        let inside = extent_from_caps(
            &c,
            RenderSize {
                width: 640,
                height: 480,
            },
        );
        assert_eq!((inside.width, inside.height), (640, 480));
    }

    #[test]
    fn image_count_respects_max() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(image_count(&c), 3);
    }
}
