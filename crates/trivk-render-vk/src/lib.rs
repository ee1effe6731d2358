// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan renderer for a single spinning, vertex-coloured mesh.
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

pub mod buffer;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod mesh;
pub mod pipeline;
pub mod swapchain;

use buffer::GpuBuffer;
use device::DeviceQueues;
use error::VkResultExt;
use frame::{
    AcquireOutcome, FrameBackend, FrameCycle, FrameSync, PresentOutcome, MAX_FRAMES_IN_FLIGHT,
};
use instance::{Surface, VulkanInstance};
use mesh::UniformBlock;
use pipeline::Pipeline;
use swapchain::SwapchainBundle;

pub use device::SelectionPolicy;
pub use error::{RenderError, Result};
pub use frame::{FrameState, FrameStatus};
pub use mesh::MeshKind;

/// Drawable size in physical pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub clear_color: [f32; 4],
    pub mesh: MeshKind,
    pub validation: bool,
    pub shader_dir: PathBuf,
    pub policy: SelectionPolicy,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            mesh: MeshKind::default(),
            validation: cfg!(debug_assertions),
            shader_dir: pipeline::default_shader_dir(),
            policy: SelectionPolicy::default(),
        }
    }
}

/// Objects that depend on the swapchain extent or format.
struct SwapchainResources {
    bundle: SwapchainBundle,
    render_pass: vk::RenderPass,
    pipeline: Pipeline,
    framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainResources {
    /// Placeholder holding only null handles; destroying it is a no-op.
    fn empty() -> Self {
        Self {
            bundle: SwapchainBundle {
                swapchain: vk::SwapchainKHR::null(),
                format: vk::Format::UNDEFINED,
                extent: vk::Extent2D::default(),
                images: Vec::new(),
                image_views: Vec::new(),
            },
            render_pass: vk::RenderPass::null(),
            pipeline: Pipeline::null(),
            framebuffers: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn new(
        device: &ash::Device,
        surface: &Surface,
        swap_d: &ash::khr::swapchain::Device,
        phys: vk::PhysicalDevice,
        queues: &DeviceQueues,
        set_layout: vk::DescriptorSetLayout,
        cfg: &RendererConfig,
        size: RenderSize,
    ) -> Result<Self> {
        let bundle = unsafe {
            swapchain::create_swapchain_bundle(
                device,
                surface.loader(),
                swap_d,
                phys,
                surface.handle(),
                queues,
                size,
            )
        }?;
        let mut res = Self {
            bundle,
            ..Self::empty()
        };
        let built = (|| -> Result<()> {
            unsafe {
                res.render_pass = pipeline::create_render_pass(device, res.bundle.format)?;
                res.pipeline = pipeline::create_pipeline(
                    device,
                    &cfg.shader_dir,
                    res.render_pass,
                    set_layout,
                    res.bundle.extent,
                )?;
                res.framebuffers = pipeline::create_framebuffers(
                    device,
                    res.render_pass,
                    &res.bundle.image_views,
                    res.bundle.extent,
                )?;
            }
            Ok(())
        })();
        if let Err(e) = built {
            unsafe { res.destroy(device, swap_d) };
            return Err(e);
        }
        Ok(res)
    }

    /// Reverse creation order. Handles are nulled, so a second call is a no-op.
    unsafe fn destroy(&mut self, device: &ash::Device, swap_d: &ash::khr::swapchain::Device) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                device.destroy_framebuffer(fb, None);
            }
            self.pipeline.destroy(device);
            device.destroy_render_pass(self.render_pass, None);
            for iv in self.bundle.image_views.drain(..) {
                device.destroy_image_view(iv, None);
            }
            swap_d.destroy_swapchain(self.bundle.swapchain, None);
        }
        self.pipeline = Pipeline::null();
        self.render_pass = vk::RenderPass::null();
        self.bundle.swapchain = vk::SwapchainKHR::null();
        self.bundle.images.clear();
    }
}

pub struct VkRenderer {
    cfg: RendererConfig,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    queues: DeviceQueues,
    swap_d: ash::khr::swapchain::Device,
    set_layout: vk::DescriptorSetLayout,
    swap: SwapchainResources,
    cmd_pool: vk::CommandPool,
    cmd_bufs: Vec<vk::CommandBuffer>,
    vertex: GpuBuffer,
    index: GpuBuffer,
    uniforms: Vec<GpuBuffer>,
    desc_pool: vk::DescriptorPool,
    desc_sets: Vec<vk::DescriptorSet>,
    sync: FrameSync,
    cycle: FrameCycle,
    size: RenderSize,
    start: Instant,
    // Dropped after `Drop::drop` has destroyed the device, surface before instance.
    surface: Surface,
    instance: VulkanInstance,
}

impl VkRenderer {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: RendererConfig,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| RenderError::Initialization(format!("display handle: {e}")))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| RenderError::Initialization(format!("window handle: {e}")))?
            .as_raw();

        unsafe {
            let instance = VulkanInstance::new(dh, cfg.validation)?;
            let surface = instance.create_surface(dh, wh)?;

            let selected = device::pick_physical_device(
                instance.raw(),
                surface.loader(),
                surface.handle(),
                &cfg.policy,
            )?;
            let (device, queues) =
                device::create_logical_device(instance.raw(), &selected, &instance.layer_ptrs())?;
            let mem_props = instance
                .raw()
                .get_physical_device_memory_properties(selected.phys);
            let swap_d = ash::khr::swapchain::Device::new(instance.raw(), &device);

            // From here on `Drop` owns cleanup; every child starts null and is filled in order.
            let mut r = Self {
                cfg,
                phys: selected.phys,
                device,
                queues,
                swap_d,
                set_layout: vk::DescriptorSetLayout::null(),
                swap: SwapchainResources::empty(),
                cmd_pool: vk::CommandPool::null(),
                cmd_bufs: Vec::new(),
                vertex: GpuBuffer::null(),
                index: GpuBuffer::null(),
                uniforms: Vec::new(),
                desc_pool: vk::DescriptorPool::null(),
                desc_sets: Vec::new(),
                sync: FrameSync::null(),
                cycle: FrameCycle::new(),
                size,
                start: Instant::now(),
                surface,
                instance,
            };

            r.set_layout = pipeline::create_descriptor_set_layout(&r.device)?;
            r.swap = SwapchainResources::new(
                &r.device,
                &r.surface,
                &r.swap_d,
                r.phys,
                &r.queues,
                r.set_layout,
                &r.cfg,
                size,
            )?;

            let pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index: r.queues.graphics_family,
                ..Default::default()
            };
            r.cmd_pool = r
                .device
                .create_command_pool(&pool_info, None)
                .call("create_command_pool")?;

            r.vertex = buffer::upload_via_staging(
                &r.device,
                &mem_props,
                r.cmd_pool,
                r.queues.graphics,
                bytemuck::cast_slice(r.cfg.mesh.vertices()),
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )?;
            r.index = buffer::upload_via_staging(
                &r.device,
                &mem_props,
                r.cmd_pool,
                r.queues.graphics,
                bytemuck::cast_slice(r.cfg.mesh.indices()),
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?;
            r.uniforms = buffer::create_uniform_buffers(&r.device, &mem_props)?;
            r.desc_pool = buffer::create_descriptor_pool(&r.device)?;
            r.desc_sets = buffer::allocate_descriptor_sets(
                &r.device,
                r.desc_pool,
                r.set_layout,
                &r.uniforms,
            )?;

            let alloc_info = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: r.cmd_pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: MAX_FRAMES_IN_FLIGHT as u32,
                ..Default::default()
            };
            r.cmd_bufs = r
                .device
                .allocate_command_buffers(&alloc_info)
                .call("allocate_command_buffers")?;
            r.sync = FrameSync::new(&r.device)?;

            info!(
                "Vulkan renderer ready on \"{}\" ({}x{}, {:?} mesh)",
                selected.name, r.swap.bundle.extent.width, r.swap.bundle.extent.height, r.cfg.mesh
            );
            Ok(r)
        }
    }

    /// Records the new drawable size and latches a swapchain rebuild.
    pub fn resize(&mut self, size: RenderSize) {
        debug!("resize → {}x{}", size.width, size.height);
        self.size = size;
        self.cycle.notify_resized();
    }

    pub fn state(&self) -> FrameState {
        self.cycle.state()
    }

    /// Runs one iteration of the frame loop. Only non-recoverable errors come back as `Err`.
    pub fn draw_frame(&mut self) -> Result<FrameStatus> {
        let mut cycle = std::mem::take(&mut self.cycle);
        let status = cycle.drive(self.size.is_empty(), self);
        self.cycle = cycle;
        status
    }

    unsafe fn run_iteration(&mut self, cycle: &mut FrameCycle) -> Result<FrameStatus> {
        let slot = cycle.slot();
        let fence = self.sync.in_flight[slot];
        cycle.begin();

        unsafe {
            self.device
                .wait_for_fences(&[fence], true, u64::MAX)
                .call("wait_for_fences")?;
        }

        let acquired = unsafe {
            self.swap_d.acquire_next_image(
                self.swap.bundle.swapchain,
                u64::MAX,
                self.sync.image_available[slot],
                vk::Fence::null(),
            )
        };
        let (image_index, outcome) = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("acquire: suboptimal swapchain");
                }
                (index, AcquireOutcome::Acquired)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => (0, AcquireOutcome::OutOfDate),
            Err(e) => return Err(RenderError::from_vk("acquire_next_image", e)),
        };
        if !cycle.acquired(outcome) {
            return Ok(FrameStatus::Skipped);
        }

        // Only once we know work will be submitted against it.
        unsafe { self.device.reset_fences(&[fence]) }.call("reset_fences")?;

        let ubo = UniformBlock::at(self.start.elapsed().as_secs_f32(), self.swap.bundle.extent);
        unsafe {
            self.uniforms[slot].write(&self.device, bytemuck::bytes_of(&ubo))?;
            self.record(slot, image_index)?;
        }

        let wait_sems = [self.sync.image_available[slot]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_sems = [self.sync.render_finished[slot]];
        let cmd = self.cmd_bufs[slot];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_sems.len() as u32,
            p_wait_semaphores: wait_sems.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: signal_sems.len() as u32,
            p_signal_semaphores: signal_sems.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queues.graphics, std::slice::from_ref(&submit), fence)
                .call("queue_submit")?;
        }
        cycle.submitted();

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: signal_sems.len() as u32,
            p_wait_semaphores: signal_sems.as_ptr(),
            swapchain_count: 1,
            p_swapchains: &self.swap.bundle.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        cycle.presenting();
        let outcome = match unsafe { self.swap_d.queue_present(self.queues.present, &present) } {
            Ok(false) => PresentOutcome::Presented,
            Ok(true) => PresentOutcome::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentOutcome::OutOfDate,
            Err(e) => return Err(RenderError::from_vk("queue_present", e)),
        };
        cycle.presented(outcome);
        Ok(FrameStatus::Presented)
    }

    unsafe fn record(&self, slot: usize, image_index: u32) -> Result<()> {
        let cmd = self.cmd_bufs[slot];
        let d = &self.device;
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .call("reset_command_buffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .call("begin_command_buffer")?;

            let clears = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.cfg.clear_color,
                },
            }];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.swap.render_pass,
                framebuffer: self.swap.framebuffers[image_index as usize],
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.swap.bundle.extent,
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };

            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.swap.pipeline.pipeline,
            );
            d.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex.buffer], &[0]);
            d.cmd_bind_index_buffer(cmd, self.index.buffer, 0, vk::IndexType::UINT16);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.swap.pipeline.layout,
                0,
                &[self.desc_sets[slot]],
                &[],
            );
            d.cmd_draw_indexed(cmd, self.cfg.mesh.index_count(), 1, 0, 0, 0);
            d.cmd_end_render_pass(cmd);

            d.end_command_buffer(cmd).call("end_command_buffer")?;
        }
        Ok(())
    }

    unsafe fn recreate_swapchain(&mut self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle().call("device_wait_idle")?;
            self.swap.destroy(&self.device, &self.swap_d);
            self.swap = SwapchainResources::new(
                &self.device,
                &self.surface,
                &self.swap_d,
                self.phys,
                &self.queues,
                self.set_layout,
                &self.cfg,
                self.size,
            )?;
        }
        info!(
            "swapchain recreated ({}x{})",
            self.swap.bundle.extent.width, self.swap.bundle.extent.height
        );
        Ok(())
    }
}

impl FrameBackend for VkRenderer {
    type Error = RenderError;

    fn rebuild(&mut self) -> Result<()> {
        unsafe { self.recreate_swapchain() }
    }

    fn iterate(&mut self, cycle: &mut FrameCycle) -> Result<FrameStatus> {
        unsafe { self.run_iteration(cycle) }
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.swap.destroy(&self.device, &self.swap_d);

            for b in &self.uniforms {
                b.destroy(&self.device);
            }
            self.index.destroy(&self.device);
            self.vertex.destroy(&self.device);

            self.device.destroy_descriptor_pool(self.desc_pool, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);

            self.sync.destroy(&self.device);
            self.device.destroy_command_pool(self.cmd_pool, None);

            self.device.destroy_device(None);
        }
        debug!("VkRenderer dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_demo() {
        let cfg = RendererConfig::default();
        assert_eq!(cfg.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.mesh, MeshKind::Quad);
        assert_eq!(cfg.validation, cfg!(debug_assertions));
        assert!(cfg.policy.require_discrete_gpu && cfg.policy.require_geometry_shader);
        assert!(pipeline::shader_path(&cfg.shader_dir, pipeline::VERTEX_SHADER).exists());
    }

    #[test]
    fn empty_swapchain_resources_hold_null_handles() {
        let res = SwapchainResources::empty();
        assert_eq!(res.bundle.swapchain, vk::SwapchainKHR::null());
        assert_eq!(res.render_pass, vk::RenderPass::null());
        assert_eq!(res.pipeline.pipeline, vk::Pipeline::null());
        assert_eq!(res.pipeline.layout, vk::PipelineLayout::null());
        assert!(res.framebuffers.is_empty() && res.bundle.image_views.is_empty());
    }

    #[test]
    fn zero_area_sizes_are_empty() {
        assert!(RenderSize::default().is_empty());
        assert!(RenderSize { width: 1024, height: 0 }.is_empty());
        assert!(!RenderSize { width: 1024, height: 768 }.is_empty());
    }
}
