// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::find_memory_type;
use crate::error::{Result, VkResultExt};
use crate::frame::MAX_FRAMES_IN_FLIGHT;
use crate::mesh::UniformBlock;

/// A buffer and the allocation bound to it.
#[derive(Clone, Copy, Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn null() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size: 0,
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }

    /// Map, copy, unmap. Memory must be host-visible and coherent.
    pub unsafe fn write(&self, device: &ash::Device, bytes: &[u8]) -> Result<()> {
        debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .call("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

pub unsafe fn create_buffer(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer> {
    let info = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = unsafe { device.create_buffer(&info, None) }.call("create_buffer")?;

    let reqs = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory = find_memory_type(mem_props, reqs.memory_type_bits, props).and_then(|ty| {
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: reqs.size,
            memory_type_index: ty,
            ..Default::default()
        };
        unsafe { device.allocate_memory(&alloc, None) }.call("allocate_memory")
    });
    let memory = match memory {
        Ok(m) => m,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(crate::error::RenderError::from_vk("bind_buffer_memory", e));
    }

    Ok(GpuBuffer {
        buffer,
        memory,
        size,
    })
}

/// Copies `bytes` into a fresh device-local buffer through a host-visible staging buffer.
/// Blocks until the transfer has finished.
pub unsafe fn upload_via_staging(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    pool: vk::CommandPool,
    queue: vk::Queue,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = unsafe {
        create_buffer(
            device,
            mem_props,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }?;

    let result = unsafe { staging.write(device, bytes) }.and_then(|()| {
        let dst = unsafe {
            create_buffer(
                device,
                mem_props,
                size,
                vk::BufferUsageFlags::TRANSFER_DST | usage,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
        }?;
        match unsafe { copy_buffer(device, pool, queue, staging.buffer, dst.buffer, size) } {
            Ok(()) => Ok(dst),
            Err(e) => {
                unsafe { dst.destroy(device) };
                Err(e)
            }
        }
    });

    unsafe { staging.destroy(device) };
    result
}

unsafe fn copy_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
        .call("allocate_command_buffers")?[0];

    let run = || -> Result<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        unsafe {
            device
                .begin_command_buffer(cmd, &begin)
                .call("begin_command_buffer")?;
            device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
            device.end_command_buffer(cmd).call("end_command_buffer")?;
            device
                .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())
                .call("queue_submit")?;
            device.queue_wait_idle(queue).call("queue_wait_idle")?;
        }
        Ok(())
    };
    let result = run();

    unsafe { device.free_command_buffers(pool, &[cmd]) };
    result
}

/// One host-visible uniform buffer per in-flight slot.
pub unsafe fn create_uniform_buffers(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
) -> Result<Vec<GpuBuffer>> {
    let mut out = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        let made = unsafe {
            create_buffer(
                device,
                mem_props,
                UniformBlock::SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
        };
        match made {
            Ok(b) => out.push(b),
            Err(e) => {
                for b in &out {
                    unsafe { b.destroy(device) };
                }
                return Err(e);
            }
        }
    }
    Ok(out)
}

pub unsafe fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
    let size = vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: MAX_FRAMES_IN_FLIGHT as u32,
    };
    let info = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: MAX_FRAMES_IN_FLIGHT as u32,
        pool_size_count: 1,
        p_pool_sizes: &size,
        ..Default::default()
    };
    unsafe { device.create_descriptor_pool(&info, None) }.call("create_descriptor_pool")
}

/// Sets live as long as the pool; binding 0 of set `i` points at `uniforms[i]`.
pub unsafe fn allocate_descriptor_sets(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    uniforms: &[GpuBuffer],
) -> Result<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; uniforms.len()];
    let alloc = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: layouts.len() as u32,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    let sets =
        unsafe { device.allocate_descriptor_sets(&alloc) }.call("allocate_descriptor_sets")?;

    for (&set, ubo) in sets.iter().zip(uniforms) {
        let info = vk::DescriptorBufferInfo {
            buffer: ubo.buffer,
            offset: 0,
            range: UniformBlock::SIZE,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            dst_array_element: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: &info,
            ..Default::default()
        };
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_buffer_owns_nothing() {
        let b = GpuBuffer::null();
        assert_eq!(b.buffer, vk::Buffer::null());
        assert_eq!(b.memory, vk::DeviceMemory::null());
        assert_eq!(b.size, 0);
    }
}
