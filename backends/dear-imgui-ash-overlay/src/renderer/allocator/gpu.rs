//! Allocator sharing a `gpu-allocator` instance with the application.

use super::{Allocate, checked_write_len};
use crate::{RendererError, RendererResult};
use ash::{Device, vk};
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use std::sync::{Arc, Mutex};

/// Abstraction over `gpu_allocator::vulkan::Allocator`.
pub struct Allocator {
    device: Device,
    allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>,
}

pub type Memory = Allocation;

impl Allocator {
    pub fn new(device: Device, allocator: Arc<Mutex<gpu_allocator::vulkan::Allocator>>) -> Self {
        Self { device, allocator }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RendererResult<Allocation> {
        let mut allocator = self
            .allocator
            .lock()
            .map_err(|_| RendererError::Allocator("gpu-allocator mutex poisoned".into()))?;
        Ok(allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    fn free(&self, allocation: Allocation) -> RendererResult<()> {
        let mut allocator = self
            .allocator
            .lock()
            .map_err(|_| RendererError::Allocator("gpu-allocator mutex poisoned".into()))?;
        Ok(allocator.free(allocation)?)
    }
}

impl Allocate for Allocator {
    type Memory = Memory;

    fn create_buffer(
        &mut self,
        size: usize,
        usage: vk::BufferUsageFlags,
    ) -> RendererResult<(vk::Buffer, Self::Memory)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size as vk::DeviceSize)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(
            "imgui overlay buffer",
            requirements,
            MemoryLocation::CpuToGpu,
            true,
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation)?;
            return Err(err.into());
        }

        Ok((buffer, allocation))
    }

    fn create_image(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> RendererResult<(vk::Image, Self::Memory)> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { self.device.create_image(&image_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(
            "imgui overlay texture",
            requirements,
            MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_image(image, None) };
            self.free(allocation)?;
            return Err(err.into());
        }

        Ok((image, allocation))
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, memory: Self::Memory) -> RendererResult<()> {
        unsafe { self.device.destroy_buffer(buffer, None) };
        self.free(memory)
    }

    fn destroy_image(&mut self, image: vk::Image, memory: Self::Memory) -> RendererResult<()> {
        unsafe { self.device.destroy_image(image, None) };
        self.free(memory)
    }

    fn write(&mut self, memory: &mut Self::Memory, chunks: &[&[u8]]) -> RendererResult<()> {
        let capacity = memory.size() as usize;
        let len = checked_write_len(chunks, capacity)?;
        let mapped = memory
            .mapped_slice_mut()
            .ok_or_else(|| RendererError::Allocator("allocation is not host mapped".into()))?;

        let mut offset = 0;
        for chunk in chunks {
            mapped[offset..offset + chunk.len()].copy_from_slice(chunk);
            offset += chunk.len();
        }
        debug_assert_eq!(offset, len);
        Ok(())
    }
}
