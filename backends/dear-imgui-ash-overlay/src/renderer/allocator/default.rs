//! Allocator backed by one `vkAllocateMemory` call per resource.

use super::{Allocate, checked_write_len, find_memory_type};
use crate::RendererResult;
use ash::{Device, vk};

/// Default allocator.
pub struct Allocator {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// Dedicated device memory of one buffer or image.
#[derive(Debug)]
pub struct Memory {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Allocator {
    pub fn new(device: Device, memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            device,
            memory_properties,
        }
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        required: vk::MemoryPropertyFlags,
    ) -> RendererResult<Memory> {
        let memory_type_index =
            find_memory_type(&self.memory_properties, requirements.memory_type_bits, required)?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None)? };
        Ok(Memory {
            memory,
            size: requirements.size,
        })
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

        let bound = self
            .allocate(
                requirements,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .and_then(|memory| {
                match unsafe { self.device.bind_buffer_memory(buffer, memory.memory, 0) } {
                    Ok(()) => Ok(memory),
                    Err(err) => {
                        unsafe { self.device.free_memory(memory.memory, None) };
                        Err(err.into())
                    }
                }
            });

        match bound {
            Ok(memory) => Ok((buffer, memory)),
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                Err(err)
            }
        }
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

        let bound = self
            .allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory| {
                match unsafe { self.device.bind_image_memory(image, memory.memory, 0) } {
                    Ok(()) => Ok(memory),
                    Err(err) => {
                        unsafe { self.device.free_memory(memory.memory, None) };
                        Err(err.into())
                    }
                }
            });

        match bound {
            Ok(memory) => Ok((image, memory)),
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                Err(err)
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, memory: Self::Memory) -> RendererResult<()> {
        unsafe {
            self.device.destroy_buffer(buffer, None);
            self.device.free_memory(memory.memory, None);
        }
        Ok(())
    }

    fn destroy_image(&mut self, image: vk::Image, memory: Self::Memory) -> RendererResult<()> {
        unsafe {
            self.device.destroy_image(image, None);
            self.device.free_memory(memory.memory, None);
        }
        Ok(())
    }

    fn write(&mut self, memory: &mut Self::Memory, chunks: &[&[u8]]) -> RendererResult<()> {
        let len = checked_write_len(chunks, memory.size as usize)?;
        if len == 0 {
            return Ok(());
        }

        unsafe {
            let ptr = self.device.map_memory(
                memory.memory,
                0,
                len as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            let mapped = std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len);
            let mut offset = 0;
            for chunk in chunks {
                mapped[offset..offset + chunk.len()].copy_from_slice(chunk);
                offset += chunk.len();
            }
            self.device.unmap_memory(memory.memory);
        }
        Ok(())
    }
}
