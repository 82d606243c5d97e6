//! GPU-free stand-ins for the allocator and command encoder.

use super::allocator::Allocate;
use super::record::{CommandEncoder, ImageTransition, UploadRegion};
use crate::{RendererError, RendererResult};
use ash::vk::{self, Handle};
use std::collections::HashMap;

#[derive(Debug)]
pub(crate) struct FakeMemory {
    id: u64,
}

/// Hands out sequential handles and keeps buffer contents in host memory.
#[derive(Default)]
pub(crate) struct FakeAllocator {
    next_handle: u64,
    buffers: HashMap<u64, (vk::BufferUsageFlags, Vec<u8>)>,
    images: HashMap<u64, (u32, u32)>,
    pub buffers_created: usize,
    pub buffers_destroyed: usize,
    pub images_created: usize,
    pub images_destroyed: usize,
    pub fail_allocations: bool,
}

impl FakeAllocator {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    pub fn allocations(&self) -> usize {
        self.buffers_created + self.images_created
    }

    pub fn usage_of(&self, buffer: vk::Buffer) -> Option<vk::BufferUsageFlags> {
        self.buffers.get(&buffer.as_raw()).map(|(usage, _)| *usage)
    }

    pub fn contents(&self, buffer: vk::Buffer) -> &[u8] {
        self.buffers
            .get(&buffer.as_raw())
            .map(|(_, bytes)| bytes.as_slice())
            .unwrap_or_default()
    }

    fn exhausted() -> RendererError {
        RendererError::ResourceExhausted {
            required: vk::MemoryPropertyFlags::HOST_VISIBLE,
            type_bits: 0,
        }
    }
}

impl Allocate for FakeAllocator {
    type Memory = FakeMemory;

    fn create_buffer(
        &mut self,
        size: usize,
        usage: vk::BufferUsageFlags,
    ) -> RendererResult<(vk::Buffer, Self::Memory)> {
        if self.fail_allocations {
            return Err(Self::exhausted());
        }
        let id = self.handle();
        self.buffers.insert(id, (usage, vec![0; size]));
        self.buffers_created += 1;
        Ok((vk::Buffer::from_raw(id), FakeMemory { id }))
    }

    fn create_image(
        &mut self,
        width: u32,
        height: u32,
        _format: vk::Format,
    ) -> RendererResult<(vk::Image, Self::Memory)> {
        if self.fail_allocations {
            return Err(Self::exhausted());
        }
        let id = self.handle();
        self.images.insert(id, (width, height));
        self.images_created += 1;
        Ok((vk::Image::from_raw(id), FakeMemory { id }))
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, memory: Self::Memory) -> RendererResult<()> {
        assert_eq!(buffer.as_raw(), memory.id);
        assert!(self.buffers.remove(&memory.id).is_some(), "double free");
        self.buffers_destroyed += 1;
        Ok(())
    }

    fn destroy_image(&mut self, image: vk::Image, memory: Self::Memory) -> RendererResult<()> {
        assert_eq!(image.as_raw(), memory.id);
        assert!(self.images.remove(&memory.id).is_some(), "double free");
        self.images_destroyed += 1;
        Ok(())
    }

    fn write(&mut self, memory: &mut Self::Memory, chunks: &[&[u8]]) -> RendererResult<()> {
        let (_, bytes) = self
            .buffers
            .get_mut(&memory.id)
            .ok_or_else(|| RendererError::Allocator("unknown buffer".into()))?;
        let len = super::allocator::checked_write_len(chunks, bytes.len())?;
        let mut offset = 0;
        for chunk in chunks {
            bytes[offset..offset + chunk.len()].copy_from_slice(chunk);
            offset += chunk.len();
        }
        assert_eq!(offset, len);
        Ok(())
    }
}

/// One recorded encoder call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Recorded {
    Begin,
    End,
    Barrier {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    Copy {
        buffer: vk::Buffer,
        image: vk::Image,
        region: UploadRegion,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    NextSubpass,
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindSet {
        first_set: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    Viewport(vk::Extent2D),
    Scissor(vk::Rect2D),
    Draw(u32),
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
}

#[derive(Default)]
pub(crate) struct RecordingEncoder {
    pub calls: Vec<Recorded>,
}

impl RecordingEncoder {
    pub fn draws(&self) -> Vec<&Recorded> {
        self.calls
            .iter()
            .filter(|call| matches!(call, Recorded::DrawIndexed { .. }))
            .collect()
    }
}

impl CommandEncoder for RecordingEncoder {
    fn begin(&mut self) -> RendererResult<()> {
        self.calls.push(Recorded::Begin);
        Ok(())
    }

    fn end(&mut self) -> RendererResult<()> {
        self.calls.push(Recorded::End);
        Ok(())
    }

    fn image_barrier(&mut self, transition: &ImageTransition) {
        self.calls.push(Recorded::Barrier {
            image: transition.image,
            old_layout: transition.old_layout,
            new_layout: transition.new_layout,
        });
    }

    fn copy_buffer_to_image(&mut self, buffer: vk::Buffer, image: vk::Image, region: UploadRegion) {
        self.calls.push(Recorded::Copy {
            buffer,
            image,
            region,
        });
    }

    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        self.calls.push(Recorded::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
        });
    }

    fn next_subpass(&mut self) {
        self.calls.push(Recorded::NextSubpass);
    }

    fn end_render_pass(&mut self) {
        self.calls.push(Recorded::EndRenderPass);
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.calls.push(Recorded::BindPipeline(pipeline));
    }

    fn bind_descriptor_set(
        &mut self,
        _layout: vk::PipelineLayout,
        first_set: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        self.calls.push(Recorded::BindSet {
            first_set,
            set,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        self.calls.push(Recorded::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType) {
        self.calls.push(Recorded::BindIndexBuffer(buffer, index_type));
    }

    fn set_viewport(&mut self, extent: vk::Extent2D) {
        self.calls.push(Recorded::Viewport(extent));
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.calls.push(Recorded::Scissor(scissor));
    }

    fn draw(&mut self, vertex_count: u32) {
        self.calls.push(Recorded::Draw(vertex_count));
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) {
        self.calls.push(Recorded::DrawIndexed {
            index_count,
            first_index,
            vertex_offset,
        });
    }
}
