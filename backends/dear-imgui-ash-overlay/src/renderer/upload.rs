//! Frame data uploads: geometry, the transform uniform, and staged texture copies.

use super::allocator::Allocate;
use super::record::{CommandEncoder, ImageTransition, UploadRegion};
use super::resources::{BufferKind, ResourceCache};
use crate::{FrameGeometry, RendererResult, Transform};
use ash::vk;
use std::collections::VecDeque;

/// Copy every list's vertices and indices into the cached buffers, in list order.
///
/// Returns `false`, without touching any buffer, when the frame has no
/// vertices or no indices.
pub(crate) fn upload_geometry<A: Allocate>(
    allocator: &mut A,
    cache: &mut ResourceCache<A::Memory>,
    frame: &FrameGeometry<'_>,
) -> RendererResult<bool> {
    let vertex_bytes = frame.vertex_bytes();
    let index_bytes = frame.index_bytes();
    if vertex_bytes == 0 || index_bytes == 0 {
        return Ok(false);
    }

    cache.ensure_buffer(allocator, BufferKind::Vertex, vertex_bytes)?;
    cache.ensure_buffer(allocator, BufferKind::Index, index_bytes)?;

    let vertices: Vec<&[u8]> = frame.lists.iter().map(|list| list.vertices).collect();
    let indices: Vec<&[u8]> = frame.lists.iter().map(|list| list.indices).collect();
    cache.write(allocator, BufferKind::Vertex, &vertices)?;
    cache.write(allocator, BufferKind::Index, &indices)?;

    log::trace!(
        "uploaded {} lists: {vertex_bytes} vertex bytes, {index_bytes} index bytes",
        frame.lists.len()
    );
    Ok(true)
}

pub(crate) fn upload_transform<A: Allocate>(
    allocator: &mut A,
    cache: &mut ResourceCache<A::Memory>,
    transform: &Transform,
) -> RendererResult<()> {
    let bytes = bytemuck::bytes_of(transform);
    cache.ensure_buffer(allocator, BufferKind::Uniform, bytes.len())?;
    cache.write(allocator, BufferKind::Uniform, &[bytes])
}

/// Fill a new `TRANSFER_SRC` buffer with `pixels`.
pub(crate) fn stage_pixels<A: Allocate>(
    allocator: &mut A,
    pixels: &[u8],
) -> RendererResult<(vk::Buffer, A::Memory)> {
    let (buffer, mut memory) =
        allocator.create_buffer(pixels.len(), vk::BufferUsageFlags::TRANSFER_SRC)?;
    if let Err(err) = allocator.write(&mut memory, &[pixels]) {
        allocator.destroy_buffer(buffer, memory)?;
        return Err(err);
    }
    Ok((buffer, memory))
}

/// A staged copy waiting to be recorded ahead of the render pass.
pub(crate) struct PendingUpload<M> {
    pub image: vk::Image,
    pub staging: vk::Buffer,
    pub memory: M,
    pub region: UploadRegion,
    /// `UNDEFINED` for a fresh image, `SHADER_READ_ONLY_OPTIMAL` for an update.
    pub old_layout: vk::ImageLayout,
}

/// Record barrier, copy, barrier for each upload, leaving images shader-readable.
pub(crate) fn record_uploads<E: CommandEncoder, M>(
    encoder: &mut E,
    uploads: &[PendingUpload<M>],
) {
    for upload in uploads {
        let (src_stage, src_access) = if upload.old_layout == vk::ImageLayout::UNDEFINED {
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
        } else {
            (
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::SHADER_READ,
            )
        };

        encoder.image_barrier(&ImageTransition {
            image: upload.image,
            old_layout: upload.old_layout,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_stage,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        });
        encoder.copy_buffer_to_image(upload.staging, upload.image, upload.region);
        encoder.image_barrier(&ImageTransition {
            image: upload.image,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
        });
    }
}

struct RetiredBuffer<M> {
    frame: u64,
    buffer: vk::Buffer,
    memory: M,
}

/// Staging buffers kept alive until the frames that read them can no longer be in flight.
pub(crate) struct StagingRing<M> {
    in_flight_frames: u64,
    frame: u64,
    retired: VecDeque<RetiredBuffer<M>>,
}

impl<M> StagingRing<M> {
    pub fn new(in_flight_frames: usize) -> Self {
        Self {
            in_flight_frames: in_flight_frames as u64,
            frame: 0,
            retired: VecDeque::new(),
        }
    }

    /// Advance to the next frame and free buffers recorded `in_flight_frames` frames ago.
    pub fn begin_frame<A>(&mut self, allocator: &mut A) -> RendererResult<()>
    where
        A: Allocate<Memory = M>,
    {
        self.frame += 1;
        while let Some(front) = self.retired.front() {
            if front.frame + self.in_flight_frames > self.frame {
                break;
            }
            if let Some(entry) = self.retired.pop_front() {
                allocator.destroy_buffer(entry.buffer, entry.memory)?;
            }
        }
        Ok(())
    }

    /// Number of the frame started by the last `begin_frame`.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Keep `buffer` until it is no longer referenced by a command buffer of the current frame.
    pub fn retire(&mut self, buffer: vk::Buffer, memory: M) {
        self.retired.push_back(RetiredBuffer {
            frame: self.frame,
            buffer,
            memory,
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.retired.len()
    }

    pub fn destroy_all<A>(&mut self, allocator: &mut A) -> RendererResult<()>
    where
        A: Allocate<Memory = M>,
    {
        while let Some(entry) = self.retired.pop_front() {
            allocator.destroy_buffer(entry.buffer, entry.memory)?;
        }
        Ok(())
    }
}
