//! Per-kind cache of the renderer's long-lived host-visible buffers.

use super::allocator::Allocate;
use crate::{RendererError, RendererResult};
use ash::vk;

/// The buffers the cache keeps alive between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

impl BufferKind {
    const ALL: [BufferKind; 3] = [BufferKind::Vertex, BufferKind::Index, BufferKind::Uniform];

    fn slot(self) -> usize {
        self as usize
    }

    pub(crate) fn usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }
}

/// Handle to a cached buffer, valid until its next resize or until shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufferSlot {
    pub buffer: vk::Buffer,
    pub size: usize,
}

struct CachedBuffer<M> {
    slot: BufferSlot,
    memory: M,
}

type FrameBuffers<M> = [Option<CachedBuffer<M>>; 3];

/// One set of buffers per in-flight frame.
///
/// Every operation acts on the set chosen by [`select_frame`](Self::select_frame),
/// so a buffer is only resized or rewritten once the frame that last used it
/// can no longer be executing.
pub(crate) struct ResourceCache<M> {
    frames: Vec<FrameBuffers<M>>,
    current: usize,
}

impl<M> Default for ResourceCache<M> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<M> ResourceCache<M> {
    pub fn new(in_flight_frames: usize) -> Self {
        Self {
            frames: (0..in_flight_frames.max(1))
                .map(|_| [None, None, None])
                .collect(),
            current: 0,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Switch to the buffer set of frame number `frame`.
    pub fn select_frame(&mut self, frame: u64) {
        self.current = (frame % self.frames.len() as u64) as usize;
    }

    /// Index of the buffer set in use.
    pub fn current_frame(&self) -> usize {
        self.current
    }

    /// Return a buffer of `kind` holding exactly `size` bytes.
    ///
    /// An existing buffer of a different size is destroyed and replaced.
    pub fn ensure_buffer<A>(
        &mut self,
        allocator: &mut A,
        kind: BufferKind,
        size: usize,
    ) -> RendererResult<BufferSlot>
    where
        A: Allocate<Memory = M>,
    {
        let entry = &mut self.frames[self.current][kind.slot()];
        if let Some(cached) = entry.as_ref() {
            if cached.slot.size == size {
                return Ok(cached.slot);
            }
        }

        if let Some(old) = entry.take() {
            log::trace!(
                "resizing {kind:?} buffer of frame {}: {} -> {size} bytes",
                self.current,
                old.slot.size
            );
            allocator.destroy_buffer(old.slot.buffer, old.memory)?;
        }

        let (buffer, memory) = allocator.create_buffer(size, kind.usage())?;
        let slot = BufferSlot { buffer, size };
        *entry = Some(CachedBuffer { slot, memory });
        Ok(slot)
    }

    /// Copy `chunks` contiguously into the buffer of `kind`.
    pub fn write<A>(
        &mut self,
        allocator: &mut A,
        kind: BufferKind,
        chunks: &[&[u8]],
    ) -> RendererResult<()>
    where
        A: Allocate<Memory = M>,
    {
        let cached = self.frames[self.current][kind.slot()]
            .as_mut()
            .ok_or_else(|| RendererError::Init(format!("{kind:?} buffer not created")))?;
        allocator.write(&mut cached.memory, chunks)
    }

    pub fn slot(&self, kind: BufferKind) -> Option<BufferSlot> {
        self.frames[self.current][kind.slot()]
            .as_ref()
            .map(|cached| cached.slot)
    }

    pub fn destroy_all<A>(&mut self, allocator: &mut A) -> RendererResult<()>
    where
        A: Allocate<Memory = M>,
    {
        for buffers in &mut self.frames {
            for kind in BufferKind::ALL {
                if let Some(cached) = buffers[kind.slot()].take() {
                    allocator.destroy_buffer(cached.slot.buffer, cached.memory)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::FakeAllocator;

    #[test]
    fn same_size_reuses_buffer() {
        let mut allocator = FakeAllocator::default();
        let mut cache = ResourceCache::default();

        let first = cache
            .ensure_buffer(&mut allocator, BufferKind::Vertex, 64)
            .unwrap();
        let second = cache
            .ensure_buffer(&mut allocator, BufferKind::Vertex, 64)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(allocator.buffers_created, 1);
        assert_eq!(allocator.buffers_destroyed, 0);
    }

    #[test]
    fn size_change_replaces_buffer() {
        let mut allocator = FakeAllocator::default();
        let mut cache = ResourceCache::default();

        let large = cache
            .ensure_buffer(&mut allocator, BufferKind::Index, 128)
            .unwrap();
        let small = cache
            .ensure_buffer(&mut allocator, BufferKind::Index, 32)
            .unwrap();

        assert_ne!(large.buffer, small.buffer);
        assert_eq!(small.size, 32);
        assert_eq!(allocator.buffers_created, 2);
        assert_eq!(allocator.buffers_destroyed, 1);
        assert_eq!(allocator.live_buffers(), 1);
    }

    #[test]
    fn kinds_are_independent() {
        let mut allocator = FakeAllocator::default();
        let mut cache = ResourceCache::default();

        cache
            .ensure_buffer(&mut allocator, BufferKind::Vertex, 16)
            .unwrap();
        cache
            .ensure_buffer(&mut allocator, BufferKind::Uniform, 16)
            .unwrap();

        assert!(cache.slot(BufferKind::Index).is_none());
        assert_eq!(allocator.usage_of(cache.slot(BufferKind::Uniform).unwrap().buffer),
            Some(vk::BufferUsageFlags::UNIFORM_BUFFER));

        cache.destroy_all(&mut allocator).unwrap();
        assert_eq!(allocator.live_buffers(), 0);
        assert!(cache.slot(BufferKind::Vertex).is_none());
    }

    #[test]
    fn allocation_failure_propagates() {
        let mut allocator = FakeAllocator::default();
        allocator.fail_allocations = true;
        let mut cache = ResourceCache::default();

        let err = cache
            .ensure_buffer(&mut allocator, BufferKind::Vertex, 16)
            .unwrap_err();
        assert!(matches!(err, RendererError::ResourceExhausted { .. }));
        assert!(cache.slot(BufferKind::Vertex).is_none());
    }

    #[test]
    fn write_requires_buffer() {
        let mut allocator = FakeAllocator::default();
        let mut cache = ResourceCache::default();
        assert!(cache
            .write(&mut allocator, BufferKind::Uniform, &[&[0u8; 4]])
            .is_err());
    }

    #[test]
    fn frames_keep_separate_buffers() {
        let mut allocator = FakeAllocator::default();
        let mut cache = ResourceCache::new(2);

        cache.select_frame(1);
        let first = cache
            .ensure_buffer(&mut allocator, BufferKind::Vertex, 64)
            .unwrap();
        cache.select_frame(2);
        assert!(cache.slot(BufferKind::Vertex).is_none());
        let second = cache
            .ensure_buffer(&mut allocator, BufferKind::Vertex, 64)
            .unwrap();
        assert_ne!(first.buffer, second.buffer);

        cache.select_frame(3);
        assert_eq!(cache.current_frame(), 1);
        assert_eq!(cache.slot(BufferKind::Vertex), Some(first));

        cache.destroy_all(&mut allocator).unwrap();
        assert_eq!(allocator.live_buffers(), 0);
    }
}
