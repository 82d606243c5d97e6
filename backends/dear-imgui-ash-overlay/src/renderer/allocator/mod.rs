#[cfg(not(feature = "gpu-allocator"))]
mod default;
#[cfg(not(feature = "gpu-allocator"))]
pub use self::default::{Allocator, Memory};

#[cfg(feature = "gpu-allocator")]
mod gpu;
#[cfg(feature = "gpu-allocator")]
pub use self::gpu::{Allocator, Memory};

use crate::{RendererError, RendererResult};
use ash::vk;

/// Base allocator trait for all implementations.
///
/// Buffers are host-visible and host-coherent; images are device-local and
/// usable as transfer destinations and sampled images.
pub trait Allocate {
    type Memory;

    fn create_buffer(
        &mut self,
        size: usize,
        usage: vk::BufferUsageFlags,
    ) -> RendererResult<(vk::Buffer, Self::Memory)>;

    fn create_image(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> RendererResult<(vk::Image, Self::Memory)>;

    fn destroy_buffer(&mut self, buffer: vk::Buffer, memory: Self::Memory) -> RendererResult<()>;

    fn destroy_image(&mut self, image: vk::Image, memory: Self::Memory) -> RendererResult<()>;

    /// Map `memory` once and copy `chunks` back to back from offset zero.
    fn write(&mut self, memory: &mut Self::Memory, chunks: &[&[u8]]) -> RendererResult<()>;
}

/// Index of the first memory type allowed by `type_bits` whose property flags
/// contain `required`.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RendererResult<u32> {
    properties.memory_types[..properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(RendererError::ResourceExhausted {
            required,
            type_bits,
        })
}

/// Total length of `chunks`, rejecting writes that would not fit in `capacity`.
pub(crate) fn checked_write_len(chunks: &[&[u8]], capacity: usize) -> RendererResult<usize> {
    let len = chunks
        .iter()
        .try_fold(0usize, |acc, chunk| acc.checked_add(chunk.len()))
        .ok_or_else(|| RendererError::Allocator("write size overflow".into()))?;
    if len > capacity {
        return Err(RendererError::Allocator(format!(
            "write of {len} bytes exceeds allocation of {capacity} bytes"
        )));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in properties.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        properties
    }

    #[test]
    fn picks_first_matching_type() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
            host,
        ]);
        assert_eq!(find_memory_type(&props, 0b1111, host).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b1000, host).unwrap(), 3);
        assert_eq!(
            find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn no_matching_type_is_resource_exhausted() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(
            err,
            RendererError::ResourceExhausted { type_bits: 0b1, .. }
        ));

        // Type bits exclude the only candidate.
        let err =
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert!(matches!(err, RendererError::ResourceExhausted { .. }));
    }

    #[test]
    fn write_len_is_bounded_by_capacity() {
        assert_eq!(checked_write_len(&[&[1, 2], &[3]], 3).unwrap(), 3);
        assert!(checked_write_len(&[&[1, 2], &[3]], 2).is_err());
    }
}
