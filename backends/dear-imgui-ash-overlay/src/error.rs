//! Error types for the Vulkan (Ash) overlay renderer.

use ash::vk;
use thiserror::Error;

/// Result type for renderer operations.
pub type RendererResult<T> = Result<T, RendererError>;

/// Errors that can occur during renderer setup or while recording a frame.
///
/// A frame with nothing to draw is not an error: it is recorded as an empty
/// command buffer.
#[derive(Debug, Error)]
pub enum RendererError {
    /// Vulkan API error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No memory type satisfies the requested property flags.
    #[error("no memory type with {required:?} among type bits {type_bits:#x}")]
    ResourceExhausted {
        /// Property flags the allocation needed.
        required: vk::MemoryPropertyFlags,
        /// Memory type bits reported by the resource requirements.
        type_bits: u32,
    },

    /// WGSL parsing, validation or SPIR-V emission failed.
    #[error("Shader error: {0}")]
    Shader(String),

    /// Initialization error.
    #[error("Initialization error: {0}")]
    Init(String),

    /// Bad texture id (no matching descriptor set).
    #[error("Bad texture id: {0}")]
    BadTextureId(u64),

    /// Allocator error.
    #[error("Allocator error: {0}")]
    Allocator(String),

    /// GPU allocator error (when `gpu-allocator` feature is enabled).
    #[cfg(feature = "gpu-allocator")]
    #[error("gpu-allocator error: {0}")]
    GpuAllocator(#[from] gpu_allocator::AllocationError),
}
