//! Vulkan (Ash) overlay renderer for Dear ImGui.
//!
//! Records Dear ImGui draw data into a caller-supplied command buffer, drawing
//! the GUI on top of an existing image (optionally after drawing a full-screen
//! background image into the same render pass). The renderer never submits;
//! the caller owns queues, swapchains and synchronization.
//!
//! ```no_run
//! # fn frame(
//! #     instance: &ash::Instance,
//! #     physical_device: ash::vk::PhysicalDevice,
//! #     device: ash::Device,
//! #     imgui: &mut dear_imgui_rs::Context,
//! #     command_buffer: ash::vk::CommandBuffer,
//! #     target: dear_imgui_ash_overlay::RenderTarget,
//! # ) -> dear_imgui_ash_overlay::RendererResult<()> {
//! use dear_imgui_ash_overlay::{OverlayRenderer, Options};
//!
//! let mut renderer =
//!     OverlayRenderer::init(instance, physical_device, device, imgui, Options::default())?;
//! renderer.new_frame()?;
//! let draw_data = imgui.render();
//! renderer.render_draw_data(draw_data, command_buffer, &target)?;
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

mod frame;
pub use frame::*;

mod texture;
pub use texture::*;

mod renderer;
pub use renderer::*;
