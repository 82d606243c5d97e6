//! Command recording.
//!
//! Every Vulkan command the renderer records goes through [`CommandEncoder`],
//! so the draw sequence derived from a frame can be checked without a device.

use crate::{
    DrawCommand, FrameGeometry, RendererError, RendererResult, index_type_for, project_scissor,
};
use ash::{Device, vk};
use dear_imgui_rs::TextureId;

/// Texel rectangle copied from a staging buffer into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UploadRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Layout transition of the single color subresource of an image.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImageTransition {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

pub(crate) trait CommandEncoder {
    /// Reset and begin the command buffer for one-time submission.
    fn begin(&mut self) -> RendererResult<()>;
    fn end(&mut self) -> RendererResult<()>;
    fn image_barrier(&mut self, transition: &ImageTransition);
    fn copy_buffer_to_image(&mut self, buffer: vk::Buffer, image: vk::Image, region: UploadRegion);
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    );
    fn next_subpass(&mut self);
    fn end_render_pass(&mut self);
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    fn bind_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        first_set: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType);
    /// Viewport covering `extent`, depth range `[0, 1]`.
    fn set_viewport(&mut self, extent: vk::Extent2D);
    fn set_scissor(&mut self, scissor: vk::Rect2D);
    fn draw(&mut self, vertex_count: u32);
    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32);
}

/// Records into a real command buffer.
pub(crate) struct AshEncoder<'a> {
    pub device: &'a Device,
    pub command_buffer: vk::CommandBuffer,
}

impl CommandEncoder for AshEncoder<'_> {
    fn begin(&mut self) -> RendererResult<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())?;
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)?;
        }
        Ok(())
    }

    fn end(&mut self) -> RendererResult<()> {
        unsafe { self.device.end_command_buffer(self.command_buffer)? };
        Ok(())
    }

    fn image_barrier(&mut self, transition: &ImageTransition) {
        let barrier = vk::ImageMemoryBarrier::default()
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(transition.image)
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .subresource_range(color_subresource_range());
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn copy_buffer_to_image(&mut self, buffer: vk::Buffer, image: vk::Image, region: UploadRegion) {
        let copy = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D {
                x: region.x as i32,
                y: region.y as i32,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width: region.width,
                height: region.height,
                depth: 1,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
    }

    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        // LOAD_OP_LOAD everywhere: no clear values.
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            });
        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn next_subpass(&mut self) {
        unsafe {
            self.device
                .cmd_next_subpass(self.command_buffer, vk::SubpassContents::INLINE)
        };
    }

    fn end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    fn bind_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        first_set: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                &[set],
                dynamic_offsets,
            );
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer], &[0]);
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer, 0, index_type);
        }
    }

    fn set_viewport(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device
                .cmd_set_viewport(self.command_buffer, 0, &[viewport]);
        }
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]) };
    }

    fn draw(&mut self, vertex_count: u32) {
        unsafe {
            self.device
                .cmd_draw(self.command_buffer, vertex_count, 1, 0, 0);
        }
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                1,
                first_index,
                vertex_offset,
                0,
            );
        }
    }
}

pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Full-screen background drawn in the first subpass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackgroundBinding {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set: vk::DescriptorSet,
}

/// Objects the recorder binds for one frame.
pub(crate) struct FrameBindings<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub gui_pipeline: vk::Pipeline,
    pub gui_layout: vk::PipelineLayout,
    /// Set 0: the dynamic uniform buffer holding the transform.
    pub frame_set: vk::DescriptorSet,
    pub background: Option<BackgroundBinding>,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    /// Texture set lookup; fails with `BadTextureId` for unknown ids.
    pub textures: &'a dyn Fn(TextureId) -> RendererResult<vk::DescriptorSet>,
}

/// Counters from the last recorded frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordStats {
    /// Indexed draws issued.
    pub draws: u32,
    /// Draws dropped because their clip rectangle was empty or off-target.
    pub skipped: u32,
    /// User callbacks invoked.
    pub callbacks: u32,
}

fn bind_gui_state<E: CommandEncoder>(
    encoder: &mut E,
    bindings: &FrameBindings<'_>,
    index_type: vk::IndexType,
) {
    encoder.bind_pipeline(bindings.gui_pipeline);
    encoder.bind_descriptor_set(bindings.gui_layout, 0, bindings.frame_set, &[0]);
    encoder.bind_vertex_buffer(bindings.vertex_buffer);
    encoder.bind_index_buffer(bindings.index_buffer, index_type);
    encoder.set_viewport(bindings.extent);
}

/// True when `frame` draws nothing on a target of `extent`: the draw data is
/// invalid, the target or display has no area, or there is no geometry.
pub(crate) fn is_degenerate(
    draw_data_valid: bool,
    extent: vk::Extent2D,
    frame: &FrameGeometry<'_>,
) -> bool {
    !draw_data_valid
        || extent.width == 0
        || extent.height == 0
        || frame.display_size[0] <= 0.0
        || frame.display_size[1] <= 0.0
        || frame.is_empty()
}

/// Begin and immediately end the command buffer when the frame is degenerate.
///
/// Returns whether it did so; otherwise nothing is recorded.
pub(crate) fn record_degenerate<E: CommandEncoder>(
    encoder: &mut E,
    draw_data_valid: bool,
    extent: vk::Extent2D,
    frame: &FrameGeometry<'_>,
) -> RendererResult<bool> {
    if !is_degenerate(draw_data_valid, extent, frame) {
        return Ok(false);
    }
    encoder.begin()?;
    encoder.end()?;
    log::trace!("nothing to draw; recorded an empty command buffer");
    Ok(true)
}

/// Record the render pass reproducing `frame`.
///
/// Geometry must already be uploaded to `bindings`' buffers in list order.
pub(crate) fn record_frame<E: CommandEncoder>(
    encoder: &mut E,
    frame: &FrameGeometry<'_>,
    bindings: &FrameBindings<'_>,
) -> RendererResult<RecordStats> {
    let mut stats = RecordStats::default();
    let index_type = index_type_for(frame.index_size);
    let clip_off = frame.display_pos;
    let clip_scale = frame.framebuffer_scale;

    encoder.begin_render_pass(bindings.render_pass, bindings.framebuffer, bindings.extent);
    encoder.set_viewport(bindings.extent);

    if let Some(background) = bindings.background {
        encoder.bind_pipeline(background.pipeline);
        encoder.bind_descriptor_set(background.layout, 0, background.set, &[]);
        encoder.draw(3);
        encoder.next_subpass();
    }

    bind_gui_state(encoder, bindings, index_type);

    let mut bound_texture: Option<vk::DescriptorSet> = None;
    let mut global_vtx_offset: i32 = 0;
    let mut global_idx_offset: u32 = 0;

    for list in &frame.lists {
        for command in &list.commands {
            match command {
                DrawCommand::Callback(callback) => {
                    callback.invoke();
                    stats.callbacks += 1;
                    // The callback may have changed any state.
                    bind_gui_state(encoder, bindings, index_type);
                    bound_texture = None;
                }
                DrawCommand::ResetRenderState => {
                    bind_gui_state(encoder, bindings, index_type);
                    bound_texture = None;
                }
                DrawCommand::Draw(elements) => {
                    let Some(scissor) =
                        project_scissor(elements.clip_rect, clip_off, clip_scale, bindings.extent)
                    else {
                        stats.skipped += 1;
                        continue;
                    };

                    let set = (bindings.textures)(elements.texture_id)?;
                    if bound_texture != Some(set) {
                        encoder.bind_descriptor_set(bindings.gui_layout, 1, set, &[]);
                        bound_texture = Some(set);
                    }

                    let first_index = elements
                        .idx_offset
                        .checked_add(global_idx_offset)
                        .ok_or_else(|| RendererError::Allocator("index offset overflow".into()))?;
                    let vertex_offset = i32::try_from(elements.vtx_offset)
                        .ok()
                        .and_then(|offset| offset.checked_add(global_vtx_offset))
                        .ok_or_else(|| RendererError::Allocator("vertex offset overflow".into()))?;

                    encoder.set_scissor(scissor);
                    encoder.draw_indexed(elements.count, first_index, vertex_offset);
                    stats.draws += 1;
                }
            }
        }

        global_idx_offset = global_idx_offset.saturating_add(list.index_count);
        global_vtx_offset = global_vtx_offset.saturating_add(list.vertex_count as i32);
    }

    encoder.end_render_pass();
    Ok(stats)
}
