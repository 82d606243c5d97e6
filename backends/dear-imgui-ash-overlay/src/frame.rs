//! Renderer-neutral view of one frame of Dear ImGui draw data.
//!
//! [`FrameGeometry`] borrows the vertex/index arrays of every draw list and
//! lowers draw commands into [`DrawCommand`], so uploading and recording can
//! work on plain data. The transform and scissor math used by the recorder
//! lives here as well.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use dear_imgui_rs::render::{DrawCmd, DrawData, DrawIdx, DrawVert};
use dear_imgui_rs::{TextureId, internal::RawWrapper, sys};
use std::fmt;

/// Size in bytes of one Dear ImGui vertex (`vec2` position, `vec2` UV, packed RGBA8 color).
pub const VERTEX_STRIDE: usize = std::mem::size_of::<DrawVert>();

/// Size in bytes of one Dear ImGui index.
pub const INDEX_SIZE: usize = std::mem::size_of::<DrawIdx>();

/// Screen-space to clip-space affine transform uploaded to the uniform buffer.
///
/// Maps the GUI's virtual coordinate space to normalized device coordinates
/// with Y pointing down, which is Vulkan's clip convention.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Transform {
    pub scale: [f32; 2],
    pub translate: [f32; 2],
}

impl Transform {
    pub fn new(display_pos: [f32; 2], display_size: [f32; 2]) -> Self {
        let scale = [2.0 / display_size[0], 2.0 / display_size[1]];
        let translate = [
            -1.0 - display_pos[0] * scale[0],
            -1.0 - display_pos[1] * scale[1],
        ];
        Self { scale, translate }
    }
}

/// Project a clip rectangle from GUI coordinates into a scissor rectangle.
///
/// `clip_rect` is `(x0, y0, x1, y1)`. Returns `None` when the projected
/// rectangle lies entirely outside `[0, extent)` or has no area left after
/// clamping its top-left corner to zero.
pub fn project_scissor(
    clip_rect: [f32; 4],
    clip_off: [f32; 2],
    clip_scale: [f32; 2],
    extent: vk::Extent2D,
) -> Option<vk::Rect2D> {
    let x0 = (clip_rect[0] - clip_off[0]) * clip_scale[0];
    let y0 = (clip_rect[1] - clip_off[1]) * clip_scale[1];
    let x1 = (clip_rect[2] - clip_off[0]) * clip_scale[0];
    let y1 = (clip_rect[3] - clip_off[1]) * clip_scale[1];

    if x1 <= 0.0 || y1 <= 0.0 || x0 >= extent.width as f32 || y0 >= extent.height as f32 {
        return None;
    }

    // Negative offsets are illegal for vkCmdSetScissor.
    let x0 = x0.max(0.0);
    let y0 = y0.max(0.0);

    let width = (x1 - x0) as u32;
    let height = (y1 - y0) as u32;
    if width == 0 || height == 0 {
        return None;
    }

    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: x0 as i32,
            y: y0 as i32,
        },
        extent: vk::Extent2D { width, height },
    })
}

/// Index type matching an index element size in bytes.
pub fn index_type_for(index_size: usize) -> vk::IndexType {
    if index_size == 2 {
        vk::IndexType::UINT16
    } else {
        vk::IndexType::UINT32
    }
}

/// Raw Dear ImGui draw callback, as registered with `ImDrawList::AddCallback()`.
pub type RawDrawCallback = unsafe extern "C" fn(*const sys::ImDrawList, *const sys::ImDrawCmd);

/// Opaque user callback embedded in a draw list.
///
/// The renderer does not interpret it; it is invoked verbatim with the draw
/// list and command it was recorded in.
#[derive(Clone, Copy)]
pub struct UserCallback {
    callback: RawDrawCallback,
    list: *const sys::ImDrawList,
    cmd: *const sys::ImDrawCmd,
}

impl UserCallback {
    /// Wrap a raw callback.
    ///
    /// # Safety
    /// `list` and `cmd` must be whatever `callback` expects and must stay valid
    /// until the frame holding this value has been recorded.
    pub unsafe fn new(
        callback: RawDrawCallback,
        list: *const sys::ImDrawList,
        cmd: *const sys::ImDrawCmd,
    ) -> Self {
        Self {
            callback,
            list,
            cmd,
        }
    }

    pub(crate) fn invoke(&self) {
        // SAFETY: upheld by the contract of `UserCallback::new`.
        unsafe { (self.callback)(self.list, self.cmd) }
    }
}

impl fmt::Debug for UserCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCallback")
            .field("list", &self.list)
            .field("cmd", &self.cmd)
            .finish_non_exhaustive()
    }
}

/// One indexed draw inside a draw list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawElements {
    /// Number of indices.
    pub count: u32,
    /// Clipping rectangle `(x0, y0, x1, y1)` in GUI coordinates.
    pub clip_rect: [f32; 4],
    pub texture_id: TextureId,
    /// First vertex, relative to the owning list.
    pub vtx_offset: u32,
    /// First index, relative to the owning list.
    pub idx_offset: u32,
}

impl DrawElements {
    /// Build from Dear ImGui's command parameters.
    ///
    /// Returns `None` when the count or an offset does not fit in `u32`, which
    /// Vulkan draw calls require; such a command is not drawn.
    pub fn from_params(
        count: usize,
        clip_rect: [f32; 4],
        texture_id: TextureId,
        vtx_offset: usize,
        idx_offset: usize,
    ) -> Option<Self> {
        Some(Self {
            count: u32::try_from(count).ok()?,
            clip_rect,
            texture_id,
            vtx_offset: u32::try_from(vtx_offset).ok()?,
            idx_offset: u32::try_from(idx_offset).ok()?,
        })
    }
}

/// A draw command, dispatched explicitly by the recorder.
#[derive(Debug, Clone, Copy)]
pub enum DrawCommand {
    Draw(DrawElements),
    /// Rebind the renderer's pipeline, descriptor sets and buffers.
    ResetRenderState,
    Callback(UserCallback),
}

/// Geometry and commands of one draw list.
#[derive(Debug, Clone)]
pub struct ListGeometry<'a> {
    pub vertices: &'a [u8],
    pub indices: &'a [u8],
    pub vertex_count: u32,
    pub index_count: u32,
    pub commands: Vec<DrawCommand>,
}

impl<'a> ListGeometry<'a> {
    /// Build a list from raw vertex/index bytes laid out as Dear ImGui lays them out.
    pub fn new(vertices: &'a [u8], indices: &'a [u8], commands: Vec<DrawCommand>) -> Self {
        Self {
            vertices,
            indices,
            vertex_count: (vertices.len() / VERTEX_STRIDE) as u32,
            index_count: (indices.len() / INDEX_SIZE) as u32,
            commands,
        }
    }
}

/// Everything the renderer reads from one frame of draw data.
#[derive(Debug, Clone)]
pub struct FrameGeometry<'a> {
    /// Upper-left corner of the rendered viewport in GUI coordinates.
    pub display_pos: [f32; 2],
    pub display_size: [f32; 2],
    /// Pixels per GUI unit.
    pub framebuffer_scale: [f32; 2],
    /// Size in bytes of one index element.
    pub index_size: usize,
    pub lists: Vec<ListGeometry<'a>>,
}

impl<'a> FrameGeometry<'a> {
    pub fn new(display_pos: [f32; 2], display_size: [f32; 2], framebuffer_scale: [f32; 2]) -> Self {
        Self {
            display_pos,
            display_size,
            framebuffer_scale,
            index_size: INDEX_SIZE,
            lists: Vec::new(),
        }
    }

    /// Lower Dear ImGui draw data. The result borrows the draw lists' buffers.
    pub fn from_draw_data(draw_data: &'a DrawData) -> Self {
        let mut frame = Self::new(
            draw_data.display_pos,
            draw_data.display_size,
            draw_data.framebuffer_scale,
        );

        for draw_list in draw_data.draw_lists() {
            let commands = draw_list
                .commands()
                .filter_map(|cmd| match cmd {
                    DrawCmd::Elements {
                        count,
                        cmd_params,
                        raw_cmd,
                    } => {
                        let elements = DrawElements::from_params(
                            count,
                            cmd_params.clip_rect,
                            resolve_effective_texture_id(cmd_params.texture_id, raw_cmd),
                            cmd_params.vtx_offset,
                            cmd_params.idx_offset,
                        );
                        if elements.is_none() {
                            log::warn!("dropping draw command with {count} indices: exceeds u32");
                        }
                        elements.map(DrawCommand::Draw)
                    }
                    DrawCmd::ResetRenderState => Some(DrawCommand::ResetRenderState),
                    DrawCmd::RawCallback { callback, raw_cmd } => Some(DrawCommand::Callback(
                        // SAFETY: both pointers come from draw data that outlives `frame`.
                        unsafe { UserCallback::new(callback, draw_list.raw(), raw_cmd) },
                    )),
                })
                .collect();

            // SAFETY: DrawVert and DrawIdx are padding-free plain data.
            let (vertices, indices) = unsafe {
                (
                    slice_as_bytes(draw_list.vtx_buffer()),
                    slice_as_bytes(draw_list.idx_buffer()),
                )
            };
            frame.lists.push(ListGeometry::new(vertices, indices, commands));
        }

        frame
    }

    pub fn total_vertex_count(&self) -> u32 {
        self.lists.iter().map(|list| list.vertex_count).sum()
    }

    pub fn total_index_count(&self) -> u32 {
        self.lists.iter().map(|list| list.index_count).sum()
    }

    /// Combined size in bytes of every list's vertices.
    pub fn vertex_bytes(&self) -> usize {
        self.lists.iter().map(|list| list.vertices.len()).sum()
    }

    /// Combined size in bytes of every list's indices.
    pub fn index_bytes(&self) -> usize {
        self.lists.iter().map(|list| list.indices.len()).sum()
    }

    /// True when there is no geometry to upload.
    pub fn is_empty(&self) -> bool {
        self.vertex_bytes() == 0 || self.index_bytes() == 0
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.display_pos, self.display_size)
    }
}

/// View a slice of plain data as bytes.
///
/// # Safety
/// `T` must not contain padding bytes.
pub(crate) unsafe fn slice_as_bytes<T: Copy>(slice: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(slice.as_ptr().cast::<u8>(), std::mem::size_of_val(slice)) }
}

fn resolve_effective_texture_id(legacy: TextureId, raw_cmd: *const sys::ImDrawCmd) -> TextureId {
    if raw_cmd.is_null() {
        return legacy;
    }
    unsafe {
        let mut copy = *raw_cmd;
        TextureId::from(sys::ImDrawCmd_GetTexID(&mut copy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    static_assertions::const_assert_eq!(VERTEX_STRIDE, 20);
    static_assertions::assert_eq_size!(Transform, [f32; 4]);

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_draw_params_are_rejected() {
        let texture = TextureId::from(1u64);
        let clip = [0.0, 0.0, 8.0, 8.0];
        let fits = DrawElements::from_params(6, clip, texture, 4, 12).unwrap();
        assert_eq!((fits.count, fits.vtx_offset, fits.idx_offset), (6, 4, 12));

        let too_big = u32::MAX as usize + 1;
        assert!(DrawElements::from_params(too_big, clip, texture, 0, 0).is_none());
        assert!(DrawElements::from_params(3, clip, texture, too_big, 0).is_none());
        assert!(DrawElements::from_params(3, clip, texture, 0, too_big).is_none());
    }

    #[test]
    fn transform_full_hd() {
        let t = Transform::new([0.0, 0.0], [1920.0, 1080.0]);
        assert_relative_eq!(t.scale[0], 0.001_041_7, epsilon = 1e-6);
        assert_relative_eq!(t.scale[1], 0.001_851_9, epsilon = 1e-6);
        assert_relative_eq!(t.translate[0], -1.0);
        assert_relative_eq!(t.translate[1], -1.0);
    }

    #[test]
    fn transform_maps_display_rect_to_clip_space() {
        let t = Transform::new([100.0, 50.0], [400.0, 200.0]);
        let map = |p: [f32; 2]| {
            [
                p[0] * t.scale[0] + t.translate[0],
                p[1] * t.scale[1] + t.translate[1],
            ]
        };
        let top_left = map([100.0, 50.0]);
        let bottom_right = map([500.0, 250.0]);
        assert_relative_eq!(top_left[0], -1.0);
        assert_relative_eq!(top_left[1], -1.0);
        assert_relative_eq!(bottom_right[0], 1.0);
        assert_relative_eq!(bottom_right[1], 1.0);
    }

    #[test]
    fn scissor_inside_target() {
        let rect = project_scissor([10.0, 20.0, 110.0, 70.0], [0.0, 0.0], [1.0, 1.0], EXTENT)
            .expect("visible");
        assert_eq!(rect.offset, vk::Offset2D { x: 10, y: 20 });
        assert_eq!(
            rect.extent,
            vk::Extent2D {
                width: 100,
                height: 50
            }
        );
    }

    #[test]
    fn scissor_applies_origin_and_scale() {
        let rect = project_scissor(
            [60.0, 40.0, 110.0, 90.0],
            [50.0, 30.0],
            [2.0, 2.0],
            EXTENT,
        )
        .expect("visible");
        assert_eq!(rect.offset, vk::Offset2D { x: 20, y: 20 });
        assert_eq!(
            rect.extent,
            vk::Extent2D {
                width: 100,
                height: 100
            }
        );
    }

    #[test]
    fn scissor_clamps_negative_offset() {
        let rect = project_scissor([-30.0, -5.0, 40.0, 25.0], [0.0, 0.0], [1.0, 1.0], EXTENT)
            .expect("visible");
        assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(
            rect.extent,
            vk::Extent2D {
                width: 40,
                height: 25
            }
        );
    }

    #[test]
    fn scissor_rejects_rects_outside_target() {
        let none = |clip| project_scissor(clip, [0.0, 0.0], [1.0, 1.0], EXTENT);
        assert_eq!(none([-50.0, 0.0, -10.0, 100.0]), None);
        assert_eq!(none([0.0, -50.0, 100.0, 0.0]), None);
        assert_eq!(none([800.0, 0.0, 900.0, 100.0]), None);
        assert_eq!(none([0.0, 600.0, 100.0, 700.0]), None);
    }

    #[test]
    fn index_type_follows_element_size() {
        assert_eq!(index_type_for(2), vk::IndexType::UINT16);
        assert_eq!(index_type_for(4), vk::IndexType::UINT32);
        assert_eq!(index_type_for(INDEX_SIZE), vk::IndexType::UINT16);
    }

    #[test]
    fn frame_totals_sum_lists() {
        let vertices = [0u8; VERTEX_STRIDE * 3];
        let indices = [0u8; INDEX_SIZE * 6];
        let mut frame = FrameGeometry::new([0.0, 0.0], [10.0, 10.0], [1.0, 1.0]);
        assert!(frame.is_empty());

        frame
            .lists
            .push(ListGeometry::new(&vertices, &indices, Vec::new()));
        frame
            .lists
            .push(ListGeometry::new(
                &vertices[..VERTEX_STRIDE],
                &indices[..INDEX_SIZE * 3],
                Vec::new(),
            ));

        assert_eq!(frame.total_vertex_count(), 4);
        assert_eq!(frame.total_index_count(), 9);
        assert_eq!(frame.vertex_bytes(), 4 * VERTEX_STRIDE);
        assert_eq!(frame.index_bytes(), 9 * INDEX_SIZE);
        assert!(!frame.is_empty());
    }

    #[test]
    fn frame_without_indices_is_empty() {
        let vertices = [0u8; VERTEX_STRIDE];
        let mut frame = FrameGeometry::new([0.0, 0.0], [10.0, 10.0], [1.0, 1.0]);
        frame.lists.push(ListGeometry::new(&vertices, &[], Vec::new()));
        assert!(frame.is_empty());
    }
}
