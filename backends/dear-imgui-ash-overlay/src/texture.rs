//! Texture helpers for the overlay renderer.
//!
//! Texture requests coming from Dear ImGui are turned into tightly packed RGBA8
//! pixel rows here, independent of any Vulkan object, and the outcome of a
//! request is written back through [`TextureUpdateResult`].

use dear_imgui_rs::texture::TextureRect;
use dear_imgui_rs::{TextureData, TextureFormat, TextureId, TextureStatus};

/// Result of a texture update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureUpdateResult {
    /// Texture was created and its upload queued.
    Created { texture_id: TextureId },
    /// A sub-rectangle upload was queued.
    Updated,
    Destroyed,
    /// Texture data could not be converted.
    Failed,
    NoAction,
}

impl TextureUpdateResult {
    /// Apply the result to the `TextureData` object.
    pub fn apply_to(self, texture_data: &mut TextureData) {
        match self {
            TextureUpdateResult::Created { texture_id } => {
                texture_data.set_tex_id(texture_id);
                texture_data.set_status(TextureStatus::OK);
            }
            TextureUpdateResult::Updated => {
                texture_data.set_status(TextureStatus::OK);
            }
            TextureUpdateResult::Destroyed => unsafe {
                // Destroyed without WantDestroyNextFrame is read back as WantCreate.
                (*texture_data.as_raw_mut()).WantDestroyNextFrame = true;
                texture_data.set_status(TextureStatus::Destroyed);
            },
            TextureUpdateResult::Failed => {
                texture_data.set_status(TextureStatus::Destroyed);
            }
            TextureUpdateResult::NoAction => {}
        }
    }
}

/// Source pixel layout of a Dear ImGui texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PixelLayout {
    Rgba32,
    /// One coverage byte per pixel, expanded to white with that alpha.
    Alpha8,
}

impl PixelLayout {
    fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgba32 => 4,
            PixelLayout::Alpha8 => 1,
        }
    }
}

impl From<TextureFormat> for PixelLayout {
    fn from(format: TextureFormat) -> Self {
        match format {
            TextureFormat::RGBA32 => PixelLayout::Rgba32,
            TextureFormat::Alpha8 => PixelLayout::Alpha8,
        }
    }
}

/// Pixel region `(x, y, width, height)` inside a texture.
pub(crate) type Region = (u32, u32, u32, u32);

/// Copy `region` out of `pixels` (a `tex_w` x `tex_h` image) as packed RGBA8 rows.
///
/// Returns `None` when the region is empty, starts outside the texture, or
/// `pixels` is too short. The region is cropped to the texture bounds.
pub(crate) fn expand_to_rgba(
    pixels: &[u8],
    layout: PixelLayout,
    tex_w: u32,
    tex_h: u32,
    region: Region,
) -> Option<Vec<u8>> {
    let (x, y, w, h) = region;
    let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
    let (tex_w, tex_h) = (tex_w as usize, tex_h as usize);
    if w == 0 || h == 0 || x >= tex_w || y >= tex_h {
        return None;
    }
    let w = w.min(tex_w - x);
    let h = h.min(tex_h - y);
    let bpp = layout.bytes_per_pixel();

    let mut out = Vec::with_capacity(w.checked_mul(h)?.checked_mul(4)?);
    for row in 0..h {
        let start = ((y + row) * tex_w + x) * bpp;
        let src = pixels.get(start..start + w * bpp)?;
        match layout {
            PixelLayout::Rgba32 => out.extend_from_slice(src),
            PixelLayout::Alpha8 => {
                for &alpha in src {
                    out.extend_from_slice(&[255, 255, 255, alpha]);
                }
            }
        }
    }
    Some(out)
}

/// Crop an update rectangle to a `tw` x `th` texture. Empty results have zero size.
pub(crate) fn clamp_rect(rect: TextureRect, tw: u32, th: u32) -> Region {
    let x = u32::from(rect.x).min(tw);
    let y = u32::from(rect.y).min(th);
    let w = u32::from(rect.w);
    let h = u32::from(rect.h);
    if w == 0 || h == 0 || x >= tw || y >= th {
        return (x, y, 0, 0);
    }
    (x, y, w.min(tw - x), h.min(th - y))
}

/// RGBA8 pixels of `region` of a Dear ImGui texture.
pub(crate) fn texture_rgba(texture_data: &TextureData, region: Region) -> Option<Vec<u8>> {
    let width = u32::try_from(texture_data.width()).ok()?;
    let height = u32::try_from(texture_data.height()).ok()?;
    let layout = PixelLayout::from(texture_data.format());
    if usize::try_from(texture_data.bytes_per_pixel()).ok()? != layout.bytes_per_pixel() {
        return None;
    }
    expand_to_rgba(texture_data.pixels()?, layout, width, height, region)
}
