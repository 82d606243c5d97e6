//! Embedded WGSL shaders, compiled to SPIR-V with naga.

use crate::{RendererError, RendererResult};
use std::ffi::CStr;

pub(crate) const VERTEX_ENTRY: &CStr = c"vs_main";
pub(crate) const FRAGMENT_ENTRY: &CStr = c"fs_main";

/// GUI geometry: positions mapped by the transform uniform, color times texture.
pub(crate) const GUI_WGSL: &str = r#"
struct Transform {
    scale: vec2<f32>,
    translate: vec2<f32>,
}

@group(0) @binding(0)
var<uniform> transform: Transform;

@group(1) @binding(0)
var gui_texture: texture_2d<f32>;
@group(1) @binding(1)
var gui_sampler: sampler;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(vertex_in: VertexInput) -> VertexOutput {
    var vertex_out: VertexOutput;
    let position = vertex_in.position * transform.scale + transform.translate;
    vertex_out.position = vec4<f32>(position, 0.0, 1.0);
    vertex_out.uv = vertex_in.uv;
    vertex_out.color = vertex_in.color;
    return vertex_out;
}

@fragment
fn fs_main(fragment_in: VertexOutput) -> @location(0) vec4<f32> {
    return fragment_in.color * textureSample(gui_texture, gui_sampler, fragment_in.uv);
}
"#;

/// Full-screen triangle sampling the background image.
pub(crate) const BACKGROUND_WGSL: &str = r#"
@group(0) @binding(0)
var background_texture: texture_2d<f32>;
@group(0) @binding(1)
var background_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var vertex_out: VertexOutput;
    vertex_out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    vertex_out.uv = uv;
    return vertex_out;
}

@fragment
fn fs_main(fragment_in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(background_texture, background_sampler, fragment_in.uv);
}
"#;

/// Parse, validate and emit SPIR-V for both entry points of `source`.
pub(crate) fn compile_wgsl(label: &str, source: &str) -> RendererResult<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| {
        RendererError::Shader(format!("{label}: {}", err.emit_to_string(source)))
    })?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|err| RendererError::Shader(format!("{label}: {err}")))?;

    // Positions are already in Vulkan clip space.
    let mut options = naga::back::spv::Options::default();
    options
        .flags
        .remove(naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE);

    let words = naga::back::spv::write_vec(&module, &info, &options, None)
        .map_err(|err| RendererError::Shader(format!("{label}: {err}")))?;
    log::debug!("compiled {label} shader: {} SPIR-V words", words.len());
    Ok(words)
}
