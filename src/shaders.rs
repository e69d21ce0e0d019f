use std::borrow::Cow;

pub const VERTEX_ENTRY_POINT: &str = "vs_main";
pub const FRAGMENT_ENTRY_POINT: &str = "fs_main";

/// Passes the quad through to clip space. Texture coordinates come from the
/// vertex buffer so the vertical flip stays a host-side choice.
pub const QUAD_VERTEX_SHADER: &str = r#"
struct VertexInput {
  @location(0) position: vec2<f32>,
  @location(1) uv: vec2<f32>,
}

struct VertexOutput {
  @builtin(position) position: vec4<f32>,
  @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
  var out: VertexOutput;
  out.position = vec4<f32>(input.position, 0.0, 1.0);
  out.uv = input.uv;
  return out;
}
"#;

/// Highlights pixels whose label equals the selection and dims the rest.
pub const SELECTION_FRAGMENT_SHADER: &str = r#"
struct SelectionUniform {
  selected_label: f32,
  has_selection: u32,
  dim_factor: f32,
  _pad0: f32,
}

@group(0) @binding(0) var image_tex: texture_2d<f32>;
@group(0) @binding(1) var label_tex: texture_2d<f32>;
@group(0) @binding(2) var texel_sampler: sampler;
@group(0) @binding(3) var<uniform> selection: SelectionUniform;

struct FragmentInput {
  @location(0) uv: vec2<f32>,
}

@fragment
fn fs_main(input: FragmentInput) -> @location(0) vec4<f32> {
  let img_color = textureSample(image_tex, texel_sampler, input.uv);
  let label = textureSample(label_tex, texel_sampler, input.uv).r * 255.0;

  if selection.has_selection == 0u {
    return img_color;
  }
  if abs(label - selection.selected_label) < 0.5 {
    return img_color;
  }
  return img_color * selection.dim_factor;
}
"#;

/// WGSL sources for the two pipeline stages. Each stage is compiled as its
/// own module so compile failures can be attributed to one of them.
#[derive(Debug, Clone)]
pub struct ShaderSources {
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self {
            vertex: Cow::Borrowed(QUAD_VERTEX_SHADER),
            fragment: Cow::Borrowed(SELECTION_FRAGMENT_SHADER),
        }
    }
}

impl ShaderSources {
    pub fn with_vertex(mut self, source: impl Into<Cow<'static, str>>) -> Self {
        self.vertex = source.into();
        self
    }

    pub fn with_fragment(mut self, source: impl Into<Cow<'static, str>>) -> Self {
        self.fragment = source.into();
        self
    }
}
