use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use serde::Deserialize;
use wgpu::util::DeviceExt;

use crate::codec::{validate_image_buffer, EncodedLabels, LabelCodecError, CHANNELS};
use crate::error_codes::{CodedError, NO_GPU_ADAPTER};
use crate::selection::{DimFactor, Selection, SelectionUniform};
use crate::shaders::{ShaderSources, FRAGMENT_ENTRY_POINT, VERTEX_ENTRY_POINT};

pub const IMAGE_TEXTURE_BINDING: u32 = 0;
pub const LABEL_TEXTURE_BINDING: u32 = 1;
pub const SAMPLER_BINDING: u32 = 2;
pub const SELECTION_UNIFORM_BINDING: u32 = 3;

pub const QUAD_VERTEX_COUNT: u32 = 4;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuPowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

impl From<GpuPowerPreference> for wgpu::PowerPreference {
    fn from(value: GpuPowerPreference) -> Self {
        match value {
            GpuPowerPreference::HighPerformance => Self::HighPerformance,
            GpuPowerPreference::LowPower => Self::LowPower,
        }
    }
}

/// Device and queue shared by every render context created on this adapter.
pub struct GpuDevice {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    adapter_name: String,
    max_texture_dimension: u32,
}

impl GpuDevice {
    pub async fn new(power_preference: GpuPowerPreference) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power_preference.into(),
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| {
                anyhow!(CodedError::runtime(
                    NO_GPU_ADAPTER,
                    "no suitable GPU adapter found"
                ))
            })?;

        let adapter_name = adapter.get_info().name;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("labellens-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        let max_texture_dimension = device.limits().max_texture_dimension_2d;
        log::debug!("using GPU adapter '{adapter_name}' (max texture {max_texture_dimension}px)");

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_texture_dimension,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }}

/// Row order of the pixel buffers handed to the texture stage.
///
/// Canvas-style decoders (and the `image` crate) emit the top row first.
/// Texel row 0 is sampled at `v = 0`, so for top-left buffers the top edge of
/// clip space must map to `v = 0`. Picking the wrong origin renders the image
/// mirrored vertically without any error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    #[default]
    TopLeft,
    BottomLeft,
}

impl ImageOrigin {
    /// Texture `v` coordinate for a clip-space `y` in `[-1, 1]`.
    pub fn v_for_clip_y(self, clip_y: f32) -> f32 {
        match self {
            Self::TopLeft => (1.0 - clip_y) * 0.5,
            Self::BottomLeft => (1.0 + clip_y) * 0.5,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Full-viewport quad in triangle-strip order: bottom-left, bottom-right,
/// top-left, top-right.
pub fn quad_vertices(origin: ImageOrigin) -> [Vertex; 4] {
    [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]].map(|position: [f32; 2]| Vertex {
        position,
        uv: [(position[0] + 1.0) * 0.5, origin.v_for_clip_y(position[1])],
    })
}

#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub origin: ImageOrigin,
    pub dim: DimFactor,
    pub shaders: ShaderSources,
}

/// Failures while building a [`RenderContext`]. No partially built context
/// survives any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    InvalidDimensions { width: u32, height: u32 },
    ImageSizeMismatch { expected: usize, actual: usize },
    LabelGridMismatch { expected: (u32, u32), actual: (u32, u32) },
    ExceedsDeviceLimit { width: u32, height: u32, max: u32 },
    VertexShaderCompile { log: String },
    FragmentShaderCompile { log: String },
    ProgramLink { log: String },
    ResourceAllocation { log: String },
}

impl Display for InitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDimensions { width, height } => {
                write!(f, "render surface must be at least 1x1, got {width}x{height}")
            }
            Self::ImageSizeMismatch { expected, actual } => write!(
                f,
                "image buffer size mismatch: expected {expected} bytes, got {actual} bytes"
            ),
            Self::LabelGridMismatch { expected, actual } => write!(
                f,
                "label grid is {}x{} but the image is {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            Self::ExceedsDeviceLimit { width, height, max } => write!(
                f,
                "{width}x{height} exceeds the device texture limit of {max}px"
            ),
            Self::VertexShaderCompile { log } => {
                write!(f, "vertex shader failed to compile: {log}")
            }
            Self::FragmentShaderCompile { log } => {
                write!(f, "fragment shader failed to compile: {log}")
            }
            Self::ProgramLink { log } => write!(f, "shader program failed to link: {log}"),
            Self::ResourceAllocation { log } => {
                write!(f, "failed allocating GPU resources: {log}")
            }
        }
    }
}

impl Error for InitError {}

impl From<LabelCodecError> for InitError {
    fn from(value: LabelCodecError) -> Self {
        match value {
            LabelCodecError::ZeroDimensions { width, height } => {
                Self::InvalidDimensions { width, height }
            }
            LabelCodecError::BufferSizeMismatch { expected, actual } => {
                Self::ImageSizeMismatch { expected, actual }
            }
            LabelCodecError::DimensionsOverflow => Self::InvalidDimensions {
                width: u32::MAX,
                height: u32::MAX,
            },
        }
    }
}

/// GPU objects for one loaded image/label pair plus its offscreen surface.
///
/// Textures are uploaded once here; the compositor only rewrites the
/// selection uniform between frames.
pub struct RenderContext {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) dim: DimFactor,
    pub(crate) pipeline: wgpu::RenderPipeline,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) uniform_buffer: wgpu::Buffer,
    pub(crate) vertex_buffer: wgpu::Buffer,
    pub(crate) output_view: wgpu::TextureView,
    pub(crate) output_texture: wgpu::Texture,
    pub(crate) readback_buffer: wgpu::Buffer,
    pub(crate) unpadded_bytes_per_row: u32,
    pub(crate) padded_bytes_per_row: u32,
    image_texture: wgpu::Texture,
    label_texture: wgpu::Texture,
}

impl RenderContext {
    /// Compile both stages, upload `image` and `labels`, and allocate a
    /// `width`x`height` render surface.
    pub async fn initialize(
        gpu: &GpuDevice,
        image: &[u8],
        labels: &EncodedLabels,
        width: u32,
        height: u32,
        options: &ContextOptions,
    ) -> Result<Self, InitError> {
        validate_image_buffer(image, width, height)?;
        if (labels.width(), labels.height()) != (width, height) {
            return Err(InitError::LabelGridMismatch {
                expected: (width, height),
                actual: (labels.width(), labels.height()),
            });
        }
        let max = gpu.max_texture_dimension;
        if width > max || height > max {
            return Err(InitError::ExceedsDeviceLimit { width, height, max });
        }

        let device = gpu.device.as_ref();
        let queue = gpu.queue.as_ref();

        let vertex_module = capture_validation(device, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("labellens-vertex-shader"),
                source: wgpu::ShaderSource::Wgsl(options.shaders.vertex.clone()),
            })
        })
        .await
        .map_err(|log| InitError::VertexShaderCompile { log })?;

        let fragment_module = capture_validation(device, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("labellens-fragment-shader"),
                source: wgpu::ShaderSource::Wgsl(options.shaders.fragment.clone()),
            })
        })
        .await
        .map_err(|log| InitError::FragmentShaderCompile { log })?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("labellens-bind-group-layout"),
            entries: &[
                texture_layout_entry(IMAGE_TEXTURE_BINDING),
                texture_layout_entry(LABEL_TEXTURE_BINDING),
                wgpu::BindGroupLayoutEntry {
                    binding: SAMPLER_BINDING,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: SELECTION_UNIFORM_BINDING,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<SelectionUniform>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let pipeline = capture_validation(device, || {
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("labellens-pipeline-layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("labellens-selection-pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: VERTEX_ENTRY_POINT,
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: FRAGMENT_ENTRY_POINT,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TEXTURE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
            })
        })
        .await
        .map_err(|log| InitError::ProgramLink { log })?;

        let unpadded_bytes_per_row = width
            .checked_mul(CHANNELS as u32)
            .ok_or(InitError::InvalidDimensions { width, height })?;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let resources = capture_allocation(device, || {
            let image_texture =
                upload_rgba_texture(device, queue, "labellens-image", image, width, height);
            let label_texture = upload_rgba_texture(
                device,
                queue,
                "labellens-labels",
                labels.as_bytes(),
                width,
                height,
            );

            let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("labellens-nearest-sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            });

            let uniform = SelectionUniform::new(Selection::None, options.dim);
            let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("labellens-selection-uniform"),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

            let vertices = quad_vertices(options.origin);
            let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("labellens-quad-vertices"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

            let image_view = image_texture.create_view(&wgpu::TextureViewDescriptor::default());
            let label_view = label_texture.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("labellens-bind-group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: IMAGE_TEXTURE_BINDING,
                        resource: wgpu::BindingResource::TextureView(&image_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: LABEL_TEXTURE_BINDING,
                        resource: wgpu::BindingResource::TextureView(&label_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: SAMPLER_BINDING,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: SELECTION_UNIFORM_BINDING,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                ],
            });

            let output_texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("labellens-render-target"),
                size: extent(width, height),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TEXTURE_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let output_view = output_texture.create_view(&wgpu::TextureViewDescriptor::default());

            let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("labellens-readback-buffer"),
                size: u64::from(padded_bytes_per_row) * u64::from(height),
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });

            GpuResources {
                image_texture,
                label_texture,
                uniform_buffer,
                vertex_buffer,
                bind_group,
                output_texture,
                output_view,
                readback_buffer,
            }
        })
        .await
        .map_err(|log| InitError::ResourceAllocation { log })?;

        log::debug!(
            "initialized render context {width}x{height} (origin {:?}, dim {})",
            options.origin,
            options.dim.get()
        );

        Ok(Self {
            device: Arc::clone(&gpu.device),
            queue: Arc::clone(&gpu.queue),
            width,
            height,
            dim: options.dim,
            pipeline,
            bind_group: resources.bind_group,
            uniform_buffer: resources.uniform_buffer,
            vertex_buffer: resources.vertex_buffer,
            output_view: resources.output_view,
            output_texture: resources.output_texture,
            readback_buffer: resources.readback_buffer,
            unpadded_bytes_per_row,
            padded_bytes_per_row,
            image_texture: resources.image_texture,
            label_texture: resources.label_texture,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Free the GPU memory held by this context right away instead of
    /// waiting for the last handle to drop.
    pub fn release(self) {
        self.image_texture.destroy();
        self.label_texture.destroy();
        self.output_texture.destroy();
        self.uniform_buffer.destroy();
        self.vertex_buffer.destroy();
        self.readback_buffer.destroy();
        log::debug!("released render context {}x{}", self.width, self.height);
    }
}

struct GpuResources {
    image_texture: wgpu::Texture,
    label_texture: wgpu::Texture,
    uniform_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    output_texture: wgpu::Texture,
    output_view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
}

/// Run `create` inside a validation error scope and turn a captured error
/// into its diagnostic text.
async fn capture_validation<T>(
    device: &wgpu::Device,
    create: impl FnOnce() -> T,
) -> Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    match device.pop_error_scope().await {
        Some(error) => Err(error.to_string()),
        None => Ok(value),
    }
}

/// Like [`capture_validation`], but also catches out-of-memory failures so a
/// too-large surface fails `initialize` instead of reaching the device's
/// uncaptured error handler.
async fn capture_allocation<T>(
    device: &wgpu::Device,
    create: impl FnOnce() -> T,
) -> Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    // Scopes pop innermost first.
    let validation = device.pop_error_scope().await;
    let out_of_memory = device.pop_error_scope().await;
    match out_of_memory.or(validation) {
        Some(error) => Err(error.to_string()),
        None => Ok(value),
    }
}

fn texture_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn upload_rgba_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    data: &[u8],
    width: u32,
    height: u32,
) -> wgpu::Texture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(width, height),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * CHANNELS as u32),
            rows_per_image: Some(height),
        },
        extent(width, height),
    );

    texture
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
