use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};

use crate::codec::{validate_image_buffer, EncodedLabels, CHANNELS};
use crate::selection::{shade_texel, DimFactor, Selection, SelectionUniform};
use crate::texture_stage::{InitError, RenderContext, QUAD_VERTEX_COUNT};

impl RenderContext {
    /// Draw one frame for `selection` into the offscreen surface and queue a
    /// copy into the readback buffer.
    ///
    /// Only the 16-byte selection uniform is written; textures are never
    /// re-uploaded here.
    pub fn render(&self, selection: Selection) -> Result<()> {
        let uniform = SelectionUniform::new(selection, self.dim);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("labellens-render-encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("labellens-selection-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_viewport(0.0, 0.0, self.width as f32, self.height as f32, 0.0, 1.0);
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.draw(0..QUAD_VERTEX_COUNT, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.output_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(Some(encoder.finish()));
        log::debug!("rendered frame with selection {selection}");
        Ok(())
    }

    /// Block until the last rendered frame is available and return it as
    /// tightly packed RGBA rows, top row first.
    pub fn read_frame(&self) -> Result<Vec<u8>> {
        let buffer_slice = self.readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();

        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let mapped = buffer_slice.get_mapped_range();
        let row_len = self.unpadded_bytes_per_row as usize;
        let mut frame = vec![0_u8; row_len * self.height as usize];

        for (row_index, chunk) in mapped
            .chunks(self.padded_bytes_per_row as usize)
            .take(self.height as usize)
            .enumerate()
        {
            let dst_start = row_index * row_len;
            frame[dst_start..dst_start + row_len].copy_from_slice(&chunk[..row_len]);
        }

        drop(mapped);
        self.readback_buffer.unmap();
        Ok(frame)
    }

    pub fn render_frame_rgba(&self, selection: Selection) -> Result<Vec<u8>> {
        self.render(selection)?;
        self.read_frame()
    }
}

/// CPU compositor with the same per-pixel contract as the fragment stage.
///
/// Pixels are addressed directly by index, which is what nearest sampling of
/// a texture at the surface's own resolution yields.
#[derive(Debug, Clone)]
pub struct SoftwareCompositor {
    width: u32,
    height: u32,
    dim: DimFactor,
    image: Vec<u8>,
    labels: EncodedLabels,
}

impl SoftwareCompositor {
    pub fn new(
        image: Vec<u8>,
        labels: EncodedLabels,
        width: u32,
        height: u32,
        dim: DimFactor,
    ) -> Result<Self, InitError> {
        validate_image_buffer(&image, width, height)?;
        if (labels.width(), labels.height()) != (width, height) {
            return Err(InitError::LabelGridMismatch {
                expected: (width, height),
                actual: (labels.width(), labels.height()),
            });
        }

        Ok(Self {
            width,
            height,
            dim,
            image,
            labels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn render_frame_rgba(&self, selection: Selection) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.image.len());
        for (pixel, label_texel) in self
            .image
            .chunks_exact(CHANNELS)
            .zip(self.labels.as_bytes().chunks_exact(CHANNELS))
        {
            let color = [pixel[0], pixel[1], pixel[2], pixel[3]];
            frame.extend_from_slice(&shade_texel(color, label_texel[0], selection, self.dim));
        }
        frame
    }
}

/// Either backend behind one call site, for callers that fall back to the
/// CPU when no adapter is available.
pub enum Compositor {
    Gpu(RenderContext),
    Software(SoftwareCompositor),
}

impl Compositor {
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Gpu(_) => "gpu",
            Self::Software(_) => "software",
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Gpu(context) => (context.width(), context.height()),
            Self::Software(software) => (software.width(), software.height()),
        }
    }

    pub fn render_frame_rgba(&self, selection: Selection) -> Result<Vec<u8>> {
        match self {
            Self::Gpu(context) => context.render_frame_rgba(selection),
            Self::Software(software) => Ok(software.render_frame_rgba(selection)),
        }
    }

    pub fn release(self) {
        if let Self::Gpu(context) = self {
            context.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_labels;

    fn compositor(image: Vec<u8>, labels: &[u8], width: u32, height: u32) -> SoftwareCompositor {
        let encoded = encode_labels(labels, width, height).expect("labels should encode");
        SoftwareCompositor::new(image, encoded, width, height, DimFactor::default())
            .expect("compositor should build")
    }

    #[test]
    fn software_rejects_label_grid_of_other_size() {
        let encoded = encode_labels(&[1, 2], 2, 1).expect("labels should encode");
        let err = SoftwareCompositor::new(vec![0; 8], encoded, 1, 2, DimFactor::default())
            .expect_err("mismatched grids should fail");
        assert!(matches!(err, InitError::LabelGridMismatch { .. }));
    }

    #[test]
    fn software_dims_only_unselected_pixels() {
        let image = vec![100, 100, 100, 255, 200, 200, 200, 255];
        let software = compositor(image.clone(), &[1, 2], 2, 1);

        let frame = software.render_frame_rgba(Selection::Label(1));
        assert_eq!(&frame[..4], &image[..4]);
        assert_eq!(&frame[4..], &[60, 60, 60, 77]);
    }

    #[test]
    fn software_without_selection_is_identity() {
        let image = (0..16).map(|v| v as u8 * 13).collect::<Vec<_>>();
        let software = compositor(image.clone(), &[0, 1, 2, 3], 2, 2);
        assert_eq!(software.render_frame_rgba(Selection::None), image);
    }
}
