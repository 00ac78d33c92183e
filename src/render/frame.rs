//! Decoded frame upload
//!
//! Each plane of a decoded frame goes into its own texture, written with
//! the decoder's strides. YUV formats are then converted into an RGBA
//! texture by a full-screen pass; packed RGB frames are used as uploaded.

use crate::error::{Error, Result};
use crate::gpu::GpuDevice;
use crate::layout::FrameBufferLayout;
use crate::types::{DecodedFrame, PixelFormat};

/// Texture format of every plane of `format`
fn plane_formats(format: PixelFormat) -> Result<&'static [wgpu::TextureFormat]> {
    use wgpu::TextureFormat::{Bgra8Unorm, R8Unorm, Rg8Unorm, Rgba8Unorm};

    match format {
        PixelFormat::Yuv420p | PixelFormat::Yuv444p => Ok(&[R8Unorm, R8Unorm, R8Unorm]),
        PixelFormat::Nv12 => Ok(&[R8Unorm, Rg8Unorm]),
        PixelFormat::Bgra => Ok(&[Bgra8Unorm]),
        PixelFormat::Rgba => Ok(&[Rgba8Unorm]),
        PixelFormat::P010 => Err(Error::InvalidFormat(format!(
            "{} frames cannot be rendered",
            format
        ))),
    }
}

/// YUV to RGBA pass
struct Conversion {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    output: wgpu::Texture,
}

/// Plane textures sized for one format and geometry
pub(crate) struct FrameUpload {
    layout: FrameBufferLayout,
    planes: Vec<wgpu::Texture>,
    conversion: Option<Conversion>,
}

impl FrameUpload {
    pub fn new(gpu: &GpuDevice, format: PixelFormat, width: u32, height: u32) -> Result<Self> {
        let formats = plane_formats(format)?;
        let layout = FrameBufferLayout::compute(format, width, height, 1)?;
        let device = gpu.device();

        let mut planes = Vec::with_capacity(formats.len());
        for (plane, texture_format) in formats.iter().copied().enumerate() {
            let texel = texture_format.block_copy_size(None).unwrap_or(1) as usize;
            planes.push(device.create_texture(&wgpu::TextureDescriptor {
                label: Some("frame plane"),
                size: wgpu::Extent3d {
                    width: (layout.row_bytes(plane) / texel) as u32,
                    height: layout.plane_heights()[plane] as u32,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            }));
        }

        let conversion = if format.is_packed_rgb() {
            None
        } else {
            Some(Self::create_conversion(gpu, format, width, height, &planes))
        };

        tracing::debug!("Frame upload allocated for {} {}x{}", format, width, height);

        Ok(Self {
            layout,
            planes,
            conversion,
        })
    }

    fn create_conversion(
        gpu: &GpuDevice,
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: &[wgpu::Texture],
    ) -> Conversion {
        let device = gpu.device();

        let plane_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("convert bind group layout"),
            entries: &[plane_entry(0), plane_entry(1), plane_entry(2)],
        });

        // NV12 binds its UV plane in both chroma slots
        let views: Vec<wgpu::TextureView> = planes
            .iter()
            .map(|plane| plane.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        let view = |index: usize| &views[index.min(views.len() - 1)];
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("convert bind group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view(0)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view(1)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(view(2)),
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("convert shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("convert.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("convert pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("convert pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: if format == PixelFormat::Nv12 {
                    "fs_nv12"
                } else {
                    "fs_planar"
                },
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("converted frame"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        Conversion {
            pipeline,
            bind_group,
            output,
        }
    }

    /// Whether `frame` fits these textures
    pub fn matches(&self, frame: &DecodedFrame<'_>) -> bool {
        self.layout.matches(frame.format, frame.width, frame.height, 1)
    }

    /// Copy every plane of `frame` into its texture
    pub fn upload(&self, gpu: &GpuDevice, frame: &DecodedFrame<'_>) -> Result<()> {
        if frame.planes.len() < self.planes.len() || frame.strides.len() < self.planes.len() {
            return Err(Error::InvalidGeometry(format!(
                "{} frame carries {} of {} planes",
                frame.format,
                frame.planes.len(),
                self.planes.len()
            )));
        }

        for (plane, texture) in self.planes.iter().enumerate() {
            let data = frame.planes[plane];
            let stride = frame.strides[plane];
            let row = self.layout.row_bytes(plane);
            let rows = self.layout.plane_heights()[plane];
            let needed = stride
                .checked_mul(rows - 1)
                .and_then(|n| n.checked_add(row));
            let bytes_per_row = u32::try_from(stride).ok().filter(|_| stride >= row);
            let (Some(needed), Some(bytes_per_row)) = (needed, bytes_per_row) else {
                return Err(Error::InvalidGeometry(format!(
                    "plane {} stride {} cannot hold {} byte rows",
                    plane, stride, row
                )));
            };
            if data.len() < needed {
                return Err(Error::InvalidGeometry(format!(
                    "plane {} has {} bytes, {} needed",
                    plane,
                    data.len(),
                    needed
                )));
            }

            gpu.queue().write_texture(
                texture.as_image_copy(),
                &data[..needed],
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(rows as u32),
                },
                texture.size(),
            );
        }
        Ok(())
    }

    /// Record the YUV conversion, if this format needs one
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let Some(conversion) = &self.conversion else {
            return;
        };
        let view = conversion
            .output
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("convert"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&conversion.pipeline);
        pass.set_bind_group(0, &conversion.bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    /// Texture holding the frame as packed RGB once [`encode`](Self::encode) ran
    pub fn output(&self) -> &wgpu::Texture {
        match &self.conversion {
            Some(conversion) => &conversion.output,
            None => &self.planes[0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_formats() {
        assert_eq!(plane_formats(PixelFormat::Nv12).unwrap().len(), 2);
        assert_eq!(
            plane_formats(PixelFormat::Yuv420p).unwrap(),
            &[wgpu::TextureFormat::R8Unorm; 3]
        );
        assert_eq!(
            plane_formats(PixelFormat::Bgra).unwrap(),
            &[wgpu::TextureFormat::Bgra8Unorm]
        );
        assert!(matches!(
            plane_formats(PixelFormat::P010),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_plane_texture_sizes() {
        let Ok(gpu) = GpuDevice::open_default() else {
            println!("No GPU adapter available, skipping test");
            return;
        };
        let upload = FrameUpload::new(&gpu, PixelFormat::Nv12, 33, 17).unwrap();
        let sizes: Vec<(u32, u32)> = upload
            .planes
            .iter()
            .map(|t| (t.width(), t.height()))
            .collect();
        assert_eq!(sizes, [(33, 17), (17, 9)]);
        assert_eq!(upload.output().format(), wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(upload.output().width(), 33);
    }
}
