//! Texture presentation
//!
//! A [`Render`] draws textures through a full-screen pass onto either an
//! off-screen texture or a window surface. It owns its GPU device or
//! borrows one from a [`Capturer`](crate::capture::Capturer) so captured
//! textures can be shown without a copy. Decoded frames are uploaded and
//! converted to RGBA on the same device before presentation.

mod frame;

use crate::error::{Error, Result};
use crate::gpu::{AdapterId, GpuDevice};
use crate::types::DecodedFrame;

use frame::FrameUpload;

use std::ops::Deref;

/// Device a render session draws with
pub enum DeviceBinding<'d> {
    Owned(GpuDevice),
    Borrowed(&'d GpuDevice),
}

impl Deref for DeviceBinding<'_> {
    type Target = GpuDevice;

    fn deref(&self) -> &GpuDevice {
        match self {
            DeviceBinding::Owned(device) => device,
            DeviceBinding::Borrowed(device) => device,
        }
    }
}

/// Where rendered frames go
pub enum RenderTarget {
    /// Off-screen loopback texture
    Offscreen,
    /// Window surface created on the render device's instance
    Surface(wgpu::Surface<'static>),
}

/// Geometry and targets fixed by the first rendered texture
struct Binding {
    size: wgpu::Extent3d,
    format: wgpu::TextureFormat,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    offscreen: Option<wgpu::Texture>,
    shared: Option<wgpu::Texture>,
}

/// Render session
pub struct Render<'d> {
    device: DeviceBinding<'d>,
    target: RenderTarget,
    wants_shared: bool,
    sampler: wgpu::Sampler,
    binding: Option<Binding>,
    upload: Option<FrameUpload>,
    frames: u64,
}

impl Render<'static> {
    /// Render with a new device on `adapter` into an off-screen target
    pub fn new(adapter: AdapterId, wants_shared: bool) -> Result<Self> {
        let device = GpuDevice::open(adapter)?;
        Ok(Self::bind(
            DeviceBinding::Owned(device),
            wants_shared,
            RenderTarget::Offscreen,
        ))
    }
}

impl<'d> Render<'d> {
    /// Render with a device owned elsewhere
    pub fn with_device(device: &'d GpuDevice, wants_shared: bool, target: RenderTarget) -> Self {
        Self::bind(DeviceBinding::Borrowed(device), wants_shared, target)
    }

    fn bind(device: DeviceBinding<'d>, wants_shared: bool, target: RenderTarget) -> Self {
        let sampler = device.device().create_sampler(&wgpu::SamplerDescriptor {
            label: Some("render sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        tracing::info!(
            "Render created on {} ({}, shared={})",
            device.desc().name,
            match target {
                RenderTarget::Offscreen => "offscreen",
                RenderTarget::Surface(_) => "surface",
            },
            wants_shared
        );

        Self {
            device,
            target,
            wants_shared,
            sampler,
            binding: None,
            upload: None,
            frames: 0,
        }
    }

    /// Device used for drawing
    pub fn device(&self) -> &GpuDevice {
        &self.device
    }

    /// Size bound by the first rendered texture
    pub fn size(&self) -> Option<(u32, u32)> {
        self.binding
            .as_ref()
            .map(|b| (b.size.width, b.size.height))
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    /// Off-screen texture holding the last rendered frame
    pub fn output_texture(&self) -> Option<&wgpu::Texture> {
        self.binding.as_ref().and_then(|b| b.offscreen.as_ref())
    }

    /// Texture other components can read the presented frame from
    ///
    /// Only available when the session was created with a shared handle.
    pub fn shared_texture(&self) -> Option<&wgpu::Texture> {
        let binding = self.binding.as_ref()?;
        if !self.wants_shared {
            return None;
        }
        binding.shared.as_ref().or(binding.offscreen.as_ref())
    }

    /// Present one texture
    ///
    /// The first call fixes the output geometry and format; later textures
    /// must match them. Textures the device cannot use (created on another
    /// device, not sampleable) are rejected with an error.
    pub fn render_texture(&mut self, texture: &wgpu::Texture) -> Result<()> {
        self.present(texture, None)
    }

    /// Upload a decoded frame and present it
    ///
    /// YUV frames are converted to RGBA (BT.601, limited range) on the
    /// render device, so the bound output format is `Rgba8Unorm` for them.
    pub fn render_frame(&mut self, frame: &DecodedFrame<'_>) -> Result<()> {
        let upload = match self.upload.take() {
            Some(upload) if upload.matches(frame) => upload,
            _ => {
                let gpu = &*self.device;
                gpu.validate("frame upload allocation", || {
                    FrameUpload::new(gpu, frame.format, frame.width, frame.height)
                })??
            }
        };

        let result = self
            .device
            .validate("frame upload", || upload.upload(&self.device, frame))
            .and_then(|uploaded| uploaded)
            .and_then(|()| self.present(upload.output(), Some(&upload)));
        self.upload = Some(upload);
        result
    }

    fn present(&mut self, texture: &wgpu::Texture, upload: Option<&FrameUpload>) -> Result<()> {
        let size = texture.size();
        let format = texture.format();

        if !texture.usage().contains(wgpu::TextureUsages::TEXTURE_BINDING) {
            return Err(Error::InvalidConfig("texture cannot be sampled".into()));
        }
        let mut fresh = None;
        if let Some(binding) = &self.binding {
            if binding.size != size {
                return Err(Error::InvalidGeometry(format!(
                    "texture {}x{} does not match bound {}x{}",
                    size.width, size.height, binding.size.width, binding.size.height
                )));
            }
            if binding.format != format {
                return Err(Error::InvalidConfig(format!(
                    "texture format {:?} does not match bound {:?}",
                    format, binding.format
                )));
            }
        } else {
            // Kept only once a frame made it through
            fresh = Some(
                self.device
                    .validate("render target", || self.create_binding(size, format))??,
            );
        }

        let Some(binding) = fresh.as_ref().or(self.binding.as_ref()) else {
            return Err(Error::ContractViolation("render target not bound".into()));
        };
        let gpu = &*self.device;

        let frame = match &self.target {
            RenderTarget::Offscreen => None,
            RenderTarget::Surface(surface) => Some(acquire(surface)?),
        };
        let output = match (&frame, &binding.offscreen) {
            (Some(frame), _) => &frame.texture,
            (None, Some(offscreen)) => offscreen,
            (None, None) => {
                return Err(Error::ContractViolation("no render target texture".into()))
            }
        };

        // A rejected command buffer is never submitted and the surface
        // texture is dropped unpresented.
        let commands = gpu.validate("render pass", || {
            let source_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("render bind group"),
                layout: &binding.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            let view = output.create_view(&wgpu::TextureViewDescriptor::default());

            let mut encoder = gpu
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("render"),
                });
            if let Some(upload) = upload {
                upload.encode(&mut encoder);
            }
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("present"),
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
                pass.set_pipeline(&binding.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }

            if let Some(shared) = &binding.shared {
                encoder.copy_texture_to_texture(
                    output.as_image_copy(),
                    shared.as_image_copy(),
                    binding.size,
                );
            }
            encoder.finish()
        })?;

        gpu.queue().submit(std::iter::once(commands));
        if let Some(frame) = frame {
            frame.present();
        }

        if fresh.is_some() {
            self.binding = fresh;
        }
        self.frames += 1;
        Ok(())
    }

    fn create_binding(&self, size: wgpu::Extent3d, format: wgpu::TextureFormat) -> Result<Binding> {
        let gpu = &*self.device;
        let device = gpu.device();

        let output_format = match &self.target {
            RenderTarget::Offscreen => format,
            RenderTarget::Surface(surface) => {
                let mut config = surface
                    .get_default_config(gpu.adapter(), size.width, size.height)
                    .ok_or_else(|| {
                        Error::InvalidConfig("surface is not supported by the adapter".into())
                    })?;
                if self.wants_shared {
                    config.usage |= wgpu::TextureUsages::COPY_SRC;
                }
                surface.configure(device, &config);
                config.format
            }
        };

        let offscreen = matches!(self.target, RenderTarget::Offscreen).then(|| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("render output"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: output_format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        });

        let shared = (self.wants_shared && offscreen.is_none()).then(|| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("render shared"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: output_format,
                usage: wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("present shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("present.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("render bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("render pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("render pipeline"),
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
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        tracing::info!(
            "Render bound to {}x{} {:?} -> {:?}",
            size.width,
            size.height,
            format,
            output_format
        );

        Ok(Binding {
            size,
            format,
            pipeline,
            bind_group_layout,
            offscreen,
            shared,
        })
    }
}

impl Drop for Render<'_> {
    fn drop(&mut self) {
        tracing::debug!("Render dropped after {} frames", self.frames);
    }
}

/// Next surface texture, mapping surface errors onto the error taxonomy
fn acquire(surface: &wgpu::Surface<'static>) -> Result<wgpu::SurfaceTexture> {
    surface.get_current_texture().map_err(|e| match e {
        wgpu::SurfaceError::OutOfMemory => Error::OutOfResources(format!("surface: {}", e)),
        other => Error::TransientIo(format!("surface unavailable: {}", other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelFormat, PlaneArray};

    fn source_texture(gpu: &GpuDevice, width: u32, height: u32, format: wgpu::TextureFormat) -> wgpu::Texture {
        gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("source"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    #[test]
    fn test_unknown_adapter() {
        assert!(matches!(
            Render::new(AdapterId(u64::MAX), false),
            Err(Error::UnsupportedAdapter(_))
        ));
    }

    #[test]
    fn test_offscreen_copy_is_exact() {
        let Ok(gpu) = GpuDevice::open_default() else {
            println!("No GPU adapter available, skipping test");
            return;
        };
        let mut render = Render::with_device(&gpu, true, RenderTarget::Offscreen);
        assert!(render.shared_texture().is_none());

        let texture = source_texture(&gpu, 16, 8, wgpu::TextureFormat::Rgba8Unorm);
        let pixels: Vec<u8> = (0..16 * 8 * 4).map(|i| (i * 7 % 256) as u8).collect();
        gpu.queue().write_texture(
            texture.as_image_copy(),
            &pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(16 * 4),
                rows_per_image: Some(8),
            },
            texture.size(),
        );

        render.render_texture(&texture).unwrap();
        assert_eq!(render.size(), Some((16, 8)));
        let shared = render.shared_texture().unwrap();
        assert_eq!(gpu.read_texture(shared).unwrap(), pixels);
    }

    #[test]
    fn test_rejects_geometry_and_format_changes() {
        let Ok(gpu) = GpuDevice::open_default() else {
            println!("No GPU adapter available, skipping test");
            return;
        };
        let mut render = Render::with_device(&gpu, false, RenderTarget::Offscreen);

        let first = source_texture(&gpu, 16, 8, wgpu::TextureFormat::Bgra8Unorm);
        render.render_texture(&first).unwrap();
        assert!(render.shared_texture().is_none());

        let larger = source_texture(&gpu, 32, 8, wgpu::TextureFormat::Bgra8Unorm);
        assert!(matches!(
            render.render_texture(&larger),
            Err(Error::InvalidGeometry(_))
        ));

        let other_format = source_texture(&gpu, 16, 8, wgpu::TextureFormat::Rgba8Unorm);
        assert!(matches!(
            render.render_texture(&other_format),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(render.frames_rendered(), 1);
    }

    #[test]
    fn test_rejects_unusable_textures() {
        let (Ok(gpu), Ok(other)) = (GpuDevice::open_default(), GpuDevice::open_default()) else {
            println!("No GPU adapter available, skipping test");
            return;
        };
        let mut render = Render::with_device(&gpu, true, RenderTarget::Offscreen);

        // Nothing gets bound by a texture the device cannot use
        let foreign = source_texture(&other, 16, 8, wgpu::TextureFormat::Rgba8Unorm);
        assert!(matches!(
            render.render_texture(&foreign),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(render.size(), None);

        let own = source_texture(&gpu, 16, 8, wgpu::TextureFormat::Rgba8Unorm);
        render.render_texture(&own).unwrap();

        assert!(matches!(
            render.render_texture(&foreign),
            Err(Error::InvalidConfig(_))
        ));

        let copy_only = gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("copy only"),
            size: own.size(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        assert!(matches!(
            render.render_texture(&copy_only),
            Err(Error::InvalidConfig(_))
        ));

        // The session keeps working afterwards
        render.render_texture(&own).unwrap();
        assert_eq!(render.frames_rendered(), 2);
    }

    fn nv12_frame<'a>(luma: &'a [u8], chroma: &'a [u8], stride: usize) -> DecodedFrame<'a> {
        DecodedFrame {
            width: 16,
            height: 8,
            format: PixelFormat::Nv12,
            planes: PlaneArray::from_slice(&[luma, chroma]).unwrap(),
            strides: PlaneArray::from_slice(&[stride, stride]).unwrap(),
            keyframe: true,
        }
    }

    #[test]
    fn test_render_frame_converts_nv12() {
        let Ok(gpu) = GpuDevice::open_default() else {
            println!("No GPU adapter available, skipping test");
            return;
        };
        let mut render = Render::with_device(&gpu, true, RenderTarget::Offscreen);

        // Black left half, white right half, neutral chroma, padded rows
        let stride = 32;
        let mut luma = vec![0u8; stride * 8];
        for row in luma.chunks_mut(stride) {
            row[..8].fill(16);
            row[8..16].fill(235);
        }
        let chroma = vec![128u8; stride * 4];

        render.render_frame(&nv12_frame(&luma, &chroma, stride)).unwrap();
        assert_eq!(render.size(), Some((16, 8)));

        let shared = render.shared_texture().unwrap();
        assert_eq!(shared.format(), wgpu::TextureFormat::Rgba8Unorm);
        let pixels = gpu.read_texture(shared).unwrap();
        for (i, px) in pixels.chunks(4).enumerate() {
            let expected = if i % 16 < 8 { 0 } else { 255 };
            for channel in &px[..3] {
                assert!(
                    (*channel as i32 - expected).abs() <= 2,
                    "pixel {} is {:?}",
                    i,
                    px
                );
            }
            assert_eq!(px[3], 255);
        }

        // Same geometry reuses the upload
        render.render_frame(&nv12_frame(&luma, &chroma, stride)).unwrap();
        assert_eq!(render.frames_rendered(), 2);
    }

    #[test]
    fn test_render_frame_rejects_bad_planes() {
        let Ok(gpu) = GpuDevice::open_default() else {
            println!("No GPU adapter available, skipping test");
            return;
        };
        let mut render = Render::with_device(&gpu, false, RenderTarget::Offscreen);

        let luma = vec![16u8; 16 * 8];
        let short = vec![128u8; 16 * 3];
        assert!(matches!(
            render.render_frame(&nv12_frame(&luma, &short, 16)),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            render.render_frame(&nv12_frame(&luma, &luma, 8)),
            Err(Error::InvalidGeometry(_))
        ));

        let mut p010 = nv12_frame(&luma, &luma, 16);
        p010.format = PixelFormat::P010;
        assert!(matches!(
            render.render_frame(&p010),
            Err(Error::InvalidFormat(_))
        ));
        assert_eq!(render.frames_rendered(), 0);
    }
}
