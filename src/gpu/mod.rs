//! GPU adapters and devices
//!
//! Adapters are addressed by a stable 64-bit [`AdapterId`] so that the
//! capturer, encoder and render sessions can agree on the same physical
//! device across the flat interface.

use crate::error::{Error, Result};
use crate::types::PixelFormat;

/// Stable 64-bit adapter identifier
///
/// Composed as `vendor << 48 | device << 32 | ordinal`, where the ordinal is
/// the adapter's position in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId(pub u64);

impl AdapterId {
    pub fn new(vendor: u32, device: u32, ordinal: u32) -> Self {
        Self(((vendor as u64 & 0xffff) << 48) | ((device as u64 & 0xffff) << 32) | ordinal as u64)
    }

    pub fn vendor(&self) -> u32 {
        (self.0 >> 48) as u32 & 0xffff
    }

    pub fn device(&self) -> u32 {
        (self.0 >> 32) as u32 & 0xffff
    }

    pub fn ordinal(&self) -> u32 {
        self.0 as u32
    }
}

impl std::fmt::Display for AdapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Description of an enumerated adapter
#[derive(Debug, Clone)]
pub struct AdapterDesc {
    pub id: AdapterId,
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

fn describe(ordinal: usize, adapter: &wgpu::Adapter) -> AdapterDesc {
    let info = adapter.get_info();
    AdapterDesc {
        id: AdapterId::new(info.vendor, info.device, ordinal as u32),
        name: info.name,
        vendor: info.vendor,
        device: info.device,
        backend: info.backend,
        device_type: info.device_type,
    }
}

/// List every adapter visible to this process
pub fn enumerate_adapters() -> Vec<AdapterDesc> {
    let instance = new_instance();
    instance
        .enumerate_adapters(wgpu::Backends::all())
        .iter()
        .enumerate()
        .map(|(ordinal, adapter)| describe(ordinal, adapter))
        .collect()
}

/// An opened logical device on one adapter
pub struct GpuDevice {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    desc: AdapterDesc,
}

impl GpuDevice {
    /// Open a device on the adapter with the given id
    pub fn open(id: AdapterId) -> Result<Self> {
        let instance = new_instance();
        let (adapter, desc) = instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .enumerate()
            .map(|(ordinal, adapter)| {
                let desc = describe(ordinal, &adapter);
                (adapter, desc)
            })
            .find(|(_, desc)| desc.id == id)
            .ok_or(Error::UnsupportedAdapter(id.0))?;

        Self::from_adapter(instance, adapter, desc)
    }

    /// Open a device on the first enumerated adapter
    pub fn open_default() -> Result<Self> {
        let id = enumerate_adapters()
            .first()
            .map(|desc| desc.id)
            .ok_or_else(|| Error::InvalidConfig("no GPU adapter available".into()))?;
        Self::open(id)
    }

    fn from_adapter(instance: wgpu::Instance, adapter: wgpu::Adapter, desc: AdapterDesc) -> Result<Self> {
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("deskpipe"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| Error::OutOfResources(format!("failed to open device on {}: {}", desc.name, e)))?;
        // Errors outside a validation scope are logged instead of aborting
        device.on_uncaptured_error(Box::new(|e| tracing::error!("Uncaptured GPU error: {}", e)));

        tracing::info!(
            "Opened GPU device {} ({:?}, {:?}) as {}",
            desc.name,
            desc.backend,
            desc.device_type,
            desc.id
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            desc,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    pub fn desc(&self) -> &AdapterDesc {
        &self.desc
    }

    pub fn adapter_id(&self) -> AdapterId {
        self.desc.id
    }

    /// Run `f` inside a validation error scope
    ///
    /// Work the device rejects (foreign resources, missing usages, ...)
    /// comes back as [`Error::InvalidConfig`] instead of reaching the
    /// uncaptured error handler.
    pub fn validate<T>(&self, what: &str, f: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(value),
            Some(e) => {
                tracing::warn!("{} rejected by the GPU: {}", what, e);
                Err(Error::InvalidConfig(format!("{} rejected by the GPU: {}", what, e)))
            }
        }
    }

    /// Create a presentation surface for a window on this device's instance
    pub fn create_surface(
        &self,
        target: impl Into<wgpu::SurfaceTarget<'static>>,
    ) -> Result<wgpu::Surface<'static>> {
        self.instance
            .create_surface(target)
            .map_err(|e| Error::Gpu(format!("failed to create surface: {}", e)))
    }

    /// Read back a 2D texture as tightly packed rows
    pub fn read_texture(&self, texture: &wgpu::Texture) -> Result<Vec<u8>> {
        if !texture.usage().contains(wgpu::TextureUsages::COPY_SRC) {
            return Err(Error::InvalidConfig("texture cannot be copied from".into()));
        }
        let bpp = texture
            .format()
            .block_copy_size(None)
            .ok_or_else(|| Error::InvalidFormat(format!("{:?} cannot be copied", texture.format())))?
            as usize;
        let width = texture.width() as usize;
        let height = texture.height() as usize;
        let row = width * bpp;
        let padded = row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let commands = self.validate("texture readback", || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("readback"),
                });
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded as u32),
                        rows_per_image: Some(height as u32),
                    },
                },
                texture.size(),
            );
            encoder.finish()
        })?;
        self.queue.submit(std::iter::once(commands));

        let slice = staging.slice(..);
        let (sender, mut receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match receiver.try_recv() {
            Ok(Some(Ok(()))) => {}
            Ok(Some(Err(e))) => return Err(Error::Gpu(format!("failed to map readback buffer: {}", e))),
            _ => return Err(Error::Gpu("readback buffer was not mapped".into())),
        }

        let mut pixels = Vec::with_capacity(row * height);
        {
            let data = slice.get_mapped_range();
            for chunk in data.chunks(padded).take(height) {
                pixels.extend_from_slice(&chunk[..row]);
            }
        }
        staging.unmap();
        Ok(pixels)
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice").field("desc", &self.desc).finish()
    }
}

/// Packed pixel format carried by a texture format
pub fn packed_format(format: wgpu::TextureFormat) -> Result<PixelFormat> {
    match format {
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => Ok(PixelFormat::Bgra),
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => Ok(PixelFormat::Rgba),
        other => Err(Error::InvalidFormat(format!("{:?} is not a packed 8-bit texture", other))),
    }
}

/// Texture format used to hold a packed pixel format
pub fn texture_format(format: PixelFormat) -> Result<wgpu::TextureFormat> {
    match format {
        PixelFormat::Bgra => Ok(wgpu::TextureFormat::Bgra8Unorm),
        PixelFormat::Rgba => Ok(wgpu::TextureFormat::Rgba8Unorm),
        other => Err(Error::InvalidFormat(format!("{} has no texture format", other))),
    }
}
