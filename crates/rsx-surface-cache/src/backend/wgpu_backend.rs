use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use super::{BackendKind, HostBackend, ResourceId};
use crate::error::BackendError;
use crate::format::{ClearValue, ColorFormat, DepthFormat, SurfaceFormat};

#[derive(Debug)]
struct WgpuSurface {
    texture: wgpu::Texture,
    format: SurfaceFormat,
    width: u32,
    height: u32,
}

/// Host surfaces kept as textures in a `wgpu::Device`.
///
/// Guest formats are only accepted when a wgpu format with the same texel layout exists, so a
/// read-back yields exactly the bytes the guest expects. Packed 5-bit colour and 24-bit depth
/// with stencil have no copyable equivalent and are reported as unsupported.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surfaces: HashMap<ResourceId, WgpuSurface>,
    next_id: u64,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            surfaces: HashMap::new(),
            next_id: 0,
        }
    }

    /// Creates a backend on the first available adapter, without a presentation surface.
    pub async fn new_headless() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(BackendError::AdapterNotFound)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("rsx surface cache"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|err| BackendError::Other(err.to_string()))?;

        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn texture(&self, id: ResourceId) -> Option<&wgpu::Texture> {
        self.surfaces.get(&id).map(|s| &s.texture)
    }

    fn surface(&self, id: ResourceId) -> Result<&WgpuSurface, BackendError> {
        self.surfaces
            .get(&id)
            .ok_or(BackendError::UnknownResource(id))
    }

    fn clear_color_texture(&self, surface: &WgpuSurface, color: wgpu::Color) {
        let view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rsx surface clear"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("rsx surface clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit([encoder.finish()]);
    }

    fn write_texels(&self, surface: &WgpuSurface, texels: &[u8]) {
        let bytes_per_row = surface.width * surface.format.texel_size();
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: texture_aspect(surface.format),
            },
            texels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(surface.height),
            },
            wgpu::Extent3d {
                width: surface.width,
                height: surface.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn map_staging_blocking(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>, BackendError> {
        let slice = buffer.slice(..);
        let state = Arc::new((
            Mutex::new(None::<Result<(), wgpu::BufferAsyncError>>),
            Condvar::new(),
        ));
        let state_clone = Arc::clone(&state);
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let (lock, cv) = &*state_clone;
            *lock.lock().unwrap_or_else(PoisonError::into_inner) = Some(res);
            cv.notify_one();
        });

        self.device.poll(wgpu::Maintain::Wait);

        let (lock, cv) = &*state;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let map_res = loop {
            if let Some(res) = guard.take() {
                break res;
            }
            guard = cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
        };
        map_res.map_err(|err| BackendError::Other(format!("read-back map_async failed: {err:?}")))?;

        let mapped = slice.get_mapped_range();
        let out = mapped.to_vec();
        drop(mapped);
        buffer.unmap();
        Ok(out)
    }
}

impl HostBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wgpu
    }

    fn supports_format(&self, format: SurfaceFormat) -> bool {
        texture_format(format).is_some()
    }

    fn create_surface(
        &mut self,
        format: SurfaceFormat,
        width: u32,
        height: u32,
    ) -> Result<ResourceId, BackendError> {
        let wgpu_format = texture_format(format).ok_or_else(|| {
            BackendError::Validation(format!("unsupported surface format {format}"))
        })?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("rsx surface"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation {
            return Err(BackendError::Validation(err.to_string()));
        }
        if oom.is_some() {
            return Err(BackendError::OutOfMemory);
        }

        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.surfaces.insert(
            id,
            WgpuSurface {
                texture,
                format,
                width,
                height,
            },
        );
        Ok(id)
    }

    fn destroy_surface(&mut self, id: ResourceId) {
        if let Some(surface) = self.surfaces.remove(&id) {
            surface.texture.destroy();
        }
    }

    fn clear_surface(&mut self, id: ResourceId, value: ClearValue) -> Result<(), BackendError> {
        let surface = self.surface(id)?;
        match (surface.format, value) {
            (SurfaceFormat::Color(format), ClearValue::Color(argb)) => {
                self.clear_color_texture(surface, clear_color(format, argb));
            }
            (SurfaceFormat::Depth(_), ClearValue::DepthStencil(_)) => {
                // Depth clear values are quantised by the driver; write the exact texels instead.
                let texel = surface.format.encode_clear(value).unwrap_or_default();
                let len = surface
                    .format
                    .surface_len(surface.width, surface.height)
                    .ok_or(BackendError::OutOfMemory)?;
                let texels = texel.repeat(len / surface.format.texel_size() as usize);
                self.write_texels(surface, &texels);
            }
            _ => {
                return Err(BackendError::Validation(format!(
                    "clear value {value:?} does not apply to {} surface",
                    surface.format
                )))
            }
        }
        Ok(())
    }

    fn upload_surface(&mut self, id: ResourceId, texels: &[u8]) -> Result<(), BackendError> {
        let surface = self.surface(id)?;
        let expected = surface
            .format
            .surface_len(surface.width, surface.height)
            .ok_or(BackendError::OutOfMemory)?;
        if texels.len() != expected {
            return Err(BackendError::SizeMismatch {
                expected,
                actual: texels.len(),
            });
        }
        self.write_texels(surface, texels);
        Ok(())
    }

    fn read_back(&mut self, id: ResourceId) -> Result<Vec<u8>, BackendError> {
        let surface = self.surface(id)?;
        let unpadded_bytes_per_row = surface.width * surface.format.texel_size();
        let padded_bytes_per_row = unpadded_bytes_per_row
            .div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rsx surface read-back"),
            size: u64::from(padded_bytes_per_row) * u64::from(surface.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rsx surface read-back"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: texture_aspect(surface.format),
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(surface.height),
                },
            },
            wgpu::Extent3d {
                width: surface.width,
                height: surface.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit([encoder.finish()]);

        let padded = self.map_staging_blocking(&staging)?;
        let mut out = Vec::with_capacity(unpadded_bytes_per_row as usize * surface.height as usize);
        for row in padded.chunks_exact(padded_bytes_per_row as usize) {
            out.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
        Ok(out)
    }
}

/// wgpu format with the same texel layout as `format`, if one exists.
pub(crate) fn texture_format(format: SurfaceFormat) -> Option<wgpu::TextureFormat> {
    Some(match format {
        SurfaceFormat::Color(fmt) => match fmt {
            ColorFormat::A8R8G8B8 | ColorFormat::X8R8G8B8Z | ColorFormat::X8R8G8B8O => {
                wgpu::TextureFormat::Bgra8Unorm
            }
            ColorFormat::A8B8G8R8 | ColorFormat::X8B8G8R8Z | ColorFormat::X8B8G8R8O => {
                wgpu::TextureFormat::Rgba8Unorm
            }
            ColorFormat::B8 => wgpu::TextureFormat::R8Unorm,
            ColorFormat::G8B8 => wgpu::TextureFormat::Rg8Unorm,
            ColorFormat::W16Z16Y16X16 => wgpu::TextureFormat::Rgba16Float,
            ColorFormat::W32Z32Y32X32 => wgpu::TextureFormat::Rgba32Float,
            ColorFormat::X32 => wgpu::TextureFormat::R32Float,
            ColorFormat::X1R5G5B5Z | ColorFormat::X1R5G5B5O | ColorFormat::R5G6B5 => return None,
        },
        SurfaceFormat::Depth(DepthFormat::Z16) => wgpu::TextureFormat::Depth16Unorm,
        SurfaceFormat::Depth(DepthFormat::Z24S8) => return None,
    })
}

fn texture_aspect(format: SurfaceFormat) -> wgpu::TextureAspect {
    if format.is_depth() {
        wgpu::TextureAspect::DepthOnly
    } else {
        wgpu::TextureAspect::All
    }
}

/// Render-pass clear colour that stores the same texel bytes as [`ColorFormat::encode_argb`].
fn clear_color(format: ColorFormat, argb: u32) -> wgpu::Color {
    let [b, g, r, a] = argb.to_le_bytes();
    let n = |c: u8| f64::from(c) / 255.0;
    match format {
        // Single/dual channel formats store the guest's low bytes in R (and G).
        ColorFormat::B8 => wgpu::Color {
            r: n(b),
            g: 0.0,
            b: 0.0,
            a: 1.0,
        },
        ColorFormat::G8B8 => wgpu::Color {
            r: n(b),
            g: n(g),
            b: 0.0,
            a: 1.0,
        },
        ColorFormat::X32 => wgpu::Color {
            r: n(r),
            g: 0.0,
            b: 0.0,
            a: 1.0,
        },
        ColorFormat::X8R8G8B8Z | ColorFormat::X8B8G8R8Z => wgpu::Color {
            r: n(r),
            g: n(g),
            b: n(b),
            a: 0.0,
        },
        ColorFormat::X8R8G8B8O | ColorFormat::X8B8G8R8O => wgpu::Color {
            r: n(r),
            g: n(g),
            b: n(b),
            a: 1.0,
        },
        _ => wgpu::Color {
            r: n(r),
            g: n(g),
            b: n(b),
            a: n(a),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_layout_preserving_formats_are_mapped() {
        let unsupported: Vec<ColorFormat> = ColorFormat::ALL
            .into_iter()
            .filter(|&fmt| texture_format(fmt.into()).is_none())
            .collect();
        assert_eq!(
            unsupported,
            vec![
                ColorFormat::X1R5G5B5Z,
                ColorFormat::X1R5G5B5O,
                ColorFormat::R5G6B5
            ]
        );
        assert_eq!(
            texture_format(ColorFormat::A8R8G8B8.into()),
            Some(wgpu::TextureFormat::Bgra8Unorm)
        );
        assert_eq!(
            texture_format(DepthFormat::Z16.into()),
            Some(wgpu::TextureFormat::Depth16Unorm)
        );
        assert_eq!(texture_format(DepthFormat::Z24S8.into()), None);
    }

    #[test]
    fn b8_clear_lands_in_the_red_channel() {
        let color = clear_color(ColorFormat::B8, 0x0000_00FF);
        assert_eq!(color.r, 1.0);
        assert_eq!(color.g, 0.0);
    }
}
