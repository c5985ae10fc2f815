//! wgpu backend implementation.
//!
//! Runs the denoise kernel as a compute shader over an rgba8unorm texture
//! pair and copies the result into a mappable staging buffer.

use std::sync::Arc;

use super::gpu_primitives::{GpuPrimitives, ParamsUniform, SurfaceHandle};
use super::tiling::{GpuLimits, workgroup_count};
use super::PowerPreference;
use crate::image::{BYTES_PER_PIXEL, Image};
use crate::readback::{COPY_BYTES_PER_ROW_ALIGNMENT, RawReadback, padded_bytes_per_row};
use crate::{GpuError, GpuResult};
use crate::shaders;
#[allow(unused_imports)]
use tracing::{debug, trace};

// =============================================================================
// WgpuSurface Handle
// =============================================================================

/// rgba8unorm texture handle.
pub struct WgpuSurface {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

impl SurfaceHandle for WgpuSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

async fn request_adapter(power: PowerPreference, force_fallback_adapter: bool) -> GpuResult<wgpu::Adapter> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: match power {
                PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
                PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            },
            compatible_surface: None,
            force_fallback_adapter,
        })
        .await
        .ok_or(GpuError::NoAdapter)
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d { width, height, depth_or_array_layers: 1 }
}

// =============================================================================
// WgpuPrimitives
// =============================================================================

/// wgpu GPU primitives implementation.
///
/// Pipeline and parameter buffer are created once and reused by every
/// run; textures and the staging buffer live for a single run.
pub struct WgpuPrimitives {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    params_buffer: wgpu::Buffer,
    limits: GpuLimits,
    adapter_info: wgpu::AdapterInfo,
}

impl WgpuPrimitives {
    /// Query the adapter [`new`](Self::new) would pick, without creating a
    /// device.
    pub fn probe(power: PowerPreference, force_fallback_adapter: bool) -> GpuResult<wgpu::AdapterInfo> {
        pollster::block_on(request_adapter(power, force_fallback_adapter)).map(|adapter| adapter.get_info())
    }

    /// Create new wgpu primitives.
    pub fn new(power: PowerPreference, force_fallback_adapter: bool) -> GpuResult<Self> {
        pollster::block_on(Self::new_async(power, force_fallback_adapter))
    }

    /// Create new wgpu primitives asynchronously.
    pub async fn new_async(power: PowerPreference, force_fallback_adapter: bool) -> GpuResult<Self> {
        let adapter = request_adapter(power, force_fallback_adapter).await?;

        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("wmprobe_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
            }, None)
            .await
            .map_err(|e| GpuError::DeviceCreation(e.to_string()))?;

        let adapter_info = adapter.get_info();
        debug!(name = %adapter_info.name, backend = ?adapter_info.backend, "wgpu device ready");

        let limits = GpuLimits {
            max_texture_dim: adapter_limits.max_texture_dimension_2d,
            row_alignment: COPY_BYTES_PER_ROW_ALIGNMENT,
        };

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("denoise_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::DENOISE.into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("denoise_pipeline"),
            layout: None, // Auto layout
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("params_uniform"),
            size: std::mem::size_of::<ParamsUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            pipeline,
            params_buffer,
            limits,
            adapter_info,
        })
    }

    /// Get device name
    pub fn device_name(&self) -> &str {
        &self.adapter_info.name
    }

    /// Run `f` inside validation and out-of-memory error scopes; any error
    /// the device reports while `f` runs fails the call.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> GpuResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(err) => Err(GpuError::OperationFailed(err.to_string())),
            None => Ok(out),
        }
    }

    fn create_texture(&self, width: u32, height: u32, usage: wgpu::TextureUsages, label: &str) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage,
            view_formats: &[],
        })
    }
}

impl GpuPrimitives for WgpuPrimitives {
    type Surface = WgpuSurface;

    fn upload(&self, image: &Image) -> GpuResult<Self::Surface> {
        let (width, height) = image.dimensions();
        let texture = self.scoped(|| {
            let texture = self.create_texture(
                width,
                height,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                "input_texture",
            );
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                image.data(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * BYTES_PER_PIXEL),
                    rows_per_image: Some(height),
                },
                extent(width, height),
            );
            texture
        })?;

        Ok(WgpuSurface { texture, width, height })
    }

    fn allocate(&self, width: u32, height: u32) -> GpuResult<Self::Surface> {
        let texture = self.scoped(|| {
            self.create_texture(
                width,
                height,
                wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
                "output_texture",
            )
        })?;

        Ok(WgpuSurface { texture, width, height })
    }

    fn exec_denoise(&self, src: &Self::Surface, dst: &mut Self::Surface, params: &ParamsUniform) -> GpuResult<()> {
        let (w, h) = src.dimensions();
        let workgroups = (workgroup_count(w), workgroup_count(h), 1);
        trace!(w, h, ?workgroups, "exec_denoise");

        self.scoped(|| {
            self.queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));

            let src_view = src.texture.create_view(&wgpu::TextureViewDescriptor::default());
            let dst_view = dst.texture.create_view(&wgpu::TextureViewDescriptor::default());

            let layout = self.pipeline.get_bind_group_layout(0);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("denoise_bind_group"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&src_view) },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&dst_view) },
                    wgpu::BindGroupEntry { binding: 2, resource: self.params_buffer.as_entire_binding() },
                ],
            });

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("denoise_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("denoise_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(workgroups.0, workgroups.1, workgroups.2);
            }

            self.queue.submit(std::iter::once(encoder.finish()));
            self.device.poll(wgpu::Maintain::Wait);
        })
    }

    fn read_back(&self, surface: &Self::Surface) -> GpuResult<RawReadback> {
        let (w, h) = surface.dimensions();
        let stride = padded_bytes_per_row(w, self.limits.row_alignment);
        let size = stride as u64 * h as u64;

        let staging = self.scoped(|| {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("staging_buffer"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &surface.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(stride),
                        rows_per_image: Some(h),
                    },
                },
                extent(w, h),
            );
            self.queue.submit(std::iter::once(encoder.finish()));
            staging
        })?;

        // Map and read
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| { let _ = tx.send(r); });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| GpuError::OperationFailed("Map channel closed".into()))?
            .map_err(|e| GpuError::OperationFailed(format!("Map failed: {e}")))?;

        let data = slice.get_mapped_range();
        let bytes = data.to_vec();
        drop(data);
        staging.unmap();

        RawReadback::new(bytes, w, h, stride)
    }

    fn limits(&self) -> &GpuLimits { &self.limits }
    fn name(&self) -> &'static str { "wgpu" }
}
