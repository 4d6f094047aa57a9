// src/render/wgpu_context.rs
// --------------------------
// GpuContext on a wgpu device/queue.
//
// Bind group contract (one group, built per volume count):
//   @binding(0)          atlas, texture_3d<f32> (R8Unorm / R16Unorm)
//   @binding(1)          linear clamp sampler
//   @binding(2 + 2*v)    lookup texture of volume v, texture_3d<u32> (RGBA8Uint)
//   @binding(3 + 2*v)    VolumeBlocksGpu uniform of volume v

use rustc_hash::FxHashMap as HashMap;

use crate::cache::PixelFormat;
use crate::error::{CacheError, Result};
use crate::render::gpu::{AtlasCopy, GpuContext};
use crate::render::gpu_types::VolumeBlocksGpu;

pub struct Tex3D {
    pub tex: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: [u32; 3],
}

fn make_tex3d(
    device: &wgpu::Device,
    label: &str,
    size: [u32; 3],
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> Tex3D {
    let size = size.map(|s| s.max(1));

    let tex = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size[0],
            height: size[1],
            depth_or_array_layers: size[2],
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format,
        usage,
        view_formats: &[],
    });

    let view = tex.create_view(&Default::default());
    Tex3D { tex, view, size }
}

/// Sampled 3D texture entry; `sample_type` must match the WGSL texture type.
fn bgl_tex3d(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    }
}

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_sampler(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

pub struct WgpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,

    sampler: wgpu::Sampler,
    atlas: Option<Tex3D>,
    staging: Vec<wgpu::Buffer>,
    encoder: Option<wgpu::CommandEncoder>,

    luts: Vec<Option<Tex3D>>,
    uniforms: Vec<wgpu::Buffer>,
    layouts: HashMap<usize, wgpu::BindGroupLayout>,
}

impl WgpuContext {
    /// Request a device able to hold atlases of `format`.
    pub async fn new(adapter: &wgpu::Adapter, format: PixelFormat) -> Result<Self> {
        let required_features = format.required_features();
        if !adapter.features().contains(required_features) {
            return Err(CacheError::UnsupportedPixelFormat(format!(
                "{format:?} needs {required_features:?}, adapter does not offer it"
            )));
        }

        let adapter_limits = adapter.limits();
        let required_limits = wgpu::Limits {
            max_texture_dimension_3d: adapter_limits.max_texture_dimension_3d,
            max_buffer_size: adapter_limits.max_buffer_size,
            ..wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("block_cache_device"),
                    required_features,
                    required_limits,
                },
                None,
            )
            .await
            .map_err(|e| CacheError::Gpu(format!("request_device: {e}")))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("atlas_linear_clamp"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            device,
            queue,
            sampler,
            atlas: None,
            staging: Vec::new(),
            encoder: None,
            luts: Vec::new(),
            uniforms: Vec::new(),
            layouts: HashMap::default(),
        })
    }

    /// Device without a surface, for offline streaming.
    pub async fn new_headless(format: PixelFormat) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| CacheError::Gpu("no compatible adapter".into()))?;
        log::info!("wgpu adapter: {:?}", adapter.get_info().name);
        Self::new(&adapter, format).await
    }

    pub fn atlas(&self) -> Option<&Tex3D> {
        self.atlas.as_ref()
    }

    /// Layout of the group returned by `bind_for_sampling(volumes)`.
    pub fn bind_group_layout(&mut self, volumes: usize) -> &wgpu::BindGroupLayout {
        let device = &self.device;
        self.layouts.entry(volumes).or_insert_with(|| {
            let mut entries = vec![
                bgl_tex3d(0, wgpu::TextureSampleType::Float { filterable: true }),
                bgl_sampler(1),
            ];
            for v in 0..volumes as u32 {
                entries.push(bgl_tex3d(2 + 2 * v, wgpu::TextureSampleType::Uint));
                entries.push(bgl_uniform(3 + 2 * v));
            }
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("block_cache_bgl"),
                entries: &entries,
            })
        })
    }
}

impl GpuContext for WgpuContext {
    type Binding = wgpu::BindGroup;

    fn create_atlas(&mut self, format: PixelFormat, extent: [u32; 3]) -> Result<()> {
        let max = self.device.limits().max_texture_dimension_3d;
        if extent.iter().any(|&e| e > max) {
            return Err(CacheError::Gpu(format!("atlas extent {extent:?} exceeds device limit {max}")));
        }
        self.atlas = Some(make_tex3d(
            &self.device,
            "block_atlas",
            extent,
            format.texture_format(),
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        ));
        Ok(())
    }

    fn create_staging(&mut self, count: usize, size_bytes: u64) -> Result<()> {
        let max = self.device.limits().max_buffer_size;
        if size_bytes > max {
            return Err(CacheError::Gpu(format!("staging buffer of {size_bytes} bytes exceeds device limit {max}")));
        }
        self.staging = (0..count)
            .map(|i| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("atlas_staging_{i}")),
                    size: size_bytes,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            })
            .collect();
        Ok(())
    }

    fn write_staging(&mut self, buffer: usize, offset: u64, bytes: &[u8]) {
        if let Some(buf) = self.staging.get(buffer) {
            self.queue.write_buffer(buf, offset, bytes);
        }
    }

    fn copy_staging_to_atlas(&mut self, copy: &AtlasCopy) {
        if self.atlas.is_none() || copy.buffer >= self.staging.len() {
            log::error!("atlas copy recorded before atlas/staging creation");
            return;
        }
        // Detach the encoder so the atlas and staging borrows stay disjoint.
        let mut encoder = match self.encoder.take() {
            Some(e) => e,
            None => self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("atlas_upload_encoder"),
            }),
        };
        if let Some(atlas) = self.atlas.as_ref() {
            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer: &self.staging[copy.buffer],
                    layout: wgpu::ImageDataLayout {
                        offset: copy.offset,
                        bytes_per_row: Some(copy.bytes_per_row),
                        rows_per_image: Some(copy.rows_per_image),
                    },
                },
                wgpu::ImageCopyTexture {
                    texture: &atlas.tex,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: copy.origin[0], y: copy.origin[1], z: copy.origin[2] },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: copy.extent[0],
                    height: copy.extent[1],
                    depth_or_array_layers: copy.extent[2],
                },
            );
        }
        self.encoder = Some(encoder);
    }

    fn submit(&mut self) {
        let encoder = self.encoder.take().unwrap_or_else(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("atlas_flush") })
        });
        self.queue.submit(Some(encoder.finish()));
    }

    fn write_lut(&mut self, volume: usize, size: [u32; 3], texels: &[u8]) -> Result<()> {
        let cells = size.iter().map(|&s| s as usize).product::<usize>();
        if texels.len() != cells * 4 {
            return Err(CacheError::Gpu(format!("lookup texture {size:?} got {} bytes", texels.len())));
        }
        if self.luts.len() <= volume {
            self.luts.resize_with(volume + 1, || None);
        }
        let stale = self.luts[volume].as_ref().map(|t| t.size != size).unwrap_or(true);
        if stale {
            self.luts[volume] = Some(make_tex3d(
                &self.device,
                &format!("block_lut_{volume}"),
                size,
                wgpu::TextureFormat::Rgba8Uint,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ));
        }
        let Some(lut) = self.luts[volume].as_ref() else {
            return Err(CacheError::Gpu(format!("lookup texture {volume} missing")));
        };

        // write_texture has no row alignment requirement
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &lut.tex,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            texels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size[0] * 4),
                rows_per_image: Some(size[1]),
            },
            wgpu::Extent3d { width: size[0], height: size[1], depth_or_array_layers: size[2] },
        );
        Ok(())
    }

    fn write_volume_uniforms(&mut self, volume: usize, uniforms: &VolumeBlocksGpu) {
        while self.uniforms.len() <= volume {
            let i = self.uniforms.len();
            self.uniforms.push(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("volume_blocks_{i}")),
                size: std::mem::size_of::<VolumeBlocksGpu>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        self.queue.write_buffer(&self.uniforms[volume], 0, bytemuck::bytes_of(uniforms));
    }

    fn bind_for_sampling(&mut self, volumes: usize) -> Result<wgpu::BindGroup> {
        // make sure pending uploads land before the draw that samples them
        if self.encoder.is_some() {
            self.submit();
        }
        self.bind_group_layout(volumes);

        let atlas = self.atlas.as_ref().ok_or_else(|| CacheError::Gpu("atlas texture not created".into()))?;
        let mut entries = vec![
            wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&atlas.view) },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
        ];
        for v in 0..volumes {
            let lut = self
                .luts
                .get(v)
                .and_then(Option::as_ref)
                .ok_or_else(|| CacheError::Gpu(format!("volume {v} has no lookup texture")))?;
            let uniforms = self
                .uniforms
                .get(v)
                .ok_or_else(|| CacheError::Gpu(format!("volume {v} has no uniforms")))?;
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + 2 * v as u32,
                resource: wgpu::BindingResource::TextureView(&lut.view),
            });
            entries.push(wgpu::BindGroupEntry { binding: 3 + 2 * v as u32, resource: uniforms.as_entire_binding() });
        }

        let layout = self
            .layouts
            .get(&volumes)
            .ok_or_else(|| CacheError::Gpu("bind group layout missing".into()))?;
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("block_cache_bg"),
            layout,
            entries: &entries,
        }))
    }
}
