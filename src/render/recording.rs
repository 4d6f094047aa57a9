// src/render/recording.rs
// -----------------------
// In-memory GpuContext: keeps a CPU copy of the atlas, staging buffers and
// lookup textures and applies copies on submit, like the queue would.

use crate::cache::PixelFormat;
use crate::error::{CacheError, Result};
use crate::render::gpu::{AtlasCopy, GpuContext};
use crate::render::gpu_types::VolumeBlocksGpu;

#[derive(Clone, Debug)]
pub struct RecordedLut {
    pub size: [u32; 3],
    pub texels: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplingBinding {
    pub volumes: usize,
    pub atlas_extent: [u32; 3],
}

#[derive(Default)]
pub struct RecordingContext {
    format: Option<PixelFormat>,
    extent: [u32; 3],
    atlas: Vec<u8>,
    staging: Vec<Vec<u8>>,
    queued: Vec<AtlasCopy>,
    luts: Vec<Option<RecordedLut>>,
    uniforms: Vec<Option<VolumeBlocksGpu>>,

    submits: usize,
    copies: usize,
    atlas_creations: usize,
    binds: usize,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline] pub fn submits(&self) -> usize { self.submits }
    #[inline] pub fn copies(&self) -> usize { self.copies }
    #[inline] pub fn atlas_creations(&self) -> usize { self.atlas_creations }
    #[inline] pub fn binds(&self) -> usize { self.binds }
    #[inline] pub fn atlas_extent(&self) -> [u32; 3] { self.extent }

    pub fn lut(&self, volume: usize) -> Option<&RecordedLut> {
        self.luts.get(volume).and_then(Option::as_ref)
    }

    pub fn uniforms(&self, volume: usize) -> Option<&VolumeBlocksGpu> {
        self.uniforms.get(volume).and_then(Option::as_ref)
    }

    fn bpe(&self) -> usize {
        self.format.map(PixelFormat::bytes_per_element).unwrap_or(1)
    }

    /// Tightly packed bytes of an atlas region.
    pub fn atlas_bytes(&self, origin: [u32; 3], extent: [u32; 3]) -> Vec<u8> {
        let bpe = self.bpe();
        let [w, h, _] = self.extent.map(|e| e as usize);
        let row = extent[0] as usize * bpe;
        let mut out = Vec::with_capacity(row * extent[1] as usize * extent[2] as usize);
        for z in 0..extent[2] as usize {
            for y in 0..extent[1] as usize {
                let tz = origin[2] as usize + z;
                let ty = origin[1] as usize + y;
                let d = ((tz * h + ty) * w + origin[0] as usize) * bpe;
                out.extend_from_slice(&self.atlas[d..d + row]);
            }
        }
        out
    }

    fn apply(&mut self, copy: &AtlasCopy) {
        let bpe = self.bpe();
        let [w, h, _] = self.extent.map(|e| e as usize);
        let row = copy.extent[0] as usize * bpe;
        let Some(src) = self.staging.get(copy.buffer) else {
            log::error!("recording context: copy from missing staging buffer {}", copy.buffer);
            return;
        };
        for z in 0..copy.extent[2] as usize {
            for y in 0..copy.extent[1] as usize {
                let s = copy.offset as usize
                    + (z * copy.rows_per_image as usize + y) * copy.bytes_per_row as usize;
                let tz = copy.origin[2] as usize + z;
                let ty = copy.origin[1] as usize + y;
                let d = ((tz * h + ty) * w + copy.origin[0] as usize) * bpe;
                self.atlas[d..d + row].copy_from_slice(&src[s..s + row]);
            }
        }
    }
}

impl GpuContext for RecordingContext {
    type Binding = SamplingBinding;

    fn create_atlas(&mut self, format: PixelFormat, extent: [u32; 3]) -> Result<()> {
        let texels = extent.iter().map(|&e| e as usize).product::<usize>();
        self.format = Some(format);
        self.extent = extent;
        self.atlas = vec![0xee; texels * format.bytes_per_element()];
        self.atlas_creations += 1;
        Ok(())
    }

    fn create_staging(&mut self, count: usize, size_bytes: u64) -> Result<()> {
        self.staging = (0..count).map(|_| vec![0; size_bytes as usize]).collect();
        Ok(())
    }

    fn write_staging(&mut self, buffer: usize, offset: u64, bytes: &[u8]) {
        let offset = offset as usize;
        match self.staging.get_mut(buffer) {
            Some(buf) if offset + bytes.len() <= buf.len() => {
                buf[offset..offset + bytes.len()].copy_from_slice(bytes);
            }
            _ => log::error!("recording context: staging write out of range ({buffer}, {offset})"),
        }
    }

    fn copy_staging_to_atlas(&mut self, copy: &AtlasCopy) {
        self.queued.push(*copy);
    }

    fn submit(&mut self) {
        for copy in std::mem::take(&mut self.queued) {
            self.apply(&copy);
            self.copies += 1;
        }
        self.submits += 1;
    }

    fn write_lut(&mut self, volume: usize, size: [u32; 3], texels: &[u8]) -> Result<()> {
        let cells = size.iter().map(|&s| s as usize).product::<usize>();
        if texels.len() != cells * 4 {
            return Err(CacheError::Gpu(format!(
                "lookup texture {size:?} needs {} bytes, got {}",
                cells * 4,
                texels.len()
            )));
        }
        if self.luts.len() <= volume {
            self.luts.resize(volume + 1, None);
        }
        self.luts[volume] = Some(RecordedLut { size, texels: texels.to_vec() });
        Ok(())
    }

    fn write_volume_uniforms(&mut self, volume: usize, uniforms: &VolumeBlocksGpu) {
        if self.uniforms.len() <= volume {
            self.uniforms.resize(volume + 1, None);
        }
        self.uniforms[volume] = Some(*uniforms);
    }

    fn bind_for_sampling(&mut self, volumes: usize) -> Result<SamplingBinding> {
        if self.format.is_none() {
            return Err(CacheError::Gpu("atlas texture not created".into()));
        }
        if let Some(missing) = (0..volumes).find(|&v| self.lut(v).is_none()) {
            return Err(CacheError::Gpu(format!("volume {missing} has no lookup texture")));
        }
        self.binds += 1;
        Ok(SamplingBinding { volumes, atlas_extent: self.extent })
    }
}
