//! Bitmap engine
//!
//! Low-level pixel work for atlas builds:
//! - A growable linear arena with reset and one-level checkpoint/restore
//! - Batched resize of equally-sized sub-bitmaps
//! - Separable Gaussian blur applied in place
//!
//! Every allocation is a byte offset into the arena. Offsets stay valid
//! across growth; borrowed views do not outlive the `&mut self` that made
//! them, so nothing can hold on to memory that growth has moved.

pub mod blur;
pub mod resize;

use log::{debug, trace};
use std::ops::Range;

use crate::constants::{ARENA_PAGE_SIZE, MAX_ALIGNMENT_LOG2};
use crate::error::{AtlasError, Result};

pub use blur::{gaussian, gaussian_kernel};
pub use resize::ResizeShape;

/// Blur state configured by `blur_kernel_setup`
#[derive(Debug, Clone, Copy)]
struct BlurSetup {
    radius: u32,
    kernel: usize,
    scratch: usize,
    max_width: u32,
    max_height: u32,
}

/// Arena-backed bitmap processing engine
pub struct BitmapEngine {
    memory: Vec<u8>,
    allocated: usize,
    saved: Option<usize>,
    blur: Option<BlurSetup>,
}

fn engine_error(msg: impl Into<String>) -> AtlasError {
    AtlasError::BitmapEngine(msg.into())
}

/// Borrow two non-overlapping ranges of one buffer mutably
fn split_regions(
    memory: &mut [u8],
    a: Range<usize>,
    b: Range<usize>,
) -> Option<(&mut [u8], &mut [u8])> {
    if a.end <= b.start {
        let (lo, hi) = memory.split_at_mut(b.start);
        let b_len = b.len();
        Some((&mut lo[a], &mut hi[..b_len]))
    } else if b.end <= a.start {
        let (lo, hi) = memory.split_at_mut(a.start);
        let a_len = a.len();
        Some((&mut hi[..a_len], &mut lo[b]))
    } else {
        None
    }
}

/// Bytes spanned by a strided sub-bitmap
fn subbitmap_len(width: u32, height: u32, stride: usize) -> usize {
    if width == 0 || height == 0 {
        0
    } else {
        stride * (height as usize - 1) + width as usize
    }
}

impl BitmapEngine {
    /// Create an engine with at least `initial_bytes` of arena
    pub fn new(initial_bytes: usize) -> Self {
        let pages = initial_bytes.div_ceil(ARENA_PAGE_SIZE).max(1);
        Self {
            memory: vec![0; pages * ARENA_PAGE_SIZE],
            allocated: 0,
            saved: None,
            blur: None,
        }
    }

    /// Current arena capacity in bytes
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Bytes currently allocated
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Drop every allocation, checkpoint and blur setup
    pub fn reset_arena(&mut self) {
        self.allocated = 0;
        self.saved = None;
        self.blur = None;
    }

    /// Remember the allocation mark (one level, no nesting)
    pub fn arena_checkpoint(&mut self) -> Result<()> {
        if self.saved.is_some() {
            return Err(engine_error("arena checkpoint already taken"));
        }
        self.saved = Some(self.allocated);
        Ok(())
    }

    /// Release everything allocated since the checkpoint
    pub fn arena_restore(&mut self) -> Result<()> {
        let mark = self
            .saved
            .take()
            .ok_or_else(|| engine_error("arena restore without checkpoint"))?;
        self.allocated = mark;
        if self.blur.map_or(false, |b| b.kernel >= mark) {
            self.blur = None;
        }
        Ok(())
    }

    /// Allocate `n_bytes` aligned to `1 << align_log2`, growing by whole pages
    fn alloc(&mut self, align_log2: u32, n_bytes: usize) -> Result<usize> {
        debug_assert!(align_log2 <= MAX_ALIGNMENT_LOG2);
        let align = 1usize << align_log2;
        let base = (self.allocated + align - 1) & !(align - 1);
        let end = base
            .checked_add(n_bytes)
            .ok_or_else(|| engine_error(format!("allocation of {} bytes overflows", n_bytes)))?;

        if end > self.memory.len() {
            let before = self.memory.len();
            let after = end.div_ceil(ARENA_PAGE_SIZE) * ARENA_PAGE_SIZE;
            self.memory.resize(after, 0);
            debug!(
                "arena grow :: {}x64kB :: {}B -> {}B",
                (after - before) / ARENA_PAGE_SIZE,
                before,
                after
            );
        }

        self.allocated = end;
        Ok(base)
    }

    fn region(&self, ptr: usize, len: usize) -> Result<Range<usize>> {
        let end = ptr
            .checked_add(len)
            .filter(|&end| end <= self.allocated)
            .ok_or_else(|| {
                engine_error(format!(
                    "region {}..+{} outside allocated arena ({}B)",
                    ptr, len, self.allocated
                ))
            })?;
        Ok(ptr..end)
    }

    /// Allocate a zeroed single-channel bitmap
    pub fn allocate_bitmap(&mut self, width: u32, height: u32) -> Result<usize> {
        let n = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| engine_error(format!("bitmap {}x{} too large", width, height)))?;
        let ptr = self.alloc(0, n)?;
        self.memory[ptr..ptr + n].fill(0);
        debug!("bitmap {}x{} allocated at {}", width, height, ptr);
        Ok(ptr)
    }

    /// Allocate `count` 32-bit slots (offset pairs for batched resize)
    pub fn allocate_scratch(&mut self, count: usize) -> Result<usize> {
        let n = count
            .checked_mul(4)
            .ok_or_else(|| engine_error(format!("scratch of {} slots too large", count)))?;
        self.alloc(2, n)
    }

    /// Store 32-bit values at `ptr`
    pub fn write_u32s(&mut self, ptr: usize, values: &[u32]) -> Result<()> {
        let range = self.region(ptr, values.len() * 4)?;
        for (chunk, v) in self.memory[range].chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    fn read_u32(&self, ptr: usize) -> Result<u32> {
        let range = self.region(ptr, 4)?;
        let b = &self.memory[range];
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Store f32 values at `ptr` (kernel taps)
    pub fn write_f32s(&mut self, ptr: usize, values: &[f32]) -> Result<()> {
        let range = self.region(ptr, values.len() * 4)?;
        for (chunk, v) in self.memory[range].chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    /// Load `count` f32 values from `ptr`
    pub fn read_f32s(&self, ptr: usize, count: usize) -> Result<Vec<f32>> {
        let range = self.region(ptr, count * 4)?;
        Ok(self.memory[range]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Read-only bytes at `ptr`
    pub fn bytes(&self, ptr: usize, len: usize) -> Result<&[u8]> {
        let range = self.region(ptr, len)?;
        Ok(&self.memory[range])
    }

    /// Mutable view of a `width` x `height` bitmap at `ptr`
    pub fn bitmap_view(&mut self, ptr: usize, width: u32, height: u32) -> Result<BitmapView<'_>> {
        let range = self.region(ptr, width as usize * height as usize)?;
        Ok(BitmapView {
            data: &mut self.memory[range],
            width,
            height,
        })
    }

    /// Resize `count` sub-bitmaps sharing one transform
    ///
    /// `io_pairs` holds `2 * count` offsets: source origin then destination
    /// origin of each pair. Pixels outside the source rectangle are not read.
    #[allow(clippy::too_many_arguments)]
    pub fn batch_resize(
        &mut self,
        count: usize,
        src_w: u32,
        src_h: u32,
        dst_w: u32,
        dst_h: u32,
        scale: f32,
        io_pairs: usize,
        stride: usize,
    ) -> Result<()> {
        if count == 0 {
            return Err(engine_error("batch_resize needs at least one pair"));
        }
        if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
            return Err(engine_error(format!(
                "batch_resize with empty shape {}x{} -> {}x{}",
                src_w, src_h, dst_w, dst_h
            )));
        }
        trace!(
            "batch_resize {} x ({}x{} -> {}x{}, scale {:.4})",
            count,
            src_w,
            src_h,
            dst_w,
            dst_h,
            scale
        );

        let shape = ResizeShape {
            src_width: src_w,
            src_height: src_h,
            dst_width: dst_w,
            dst_height: dst_h,
            stride,
        };
        let src_len = subbitmap_len(src_w, src_h, stride);
        let dst_len = subbitmap_len(dst_w, dst_h, stride);

        for i in 0..count {
            let src = self.read_u32(io_pairs + i * 8)? as usize;
            let dst = self.read_u32(io_pairs + i * 8 + 4)? as usize;
            self.region(src, src_len)?;
            self.region(dst, dst_len)?;
            if !resize::resize_subbitmap(&mut self.memory, src, dst, &shape) {
                return Err(engine_error(format!("resize of pair {} failed", i)));
            }
        }
        Ok(())
    }

    /// Configure the blur kernel and its scratch space
    ///
    /// Returns the offset of `2 * radius + 1` f32 taps the caller must fill,
    /// center at index `radius`.
    pub fn blur_kernel_setup(&mut self, radius: u32, max_width: u32, max_height: u32) -> Result<usize> {
        if radius < 1 {
            return Err(engine_error("blur kernel radius must be >= 1"));
        }
        let taps = 2 * radius as usize + 1;
        let kernel = self.alloc(2, taps * 4)?;
        self.memory[kernel..kernel + taps * 4].fill(0);
        let scratch_pixels = max_width as usize * max_height as usize;
        let scratch = self.alloc(2, scratch_pixels * 4)?;
        self.blur = Some(BlurSetup {
            radius,
            kernel,
            scratch,
            max_width,
            max_height,
        });
        Ok(kernel)
    }

    /// Blur the sub-bitmap at `offset` in place with the configured kernel
    pub fn blur_apply(&mut self, offset: usize, width: u32, height: u32, stride: usize) -> Result<()> {
        let setup = self
            .blur
            .ok_or_else(|| engine_error("blur_apply before blur_kernel_setup"))?;
        if width > setup.max_width || height > setup.max_height {
            return Err(engine_error(format!(
                "blur region {}x{} exceeds setup {}x{}",
                width, height, setup.max_width, setup.max_height
            )));
        }
        if height <= 2 * setup.radius {
            return Err(engine_error(format!(
                "blur region height {} too small for radius {}",
                height, setup.radius
            )));
        }

        let taps = 2 * setup.radius as usize + 1;
        let kernel = self.read_f32s(setup.kernel, taps)?;
        let image = self.region(offset, subbitmap_len(width, height, stride))?;
        let scratch_len = width as usize * (height - 2 * setup.radius) as usize * 4;
        let scratch = self.region(setup.scratch, scratch_len)?;

        let (image, scratch) = split_regions(&mut self.memory, image, scratch)
            .ok_or_else(|| engine_error("blur image overlaps scratch space"))?;
        blur::convolve(
            image,
            width as usize,
            height as usize,
            stride,
            &kernel,
            scratch,
        );
        Ok(())
    }
}

/// Mutable single-channel bitmap view (stride == width)
pub struct BitmapView<'a> {
    data: &'a mut [u8],
    width: u32,
    height: u32,
}

impl<'a> BitmapView<'a> {
    /// Wrap a caller-owned buffer
    pub fn new(data: &'a mut [u8], width: u32, height: u32) -> Option<Self> {
        if data.len() < width as usize * height as usize {
            return None;
        }
        Some(Self { data, width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.data[(y * self.width + x) as usize]
    }

    /// Composite coverage over the existing pixel (source-over); clipped
    pub fn blend(&mut self, x: i32, y: i32, coverage: u8) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        let idx = (y as u32 * self.width + x as u32) as usize;
        let dst = self.data[idx] as u32;
        let src = coverage as u32;
        self.data[idx] = (src + dst - (src * dst + 127) / 255) as u8;
    }

    /// Overwrite a rectangle with a constant value; clipped
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, value: u8) {
        let x1 = (x + width).min(self.width);
        let y1 = (y + height).min(self.height);
        for row in y.min(y1)..y1 {
            let start = (row * self.width) as usize;
            self.data[start + x.min(x1) as usize..start + x1 as usize].fill(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_grows_by_pages() {
        let mut engine = BitmapEngine::new(1);
        assert_eq!(engine.capacity(), ARENA_PAGE_SIZE);
        let ptr = engine.allocate_bitmap(512, 256).unwrap();
        assert_eq!(ptr, 0);
        assert_eq!(engine.capacity(), 2 * ARENA_PAGE_SIZE);
        assert_eq!(engine.allocated(), 512 * 256);
    }

    #[test]
    fn test_bitmap_is_zeroed_after_reset() {
        let mut engine = BitmapEngine::new(0);
        let ptr = engine.allocate_bitmap(4, 4).unwrap();
        engine.bitmap_view(ptr, 4, 4).unwrap().fill_rect(0, 0, 4, 4, 9);
        engine.reset_arena();
        let ptr = engine.allocate_bitmap(4, 4).unwrap();
        assert!(engine.bytes(ptr, 16).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_checkpoint_restore() {
        let mut engine = BitmapEngine::new(0);
        engine.allocate_bitmap(10, 10).unwrap();
        engine.arena_checkpoint().unwrap();
        assert!(engine.arena_checkpoint().is_err());
        let kernel = engine.blur_kernel_setup(2, 16, 16).unwrap();
        assert!(kernel >= 100);
        engine.arena_restore().unwrap();
        assert_eq!(engine.allocated(), 100);
        assert!(engine.arena_restore().is_err());
        // Kernel lived above the mark, so blurring is no longer configured
        assert!(engine.blur_apply(0, 10, 10, 10).is_err());
    }

    #[test]
    fn test_scratch_alignment() {
        let mut engine = BitmapEngine::new(0);
        engine.allocate_bitmap(3, 1).unwrap();
        let ptr = engine.allocate_scratch(4).unwrap();
        assert_eq!(ptr % 4, 0);
        engine.write_u32s(ptr, &[1, 2, 3, 4]).unwrap();
        assert_eq!(engine.read_u32(ptr + 8).unwrap(), 3);
        assert!(engine.write_u32s(ptr, &[0; 5]).is_err());
    }

    #[test]
    fn test_batch_resize_pairs() {
        let mut engine = BitmapEngine::new(0);
        let stride = 32usize;
        let bitmap = engine.allocate_bitmap(32, 16).unwrap();
        {
            let mut view = engine.bitmap_view(bitmap, 32, 16).unwrap();
            view.fill_rect(0, 0, 4, 4, 255);
            view.fill_rect(4, 0, 4, 4, 255);
        }
        let io = engine.allocate_scratch(4).unwrap();
        let pairs = [
            bitmap as u32,
            (bitmap + 8 * stride + 16) as u32,
            (bitmap + 4) as u32,
            (bitmap + 8 * stride + 24) as u32,
        ];
        engine.write_u32s(io, &pairs).unwrap();
        engine.batch_resize(2, 4, 4, 2, 2, 0.5, io, stride).unwrap();

        let view = engine.bitmap_view(bitmap, 32, 16).unwrap();
        assert!(view.get(16, 8) > 200);
        assert!(view.get(25, 9) > 200);
        assert_eq!(view.get(18, 8), 0);
    }

    #[test]
    fn test_blur_apply_region_checks() {
        let mut engine = BitmapEngine::new(0);
        let bitmap = engine.allocate_bitmap(16, 16).unwrap();
        assert!(engine.blur_apply(bitmap, 8, 8, 16).is_err());
        let kernel = engine.blur_kernel_setup(2, 8, 8).unwrap();
        engine.write_f32s(kernel, &gaussian_kernel(2, 1.0, 1.0)).unwrap();
        assert!(engine.blur_apply(bitmap, 9, 8, 16).is_err());
        assert!(engine.blur_apply(bitmap, 8, 4, 16).is_err());

        engine.bitmap_view(bitmap, 16, 16).unwrap().fill_rect(3, 3, 2, 2, 255);
        engine.blur_apply(bitmap, 8, 8, 16).unwrap();
        let view = engine.bitmap_view(bitmap, 16, 16).unwrap();
        assert!(view.get(2, 3) > 0);
        assert_eq!(view.get(9, 3), 0);
    }

    #[test]
    fn test_blend_is_source_over() {
        let mut data = vec![0u8; 4];
        let mut view = BitmapView::new(&mut data, 2, 2).unwrap();
        view.blend(0, 0, 255);
        view.blend(1, 0, 128);
        view.blend(1, 0, 128);
        view.blend(-1, 0, 255);
        view.blend(0, 2, 255);
        assert_eq!(view.get(0, 0), 255);
        assert_eq!(view.get(1, 0), 192);
    }
}
