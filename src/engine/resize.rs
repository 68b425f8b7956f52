//! Sub-bitmap resampling
//!
//! Copies a rectangle out of a strided single-channel bitmap, resamples it
//! with `image` and writes the result back at another position.

use image::imageops::{self, FilterType};
use image::GrayImage;

/// Geometry shared by every pair of one batched resize
#[derive(Debug, Clone, Copy)]
pub struct ResizeShape {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    pub stride: usize,
}

/// Resample the sub-bitmap at `src` into the sub-bitmap at `dst`
///
/// Both offsets index `pixels`; regions must lie within it (checked by the
/// caller).
pub(crate) fn resize_subbitmap(pixels: &mut [u8], src: usize, dst: usize, shape: &ResizeShape) -> bool {
    let sw = shape.src_width as usize;
    let mut raw = Vec::with_capacity(sw * shape.src_height as usize);
    for row in 0..shape.src_height as usize {
        let start = src + row * shape.stride;
        raw.extend_from_slice(&pixels[start..start + sw]);
    }

    let Some(source) = GrayImage::from_raw(shape.src_width, shape.src_height, raw) else {
        return false;
    };

    // Bicubic
    let resized = imageops::resize(&source, shape.dst_width, shape.dst_height, FilterType::CatmullRom);

    let dw = shape.dst_width as usize;
    let data = resized.into_raw();
    for (row, chunk) in data.chunks_exact(dw).enumerate() {
        let start = dst + row * shape.stride;
        pixels[start..start + dw].copy_from_slice(chunk);
    }
    true
}
