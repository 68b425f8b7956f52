//! Separable 2D convolution
//!
//! In-place Gaussian blur of a single-channel sub-bitmap. The X pass writes
//! into scratch with axes swapped so the Y pass reads scratch contiguously.
//! The image is assumed blank within `radius` pixels of its border, which
//! holds for halo rectangles (their content sits inside the blur padding).

use std::f32::consts::PI;

/// Zero-mean bell curve at `x`
///
/// `variance` is the width parameter `v` of `exp(-x²/2v²) / sqrt(2πv²)`.
pub fn gaussian(variance: f32, x: f32) -> f32 {
    let v2 = variance * variance;
    (-(x * x) / (2.0 * v2)).exp() / (2.0 * PI * v2).sqrt()
}

/// Build a symmetric kernel of `2 * radius + 1` taps
///
/// Tap `j` samples the Gaussian at `((j - radius) / radius) * 3`, so the
/// kernel always spans three units either side of its center.
pub fn gaussian_kernel(radius: u32, variance: f32, pre_multiplier: f32) -> Vec<f32> {
    let n0 = radius as usize;
    let n1 = 2 * n0 + 1;
    let mut kernel = vec![0.0f32; n1];
    if radius == 0 {
        kernel[0] = gaussian(variance, 0.0) * pre_multiplier;
        return kernel;
    }
    for i in 0..=n0 {
        let x = ((i as f32 - radius as f32) / radius as f32) * 3.0;
        let y = gaussian(variance, x) * pre_multiplier;
        kernel[i] = y;
        kernel[n1 - i - 1] = y;
    }
    kernel
}

#[inline]
fn u8_to_f32(x: u8) -> f32 {
    x as f32 * (1.0 / 255.0)
}

#[inline]
fn f32_to_u8(x: f32) -> u8 {
    (x * 256.0).floor().clamp(0.0, 255.0) as u8
}

#[inline]
fn read_f32(buf: &[u8], index: usize) -> f32 {
    let b = &buf[index * 4..index * 4 + 4];
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
fn write_f32(buf: &mut [u8], index: usize, value: f32) {
    buf[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

/// Convolve `image` in place
///
/// `image` starts at the sub-bitmap origin and spans at least
/// `stride * (height - 1) + width` bytes. `scratch` holds
/// `width * (height - 2 * radius)` little-endian f32 values.
/// Caller guarantees `height > 2 * radius`.
pub(crate) fn convolve(
    image: &mut [u8],
    width: usize,
    height: usize,
    stride: usize,
    kernel: &[f32],
    scratch: &mut [u8],
) {
    let r = kernel.len() / 2;
    let r2 = 2 * r;
    let taps = r2 + 1;
    let dy = height - r2;

    // X pass over rows that may hold content; transposed into scratch
    for yi in 0..dy {
        let row = (r + yi) * stride;
        for x in 0..width {
            let k0 = r.saturating_sub(x);
            let p0 = x.saturating_sub(r);
            let n = (taps - k0).min(width - p0);
            let mut sum = 0.0f32;
            for i in 0..n {
                sum += u8_to_f32(image[row + p0 + i]) * kernel[k0 + i];
            }
            write_f32(scratch, x * dy + yi, sum);
        }
    }

    // Y pass, reading scratch column-major
    for x in 0..width {
        let base = x * dy;
        for y in 0..height {
            let k0 = r2.saturating_sub(y);
            let s0 = y.saturating_sub(r2);
            let n = (taps - k0).min(dy - s0);
            let mut sum = 0.0f32;
            for i in 0..n {
                sum += read_f32(scratch, base + s0 + i) * kernel[k0 + i];
            }
            image[y * stride + x] = f32_to_u8(sum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_symmetric() {
        let k = gaussian_kernel(3, 1.0, 2.0);
        assert_eq!(k.len(), 7);
        for i in 0..3 {
            assert_eq!(k[i], k[6 - i]);
        }
        assert!(k[3] > k[2] && k[2] > k[1] && k[1] > k[0]);
        assert!((k[3] - gaussian(1.0, 0.0) * 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_kernel_edges_at_three_units() {
        let k = gaussian_kernel(2, 1.5, 1.0);
        assert!((k[0] - gaussian(1.5, -3.0)).abs() < 1e-7);
        assert!((k[1] - gaussian(1.5, -1.5)).abs() < 1e-7);
    }

    #[test]
    fn test_convolve_point_spread() {
        let (w, h) = (9usize, 9usize);
        let mut image = vec![0u8; w * h];
        image[4 * w + 4] = 255;
        let kernel = gaussian_kernel(2, 1.0, 3.0);
        let mut scratch = vec![0u8; w * (h - 4) * 4];
        convolve(&mut image, w, h, w, &kernel, &mut scratch);

        let px = |x: usize, y: usize| image[y * w + x];
        assert!(px(4, 4) > 0);
        assert!(px(4, 4) >= px(3, 4));
        assert_eq!(px(3, 4), px(5, 4));
        assert_eq!(px(4, 3), px(4, 5));
        assert!(px(4, 2) > 0);
        // Beyond the kernel radius nothing spreads
        assert_eq!(px(0, 0), 0);
        assert_eq!(px(8, 4), 0);
        assert_eq!(px(4, 1), 0);
    }

    #[test]
    fn test_convolve_respects_stride() {
        let (w, h, stride) = (5usize, 5usize, 8usize);
        let mut image = vec![7u8; stride * h];
        for y in 0..h {
            for x in 0..w {
                image[y * stride + x] = 0;
            }
        }
        image[2 * stride + 2] = 200;
        let kernel = gaussian_kernel(1, 1.0, 1.0);
        let mut scratch = vec![0u8; w * (h - 2) * 4];
        convolve(&mut image, w, h, stride, &kernel, &mut scratch);
        // Bytes right of the sub-bitmap are untouched
        for y in 0..h {
            for x in w..stride {
                assert_eq!(image[y * stride + x], 7);
            }
        }
    }
}
