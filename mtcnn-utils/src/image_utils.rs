use anyhow::{Context, Result};
use image::{
    DynamicImage, Rgb32FImage,
    imageops::{self, FilterType},
};
use ndarray::{Array3, ArrayView2, ArrayView3, Axis, s};

/// Convert a decoded image into an `(height, width, 3)` array of RGB values in `[0, 255]`.
pub fn dynamic_to_hwc(image: &DynamicImage) -> Array3<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let data: Vec<f32> = rgb.as_raw().iter().map(|&v| v as f32).collect();
    // Length always matches because RgbImage stores exactly w * h * 3 bytes.
    Array3::from_shape_vec((height as usize, width as usize, 3), data)
        .unwrap_or_else(|_| Array3::zeros((height as usize, width as usize, 3)))
}

/// Replicate a single-channel image into three identical channels.
pub fn grayscale_to_rgb(gray: ArrayView2<'_, f32>) -> Array3<f32> {
    let (height, width) = gray.dim();
    let mut rgb = Array3::<f32>::zeros((height, width, 3));
    for mut channel in rgb.axis_iter_mut(Axis(2)) {
        channel.assign(&gray);
    }
    rgb
}

/// Full-scale pixel value. `f32` image buffers hold `[0, 1]`, so arrays are mapped through it.
const PIXEL_RANGE: f32 = 255.0;

/// Resize an `(height, width, 3)` array with a triangle (bilinear) filter.
///
/// Values are expected in `[0, 255]`; anything outside that range is clamped by the filter.
pub fn resize_bilinear(
    image: ArrayView3<'_, f32>,
    out_height: usize,
    out_width: usize,
) -> Result<Array3<f32>> {
    let (in_height, in_width, channels) = image.dim();
    anyhow::ensure!(
        in_height > 0 && in_width > 0,
        "cannot resize an empty image ({in_height}x{in_width})"
    );
    anyhow::ensure!(
        out_height > 0 && out_width > 0,
        "target dimensions must be non-zero"
    );
    anyhow::ensure!(channels == 3, "expected 3 channels, got {channels}");

    if in_height == out_height && in_width == out_width {
        return Ok(image.to_owned());
    }

    let scaled: Vec<f32> = image.iter().map(|&v| v / PIXEL_RANGE).collect();
    let buffer = Rgb32FImage::from_raw(to_u32(in_width)?, to_u32(in_height)?, scaled)
        .context("pixel buffer does not match image dimensions")?;
    let resized = imageops::resize(
        &buffer,
        to_u32(out_width)?,
        to_u32(out_height)?,
        FilterType::Triangle,
    );

    let data = resized
        .into_raw()
        .into_iter()
        .map(|v| v * PIXEL_RANGE)
        .collect();
    Ok(Array3::from_shape_vec((out_height, out_width, 3), data)?)
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("dimension {value} exceeds u32"))
}

/// Convert an HWC image into a CHW array, applying `(value - mean) * scale` per element.
pub fn hwc_to_chw_normalized(image: ArrayView3<'_, f32>, mean: f32, scale: f32) -> Array3<f32> {
    image
        .permuted_axes([2, 0, 1])
        .mapv(|v| (v - mean) * scale)
        .as_standard_layout()
        .into_owned()
}

/// Copy `image[y0..y1, x0..x1]` into a zero-filled `(y1 - y0, x1 - x0)` canvas.
///
/// The window may extend past the image on any side; only the overlap is copied.
pub fn padded_window(image: ArrayView3<'_, f32>, x0: i64, y0: i64, x1: i64, y1: i64) -> Array3<f32> {
    let (height, width, channels) = image.dim();
    let out_w = (x1 - x0).max(0) as usize;
    let out_h = (y1 - y0).max(0) as usize;
    let mut canvas = Array3::<f32>::zeros((out_h, out_w, channels));

    let src_x0 = x0.clamp(0, width as i64);
    let src_y0 = y0.clamp(0, height as i64);
    let src_x1 = x1.clamp(0, width as i64);
    let src_y1 = y1.clamp(0, height as i64);
    if src_x1 <= src_x0 || src_y1 <= src_y0 {
        return canvas;
    }

    let dst_x = (src_x0 - x0) as usize;
    let dst_y = (src_y0 - y0) as usize;
    let w = (src_x1 - src_x0) as usize;
    let h = (src_y1 - src_y0) as usize;
    canvas
        .slice_mut(s![dst_y..dst_y + h, dst_x..dst_x + w, ..])
        .assign(&image.slice(s![
            src_y0 as usize..src_y1 as usize,
            src_x0 as usize..src_x1 as usize,
            ..
        ]));
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use ndarray::array;

    #[test]
    fn dynamic_to_hwc_keeps_rgb_order() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([10, 20, 30]));
        img.put_pixel(1, 0, Rgb([200, 100, 0]));
        let array = dynamic_to_hwc(&DynamicImage::ImageRgb8(img));
        assert_eq!(array.dim(), (1, 2, 3));
        assert_eq!(array[(0, 0, 2)], 30.0);
        assert_eq!(array[(0, 1, 0)], 200.0);
    }

    #[test]
    fn grayscale_is_replicated_into_three_channels() {
        let gray = array![[1.0f32, 2.0], [3.0, 4.0]];
        let rgb = grayscale_to_rgb(gray.view());
        assert_eq!(rgb.dim(), (2, 2, 3));
        for c in 0..3 {
            assert_eq!(rgb[(1, 0, c)], 3.0);
        }
    }

    #[test]
    fn resize_constant_image_stays_constant() {
        let image = Array3::<f32>::from_elem((7, 5, 3), 42.0);
        let resized = resize_bilinear(image.view(), 16, 16).unwrap();
        assert_eq!(resized.dim(), (16, 16, 3));
        assert!(resized.iter().all(|&v| (v - 42.0).abs() < 1e-3));
    }

    #[test]
    fn resize_interpolates_between_columns() {
        let mut image = Array3::<f32>::zeros((1, 2, 3));
        image.slice_mut(s![0, 1, ..]).fill(100.0);
        let resized = resize_bilinear(image.view(), 1, 4).unwrap();
        let expected = [0.0, 25.0, 75.0, 100.0];
        for (x, want) in expected.iter().enumerate() {
            for c in 0..3 {
                assert!(
                    (resized[(0, x, c)] - want).abs() < 1e-3,
                    "column {x}: {}",
                    resized[(0, x, c)]
                );
            }
        }
    }

    #[test]
    fn resize_keeps_full_intensity_scale() {
        let mut image = Array3::<f32>::zeros((4, 4, 3));
        image.slice_mut(s![.., .., 0]).fill(255.0);
        let resized = resize_bilinear(image.view(), 9, 9).unwrap();
        assert!(resized.slice(s![.., .., 0]).iter().all(|&v| (v - 255.0).abs() < 1e-2));
        assert!(resized.slice(s![.., .., 1]).iter().all(|&v| v.abs() < 1e-2));
    }

    #[test]
    fn resize_same_size_is_a_copy() {
        let image = Array3::from_shape_fn((3, 4, 3), |(y, x, c)| (y * 12 + x * 3 + c) as f32);
        assert_eq!(resize_bilinear(image.view(), 3, 4).unwrap(), image);
    }

    #[test]
    fn resize_rejects_empty_input() {
        let image = Array3::<f32>::zeros((0, 4, 3));
        assert!(resize_bilinear(image.view(), 4, 4).is_err());
        let image = Array3::<f32>::zeros((4, 4, 3));
        assert!(resize_bilinear(image.view(), 0, 4).is_err());
        let image = Array3::<f32>::zeros((4, 4, 1));
        assert!(resize_bilinear(image.view(), 8, 8).is_err());
    }

    #[test]
    fn chw_conversion_normalizes_and_transposes() {
        let mut image = Array3::<f32>::zeros((1, 2, 3));
        image[(0, 1, 2)] = 255.0;
        let chw = hwc_to_chw_normalized(image.view(), 127.5, 0.0078125);
        assert_eq!(chw.shape(), &[3, 1, 2]);
        assert!((chw[(2, 0, 1)] - 0.99609375).abs() < 1e-6);
        assert!((chw[(0, 0, 0)] + 0.99609375).abs() < 1e-6);
        assert!(chw.is_standard_layout());
    }

    #[test]
    fn padded_window_zero_fills_outside() {
        let image = Array3::<f32>::from_elem((4, 4, 3), 9.0);
        let window = padded_window(image.view(), -2, -1, 2, 3);
        assert_eq!(window.dim(), (4, 4, 3));
        assert_eq!(window[(0, 0, 0)], 0.0);
        assert_eq!(window[(1, 2, 0)], 9.0);
        assert_eq!(window[(3, 3, 1)], 9.0);
        assert_eq!(window[(3, 1, 1)], 0.0);

        let outside = padded_window(image.view(), 10, 10, 12, 12);
        assert!(outside.iter().all(|&v| v == 0.0));
    }
}
