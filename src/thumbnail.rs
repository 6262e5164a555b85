use image::{Rgba, RgbaImage};

use crate::models::{ChannelLayout, DecodedImage, Thumbnail};

/// Fixed exposure multiplier applied before the display gamma.
const PREVIEW_EXPOSURE: f32 = 1.0;
/// Display gamma mapping linear HDR values into the 8-bit range.
const PREVIEW_GAMMA: f32 = 2.2;
/// Letterbox fill, matching the UI's dark card background (#2b2b2b).
const BACKGROUND_GRAY: u8 = 0x2b;

/// Produce a display-ready preview from a decoded image.
///
/// Deterministic: the same input and target size always yield a bit-identical
/// bitmap. Non-finite and negative samples are clamped to black instead of
/// failing, so any decodable file gets a thumbnail.
///
/// The output is always `target_size` square. Larger sources are box-filtered
/// down to fit while keeping their aspect ratio; smaller sources are never
/// upsampled and sit centered on the neutral background.
pub fn generate(image: &DecodedImage, target_size: u32) -> Thumbnail {
    let target_size = target_size.max(1);
    let (fit_width, fit_height) = fitted_size(image.width, image.height, target_size);

    let mut canvas = RgbaImage::from_pixel(
        target_size,
        target_size,
        Rgba([BACKGROUND_GRAY, BACKGROUND_GRAY, BACKGROUND_GRAY, 255]),
    );

    if image.width == 0 || image.height == 0 || image.pixels.is_empty() {
        return finish(image, canvas);
    }

    let offset_x = (target_size - fit_width) / 2;
    let offset_y = (target_size - fit_height) / 2;

    if fit_width == image.width && fit_height == image.height {
        // Source already fits: copy pixels straight through the tone curve.
        for y in 0..fit_height {
            for x in 0..fit_width {
                let rgb = sample_rgb(image, x, y);
                canvas.put_pixel(offset_x + x, offset_y + y, tone_map(rgb));
            }
        }
    } else {
        for y in 0..fit_height {
            for x in 0..fit_width {
                let rgb = box_filter(image, x, y, fit_width, fit_height);
                canvas.put_pixel(offset_x + x, offset_y + y, tone_map(rgb));
            }
        }
    }

    finish(image, canvas)
}

fn finish(image: &DecodedImage, canvas: RgbaImage) -> Thumbnail {
    Thumbnail {
        pixels: canvas,
        source_width: image.width,
        source_height: image.height,
        channel_summary: image.channel_summary(),
    }
}

/// Scale-to-fit dimensions. Sources within the target keep their size.
fn fitted_size(width: u32, height: u32, target: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    if width <= target && height <= target {
        return (width, height);
    }
    let scale = (target as f64 / width as f64).min(target as f64 / height as f64);
    let fit_w = ((width as f64 * scale).round() as u32).clamp(1, target);
    let fit_h = ((height as f64 * scale).round() as u32).clamp(1, target);
    (fit_w, fit_h)
}

/// Read one source pixel as linear RGB, folding gray out to three channels
/// and dropping alpha. Invalid samples come back as 0.
fn sample_rgb(image: &DecodedImage, x: u32, y: u32) -> [f32; 3] {
    let stride = image.channels.count();
    let base = (y as usize * image.width as usize + x as usize) * stride;
    match image.channels {
        ChannelLayout::Gray => {
            let v = sanitize(image.pixels[base]);
            [v, v, v]
        }
        ChannelLayout::Rgb | ChannelLayout::Rgba => [
            sanitize(image.pixels[base]),
            sanitize(image.pixels[base + 1]),
            sanitize(image.pixels[base + 2]),
        ],
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Area-average the source region covered by destination pixel (x, y).
/// Partial rows and columns contribute by their covered fraction, which
/// keeps high-frequency sources from aliasing.
fn box_filter(image: &DecodedImage, x: u32, y: u32, fit_width: u32, fit_height: u32) -> [f32; 3] {
    let x_scale = image.width as f64 / fit_width as f64;
    let y_scale = image.height as f64 / fit_height as f64;

    let x0 = x as f64 * x_scale;
    let x1 = (x as f64 + 1.0) * x_scale;
    let y0 = y as f64 * y_scale;
    let y1 = (y as f64 + 1.0) * y_scale;

    let first_col = x0.floor() as u32;
    let last_col = (x1.ceil() as u32).min(image.width);
    let first_row = y0.floor() as u32;
    let last_row = (y1.ceil() as u32).min(image.height);

    let mut acc = [0.0f64; 3];
    let mut total_weight = 0.0f64;

    for row in first_row..last_row {
        let row_cover = coverage(row, y0, y1);
        for col in first_col..last_col {
            let weight = row_cover * coverage(col, x0, x1);
            if weight <= 0.0 {
                continue;
            }
            let rgb = sample_rgb(image, col, row);
            acc[0] += rgb[0] as f64 * weight;
            acc[1] += rgb[1] as f64 * weight;
            acc[2] += rgb[2] as f64 * weight;
            total_weight += weight;
        }
    }

    if total_weight <= 0.0 {
        return [0.0; 3];
    }
    [
        (acc[0] / total_weight) as f32,
        (acc[1] / total_weight) as f32,
        (acc[2] / total_weight) as f32,
    ]
}

/// Overlap of source cell [index, index + 1) with the interval [lo, hi).
fn coverage(index: u32, lo: f64, hi: f64) -> f64 {
    let cell_lo = index as f64;
    let cell_hi = cell_lo + 1.0;
    (hi.min(cell_hi) - lo.max(cell_lo)).max(0.0)
}

/// Fixed display transform: exposure, then gamma, then 8-bit quantization.
fn tone_map(rgb: [f32; 3]) -> Rgba<u8> {
    let mut out = [0u8; 3];
    for (slot, &value) in out.iter_mut().zip(rgb.iter()) {
        let exposed = value * PREVIEW_EXPOSURE;
        let curved = exposed.powf(1.0 / PREVIEW_GAMMA).clamp(0.0, 1.0);
        *slot = (curved * 255.0 + 0.5) as u8;
    }
    Rgba([out[0], out[1], out[2], 255])
}
