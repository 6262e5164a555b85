use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

use exr::meta::MetaData;
use exr::prelude::*;
use image::{DynamicImage, ImageDecoder};

use crate::error::{Error, Result};
use crate::models::{ChannelLayout, DecodedImage};

/// Longest edge a header may declare before the file is treated as corrupt.
pub const MAX_IMAGE_DIMENSION: u32 = 16_384;

const EXR_MAGIC: [u8; 4] = [0x76, 0x2f, 0x31, 0x01];
const RADIANCE_MAGIC: &[u8] = b"#?";

/// Decode an HDR image file into a linear floating-point buffer.
///
/// The format is detected from the file signature, not the extension.
/// Multi-layer EXR files are read through their default color layer only.
/// The file handle is released on every exit path; nothing is kept open
/// after return.
pub fn decode(path: &Path) -> Result<DecodedImage> {
    decode_with_deadline(path, None)
}

/// Like [`decode`], but gives up with [`Error::Timeout`] once `deadline`
/// passes. The deadline is checked at the i/o boundary, so a stalled read
/// (network mount, dying disk) cannot hold a worker forever.
pub fn decode_with_deadline(path: &Path, deadline: Option<Instant>) -> Result<DecodedImage> {
    let file = File::open(path).map_err(|e| Error::from_io(&e))?;
    let mut reader = DeadlineReader::new(BufReader::new(file), deadline);

    let mut magic = [0u8; 4];
    let sniffed = read_up_to(&mut reader, &mut magic)?;
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|e| Error::from_io(&e))?;

    if sniffed >= 4 && magic == EXR_MAGIC {
        decode_exr(reader)
    } else if sniffed >= 2 && &magic[..2] == RADIANCE_MAGIC {
        decode_radiance(reader)
    } else {
        Err(Error::UnsupportedFormat)
    }
}

fn read_up_to<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(err) => return Err(Error::from_io(&err)),
        }
    }
    Ok(filled)
}

fn validate_dimensions(width: u64, height: u64) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_IMAGE_DIMENSION as u64 || height > MAX_IMAGE_DIMENSION as u64 {
        return Err(Error::CorruptHeader(format!(
            "implausible dimensions {}×{}",
            width, height
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OpenEXR
// ---------------------------------------------------------------------------

fn decode_exr<R: Read + Seek + Send>(mut reader: DeadlineReader<R>) -> Result<DecodedImage> {
    // Validate the declared sizes before the full read allocates pixel
    // storage from them.
    let meta = MetaData::read_from_buffered(&mut reader, false).map_err(map_exr_error)?;
    if meta.headers.is_empty() {
        return Err(Error::CorruptHeader("no layers declared".to_string()));
    }
    for header in &meta.headers {
        validate_dimensions(header.layer_size.0 as u64, header.layer_size.1 as u64)?;
    }
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|e| Error::from_io(&e))?;

    let exr_image = read()
        .no_deep_data()
        .largest_resolution_level()
        .all_channels()
        .all_layers()
        .all_attributes()
        .non_parallel()
        .from_buffered(reader)
        .map_err(map_exr_error)?;

    let layer_names: Vec<Option<String>> = exr_image
        .layer_data
        .iter()
        .map(|layer| layer.attributes.layer_name.as_ref().map(|t| t.to_string()))
        .collect();
    let layer = &exr_image.layer_data[pick_default_layer(&layer_names)];

    let width = layer.size.0;
    let height = layer.size.1;
    let pixel_count = width * height;

    let channels = &layer.channel_data.list;
    let channel_names: Vec<String> = channels.iter().map(|c| c.name.to_string()).collect();
    let plan = plan_channels(&channel_names)
        .ok_or_else(|| Error::CorruptHeader("no decodable channels".to_string()))?;

    let mut planes: Vec<Vec<f32>> = Vec::with_capacity(plan.indices.len());
    for &index in &plan.indices {
        let plane = samples_to_f32(&channels[index].sample_data);
        if plane.len() != pixel_count {
            return Err(Error::CorruptHeader(format!(
                "channel '{}' sample count does not match layer size",
                channel_names[index]
            )));
        }
        planes.push(plane);
    }

    let stride = planes.len();
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(pixel_count * stride)
        .map_err(|_| Error::OutOfMemory)?;

    for pixel in 0..pixel_count {
        for plane in &planes {
            pixels.push(plane[pixel]);
        }
    }

    Ok(DecodedImage {
        width: width as u32,
        height: height as u32,
        channels: plan.layout,
        pixels,
    })
}

/// Pick the layer to display: an unnamed layer or one carrying a default
/// color name wins, otherwise the first layer declared.
fn pick_default_layer(names: &[Option<String>]) -> usize {
    const DEFAULT_NAMES: &[&str] = &["rgba", "rgb", "beauty", "default"];
    names
        .iter()
        .position(|name| match name {
            None => true,
            Some(n) => n.is_empty() || DEFAULT_NAMES.contains(&n.to_lowercase().as_str()),
        })
        .unwrap_or(0)
}

struct ChannelPlan {
    layout: ChannelLayout,
    /// Indices into the layer's channel list, in output interleave order.
    indices: Vec<usize>,
}

/// Map declared channel names to a displayable layout.
///
/// Prefers channels named R/G/B (exact, then dotted suffix like
/// `beauty.R`), records A when present, and falls back to a lone luminance
/// channel or simply the first three channels in declared order.
fn plan_channels(names: &[String]) -> Option<ChannelPlan> {
    let find = |target: &str| {
        names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(target))
            .or_else(|| names.iter().position(|n| base_name(n) == target))
    };

    if let (Some(r), Some(g), Some(b)) = (find("r"), find("g"), find("b")) {
        return Some(match find("a") {
            Some(a) => ChannelPlan {
                layout: ChannelLayout::Rgba,
                indices: vec![r, g, b, a],
            },
            None => ChannelPlan {
                layout: ChannelLayout::Rgb,
                indices: vec![r, g, b],
            },
        });
    }

    if let Some(y) = find("y") {
        return Some(ChannelPlan {
            layout: ChannelLayout::Gray,
            indices: vec![y],
        });
    }

    match names.len() {
        0 => None,
        1 | 2 => Some(ChannelPlan {
            layout: ChannelLayout::Gray,
            indices: vec![0],
        }),
        _ => Some(ChannelPlan {
            layout: ChannelLayout::Rgb,
            indices: vec![0, 1, 2],
        }),
    }
}

fn base_name(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_lowercase()
}

/// Flatten one channel's samples to f32 regardless of on-disk precision.
fn samples_to_f32(samples: &FlatSamples) -> Vec<f32> {
    match samples {
        FlatSamples::F16(values) => values.iter().map(|v| v.to_f32()).collect(),
        FlatSamples::F32(values) => values.clone(),
        FlatSamples::U32(values) => values.iter().map(|&v| v as f32).collect(),
    }
}

fn map_exr_error(err: exr::error::Error) -> Error {
    use exr::error::Error as ExrError;
    match err {
        ExrError::Io(io) => Error::from_io(&io),
        ExrError::Invalid(what) => Error::CorruptHeader(what.to_string()),
        ExrError::NotSupported(_) => Error::UnsupportedFormat,
        ExrError::Aborted => Error::Cancelled,
    }
}

// ---------------------------------------------------------------------------
// Radiance (.hdr)
// ---------------------------------------------------------------------------

fn decode_radiance<R: BufRead + Seek>(reader: DeadlineReader<R>) -> Result<DecodedImage> {
    let decoder = image::codecs::hdr::HdrDecoder::new(reader).map_err(map_image_error)?;
    let (width, height) = decoder.dimensions();
    validate_dimensions(width as u64, height as u64)?;

    let dynamic = DynamicImage::from_decoder(decoder).map_err(map_image_error)?;
    let rgb = dynamic.into_rgb32f();

    Ok(DecodedImage {
        width,
        height,
        channels: ChannelLayout::Rgb,
        pixels: rgb.into_raw(),
    })
}

fn map_image_error(err: image::ImageError) -> Error {
    use image::ImageError;
    match err {
        ImageError::IoError(io) => Error::from_io(&io),
        ImageError::Decoding(what) => Error::CorruptHeader(what.to_string()),
        ImageError::Unsupported(_) => Error::UnsupportedFormat,
        ImageError::Limits(_) => Error::OutOfMemory,
        other => Error::Io(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Deadline enforcement
// ---------------------------------------------------------------------------

/// Reader wrapper that fails with `TimedOut` once the job deadline passes,
/// so a decode stuck on i/o aborts instead of occupying a worker.
struct DeadlineReader<R> {
    inner: R,
    deadline: Option<Instant>,
}

impl<R> DeadlineReader<R> {
    fn new(inner: R, deadline: Option<Instant>) -> Self {
        Self { inner, deadline }
    }

    fn check(&self) -> io::Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "decode deadline exceeded",
                ));
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.read(buf)
    }
}

impl<R: BufRead> BufRead for DeadlineReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.check()?;
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
    }
}

impl<R: Seek> Seek for DeadlineReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check()?;
        self.inner.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write as _;
    use std::time::Duration;

    fn write_exr(path: &Path, width: usize, height: usize) {
        write_rgb_file(path, width, height, |x, y| {
            (x as f32 * 0.1, y as f32 * 0.2, 1.5)
        })
        .unwrap();
    }

    #[test]
    fn exr_round_trip_preserves_hdr_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.exr");
        write_exr(&path, 4, 3);

        let decoded = decode(&path).unwrap();
        assert_eq!(decoded.width, 4);
        assert_eq!(decoded.height, 3);
        assert_eq!(decoded.channels, ChannelLayout::Rgb);
        assert_eq!(decoded.pixels.len(), 4 * 3 * 3);

        // Blue channel carries a value above 1.0; decoding must not clip it.
        assert!((decoded.pixels[2] - 1.5).abs() < 1e-6);
        // Pixel (2, 1): r = 0.2, g = 0.2.
        let offset = (1 * 4 + 2) * 3;
        assert!((decoded.pixels[offset] - 0.2).abs() < 1e-6);
        assert!((decoded.pixels[offset + 1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn radiance_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.hdr");
        {
            let file = fs::File::create(&path).unwrap();
            let mut writer = std::io::BufWriter::new(file);
            let pixels = vec![image::Rgb([0.25f32, 0.5, 2.0]); 4];
            image::codecs::hdr::HdrEncoder::new(&mut writer)
                .encode(&pixels, 2, 2)
                .unwrap();
            writer.flush().unwrap();
        }

        let decoded = decode(&path).unwrap();
        assert_eq!((decoded.width, decoded.height), (2, 2));
        assert_eq!(decoded.channels, ChannelLayout::Rgb);
        // RGBE stores an 8-bit mantissa; allow its quantization error.
        assert!((decoded.pixels[0] - 0.25).abs() < 0.01);
        assert!((decoded.pixels[2] - 2.0).abs() < 0.05);
    }

    #[test]
    fn unknown_signature_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.exr");
        fs::write(&path, b"definitely not an image").unwrap();

        assert_eq!(decode(&path).unwrap_err(), Error::UnsupportedFormat);
    }

    #[test]
    fn tiny_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stub.exr");
        fs::write(&path, b"x").unwrap();

        assert_eq!(decode(&path).unwrap_err(), Error::UnsupportedFormat);
    }

    #[test]
    fn truncated_exr_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.exr");
        write_exr(&path, 8, 8);

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..48]).unwrap();

        match decode(&path).unwrap_err() {
            Error::CorruptHeader(_) | Error::Io(_) => {}
            other => panic!("unexpected error for truncated file: {:?}", other),
        }
    }

    #[test]
    fn oversized_declared_dimensions_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.exr");
        write_exr(&path, MAX_IMAGE_DIMENSION as usize + 1, 1);

        match decode(&path).unwrap_err() {
            Error::CorruptHeader(_) => {}
            other => panic!("expected CorruptHeader, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_io() {
        match decode(Path::new("/nonexistent/probe.exr")).unwrap_err() {
            Error::Io(_) => {}
            other => panic!("expected Io, got {:?}", other),
        }
    }

    #[test]
    fn expired_deadline_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.exr");
        write_exr(&path, 4, 4);

        let deadline = Instant::now() - Duration::from_millis(1);
        assert_eq!(
            decode_with_deadline(&path, Some(deadline)).unwrap_err(),
            Error::Timeout
        );
    }

    #[test]
    fn default_layer_selection_prefers_color_names() {
        // Unnamed layer wins outright.
        assert_eq!(pick_default_layer(&[Some("depth".into()), None]), 1);
        // Then a recognized default name, case-insensitively.
        assert_eq!(
            pick_default_layer(&[Some("cryptomatte".into()), Some("Beauty".into())]),
            1
        );
        // Otherwise the first declared layer.
        assert_eq!(
            pick_default_layer(&[Some("diffuse".into()), Some("specular".into())]),
            0
        );
    }

    #[test]
    fn channel_plans_cover_the_usual_layouts() {
        let names = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        // EXR stores channels alphabetically: A, B, G, R.
        let plan = plan_channels(&names(&["A", "B", "G", "R"])).unwrap();
        assert_eq!(plan.layout, ChannelLayout::Rgba);
        assert_eq!(plan.indices, vec![3, 2, 1, 0]);

        let plan = plan_channels(&names(&["B", "G", "R"])).unwrap();
        assert_eq!(plan.layout, ChannelLayout::Rgb);
        assert_eq!(plan.indices, vec![2, 1, 0]);

        // Dotted names from a flattened layer still resolve.
        let plan = plan_channels(&names(&["beauty.B", "beauty.G", "beauty.R"])).unwrap();
        assert_eq!(plan.layout, ChannelLayout::Rgb);
        assert_eq!(plan.indices, vec![2, 1, 0]);

        // A lone luminance channel is grayscale.
        let plan = plan_channels(&names(&["Y"])).unwrap();
        assert_eq!(plan.layout, ChannelLayout::Gray);
        assert_eq!(plan.indices, vec![0]);

        // No names at all cannot be planned.
        assert!(plan_channels(&[]).is_none());

        // Unrecognized names fall back to declared order.
        let plan = plan_channels(&names(&["u", "v", "w", "q"])).unwrap();
        assert_eq!(plan.layout, ChannelLayout::Rgb);
        assert_eq!(plan.indices, vec![0, 1, 2]);
    }
}
