use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageFormat;

pub const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// Lossy quality in `[0, 1]`.
    pub quality: f32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1920,
            quality: 0.85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub data_url: String,
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub encoded_bytes: usize,
}

impl CompressedImage {
    pub fn summary(&self) -> String {
        format!(
            "{}×{} → {}×{} JPEG, {}",
            self.source_width,
            self.source_height,
            self.width,
            self.height,
            human_size(self.encoded_bytes)
        )
    }
}

/// Largest size that fits inside `max_width × max_height` with the same aspect
/// ratio. Images that already fit are returned unchanged.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = (f64::from(max_width) / f64::from(width))
        .min(f64::from(max_height) / f64::from(height));
    if scale >= 1.0 {
        return (width, height);
    }
    let scaled_width = (f64::from(width) * scale).round() as u32;
    let scaled_height = (f64::from(height) * scale).round() as u32;
    (
        scaled_width.clamp(1, max_width.max(1)),
        scaled_height.clamp(1, max_height.max(1)),
    )
}

pub fn sniff_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => {
            let head = &bytes[..bytes.len().min(512)];
            tree_magic_mini::from_u8(head).to_string()
        }
    }
}

pub fn is_image(bytes: &[u8]) -> bool {
    !bytes.is_empty() && sniff_mime(bytes).starts_with("image/")
}

/// Re-encodes `bytes` as a JPEG data URL bounded by `opts`.
///
/// Input that is not an image yields `Ok(None)`; decode and encode failures are errors.
pub fn compress(bytes: &[u8], opts: CompressOptions) -> Result<Option<CompressedImage>> {
    if !is_image(bytes) {
        return Ok(None);
    }

    let source = image::load_from_memory(bytes).context("compress: decode image")?;
    let (source_width, source_height) = (source.width(), source.height());
    let (width, height) = fit_within(source_width, source_height, opts.max_width, opts.max_height);
    let resized = if (width, height) == (source_width, source_height) {
        source
    } else {
        source.resize_exact(width, height, FilterType::Triangle)
    };

    let rgb = resized.to_rgb8();
    let mut encoded = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, jpeg_quality(opts.quality));
        encoder
            .encode_image(&rgb)
            .context("compress: encode jpeg")?;
    }

    let data_url = format!("{DATA_URL_PREFIX}{}", general_purpose::STANDARD.encode(&encoded));
    tracing::debug!(
        source_width,
        source_height,
        width,
        height,
        bytes = encoded.len(),
        "compressed image"
    );

    Ok(Some(CompressedImage {
        data_url,
        width,
        height,
        source_width,
        source_height,
        encoded_bytes: encoded.len(),
    }))
}

pub fn compress_file(path: &Path, opts: CompressOptions) -> Result<Option<CompressedImage>> {
    let bytes = fs::read(path)
        .with_context(|| format!("compress: read {}", path.display()))?;
    compress(&bytes, opts)
}

fn jpeg_quality(quality: f32) -> u8 {
    let quality = if quality.is_finite() {
        quality.clamp(0.0, 1.0)
    } else {
        CompressOptions::default().quality
    };
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

fn human_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if value >= KIB * KIB {
        format!("{:.1} MiB", value / (KIB * KIB))
    } else if value >= KIB {
        format!("{:.0} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn decode_data_url(data_url: &str) -> image::DynamicImage {
        let payload = data_url.strip_prefix(DATA_URL_PREFIX).unwrap();
        let bytes = general_purpose::STANDARD.decode(payload).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn fit_within_scales_landscape_by_width() {
        assert_eq!(fit_within(3000, 2000, 1920, 1920), (1920, 1280));
    }

    #[test]
    fn fit_within_scales_portrait_by_height() {
        assert_eq!(fit_within(1000, 4000, 1920, 1920), (480, 1920));
    }

    #[test]
    fn fit_within_never_upscales() {
        assert_eq!(fit_within(800, 600, 1920, 1920), (800, 600));
        assert_eq!(fit_within(1920, 1920, 1920, 1920), (1920, 1920));
    }

    #[test]
    fn fit_within_respects_both_bounds() {
        for (w, h) in [(5000, 4900), (4900, 5000), (1921, 10), (10, 1921), (7, 3333)] {
            let (fw, fh) = fit_within(w, h, 1280, 720);
            assert!(fw <= 1280 && fh <= 720, "{w}x{h} -> {fw}x{fh}");
            let skew = (u64::from(fw) * u64::from(h)).abs_diff(u64::from(fh) * u64::from(w));
            assert!(skew <= u64::from(w + h), "{w}x{h} -> {fw}x{fh} skews aspect");
        }
    }

    #[test]
    fn fit_within_keeps_aspect_close() {
        let (fw, fh) = fit_within(4032, 3024, 1920, 1920);
        assert_eq!(fw, 1920);
        assert_eq!(fh, 1440);
    }

    #[test]
    fn compress_shrinks_into_bounds() {
        let bytes = png_bytes(300, 200);
        let opts = CompressOptions {
            max_width: 192,
            max_height: 192,
            quality: 0.85,
        };
        let result = compress(&bytes, opts).unwrap().unwrap();
        assert_eq!((result.source_width, result.source_height), (300, 200));
        assert_eq!((result.width, result.height), (192, 128));
        assert!(result.data_url.starts_with(DATA_URL_PREFIX));
        let decoded = decode_data_url(&result.data_url);
        assert_eq!((decoded.width(), decoded.height()), (192, 128));
    }

    #[test]
    fn compress_keeps_small_images_at_size() {
        let bytes = png_bytes(64, 48);
        let result = compress(&bytes, CompressOptions::default()).unwrap().unwrap();
        assert_eq!((result.width, result.height), (64, 48));
    }

    #[test]
    fn compress_ignores_non_images() {
        assert!(compress(b"just some text, definitely not pixels", CompressOptions::default())
            .unwrap()
            .is_none());
        assert!(compress(&[], CompressOptions::default()).unwrap().is_none());
    }

    #[test]
    fn compress_reports_truncated_images() {
        let mut bytes = png_bytes(40, 40);
        bytes.truncate(60);
        assert!(compress(&bytes, CompressOptions::default()).is_err());
    }

    #[test]
    fn jpeg_quality_is_clamped() {
        assert_eq!(jpeg_quality(0.85), 85);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(7.0), 100);
        assert_eq!(jpeg_quality(f32::NAN), 85);
    }
}
