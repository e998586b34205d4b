use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

/// MIME type and file extension of the lossy web encoding.
pub const WEB_MIME: &str = "image/jpeg";
pub const WEB_EXTENSION: &str = "jpg";

pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context("image decode failed")
}

/// Encodes `image` as JPEG at `quality` (1-100). Any alpha channel is
/// flattened onto white first.
pub fn encode_lossy(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let flattened = flatten_onto_white(image);
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder
        .encode_image(&DynamicImage::ImageRgb8(flattened))
        .context("jpeg encode failed")?;
    Ok(bytes)
}

/// Dimensions of `width`x`height` scaled so the longer side is at most
/// `max_side`. Images already within bounds are returned unchanged.
pub fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let max_side = max_side.max(1);
    let longest = width.max(height);
    if longest <= max_side {
        return (width, height);
    }
    let scale = max_side as f64 / longest as f64;
    let scaled = |value: u32| ((value as f64 * scale).round() as u32).clamp(1, max_side);
    (scaled(width), scaled(height))
}

pub fn resize_to_fit(image: &DynamicImage, max_side: u32) -> DynamicImage {
    let (width, height) = fit_within(image.width(), image.height(), max_side);
    if (width, height) == (image.width(), image.height()) {
        return image.clone();
    }
    image.resize_exact(width, height, FilterType::Triangle)
}

/// MIME type guessed from the leading bytes, if the format is recognised.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            ((u16::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]),
        );
    }
    flattened
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    use super::{decode, encode_lossy, fit_within, resize_to_fit, sniff_mime};

    fn png_bytes(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    #[test]
    fn fit_within_caps_longer_side_and_keeps_ratio() {
        assert_eq!(fit_within(800, 600, 512), (512, 384));
        assert_eq!(fit_within(600, 800, 512), (384, 512));
        assert_eq!(fit_within(4000, 10, 512), (512, 1));
        assert_eq!(fit_within(512, 512, 512), (512, 512));
        assert_eq!(fit_within(300, 200, 512), (300, 200));

        for (width, height) in [(1920, 1080), (1023, 767), (3000, 2001), (17, 4096)] {
            let (w, h) = fit_within(width, height, 512);
            assert!(w.max(h) <= 512);
            let source_ratio = width as f64 / height as f64;
            let thumb_ratio = w as f64 / h as f64;
            // one pixel of rounding on the shorter side
            let tolerance = source_ratio / (w.min(h) as f64);
            assert!(
                (source_ratio - thumb_ratio).abs() <= tolerance + 1e-9,
                "{width}x{height} -> {w}x{h}"
            );
        }
    }

    #[test]
    fn resize_to_fit_never_upscales() {
        let small = DynamicImage::new_rgb8(120, 80);
        let resized = resize_to_fit(&small, 512);
        assert_eq!((resized.width(), resized.height()), (120, 80));

        let large = DynamicImage::new_rgb8(1000, 250);
        let resized = resize_to_fit(&large, 512);
        assert_eq!((resized.width(), resized.height()), (512, 128));
    }

    #[test]
    fn encode_lossy_produces_decodable_jpeg() -> anyhow::Result<()> {
        let image = DynamicImage::new_rgb8(64, 48);
        let bytes = encode_lossy(&image, 80)?;
        assert_eq!(sniff_mime(&bytes), Some("image/jpeg"));
        let decoded = decode(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        Ok(())
    }

    #[test]
    fn transparent_pixels_flatten_to_white() -> anyhow::Result<()> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0])));
        let bytes = encode_lossy(&image, 95)?;
        let decoded = decode(&bytes)?.to_rgb8();
        let pixel = decoded.get_pixel(8, 8);
        assert!(pixel.0.iter().all(|channel| *channel > 240), "{pixel:?}");
        Ok(())
    }

    #[test]
    fn sniff_and_decode_reject_garbage() -> anyhow::Result<()> {
        assert_eq!(sniff_mime(b"definitely not an image"), None);
        assert!(decode(b"definitely not an image").is_err());

        let png = png_bytes(&DynamicImage::new_rgb8(4, 4))?;
        assert_eq!(sniff_mime(&png), Some("image/png"));
        Ok(())
    }
}
