// SPDX-License-Identifier: MIT
//
// Orientation correction and the resize-to-budget ladder.
//
// Uploaded snapshots must already be corrected (cloud viewers do not
// re-transform) and must fit the presigned POST's byte limit. The ladder is
// deterministic and must not be reordered: quality 95 first, then quality
// steps 80 down to 20, then scale steps 0.8/0.6/0.4/0.2 at quality 60, then
// a hard truncation to exactly the budget. The truncation fallback yields a
// corrupt but bounded image — a documented limitation, not a silent failure.

use image::DynamicImage;
use tracing::{debug, warn};

use polarlink_core::error::{PolarlinkError, Result};
use polarlink_core::types::CameraOrientation;

const INITIAL_QUALITY: u8 = 95;
const QUALITY_STEPS: [u8; 7] = [80, 70, 60, 50, 40, 30, 20];
const SCALE_STEPS: [f64; 4] = [0.8, 0.6, 0.4, 0.2];
const SCALED_QUALITY: u8 = 60;

/// Apply the camera correction: horizontal flip, then vertical flip, then
/// rotation. The order matters and matches what live-view consumers are told
/// to expect.
pub fn orient(image: DynamicImage, orientation: &CameraOrientation) -> DynamicImage {
    let mut image = image;
    if orientation.flip_horizontal {
        image = image.fliph();
    }
    if orientation.flip_vertical {
        image = image.flipv();
    }
    match orientation.rotation {
        90 => image = image.rotate90(),
        180 => image = image.rotate180(),
        270 => image = image.rotate270(),
        _ => {}
    }
    image
}

/// Encode `image` as JPEG within `budget` bytes via the quality/scale ladder.
///
/// The result is always `<= budget` bytes; it is exactly `budget` bytes only
/// when every ladder step failed and the initial encoding was truncated.
pub fn encode_to_budget(image: &DynamicImage, budget: usize) -> Result<Vec<u8>> {
    let initial = encode_jpeg(image, INITIAL_QUALITY)?;
    if initial.len() <= budget {
        return Ok(initial);
    }

    for quality in QUALITY_STEPS {
        let candidate = encode_jpeg(image, quality)?;
        if candidate.len() <= budget {
            debug!(quality, bytes = candidate.len(), "snapshot fit via quality step");
            return Ok(candidate);
        }
    }

    let (width, height) = (image.width(), image.height());
    for scale in SCALE_STEPS {
        let new_width = ((width as f64 * scale) as u32).max(1);
        let new_height = ((height as f64 * scale) as u32).max(1);
        let scaled = image.resize_exact(
            new_width,
            new_height,
            image::imageops::FilterType::Lanczos3,
        );
        let candidate = encode_jpeg(&scaled, SCALED_QUALITY)?;
        if candidate.len() <= budget {
            debug!(
                new_width,
                new_height,
                bytes = candidate.len(),
                "snapshot fit via scale step"
            );
            return Ok(candidate);
        }
    }

    warn!(budget, "no ladder step fit, truncating snapshot");
    let mut truncated = initial;
    truncated.truncate(budget);
    Ok(truncated)
}

/// Decode a captured frame, apply the orientation correction, and encode it
/// within the byte budget.
pub fn prepare_snapshot(
    raw: &[u8],
    orientation: &CameraOrientation,
    budget: usize,
) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(raw)
        .map_err(|e| PolarlinkError::Image(format!("snapshot decode failed: {e}")))?;
    let corrected = orient(decoded, orientation);
    encode_to_budget(&corrected, budget)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let rgb = image.to_rgb8();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| PolarlinkError::Image(format!("JPEG encoding failed: {e}")))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// High-entropy test frame so JPEG cannot compress it away.
    fn noisy_image(width: u32, height: u32) -> DynamicImage {
        let mut seed = 0x2545f491_u32;
        let img = RgbImage::from_fn(width, height, |_, _| {
            // Small xorshift keeps the frame deterministic without rand.
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let b = seed.to_le_bytes();
            Rgb([b[0], b[1], b[2]])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn generous_budget_keeps_initial_quality() {
        let image = noisy_image(64, 48);
        let encoded = encode_to_budget(&image, 10_000_000).unwrap();
        assert_eq!(encoded, encode_jpeg(&image, INITIAL_QUALITY).unwrap());
    }

    #[test]
    fn ladder_respects_budget_without_truncating() {
        let image = noisy_image(640, 480);
        let budget = 150_000;

        let initial = encode_jpeg(&image, INITIAL_QUALITY).unwrap();
        assert!(initial.len() > budget, "test image must exceed the budget at q95");

        let encoded = encode_to_budget(&image, budget).unwrap();
        assert!(encoded.len() <= budget);
        // A ladder result is still a decodable JPEG, unlike the truncation
        // fallback.
        image::load_from_memory(&encoded).expect("ladder output must decode");
    }

    #[test]
    fn hopeless_budget_truncates_to_exact_size() {
        let image = noisy_image(320, 240);
        let budget = 64;
        let encoded = encode_to_budget(&image, budget).unwrap();
        assert_eq!(encoded.len(), budget);
    }

    #[test]
    fn ladder_is_deterministic() {
        let image = noisy_image(320, 240);
        let a = encode_to_budget(&image, 20_000).unwrap();
        let b = encode_to_budget(&image, 20_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn orient_applies_flips_before_rotation() {
        // 2x1 frame: red on the left, blue on the right.
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 0, 255]));
        let image = DynamicImage::ImageRgb8(img);

        let orientation = CameraOrientation::new(true, false, 90);
        let result = orient(image, &orientation).to_rgb8();

        // fliph puts blue left/red right; rotate90 (clockwise) then stacks
        // them into a 1x2 column with blue on top.
        assert_eq!(result.dimensions(), (1, 2));
        assert_eq!(result.get_pixel(0, 0), &Rgb([0, 0, 255]));
        assert_eq!(result.get_pixel(0, 1), &Rgb([255, 0, 0]));
    }

    #[test]
    fn identity_orientation_is_untouched() {
        let image = noisy_image(16, 16);
        let reference = image.to_rgb8();
        let result = orient(image, &CameraOrientation::default()).to_rgb8();
        assert_eq!(result.as_raw(), reference.as_raw());
    }

    #[test]
    fn garbage_input_is_an_image_error() {
        let err =
            prepare_snapshot(b"not a jpeg", &CameraOrientation::default(), 1000).unwrap_err();
        assert!(matches!(err, PolarlinkError::Image(_)));
    }
}
