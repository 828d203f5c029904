use crate::Result;
use image::{imageops::FilterType, RgbImage};
use std::path::Path;

/// Load a capture and squash it to the model's input geometry. Aspect ratio
/// is not preserved and nearest neighbour sampling is used, which is how the
/// training pipeline loaded its images.
///
/// * `path`: image on disk.
/// * `width`: model input width.
/// * `height`: model input height.
pub fn load_resized(path: &Path, width: u32, height: u32) -> Result<RgbImage> {
    let rgb = image::open(path)?.to_rgb8();
    Ok(image::imageops::resize(&rgb, width, height, FilterType::Nearest))
}

/// Flatten an image to row major, channel last (NHWC without the batch
/// axis) `f32` values, each pixel channel multiplied by `scale`.
///
/// * `image`: RGB image already at the model geometry.
/// * `scale`: multiplier per channel value, 1.0 keeps the raw 0-255 range.
pub fn to_nhwc(image: &RgbImage, scale: f32) -> Vec<f32> {
    image
        .pixels()
        .flat_map(|pixel| pixel.0)
        .map(|channel| f32::from(channel) * scale)
        .collect()
}

#[cfg(test)]
mod tests {

    use super::*;
    use image::Rgb;

    #[test]
    fn test_layout_is_row_major_channel_last() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, Rgb([1, 2, 3]));
        image.put_pixel(1, 0, Rgb([4, 5, 6]));
        image.put_pixel(0, 1, Rgb([7, 8, 9]));
        image.put_pixel(1, 1, Rgb([10, 11, 12]));

        let values = to_nhwc(&image, 1.0);
        assert_eq!(
            values,
            (1..=12).map(|v| v as f32).collect::<Vec<_>>()
        );
        assert_eq!(to_nhwc(&image, 0.5)[11], 6.0);
    }

    #[test]
    fn test_load_resized_forces_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plant_P7-day1.jpg");
        RgbImage::from_pixel(320, 240, Rgb([200, 40, 90]))
            .save(&path)
            .unwrap();

        let resized = load_resized(&path, 128, 128).unwrap();
        assert_eq!(resized.dimensions(), (128, 128));
        assert_eq!(to_nhwc(&resized, 1.0).len(), 128 * 128 * 3);
    }

    #[test]
    fn test_load_missing_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_resized(&dir.path().join("missing.jpg"), 128, 128).is_err());
    }
}
