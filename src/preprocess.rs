//! Camera frame preprocessing.
//!
//! Every image fed to the network goes through [`ImagePreprocessor::preprocess`],
//! which crops away rows that carry no steering signal, resizes the remainder to
//! [`INPUT_SHAPE`] and rescales pixel intensities to `[-1, 1]`.

use burn::config::Config;
use image::{RgbImage, imageops, imageops::FilterType};
use ndarray::Array3;

/// Shape of one preprocessed frame as `[height, width, channels]`.
pub const INPUT_SHAPE: [usize; 3] = [64, 128, 3];

#[derive(Config, Debug)]
pub struct PreprocessConfig {
    /// Rows removed from the top of the frame (sky, trees).
    #[config(default = 60)]
    pub crop_top: u32,
    /// Rows removed from the bottom of the frame (car hood).
    #[config(default = 20)]
    pub crop_bottom: u32,
    #[config(default = 64)]
    pub height: u32,
    #[config(default = 128)]
    pub width: u32,
}

/// Order in which an image source stores its colour channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// The `image` decoder already yields RGB, unlike OpenCV's BGR reads.
    #[default]
    Rgb,
    Bgr,
}

/// Swaps the first and third channel of every pixel in place.
pub fn swap_red_blue(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        pixel.0.swap(0, 2);
    }
}

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    config: PreprocessConfig,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(PreprocessConfig::new())
    }
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// `[height, width, channels]` of the arrays produced by [`Self::preprocess`].
    pub fn input_shape(&self) -> [usize; 3] {
        [self.config.height as usize, self.config.width as usize, 3]
    }

    /// Maps an RGB frame of any size to a normalised `[H, W, 3]` array.
    ///
    /// Frames too short to survive the crop are resized as they are.
    pub fn preprocess(&self, image: &RgbImage) -> Array3<f32> {
        let (width, height) = image.dimensions();
        let crop = self.config.crop_top + self.config.crop_bottom;

        let resized = if height > crop {
            let cropped =
                imageops::crop_imm(image, 0, self.config.crop_top, width, height - crop).to_image();
            imageops::resize(
                &cropped,
                self.config.width,
                self.config.height,
                FilterType::Triangle,
            )
        } else {
            imageops::resize(
                image,
                self.config.width,
                self.config.height,
                FilterType::Triangle,
            )
        };

        let [h, w, c] = self.input_shape();
        Array3::from_shape_fn((h, w, c), |(y, x, ch)| {
            resized.get_pixel(x as u32, y as u32).0[ch] as f32 / 127.5 - 1.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn output_matches_input_shape() {
        let preprocessor = ImagePreprocessor::default();
        let frame = RgbImage::from_pixel(320, 160, Rgb([10, 20, 30]));

        let array = preprocessor.preprocess(&frame);

        assert_eq!(array.shape(), &INPUT_SHAPE);
    }

    #[test]
    fn pixels_are_scaled_to_unit_range() {
        let preprocessor = ImagePreprocessor::default();
        let frame = RgbImage::from_pixel(320, 160, Rgb([0, 255, 0]));

        let array = preprocessor.preprocess(&frame);

        assert!((array[[0, 0, 0]] + 1.0).abs() < 1e-5);
        assert!((array[[0, 0, 1]] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn crop_removes_top_rows() {
        let preprocessor = ImagePreprocessor::new(PreprocessConfig::new().with_crop_bottom(0));
        let mut frame = RgbImage::from_pixel(320, 160, Rgb([0, 0, 0]));
        for y in 0..60 {
            for x in 0..320 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let array = preprocessor.preprocess(&frame);

        assert!(array.iter().all(|&p| (p + 1.0).abs() < 1e-5));
    }

    #[test]
    fn small_frames_are_not_cropped() {
        let preprocessor = ImagePreprocessor::default();
        let frame = RgbImage::from_pixel(16, 8, Rgb([255, 0, 0]));

        let array = preprocessor.preprocess(&frame);

        assert_eq!(array.shape(), &INPUT_SHAPE);
        assert!((array[[10, 10, 0]] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn swap_red_blue_twice_is_identity() {
        let mut frame = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));

        swap_red_blue(&mut frame);
        assert_eq!(frame.get_pixel(0, 0).0, [3, 2, 1]);
        swap_red_blue(&mut frame);
        assert_eq!(frame.get_pixel(0, 0).0, [1, 2, 3]);
    }
}
