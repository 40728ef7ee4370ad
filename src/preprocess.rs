//! Image decoding into model-ready tensors.

use crate::error::VerifyError;
use image::imageops::FilterType;
use ndarray::Array4;

/// Default square input resolution for classification models
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Largest accepted square input resolution
pub const MAX_INPUT_SIZE: u32 = 2048;

/// Normalized NHWC image batch: `[1, height, width, 3]`, values in [0, 1]
pub type Tensor = Array4<f32>;

/// Decodes image artifacts into fixed-size normalized tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePreprocessor {
    width: u32,
    height: u32,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::square(DEFAULT_INPUT_SIZE)
    }
}

impl ImagePreprocessor {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decode, resize (nearest-neighbour) and scale an image to [0, 1].
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Decode` if the bytes are not a decodable image.
    pub fn prepare(&self, bytes: &[u8]) -> Result<Tensor, VerifyError> {
        let decoded = image::load_from_memory(bytes)?;
        let rgb = decoded
            .resize_exact(self.width, self.height, FilterType::Nearest)
            .to_rgb8();

        let shape = (1, self.height as usize, self.width as usize, 3);
        let data: Vec<f32> = rgb
            .into_raw()
            .into_iter()
            .map(|v| f32::from(v) / 255.0)
            .collect();

        Array4::from_shape_vec(shape, data).map_err(|e| VerifyError::Decode(e.to_string()))
    }
}
