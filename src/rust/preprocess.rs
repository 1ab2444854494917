//! The image transform shared by training and inference.
//!
//! Every tensor that reaches the backbone goes through [`Preprocessor`], and the
//! [`PreprocessSpec`] it was built from is written into the model artifact. Inference
//! rebuilds its `Preprocessor` from that recorded spec, so the two paths cannot drift
//! apart: there is exactly one resize and one rescale implementation in the crate.
//!
//! Tensors are laid out NHWC (`[1, height, width, 3]`) with `f32` values.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierError;

/// Input edge length expected by the backbone.
pub const IMAGE_SIZE: u32 = 224;
/// RGB.
pub const CHANNELS: usize = 3;

/// How raw `[0, 255]` channel intensities are mapped before reaching the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelScaling {
    /// `x / 255`, values in `[0, 1]`
    UnitRange,
    /// `x / 127.5 - 1`, values in `[-1, 1]` (MobileNetV2 convention)
    SignedUnit,
}

impl PixelScaling {
    pub fn scale(self, raw: f32) -> f32 {
        match self {
            Self::UnitRange => raw / 255.0,
            Self::SignedUnit => raw / 127.5 - 1.0,
        }
    }

    pub fn unscale(self, value: f32) -> f32 {
        match self {
            Self::UnitRange => value * 255.0,
            Self::SignedUnit => (value + 1.0) * 127.5,
        }
    }

    /// Inclusive value range produced by [`scale`](Self::scale).
    pub fn range(self) -> (f32, f32) {
        match self {
            Self::UnitRange => (0.0, 1.0),
            Self::SignedUnit => (-1.0, 1.0),
        }
    }
}

impl std::str::FromStr for PixelScaling {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" | "unit_range" => Ok(Self::UnitRange),
            "signed" | "signed_unit" => Ok(Self::SignedUnit),
            other => Err(ClassifierError::ValidationError(format!(
                "Unknown pixel scaling '{}' (expected 'unit' or 'signed')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
    CatmullRom,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Bilinear => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
        }
    }
}

/// The complete description of the transform, as persisted in the artifact manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessSpec {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub filter: ResizeFilter,
    pub scaling: PixelScaling,
}

impl PreprocessSpec {
    /// 224×224×3, bilinear resize, with the given scaling.
    pub fn new(scaling: PixelScaling) -> Self {
        Self {
            width: IMAGE_SIZE,
            height: IMAGE_SIZE,
            channels: CHANNELS,
            filter: ResizeFilter::Bilinear,
            scaling,
        }
    }

    /// `[height, width, channels]`
    pub fn input_shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, self.channels]
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.width != IMAGE_SIZE || self.height != IMAGE_SIZE || self.channels != CHANNELS {
            return Err(ClassifierError::ValidationError(format!(
                "Unsupported input shape {}x{}x{} (expected {}x{}x{})",
                self.height, self.width, self.channels, IMAGE_SIZE, IMAGE_SIZE, CHANNELS
            )));
        }
        Ok(())
    }
}

impl Default for PreprocessSpec {
    fn default() -> Self {
        Self::new(PixelScaling::SignedUnit)
    }
}

/// Which numeric range the values of an [`InputTensor`] are currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelRange {
    /// Plain `[0, 255]` intensities
    Raw,
    Scaled(PixelScaling),
}

/// An NHWC image tensor that remembers how its values were scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Array4<f32>,
    range: PixelRange,
}

impl InputTensor {
    /// Wraps raw `[0, 255]` values.
    pub fn from_raw(data: Array4<f32>) -> Result<Self, ClassifierError> {
        Self::checked(data, PixelRange::Raw)
    }

    /// Wraps values that were already scaled with `scaling`.
    pub fn from_scaled(data: Array4<f32>, scaling: PixelScaling) -> Result<Self, ClassifierError> {
        Self::checked(data, PixelRange::Scaled(scaling))
    }

    fn checked(data: Array4<f32>, range: PixelRange) -> Result<Self, ClassifierError> {
        let shape = data.shape();
        if shape[0] != 1 || shape[3] != CHANNELS || shape[1] == 0 || shape[2] == 0 {
            return Err(ClassifierError::ValidationError(format!(
                "Expected a [1, H, W, {}] tensor, got {:?}",
                CHANNELS, shape
            )));
        }
        Ok(Self { data, range })
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn into_data(self) -> Array4<f32> {
        self.data
    }

    pub fn range(&self) -> PixelRange {
        self.range
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    fn into_raw(self) -> Array4<f32> {
        match self.range {
            PixelRange::Raw => self.data,
            PixelRange::Scaled(scaling) => self.data.mapv(|v| scaling.unscale(v)),
        }
    }
}

/// Decodes an encoded image (JPEG, PNG, ...) from memory.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ClassifierError> {
    if bytes.is_empty() {
        return Err(ClassifierError::ImageError("Image data is empty".into()));
    }
    image::load_from_memory(bytes)
        .map_err(|e| ClassifierError::ImageError(format!("Cannot decode image: {}", e)))
}

/// Applies a [`PreprocessSpec`].
#[derive(Debug, Clone)]
pub struct Preprocessor {
    spec: PreprocessSpec,
}

impl Preprocessor {
    pub fn new(spec: PreprocessSpec) -> Result<Self, ClassifierError> {
        spec.validate()?;
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &PreprocessSpec {
        &self.spec
    }

    /// Decodes then preprocesses an encoded image.
    pub fn apply_bytes(&self, bytes: &[u8]) -> Result<InputTensor, ClassifierError> {
        let image = decode_image(bytes)?;
        Ok(self.apply_image(&image))
    }

    /// Resizes to the spec's dimensions and rescales.
    pub fn apply_image(&self, image: &DynamicImage) -> InputTensor {
        let rgb = image.to_rgb8();
        let resized = self.resize(rgb);
        let raw = rgb_to_array(&resized);
        self.rescale(raw)
    }

    /// Brings any tensor into the spec's shape and range.
    ///
    /// A tensor that already has the target size and scaling is returned untouched,
    /// which makes the transform idempotent.
    pub fn apply(&self, tensor: InputTensor) -> Result<InputTensor, ClassifierError> {
        let sized = tensor.height() == self.spec.height as usize
            && tensor.width() == self.spec.width as usize;
        if sized && tensor.range() == PixelRange::Scaled(self.spec.scaling) {
            return Ok(tensor);
        }

        let raw = tensor.into_raw();
        let raw = if sized {
            raw
        } else {
            let resized = self.resize(array_to_rgb(&raw)?);
            rgb_to_array(&resized)
        };
        Ok(self.rescale(raw))
    }

    fn resize(&self, rgb: RgbImage) -> RgbImage {
        if rgb.width() == self.spec.width && rgb.height() == self.spec.height {
            return rgb;
        }
        imageops::resize(&rgb, self.spec.width, self.spec.height, self.spec.filter.into())
    }

    fn rescale(&self, raw: Array4<f32>) -> InputTensor {
        let scaling = self.spec.scaling;
        InputTensor {
            data: raw.mapv(|v| scaling.scale(v)),
            range: PixelRange::Scaled(scaling),
        }
    }
}

fn rgb_to_array(rgb: &RgbImage) -> Array4<f32> {
    let (width, height) = rgb.dimensions();
    Array4::from_shape_fn((1, height as usize, width as usize, CHANNELS), |(_, y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32
    })
}

fn array_to_rgb(raw: &Array4<f32>) -> Result<RgbImage, ClassifierError> {
    let (height, width) = (raw.shape()[1], raw.shape()[2]);
    let mut pixels = Vec::with_capacity(height * width * CHANNELS);
    for y in 0..height {
        for x in 0..width {
            for c in 0..CHANNELS {
                pixels.push(raw[[0, y, x, c]].round().clamp(0.0, 255.0) as u8);
            }
        }
    }
    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| ClassifierError::ImageError("Tensor does not describe an RGB image".into()))
}
