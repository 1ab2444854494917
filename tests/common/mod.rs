#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use env_logger::{Builder, Env};
use greenguardian::{ClassifierError, FeatureExtractor, InputTensor, PixelScaling};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{s, Array1, Axis};

pub const CATEGORIES: [(&str, [u8; 3]); 6] = [
    ("cardboard", [150, 100, 50]),
    ("glass", [40, 200, 80]),
    ("metal", [160, 160, 170]),
    ("paper", [245, 245, 240]),
    ("plastic", [30, 60, 220]),
    ("trash", [20, 20, 20]),
];

// Initialize test logger
pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Stand-in for a pretrained network: mean colour of each image quadrant.
#[derive(Debug)]
pub struct QuadrantColor;

impl FeatureExtractor for QuadrantColor {
    fn name(&self) -> &str {
        "quadrant-color"
    }

    fn feature_dim(&self) -> usize {
        12
    }

    fn expected_scaling(&self) -> PixelScaling {
        PixelScaling::SignedUnit
    }

    fn extract(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError> {
        self.check_input(input)?;
        let image = input.data().index_axis(Axis(0), 0);
        let (h, w) = (input.height() / 2, input.width() / 2);
        let mut features = Vec::with_capacity(12);
        for (rows, cols) in [(0..h, 0..w), (0..h, w..2 * w), (h..2 * h, 0..w), (h..2 * h, w..2 * w)] {
            let quadrant = image.slice(s![rows, cols, ..]);
            for c in 0..3 {
                features.push(quadrant.index_axis(Axis(2), c).mean().unwrap_or(0.0));
            }
        }
        Ok(Array1::from(features))
    }
}

/// A flat-coloured image with a little deterministic noise.
pub fn colored_image(color: [u8; 3], size: u32, variant: u32) -> DynamicImage {
    let image = RgbImage::from_fn(size, size, |x, y| {
        let noise = ((variant * 37 + x * 3 + y * 7) % 21) as i16 - 10;
        Rgb(color.map(|c| (c as i16 + noise).clamp(0, 255) as u8))
    });
    DynamicImage::ImageRgb8(image)
}

pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// `root/<category>/<n>.png` for every category.
pub fn write_dataset(root: &Path, per_class: u32) {
    for (label, color) in CATEGORIES {
        let dir = root.join(label);
        std::fs::create_dir_all(&dir).expect("create class dir");
        for i in 0..per_class {
            colored_image(color, 32, i)
                .save(dir.join(format!("{}_{}.png", label, i)))
                .expect("write sample");
        }
    }
}
