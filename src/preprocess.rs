//! Image Preprocessing Module
//!
//! Turns an encoded image into the `[1, 3, 224, 224]` input the classifier
//! was trained on. Every constant here is part of the checkpoint contract:
//! changing the size, the resampling filter or the normalization statistics
//! silently degrades accuracy without raising any error.

use std::io::Cursor;
use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{DynamicImage, ImageReader, RgbImage};

use crate::utils::error::{Result, TriageError};

/// Square input resolution of the classifier
pub const IMAGE_SIZE: usize = 224;

/// Number of color channels
pub const CHANNELS: usize = 3;

/// Shape of a single preprocessed image, batch dimension included
pub const INPUT_SHAPE: [usize; 4] = [1, CHANNELS, IMAGE_SIZE, IMAGE_SIZE];

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A normalized, channel-first image ready for the forward pass
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl ImageTensor {
    /// Wrap externally produced data. The shape is checked at inference time.
    pub fn from_raw(data: Vec<f32>, shape: [usize; 4]) -> Self {
        Self { data, shape }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    /// Flat NCHW values
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Check the tensor is exactly what the classifier accepts
    pub fn validate(&self) -> Result<()> {
        if self.shape != INPUT_SHAPE {
            return Err(TriageError::Inference(format!(
                "expected input shape {:?}, got {:?}",
                INPUT_SHAPE, self.shape
            )));
        }
        let expected_len: usize = self.shape.iter().product();
        if self.data.len() != expected_len {
            return Err(TriageError::Inference(format!(
                "input holds {} values, shape {:?} needs {}",
                self.data.len(),
                self.shape,
                expected_len
            )));
        }
        Ok(())
    }

    /// Move the data onto a device
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Result<Tensor<B, 4>> {
        self.validate()?;
        let data = TensorData::new(self.data.clone(), self.shape);
        Ok(Tensor::<B, 4>::from_data(data, device))
    }
}

/// Decode and preprocess an image file.
///
/// The format is sniffed from the file contents, so a renamed non-image
/// fails here instead of reaching the model.
pub fn load_image(path: &Path) -> Result<ImageTensor> {
    let decode_err = |e: &dyn std::fmt::Display| {
        TriageError::Decode(format!("'{}': {}", path.display(), e))
    };

    let image = ImageReader::open(path)
        .map_err(|e| decode_err(&e))?
        .with_guessed_format()
        .map_err(|e| decode_err(&e))?
        .decode()
        .map_err(|e| decode_err(&e))?;

    Ok(preprocess(&image))
}

/// Decode and preprocess an in-memory encoded image
pub fn decode_image(bytes: &[u8]) -> Result<ImageTensor> {
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TriageError::Decode(e.to_string()))?
        .decode()?;

    Ok(preprocess(&image))
}

/// Convert to RGB, resize to 224x224 and normalize into CHW layout
pub fn preprocess(image: &DynamicImage) -> ImageTensor {
    // Alpha is dropped and grayscale replicated across the three channels.
    let rgb = image.to_rgb8();
    let resized = pil_bilinear_resize(&rgb, IMAGE_SIZE as u32, IMAGE_SIZE as u32);

    ImageTensor {
        data: normalize_image(&resized),
        shape: INPUT_SHAPE,
    }
}

/// Scale to [0, 1] and apply ImageNet normalization.
/// Returns CHW layout: [C, H, W] flattened
fn normalize_image(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let num_pixels = (width * height) as usize;

    let mut normalized = vec![0.0f32; CHANNELS * num_pixels];

    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..CHANNELS {
            let value = pixel[c] as f32 / 255.0;
            normalized[c * num_pixels + i] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    normalized
}

/// Contributing source range and weights for one output pixel
struct Coefficients {
    start: usize,
    weights: Vec<f64>,
}

/// PIL's bilinear coefficient table for one axis.
///
/// When downscaling the triangle kernel is stretched by the scale factor,
/// which is what gives PIL's resize its anti-aliasing.
fn bilinear_coefficients(in_size: u32, out_size: u32) -> Vec<Coefficients> {
    let scale = in_size as f64 / out_size as f64;
    let filter_scale = scale.max(1.0);
    let support = filter_scale;
    let inv_filter_scale = 1.0 / filter_scale;

    (0..out_size)
        .map(|out| {
            let center = (out as f64 + 0.5) * scale;
            // PIL truncates toward zero here
            let start = ((center - support + 0.5) as i64).max(0) as usize;
            let end = ((center + support + 0.5) as i64).min(in_size as i64) as usize;

            let mut weights: Vec<f64> = (start..end)
                .map(|x| {
                    let distance = ((x as f64 - center + 0.5) * inv_filter_scale).abs();
                    if distance < 1.0 {
                        1.0 - distance
                    } else {
                        0.0
                    }
                })
                .collect();

            let total: f64 = weights.iter().sum();
            if total > 0.0 {
                weights.iter_mut().for_each(|w| *w /= total);
            }

            Coefficients { start, weights }
        })
        .collect()
}

fn clamp_round(value: f64) -> u8 {
    (value + 0.5).floor().clamp(0.0, 255.0) as u8
}

fn resize_horizontal(src: &RgbImage, width: u32) -> RgbImage {
    let coefficients = bilinear_coefficients(src.width(), width);
    let mut dst = RgbImage::new(width, src.height());

    for y in 0..src.height() {
        for (x, coeff) in coefficients.iter().enumerate() {
            let mut acc = [0.0f64; 3];
            for (k, weight) in coeff.weights.iter().enumerate() {
                let pixel = src.get_pixel((coeff.start + k) as u32, y);
                for c in 0..CHANNELS {
                    acc[c] += pixel[c] as f64 * weight;
                }
            }
            dst.put_pixel(
                x as u32,
                y,
                image::Rgb([clamp_round(acc[0]), clamp_round(acc[1]), clamp_round(acc[2])]),
            );
        }
    }

    dst
}

fn resize_vertical(src: &RgbImage, height: u32) -> RgbImage {
    let coefficients = bilinear_coefficients(src.height(), height);
    let mut dst = RgbImage::new(src.width(), height);

    for (y, coeff) in coefficients.iter().enumerate() {
        for x in 0..src.width() {
            let mut acc = [0.0f64; 3];
            for (k, weight) in coeff.weights.iter().enumerate() {
                let pixel = src.get_pixel(x, (coeff.start + k) as u32);
                for c in 0..CHANNELS {
                    acc[c] += pixel[c] as f64 * weight;
                }
            }
            dst.put_pixel(
                x,
                y as u32,
                image::Rgb([clamp_round(acc[0]), clamp_round(acc[1]), clamp_round(acc[2])]),
            );
        }
    }

    dst
}

/// PIL-compatible bilinear resize (`Image.resize(size, BILINEAR)`).
///
/// Separable: horizontal pass then vertical pass, each rounded back to
/// 8-bit, and a pass is skipped when that axis keeps its size.
pub fn pil_bilinear_resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let horizontal = if image.width() != width {
        resize_horizontal(image, width)
    } else {
        image.clone()
    };

    if horizontal.height() != height {
        resize_vertical(&horizontal, height)
    } else {
        horizontal
    }
}
