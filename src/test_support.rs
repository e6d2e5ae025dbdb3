//! Fixtures shared by the unit tests: a reduced ResNeXt, checkpoint writers
//! and generated images.

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use burn_store::{BurnToPyTorchAdapter, ModuleSnapshot, SafetensorsStore};
use image::{DynamicImage, Rgb, RgbImage};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};

use crate::classifier::Classifier;
use crate::model::{ResNeXt, ResNeXtConfig};
use crate::preprocess::preprocess;

pub type TestBackend = burn_ndarray::NdArray<f32>;

/// One block per stage and cardinality 2: same parameter naming as the full
/// network at a fraction of the cost
pub fn tiny_config() -> ResNeXtConfig {
    ResNeXtConfig::resnext50_32x4d()
        .with_layers([1, 1, 1, 1])
        .with_groups(2)
}

pub fn tiny_classifier() -> Classifier<TestBackend> {
    let device = Default::default();
    let model = tiny_config().init::<TestBackend>(&device);
    Classifier::from_model(model, device).unwrap()
}

/// Deterministic synthetic scan
pub fn scan_image(width: u32, height: u32, seed: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = (x.wrapping_mul(7) ^ y.wrapping_mul(13)).wrapping_add(seed.wrapping_mul(31));
        Rgb([(v % 256) as u8, ((v / 3) % 256) as u8, ((x + y + seed) % 256) as u8])
    })
}

pub fn write_png(dir: &Path, name: &str, width: u32, height: u32, seed: u32) -> PathBuf {
    let path = dir.join(name);
    scan_image(width, height, seed).save(&path).unwrap();
    path
}

/// Softmax output of `model` on a fixed input
pub fn forward_probabilities<B: Backend>(model: &ResNeXt<B>) -> Vec<f32> {
    let device = B::Device::default();
    let input = preprocess(&DynamicImage::ImageRgb8(scan_image(96, 80, 1)))
        .to_tensor::<B>(&device)
        .unwrap();
    model
        .forward_softmax(input)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap()
}

/// Save `model` as a safetensors checkpoint with PyTorch tensor conventions
pub fn write_checkpoint<B: Backend>(model: &ResNeXt<B>, dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let mut store = SafetensorsStore::from_file(&path).with_to_adapter(BurnToPyTorchAdapter);
    model.save_into(&mut store).unwrap();
    path
}

/// Copy a safetensors file, renaming (or dropping, on `None`) every key
pub fn rewrite_checkpoint(
    src: &Path,
    dir: &Path,
    name: &str,
    rename: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    let bytes = std::fs::read(src).unwrap();
    let tensors = SafeTensors::deserialize(&bytes).unwrap();
    let renamed: Vec<(String, TensorView<'_>)> = tensors
        .tensors()
        .into_iter()
        .filter_map(|(key, view)| rename(&key).map(|key| (key, view)))
        .collect();

    let path = dir.join(name);
    std::fs::write(&path, safetensors::serialize(renamed, &None).unwrap()).unwrap();
    path
}

/// Copy a safetensors file, adding a PyTorch `num_batches_tracked` counter
/// for each listed batch-norm module
pub fn add_batch_counters(src: &Path, dir: &Path, name: &str, modules: &[&str]) -> PathBuf {
    let bytes = std::fs::read(src).unwrap();
    let tensors = SafeTensors::deserialize(&bytes).unwrap();
    let counter = 1i64.to_le_bytes();

    let mut entries: Vec<(String, TensorView<'_>)> = tensors.tensors();
    for module in modules {
        let view = TensorView::new(Dtype::I64, vec![], &counter).unwrap();
        entries.push((format!("{}.num_batches_tracked", module), view));
    }

    let path = dir.join(name);
    std::fs::write(&path, safetensors::serialize(entries, &None).unwrap()).unwrap();
    path
}

/// Torchvision container names for a Burn parameter path
pub fn torchvision_key(key: &str) -> String {
    key.replace(".downsample.conv.", ".downsample.0.")
        .replace(".downsample.bn.", ".downsample.1.")
        .replace("fc.linear.", "fc.1.")
}

/// Batch-norm modules present in a safetensors checkpoint
pub fn batch_norm_modules(src: &Path) -> Vec<String> {
    let bytes = std::fs::read(src).unwrap();
    let tensors = SafeTensors::deserialize(&bytes).unwrap();
    let mut modules: Vec<String> = tensors
        .names()
        .into_iter()
        .filter_map(|key| key.strip_suffix(".running_mean").map(str::to_string))
        .collect();
    modules.sort();
    modules
}

/// Where the state dict sits in a written `.pth` file
#[derive(Debug, Clone, Copy)]
pub enum PthLayout {
    Raw,
    /// Under `model_state_dict`, next to training metadata
    Wrapped,
}

/// Minimal protocol 2 pickle emitter covering what `torch.save` writes for a
/// state dict
#[derive(Default)]
struct Pickler {
    out: Vec<u8>,
}

impl Pickler {
    fn op(&mut self, code: u8) {
        self.out.push(code);
    }

    fn global(&mut self, module: &str, name: &str) {
        self.op(b'c');
        self.out.extend_from_slice(module.as_bytes());
        self.op(b'\n');
        self.out.extend_from_slice(name.as_bytes());
        self.op(b'\n');
    }

    fn string(&mut self, value: &str) {
        self.op(b'X');
        self.out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.out.extend_from_slice(value.as_bytes());
    }

    fn int(&mut self, value: i32) {
        self.op(b'J');
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn int_tuple(&mut self, values: &[usize]) {
        if values.is_empty() {
            self.op(b')');
            return;
        }
        self.op(b'(');
        for value in values {
            self.int(*value as i32);
        }
        self.op(b't');
    }

    fn ordered_dict(&mut self) {
        self.global("collections", "OrderedDict");
        self.op(b')');
        self.op(b'R');
    }

    /// `torch._utils._rebuild_tensor_v2` over a persistent storage reference
    fn tensor(&mut self, storage_key: &str, storage_type: &str, shape: &[usize]) {
        let numel: usize = shape.iter().product();
        let mut strides = vec![1usize; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }

        self.global("torch._utils", "_rebuild_tensor_v2");
        self.op(b'(');
        self.op(b'(');
        self.string("storage");
        self.global("torch", storage_type);
        self.string(storage_key);
        self.string("cpu");
        self.int(numel as i32);
        self.op(b't');
        self.op(b'Q');
        self.int(0);
        self.int_tuple(shape);
        self.int_tuple(&strides);
        self.op(0x89);
        self.ordered_dict();
        self.op(b't');
        self.op(b'R');
    }
}

/// Re-encode a safetensors checkpoint as a `torch.save` zip archive,
/// renaming (or dropping, on `None`) every key
pub fn write_pth(
    src: &Path,
    dir: &Path,
    name: &str,
    layout: PthLayout,
    rename: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let bytes = std::fs::read(src).unwrap();
    let tensors = SafeTensors::deserialize(&bytes).unwrap();
    let mut entries: Vec<(String, TensorView<'_>)> = tensors
        .tensors()
        .into_iter()
        .filter_map(|(key, view)| rename(&key).map(|key| (key, view)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut pickle = Pickler::default();
    pickle.op(0x80);
    pickle.op(2);
    if let PthLayout::Wrapped = layout {
        pickle.op(b'}');
        pickle.op(b'(');
        pickle.string("model_state_dict");
    }
    pickle.ordered_dict();
    pickle.op(b'(');
    for (index, (key, view)) in entries.iter().enumerate() {
        let storage_type = match view.dtype() {
            Dtype::F32 => "FloatStorage",
            Dtype::I64 => "LongStorage",
            other => panic!("no torch storage for {:?}", other),
        };
        pickle.string(key);
        pickle.tensor(&index.to_string(), storage_type, view.shape());
    }
    pickle.op(b'u');
    if let PthLayout::Wrapped = layout {
        pickle.string("epoch");
        pickle.int(12);
        pickle.string("arch");
        pickle.string("resnext50_32x4d");
        pickle.op(b'u');
    }
    pickle.op(b'.');

    let path = dir.join(name);
    let mut archive = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    archive.start_file("archive/data.pkl", options).unwrap();
    archive.write_all(&pickle.out).unwrap();
    archive.start_file("archive/byteorder", options).unwrap();
    archive.write_all(b"little").unwrap();
    for (index, (_, view)) in entries.iter().enumerate() {
        archive
            .start_file(format!("archive/data/{}", index), options)
            .unwrap();
        archive.write_all(view.data()).unwrap();
    }
    archive.start_file("archive/version", options).unwrap();
    archive.write_all(b"3\n").unwrap();
    archive.finish().unwrap();
    path
}
