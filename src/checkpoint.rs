//! Checkpoint Loading
//!
//! Restores trained weights into a freshly built [`ResNeXt`].
//!
//! Supported inputs:
//! - PyTorch pickles written by `torch.save`, either a bare state dict or a
//!   training checkpoint holding it under [`WRAPPED_STATE_KEY`]
//! - safetensors files exported from the same state dict
//!
//! Keys go through an ordered list of [`KEY_RULES`] before being matched
//! against the network. Matching is strict: a missing parameter, a leftover
//! tensor or a shape error rejects the whole checkpoint.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::tensor::backend::Backend;
use burn_store::{ApplyResult, ModuleSnapshot, PyTorchToBurnAdapter, PytorchStore, SafetensorsStore};
use serde::Serialize;
use tracing::{debug, info};

use crate::model::{ResNeXt, ResNeXtConfig};
use crate::utils::error::{MismatchReport, Result, TriageError};

/// Prefix `torch.nn.DataParallel` / `DistributedDataParallel` put on every key
pub const DISTRIBUTED_PREFIX: &str = "module.";

/// Entry holding the state dict in wrapped training checkpoints
pub const WRAPPED_STATE_KEY: &str = "model_state_dict";

/// PyTorch buffers with no parameter in the network
const UNMAPPED_BUFFERS: [&str; 1] = ["num_batches_tracked"];

/// One regex rewrite applied to every checkpoint key
#[derive(Debug, Clone, Copy)]
pub struct KeyRule {
    pub pattern: &'static str,
    pub replacement: &'static str,
}

/// Key normalization, applied in order by the checkpoint stores
pub const KEY_RULES: [KeyRule; 6] = [
    // Must stay first and match DISTRIBUTED_PREFIX
    KeyRule {
        pattern: r"^module\.",
        replacement: "",
    },
    KeyRule {
        pattern: r"\.downsample\.0\.",
        replacement: ".downsample.conv.",
    },
    KeyRule {
        pattern: r"\.downsample\.1\.",
        replacement: ".downsample.bn.",
    },
    KeyRule {
        pattern: r"^fc\.1\.",
        replacement: "fc.linear.",
    },
    // Batch norm affine parameters; must follow the downsample rules
    KeyRule {
        pattern: r"(^|\.)(bn\d*)\.weight$",
        replacement: "${1}${2}.gamma",
    },
    KeyRule {
        pattern: r"(^|\.)(bn\d*)\.bias$",
        replacement: "${1}${2}.beta",
    },
];

fn is_unmapped_buffer(key: &str) -> bool {
    UNMAPPED_BUFFERS
        .iter()
        .any(|buffer| key.rsplit('.').next() == Some(*buffer))
}

/// On-disk checkpoint encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointFormat {
    PyTorch,
    Safetensors,
}

impl CheckpointFormat {
    /// `.safetensors` files are safetensors, anything else is a `torch.save` pickle
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("safetensors") => CheckpointFormat::Safetensors,
            _ => CheckpointFormat::PyTorch,
        }
    }
}

/// Where the state dict sat inside the checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateLayout {
    /// The file is the state dict itself
    Raw,
    /// The state dict sits under [`WRAPPED_STATE_KEY`]
    Wrapped,
}

/// Summary of a successful load
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub path: PathBuf,
    pub format: CheckpointFormat,
    pub layout: StateLayout,
    /// Tensors copied into the network
    pub applied: usize,
    /// Checkpoint buffers skipped because the network has no slot for them
    pub ignored_buffers: usize,
    pub load_time_ms: f64,
}

/// Build the network described by `config` and fill it from `path`.
///
/// Errors:
/// - [`TriageError::CheckpointNotFound`] if `path` is not a readable file
/// - [`TriageError::CorruptCheckpoint`] if the file cannot be parsed
/// - [`TriageError::ArchitectureMismatch`] if keys or shapes disagree with the network
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    config: &ResNeXtConfig,
    device: &B::Device,
) -> Result<(ResNeXt<B>, LoadReport)> {
    ensure_readable(path)?;

    let start = Instant::now();
    let format = CheckpointFormat::from_path(path);
    let mut model = config.init::<B>(device);

    let (result, layout) = match format {
        CheckpointFormat::PyTorch => apply_pytorch(&mut model, path)?,
        CheckpointFormat::Safetensors => (apply_safetensors(&mut model, path)?, StateLayout::Raw),
    };

    let ignored_buffers = verify_strict(&result)?;

    let report = LoadReport {
        path: path.to_path_buf(),
        format,
        layout,
        applied: result.applied.len(),
        ignored_buffers,
        load_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    info!(
        "Loaded {} tensors from {:?} ({:?}, {:?} layout) in {:.0} ms",
        report.applied, report.path, report.format, report.layout, report.load_time_ms
    );

    Ok((model, report))
}

fn ensure_readable(path: &Path) -> Result<()> {
    let not_found = || TriageError::CheckpointNotFound(path.to_path_buf());

    if !path.is_file() {
        return Err(not_found());
    }
    File::open(path).map_err(|_| not_found())?;
    Ok(())
}

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> TriageError {
    TriageError::CorruptCheckpoint {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn pytorch_store(path: &Path, top_level_key: Option<&str>) -> PytorchStore {
    // Shape errors land in ApplyResult.errors and are classified by verify_strict
    let mut store = PytorchStore::from_file(path)
        .allow_partial(true)
        .validate(false);
    if let Some(key) = top_level_key {
        store = store.with_top_level_key(key);
    }
    for rule in KEY_RULES {
        store = store.with_key_remapping(rule.pattern, rule.replacement);
    }
    store
}

/// Try the wrapped layout first, then the bare state dict
fn apply_pytorch<B: Backend>(
    model: &mut ResNeXt<B>,
    path: &Path,
) -> Result<(ApplyResult, StateLayout)> {
    let mut wrapped = pytorch_store(path, Some(WRAPPED_STATE_KEY));
    match model.load_from(&mut wrapped) {
        Ok(result) if !result.applied.is_empty() => return Ok((result, StateLayout::Wrapped)),
        Ok(_) => debug!(
            "'{}' in {:?} holds no network tensors, reading it as a bare state dict",
            WRAPPED_STATE_KEY, path
        ),
        Err(err) => debug!(
            "No '{}' entry in {:?} ({}), reading it as a bare state dict",
            WRAPPED_STATE_KEY, path, err
        ),
    }

    let mut raw = pytorch_store(path, None);
    let result = model.load_from(&mut raw).map_err(|e| corrupt(path, e))?;
    Ok((result, StateLayout::Raw))
}

fn apply_safetensors<B: Backend>(model: &mut ResNeXt<B>, path: &Path) -> Result<ApplyResult> {
    let mut store = SafetensorsStore::from_file(path)
        .with_from_adapter(PyTorchToBurnAdapter)
        .allow_partial(true)
        .validate(false);
    for rule in KEY_RULES {
        store = store.with_key_remapping(rule.pattern, rule.replacement);
    }

    model.load_from(&mut store).map_err(|e| corrupt(path, e))
}

/// Reject anything short of an exact key and shape match.
/// Returns the number of ignored PyTorch buffers.
fn verify_strict(result: &ApplyResult) -> Result<usize> {
    let (ignored, unexpected): (Vec<String>, Vec<String>) = result
        .unused
        .iter()
        .cloned()
        .partition(|key| is_unmapped_buffer(key));

    let report = MismatchReport {
        missing: result.missing.clone(),
        unexpected,
        errors: result.errors.iter().map(|e| format!("{:?}", e)).collect(),
    };

    if !report.is_clean() || result.applied.is_empty() {
        return Err(TriageError::ArchitectureMismatch(report));
    }

    Ok(ignored.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        add_batch_counters, batch_norm_modules, forward_probabilities, rewrite_checkpoint,
        tiny_config, torchvision_key, write_checkpoint, write_pth, PthLayout, TestBackend,
    };
    use tempfile::TempDir;

    /// Apply [`KEY_RULES`] the way the checkpoint stores do
    fn remap(key: &str) -> String {
        KEY_RULES.iter().fold(key.to_string(), |key, rule| {
            regex::Regex::new(rule.pattern)
                .unwrap()
                .replace_all(&key, rule.replacement)
                .into_owned()
        })
    }

    #[test]
    fn test_key_rules_compile() {
        for rule in KEY_RULES {
            assert!(regex::Regex::new(rule.pattern).is_ok(), "bad pattern {}", rule.pattern);
        }
    }

    #[test]
    fn test_distributed_prefix_rule_matches_constant() {
        let key = format!("{}conv1.weight", DISTRIBUTED_PREFIX);
        assert_eq!(remap(&key), "conv1.weight");
    }

    #[test]
    fn test_key_rules_map_torchvision_names() {
        assert_eq!(
            remap("module.layer2.0.downsample.0.weight"),
            "layer2.0.downsample.conv.weight"
        );
        assert_eq!(
            remap("layer2.0.downsample.1.running_var"),
            "layer2.0.downsample.bn.running_var"
        );
        assert_eq!(
            remap("layer1.0.downsample.1.bias"),
            "layer1.0.downsample.bn.beta"
        );
        assert_eq!(remap("module.fc.1.weight"), "fc.linear.weight");
        assert_eq!(remap("bn1.weight"), "bn1.gamma");
        assert_eq!(remap("layer1.0.bn1.bias"), "layer1.0.bn1.beta");
        assert_eq!(remap("layer4.0.bn3.weight"), "layer4.0.bn3.gamma");
        assert_eq!(remap("layer1.0.bn2.running_mean"), "layer1.0.bn2.running_mean");
        assert_eq!(remap("conv1.weight"), "conv1.weight");
        assert_eq!(remap("layer1.0.conv2.bias"), "layer1.0.conv2.bias");
    }

    #[test]
    fn test_prefix_is_only_stripped_at_start() {
        assert_eq!(remap("layer1.module.weight"), "layer1.module.weight");
        assert_eq!(remap("module.module.fc.1.bias"), "module.fc.1.bias");
    }

    #[test]
    fn test_unmapped_buffers() {
        assert!(is_unmapped_buffer("bn1.num_batches_tracked"));
        assert!(is_unmapped_buffer("layer3.1.bn2.num_batches_tracked"));
        assert!(!is_unmapped_buffer("bn1.running_mean"));
        assert!(!is_unmapped_buffer("num_batches_tracked_extra"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            CheckpointFormat::from_path(Path::new("best.safetensors")),
            CheckpointFormat::Safetensors
        );
        assert_eq!(
            CheckpointFormat::from_path(Path::new("BEST.SafeTensors")),
            CheckpointFormat::Safetensors
        );
        assert_eq!(
            CheckpointFormat::from_path(Path::new("best_resnext50_model.pth")),
            CheckpointFormat::PyTorch
        );
        assert_eq!(CheckpointFormat::from_path(Path::new("weights")), CheckpointFormat::PyTorch);
    }

    #[test]
    fn test_missing_checkpoint() {
        let device = Default::default();
        let result = load_checkpoint::<TestBackend>(
            Path::new("/nonexistent/best_resnext50_model.pth"),
            &tiny_config(),
            &device,
        );
        assert!(matches!(result, Err(TriageError::CheckpointNotFound(_))));
    }

    #[test]
    fn test_directory_is_not_a_checkpoint() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let result = load_checkpoint::<TestBackend>(dir.path(), &tiny_config(), &device);
        assert!(matches!(result, Err(TriageError::CheckpointNotFound(_))));
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.pth");
        std::fs::write(&path, b"not a pickle at all").unwrap();

        let device = Default::default();
        let result = load_checkpoint::<TestBackend>(&path, &tiny_config(), &device);
        assert!(matches!(result, Err(TriageError::CorruptCheckpoint { .. })));
    }

    #[test]
    fn test_round_trip_restores_weights() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let path = write_checkpoint(&source, dir.path(), "plain.safetensors");

        let (loaded, report) = load_checkpoint::<TestBackend>(&path, &tiny_config(), &device).unwrap();

        assert_eq!(report.format, CheckpointFormat::Safetensors);
        assert_eq!(report.ignored_buffers, 0);
        assert!(report.applied > 0);
        assert_eq!(forward_probabilities(&loaded), forward_probabilities(&source));
    }

    #[test]
    fn test_distributed_prefix_is_transparent() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let plain = write_checkpoint(&source, dir.path(), "plain.safetensors");
        let prefixed = rewrite_checkpoint(&plain, dir.path(), "ddp.safetensors", |key| {
            Some(format!("{}{}", DISTRIBUTED_PREFIX, key))
        });

        let (from_plain, plain_report) =
            load_checkpoint::<TestBackend>(&plain, &tiny_config(), &device).unwrap();
        let (from_prefixed, prefixed_report) =
            load_checkpoint::<TestBackend>(&prefixed, &tiny_config(), &device).unwrap();

        assert_eq!(plain_report.applied, prefixed_report.applied);
        assert_eq!(
            forward_probabilities(&from_plain),
            forward_probabilities(&from_prefixed)
        );
    }

    #[test]
    fn test_torchvision_container_names_and_buffers() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let plain = write_checkpoint(&source, dir.path(), "plain.safetensors");
        let torchvision = rewrite_checkpoint(&plain, dir.path(), "tv.safetensors", |key| {
            Some(torchvision_key(key))
        });
        let with_counters = add_batch_counters(
            &torchvision,
            dir.path(),
            "tv_counters.safetensors",
            &["bn1", "layer1.0.bn1"],
        );

        let (loaded, report) =
            load_checkpoint::<TestBackend>(&with_counters, &tiny_config(), &device).unwrap();

        assert_eq!(report.ignored_buffers, 2);
        assert_eq!(forward_probabilities(&loaded), forward_probabilities(&source));
    }

    #[test]
    fn test_missing_key_is_architecture_mismatch() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let plain = write_checkpoint(&source, dir.path(), "plain.safetensors");
        let partial = rewrite_checkpoint(&plain, dir.path(), "partial.safetensors", |key| {
            (key != "fc.linear.bias").then(|| key.to_string())
        });

        match load_checkpoint::<TestBackend>(&partial, &tiny_config(), &device) {
            Err(TriageError::ArchitectureMismatch(report)) => {
                assert_eq!(report.missing.len(), 1);
                assert!(report.missing[0].contains("fc.linear.bias"));
            }
            other => panic!("expected ArchitectureMismatch, got {:?}", other.map(|(_, r)| r)),
        }
    }

    #[test]
    fn test_unknown_key_is_architecture_mismatch() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let plain = write_checkpoint(&source, dir.path(), "plain.safetensors");
        let renamed = rewrite_checkpoint(&plain, dir.path(), "renamed.safetensors", |key| {
            Some(key.replace("fc.linear.", "head."))
        });

        match load_checkpoint::<TestBackend>(&renamed, &tiny_config(), &device) {
            Err(TriageError::ArchitectureMismatch(report)) => {
                assert!(report.unexpected.iter().any(|k| k.starts_with("head.")));
                assert!(report.missing.iter().any(|k| k.contains("fc.linear")));
            }
            other => panic!("expected ArchitectureMismatch, got {:?}", other.map(|(_, r)| r)),
        }
    }

    #[test]
    fn test_wrong_class_count_is_architecture_mismatch() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let five_classes = tiny_config().with_num_classes(5).init::<TestBackend>(&device);
        let path = write_checkpoint(&five_classes, dir.path(), "five.safetensors");

        match load_checkpoint::<TestBackend>(&path, &tiny_config(), &device) {
            Err(TriageError::ArchitectureMismatch(report)) => {
                assert!(report.errors.iter().any(|e| e.contains("fc.linear")));
            }
            other => panic!("expected ArchitectureMismatch, got {:?}", other.map(|(_, r)| r)),
        }
    }

    /// Safetensors export of `source` in torchvision naming with a batch
    /// counter on every batch norm, as `torch.save` writes a state dict
    fn torchvision_state(source: &ResNeXt<TestBackend>, dir: &Path) -> (PathBuf, usize) {
        let plain = write_checkpoint(source, dir, "plain.safetensors");
        let modules: Vec<String> = batch_norm_modules(&plain)
            .iter()
            .map(|module| torchvision_key(&format!("{}.", module)).trim_end_matches('.').to_string())
            .collect();
        let modules: Vec<&str> = modules.iter().map(String::as_str).collect();
        let renamed = rewrite_checkpoint(&plain, dir, "tv.safetensors", |key| Some(torchvision_key(key)));
        let full = add_batch_counters(&renamed, dir, "tv_full.safetensors", &modules);
        (full, modules.len())
    }

    #[test]
    fn test_pth_bare_state_dict() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let (state, counters) = torchvision_state(&source, dir.path());
        let path = write_pth(&state, dir.path(), "raw.pth", PthLayout::Raw, |k| Some(k.to_string()));

        let (loaded, report) = load_checkpoint::<TestBackend>(&path, &tiny_config(), &device).unwrap();

        assert_eq!(report.format, CheckpointFormat::PyTorch);
        assert_eq!(report.layout, StateLayout::Raw);
        assert_eq!(report.ignored_buffers, counters);
        assert_eq!(forward_probabilities(&loaded), forward_probabilities(&source));
    }

    #[test]
    fn test_pth_wrapped_training_checkpoint() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let (state, counters) = torchvision_state(&source, dir.path());
        let path = write_pth(&state, dir.path(), "best_resnext50_model.pth", PthLayout::Wrapped, |k| {
            Some(k.to_string())
        });

        let (loaded, report) = load_checkpoint::<TestBackend>(&path, &tiny_config(), &device).unwrap();

        assert_eq!(report.layout, StateLayout::Wrapped);
        assert_eq!(report.ignored_buffers, counters);
        assert_eq!(forward_probabilities(&loaded), forward_probabilities(&source));
    }

    #[test]
    fn test_pth_distributed_prefix() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let (state, _) = torchvision_state(&source, dir.path());
        let path = write_pth(&state, dir.path(), "ddp.pth", PthLayout::Wrapped, |k| {
            Some(format!("{}{}", DISTRIBUTED_PREFIX, k))
        });

        let (loaded, report) = load_checkpoint::<TestBackend>(&path, &tiny_config(), &device).unwrap();

        assert_eq!(report.layout, StateLayout::Wrapped);
        assert_eq!(forward_probabilities(&loaded), forward_probabilities(&source));
    }

    #[test]
    fn test_pth_wrapped_missing_key_is_architecture_mismatch() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TestBackend>(&device);
        let (state, _) = torchvision_state(&source, dir.path());
        let path = write_pth(&state, dir.path(), "partial.pth", PthLayout::Wrapped, |k| {
            (k != "fc.1.bias").then(|| k.to_string())
        });

        match load_checkpoint::<TestBackend>(&path, &tiny_config(), &device) {
            Err(TriageError::ArchitectureMismatch(report)) => {
                assert_eq!(report.missing.len(), 1);
                assert!(report.missing[0].contains("fc.linear.bias"));
                assert!(report.unexpected.is_empty());
            }
            other => panic!("expected ArchitectureMismatch, got {:?}", other.map(|(_, r)| r)),
        }
    }

    #[test]
    fn test_pth_wrapped_wrong_head_is_architecture_mismatch() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let five_classes = tiny_config().with_num_classes(5).init::<TestBackend>(&device);
        let (state, _) = torchvision_state(&five_classes, dir.path());
        let path = write_pth(&state, dir.path(), "five.pth", PthLayout::Wrapped, |k| Some(k.to_string()));

        match load_checkpoint::<TestBackend>(&path, &tiny_config(), &device) {
            Err(TriageError::ArchitectureMismatch(report)) => {
                assert!(report.errors.iter().any(|e| e.contains("fc.linear")));
            }
            other => panic!("expected ArchitectureMismatch, got {:?}", other.map(|(_, r)| r)),
        }
    }
}
