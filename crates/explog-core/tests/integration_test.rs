//! Integration tests for explog-core.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use explog_core::artifacts::{list_artifacts, load_checkpoint};
use explog_core::storage::{self, load_run_config};
use explog_core::{
    AllocationPolicy, ArrayArchive, ArtifactCategory, Checkpoint, ExplogError, MetricValue,
    Metrics, ModelWeights, NdArray, PngFigure, RunConfig, RunDirectoryAllocator, RunLogger,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

fn make_config(tmp: &TempDir, name: &str) -> RunConfig {
    RunConfig::new(tmp.path(), name)
}

fn fast_allocator(max_attempts: u32) -> RunDirectoryAllocator {
    RunDirectoryAllocator::new(
        AllocationPolicy::default()
            .with_max_attempts(max_attempts)
            .with_max_backoff(Duration::from_millis(5)),
    )
}

#[test]
fn test_logger_creates_run_dir_and_snapshot() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "mnist")).unwrap();

    assert_eq!(logger.run_id(), 1);
    assert_eq!(logger.root(), tmp.path().join("mnist"));
    assert_eq!(logger.dir(), tmp.path().join("mnist").join("1"));
    assert!(logger.dir().join("metadata.yaml").exists());
    assert!(logger.output_sink().is_none());
    assert!(!logger.dir().join("log.txt").exists());
}

#[test]
fn test_next_id_skips_non_integer_entries() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("exp");
    for name in ["1", "2", "5", "foo", "3.5"] {
        fs::create_dir_all(root.join(name)).unwrap();
    }

    let logger = RunLogger::new(make_config(&tmp, "exp")).unwrap();
    assert_eq!(logger.run_id(), 6);
    assert_eq!(storage::list_runs(&root).unwrap(), vec![1, 2, 5, 6]);
}

#[test]
fn test_concurrent_allocation_yields_contiguous_ids() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("parallel");
    fs::create_dir_all(root.join("3")).unwrap();
    let allocator = fast_allocator(1000);
    let (allocator, root) = (&allocator, root.as_path());
    const N: u64 = 16;

    let ids: Vec<u64> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..N)
            .map(|_| s.spawn(move || allocator.allocate(root, None).unwrap().run_id))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(unique.len() as u64, N, "every allocation must get its own id: {ids:?}");
    let expected: HashSet<u64> = (4..4 + N).collect();
    assert_eq!(unique, expected);
}

#[test]
fn test_exhausted_budget_is_distinct_error() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("blocked");
    fs::create_dir_all(&root).unwrap();
    // A regular file named "1" is never counted by the scan, so mkdir keeps colliding.
    fs::write(root.join("1"), b"").unwrap();

    let result = RunLogger::with_allocator(make_config(&tmp, "blocked"), &fast_allocator(4));
    match result {
        Err(ExplogError::AllocationExhausted { attempts, .. }) => assert_eq!(attempts, 4),
        Err(other) => panic!("expected AllocationExhausted, got {other}"),
        Ok(logger) => panic!("unexpectedly allocated run {}", logger.run_id()),
    }
}

#[test]
fn test_explicit_id_collision_fails() {
    let tmp = TempDir::new().unwrap();
    let first = RunLogger::new(make_config(&tmp, "fixed").with_log_id(7)).unwrap();
    assert_eq!(first.run_id(), 7);

    let err = RunLogger::new(make_config(&tmp, "fixed").with_log_id(7))
        .err()
        .expect("second run with the same id must fail");
    assert!(matches!(err, ExplogError::RunDirExists(_)));
}

#[test]
fn test_allocation_settings_come_from_yaml() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("yaml_exp");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("1"), b"").unwrap();

    let yaml = format!(
        "logs:\n  log_dir: {}\n  log_name: yaml_exp\n  allocation:\n    max_attempts: 2\n    max_backoff_ms: 0\n",
        tmp.path().display()
    );
    let config = RunConfig::from_yaml_str(&yaml).unwrap();
    let err = RunLogger::new(config).err().expect("allocation must fail");
    assert!(matches!(err, ExplogError::AllocationExhausted { attempts: 2, .. }));
}

#[test]
fn test_persisted_config_matches_input_plus_system_fields() {
    let tmp = TempDir::new().unwrap();
    let mut input = make_config(&tmp, "snapshot")
        .with_param("lr", 0.001)
        .with_param("optimizer", "adam");
    input
        .system
        .extra
        .insert("seed".to_string(), serde_yaml::Value::from(42));

    let logger = RunLogger::new(input.clone()).unwrap();
    let loaded = load_run_config(logger.dir()).unwrap();
    assert_eq!(&loaded, logger.config());

    assert_eq!(loaded.params, input.params);
    assert_eq!(loaded.system.extra, input.system.extra);
    assert_eq!(loaded.logs.log_name, "snapshot");
    assert_eq!(loaded.logs.log_id, Some(logger.run_id()));
    assert_eq!(loaded.logs.path.as_deref(), Some(logger.dir()));
    assert_eq!(loaded.system.process_id, Some(std::process::id()));
    assert!(loaded.system.hostname.is_some());

    let date = loaded.system.date.unwrap();
    assert_eq!(date.len(), 10, "dd/mm/YYYY, got {date}");
    assert_eq!(date.matches('/').count(), 2);
    let time = loaded.system.time.unwrap();
    assert_eq!(time.len(), 8, "HH:MM:SS, got {time}");
}

#[test]
fn test_persist_config_overwrites_snapshot() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "overwrite")).unwrap();
    let path = logger.dir().join("metadata.yaml");
    fs::write(&path, "garbage: true\n").unwrap();

    logger.persist_config().unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(!content.contains("garbage"));
    assert_eq!(&load_run_config(logger.dir()).unwrap(), logger.config());
}

#[test]
fn test_log_metrics_appends_lines_in_order() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "metrics")).unwrap();

    let mut records = vec![];
    for (step, loss) in [(10u64, 0.9), (5, 0.7), (10, 0.4)] {
        let mut m = Metrics::new();
        m.insert("loss".to_string(), MetricValue::Float(loss));
        m.insert("epoch".to_string(), MetricValue::Int(step as i64));
        logger.log_metrics(&m, "train", Some(step)).unwrap();
        records.push(serde_json::to_value(&m).unwrap());
    }

    let path = logger.dir().join("trainmetrics.json");
    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    for (line, expected) in lines.iter().zip(&records) {
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(&parsed, expected);
    }
    assert!(!logger.dir().join("metrics.json").exists());
}

#[test]
fn test_log_metrics_default_stream_and_rejects_scalars() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "default_stream")).unwrap();

    let mut values = BTreeMap::new();
    values.insert("acc", 0.5);
    logger.log_metrics(&values, "", None).unwrap();
    let rows = storage::read_metrics(&logger.dir().join("metrics.json")).unwrap();
    assert_eq!(rows, vec![serde_json::json!({"acc": 0.5})]);

    let err = logger.log_metrics(&1.5, "", None).unwrap_err();
    assert!(matches!(err, ExplogError::InvalidMetrics(_)));
}

#[test]
fn test_log_scalars_rejects_non_finite_values() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "scalars")).unwrap();

    let mut good = Metrics::new();
    good.insert("loss".to_string(), MetricValue::from(0.25));
    logger.log_scalars(&good, "val", Some(1)).unwrap();

    let mut bad = Metrics::new();
    bad.insert("loss".to_string(), MetricValue::from(f64::INFINITY));
    let err = logger.log_scalars(&bad, "val", Some(2)).unwrap_err();
    assert!(matches!(err, ExplogError::InvalidMetrics(_)));

    let rows = storage::read_metrics(&logger.dir().join("valmetrics.json")).unwrap();
    assert_eq!(rows, vec![serde_json::json!({"loss": 0.25})]);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct TrainState {
    epoch: u32,
    best_loss: f64,
    history: Vec<f64>,
}

#[test]
fn test_checkpoint_copy_is_byte_identical() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "ckpt")).unwrap();
    let state = TrainState {
        epoch: 3,
        best_loss: 0.12,
        history: vec![0.5, 0.3, 0.12],
    };

    let path = logger
        .log_artifact(&Checkpoint(&state), 3, "model", Some("best"))
        .unwrap();
    let copy = logger.dir().join("checkpoints").join("best_3.msgpack");

    assert_eq!(path, logger.dir().join("checkpoints").join("model_3.msgpack"));
    assert_eq!(fs::read(&path).unwrap(), fs::read(&copy).unwrap());
    let restored: TrainState = load_checkpoint(&copy).unwrap();
    assert_eq!(restored, state);
}

#[test]
fn test_checkpoint_copy_onto_itself_keeps_bytes() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "same_tag")).unwrap();
    let state = vec![1.0_f64, 2.0, 3.0];

    let path = logger
        .log_artifact(&Checkpoint(&state), 1, "latest", Some("latest"))
        .unwrap();

    let bytes = fs::read(&path).unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(bytes, rmp_serde::to_vec_named(&state).unwrap());
    let restored: Vec<f64> = load_checkpoint(&path).unwrap();
    assert_eq!(restored, state);
    assert_eq!(fs::read_dir(logger.dir().join("checkpoints")).unwrap().count(), 1);
}

#[test]
fn test_copy_tag_ignored_outside_checkpoints() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "nocopy")).unwrap();
    let mut archive = ArrayArchive::new();
    archive.insert("x", vec![1.0_f64, 2.0]);

    logger.log_artifact(&archive, 1, "preds", Some("best")).unwrap();
    assert!(logger.dir().join("arrays").join("preds_1.arrow").exists());
    assert!(!logger.dir().join("arrays").join("best_1.arrow").exists());
}

fn tiny_png() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes
}

fn assert_in(dir: &Path, category: &str, file: &str) {
    let path = dir.join(category).join(file);
    assert!(path.is_file(), "{} should exist", path.display());
}

#[test]
fn test_artifacts_land_in_category_dirs() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "artifacts")).unwrap();

    let mut arrays = ArrayArchive::new();
    arrays.insert("confusion", NdArray::new(vec![2, 2], vec![5.0, 1.0, 0.0, 6.0]).unwrap());
    logger.log_artifact(&arrays, 2, "eval", None).unwrap();

    let figure = PngFigure::from_bytes(tiny_png()).unwrap();
    logger.log_artifact(&figure, 2, "loss_curve", None).unwrap();

    let mut weights = ModelWeights::new();
    weights.insert("linear.weight", vec![1, 2], vec![0.25, -0.5]).unwrap();
    logger.log_artifact(&weights, 2, "net", None).unwrap();

    let dir = logger.dir();
    assert_in(dir, "arrays", "eval_2.arrow");
    assert_in(dir, "figures", "loss_curve_2.png");
    assert_in(dir, "torch_models", "net_2.msgpack");

    assert_eq!(ArrayArchive::load(&dir.join("arrays/eval_2.arrow")).unwrap(), arrays);
    assert_eq!(fs::read(dir.join("figures/loss_curve_2.png")).unwrap(), tiny_png());
    assert_eq!(ModelWeights::load(&dir.join("torch_models/net_2.msgpack")).unwrap(), weights);

    let listed = list_artifacts(dir).unwrap();
    let summary: Vec<(ArtifactCategory, &str, u64)> = listed
        .iter()
        .map(|a| (a.category, a.tag.as_str(), a.step))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ArtifactCategory::Arrays, "eval", 2),
            (ArtifactCategory::Figures, "loss_curve", 2),
            (ArtifactCategory::TorchModels, "net", 2),
        ]
    );
}

#[test]
fn test_unknown_category_fails_fast() {
    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "paths")).unwrap();

    let path = logger.artifact_path("checkpoints", "last", 9).unwrap();
    assert_eq!(path, logger.dir().join("checkpoints").join("last_9.msgpack"));

    let err = logger.artifact_path("videos", "clip", 1).unwrap_err();
    assert!(matches!(err, ExplogError::UnsupportedCategory(name) if name == "videos"));
}

#[test]
fn test_log_to_file_opens_run_sink() {
    use std::io::Write;

    let tmp = TempDir::new().unwrap();
    let logger = RunLogger::new(make_config(&tmp, "to_file").with_log_to_file(true)).unwrap();
    let sink = logger.output_sink().expect("sink should be open");
    assert_eq!(sink.path(), logger.dir().join("log.txt"));

    let mut out = sink.clone();
    writeln!(out, "epoch 1 done").unwrap();
    let content = fs::read_to_string(logger.dir().join("log.txt")).unwrap();
    assert_eq!(content, "epoch 1 done\n");

    let loaded = load_run_config(logger.dir()).unwrap();
    assert!(loaded.logs.log_to_file);
}

#[test]
fn test_invalid_config_is_rejected_before_allocation() {
    let tmp = TempDir::new().unwrap();
    let config = make_config(&tmp, "");
    let err = RunLogger::new(config).err().expect("empty log_name must fail");
    assert!(matches!(err, ExplogError::InvalidConfig(_)));
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}
