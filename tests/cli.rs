//! Tests for the taknet binary.
//!
//! Spawns the CLI against small dataset and config files and checks the
//! JSON it prints.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taknet"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to start taknet")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "taknet failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

fn write(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

fn small_config(dir: &Path) -> PathBuf {
    write(
        dir,
        "config.json",
        &json!({
            "net": {
                "hidden_channels": 8,
                "value_channels": 4,
                "value_hidden": [8],
                "policy_hidden": 8,
                "seed": 5
            },
            "loader": {"batch_size": 2, "workers": 1, "seed": 5},
            "loss_weight": 0.5
        }),
    )
}

fn dataset(dir: &Path) -> PathBuf {
    let empty = vec![vec![vec![0u8; 9]; 4]; 4];
    write(
        dir,
        "out0.json",
        &json!([
            {
                "game": {"turn": 1, "board": empty},
                "moves": [{"move": "FLAT", "i": 0, "j": 0}, {"move": "WALL", "i": 1, "j": 1}],
                "p": [0.6, 0.4],
                "val": 1.0
            },
            {
                "game": {"turn": 2, "board": empty},
                "moves": [{"move": "FLAT", "i": 3, "j": 3}],
                "p": [1.0],
                "val": -1.0
            },
            {
                "game": {"turn": 1, "board": empty},
                "moves": [],
                "p": [],
                "val": 0.0
            }
        ]),
    )
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn init_writes_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let out = dir.path().join("net.cbor");
    let report = stdout_json(&run(&[
        "init",
        "--out",
        path_str(&out),
        "--config",
        path_str(&config),
    ]));
    assert!(out.exists());
    assert!(report["params"].as_u64().unwrap() > 0);
}

#[test]
fn eval_with_checkpoint_prints_summary() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let data = dataset(dir.path());
    let out = dir.path().join("net.cbor");
    stdout_json(&run(&[
        "init",
        "--out",
        path_str(&out),
        "--config",
        path_str(&config),
    ]));

    let summary = stdout_json(&run(&[
        "eval",
        "--data",
        path_str(&data),
        "--data",
        path_str(&data),
        "--checkpoint",
        path_str(&out),
        "--config",
        path_str(&config),
    ]));
    assert_eq!(summary["examples"], 6);
    assert_eq!(summary["batches"], 3);
    assert_eq!(summary["loss_weight"], 0.5);
    let policy = summary["policy_loss"].as_f64().unwrap();
    let value = summary["value_loss"].as_f64().unwrap();
    let total = summary["total_loss"].as_f64().unwrap();
    assert!(policy > 0.0);
    assert!((total - (policy + 0.5 * value)).abs() < 1e-9);
}

#[test]
fn eval_flags_override_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let data = dataset(dir.path());
    let summary = stdout_json(&run(&[
        "eval",
        "--data",
        path_str(&data),
        "--config",
        path_str(&config),
        "--batch-size",
        "3",
        "--loss-weight",
        "2",
    ]));
    assert_eq!(summary["batches"], 1);
    assert_eq!(summary["loss_weight"], 2.0);
}

#[test]
fn missing_dataset_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&[
        "eval",
        "--data",
        path_str(&dir.path().join("absent.json")),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.json"));
}

#[test]
fn invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "bad.json", &json!({"net": {"board_size": 2}}));
    let out = dir.path().join("net.cbor");
    let output = run(&["init", "--out", path_str(&out), "--config", path_str(&config)]);
    assert!(!output.status.success());
    assert!(!out.exists());
}

#[test]
fn train_writes_a_checkpoint_per_epoch_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let data = dataset(dir.path());
    let runs = dir.path().join("runs");
    let output = run(&[
        "train",
        "--data",
        path_str(&data),
        "--out",
        path_str(&runs),
        "--config",
        path_str(&config),
        "--epochs",
        "2",
        "--learning-rate",
        "0.01",
    ]);
    assert!(
        output.status.success(),
        "taknet failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let reports: Vec<Value> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["steps"], 2);
    assert_eq!(reports[1]["steps"], 4);
    assert_eq!(reports[1]["summary"]["examples"], 3);
    assert!(runs.join("epoch0.cbor").exists());
    assert!(runs.join("epoch1.cbor").exists());

    let resumed = dir.path().join("resumed");
    let output = run(&[
        "train",
        "--data",
        path_str(&data),
        "--out",
        path_str(&resumed),
        "--config",
        path_str(&config),
        "--checkpoint",
        path_str(&runs.join("epoch1.cbor")),
    ]);
    let report = stdout_json(&output);
    assert_eq!(report["epoch"], 0);
    assert_eq!(report["steps"], 6);

    let summary = stdout_json(&run(&[
        "eval",
        "--data",
        path_str(&data),
        "--checkpoint",
        path_str(&resumed.join("epoch0.cbor")),
        "--config",
        path_str(&config),
    ]));
    assert!(summary["total_loss"].as_f64().unwrap().is_finite());
}
