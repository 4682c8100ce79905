use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tfb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tfb");
    path
}

const CORRECTIONS: &str = r#"[
  {
    "trade_category": "electrical",
    "document_category": "bid",
    "correction": {"correction_kind": "description", "original": "Cu wire", "corrected": "Copper wire"},
    "text_snippet": "Call John Smith at 555-123-4567 about copper wire pricing",
    "original_confidence": 0.72
  },
  {
    "trade_category": "electrical",
    "document_category": "bid",
    "correction": {"correction_kind": "price", "original": {"total_price": 7500}, "corrected": {"total_price": 8200}},
    "original_confidence": 0.9
  },
  {
    "trade_category": "",
    "document_category": "bid",
    "correction": {"correction_kind": "exclusion_flag", "original": false, "corrected": true}
  }
]"#;

fn write_config(root: &Path, provider: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/tfb.sqlite"

[embedding]
provider = "{}"
model = "hash-v1"
dims = 64

[patterns]
promotion_threshold = 10
"#,
        root.display(),
        provider
    );

    let config_path = config_dir.join("tfb.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("corrections.json"), CORRECTIONS).unwrap();
    let config_path = write_config(&root, "hashing");
    (tmp, config_path)
}

fn run_tfb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tfb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tfb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Contribution ids printed by `tfb contribute`.
fn contributed_ids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|tok| tok.len() == 36 && tok.matches('-').count() == 4)
        .map(String::from)
        .collect()
}

/// init + contribute + approve everything valid.
fn setup_with_approved() -> (TempDir, PathBuf, Vec<String>) {
    let (tmp, config_path) = setup_test_env();
    let corrections = tmp.path().join("corrections.json");

    let (_, _, ok) = run_tfb(&config_path, &["init"]);
    assert!(ok, "init failed");
    let (stdout, stderr, ok) = run_tfb(&config_path, &["contribute", corrections.to_str().unwrap()]);
    assert!(ok, "contribute failed: stdout={}, stderr={}", stdout, stderr);

    let ids = contributed_ids(&stdout);
    for id in &ids {
        let (stdout, stderr, ok) = run_tfb(&config_path, &["moderate", id, "approve"]);
        assert!(ok, "moderate failed: stdout={}, stderr={}", stdout, stderr);
    }
    (tmp, config_path, ids)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_tfb(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_tfb(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_tfb(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_contribute_stores_valid_and_skips_invalid() {
    let (tmp, config_path) = setup_test_env();
    let corrections = tmp.path().join("corrections.json");

    run_tfb(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_tfb(&config_path, &["contribute", corrections.to_str().unwrap()]);
    assert!(success, "contribute failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("stored: 2"));
    assert!(stdout.contains("invalid: 1"));
    assert_eq!(contributed_ids(&stdout).len(), 2);
}

#[test]
fn test_pending_shows_redacted_snippets() {
    let (tmp, config_path) = setup_test_env();
    let corrections = tmp.path().join("corrections.json");

    run_tfb(&config_path, &["init"]);
    run_tfb(&config_path, &["contribute", corrections.to_str().unwrap()]);

    let (stdout, _, success) = run_tfb(&config_path, &["pending"]);
    assert!(success);
    assert!(stdout.contains("electrical"));
    assert!(stdout.contains("[PHONE]"));
    assert!(!stdout.contains("555-123-4567"));
}

#[test]
fn test_moderate_twice_fails() {
    let (_tmp, config_path, ids) = setup_with_approved();

    let (_, stderr, success) = run_tfb(&config_path, &["moderate", &ids[0], "reject"]);
    assert!(!success, "second moderation should fail");
    assert!(stderr.contains("already approved"), "stderr: {}", stderr);

    let (_, _, success) = run_tfb(
        &config_path,
        &["moderate", "00000000-0000-0000-0000-000000000000", "approve"],
    );
    assert!(!success, "unknown id should fail");
}

#[test]
fn test_nightly_reports_both_jobs() {
    let (_tmp, config_path, _) = setup_with_approved();

    let (stdout, stderr, success) = run_tfb(&config_path, &["nightly"]);
    assert!(success, "nightly failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("analyze"));
    assert!(stdout.contains("new: 1"));
    assert!(stdout.contains("calibrate"));
    assert!(stdout.contains("insufficient_samples"));

    let (stdout, _, success) = run_tfb(&config_path, &["patterns", "--trade", "electrical"]);
    assert!(success);
    assert!(stdout.contains("cu_wire"));
}

#[test]
fn test_embed_then_retrieve() {
    let (_tmp, config_path, _) = setup_with_approved();

    let (stdout, stderr, success) = run_tfb(&config_path, &["embed", "pending", "--drain"]);
    assert!(success, "embed failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("embedded: 2"));
    assert!(stdout.contains("failed: 0"));

    // Nothing left on the second run
    let (stdout, _, _) = run_tfb(&config_path, &["embed", "pending"]);
    assert!(stdout.contains("embedded: 0"));

    let (stdout, stderr, success) = run_tfb(
        &config_path,
        &["retrieve", "copper wire", "--trade", "electrical", "--k", "1"],
    );
    assert!(success, "retrieve failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Similar past corrections:"));
    assert!(stdout.contains("Example 1 [description]"));
}

#[test]
fn test_embed_requires_provider() {
    let (tmp, _) = setup_test_env();
    let config_path = write_config(tmp.path(), "disabled");

    run_tfb(&config_path, &["init"]);
    let (_, stderr, success) = run_tfb(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_export_jsonl() {
    let (tmp, config_path, ids) = setup_with_approved();
    let out = tmp.path().join("out").join("train.jsonl");

    let (stdout, stderr, success) = run_tfb(
        &config_path,
        &["export", "--format", "jsonl", "--output", out.to_str().unwrap()],
    );
    assert!(success, "export failed: stdout={}, stderr={}", stdout, stderr);

    let content = fs::read_to_string(&out).unwrap();
    assert_eq!(content.lines().count(), ids.len());
    for line in content.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["messages"].as_array().unwrap().len(), 3);
    }
    assert!(!content.contains("7500"));
}

#[test]
fn test_export_raw_to_stdout() {
    let (_tmp, config_path, _) = setup_with_approved();

    let (stdout, _, success) = run_tfb(&config_path, &["export", "--format", "raw"]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 2);
}

#[test]
fn test_calibrate_needs_target() {
    let (_tmp, config_path) = setup_test_env();
    run_tfb(&config_path, &["init"]);

    let (_, _, success) = run_tfb(&config_path, &["calibrate"]);
    assert!(!success);

    let (stdout, _, success) = run_tfb(&config_path, &["calibrate", "--all"]);
    assert!(success);
    assert!(stdout.contains("categories: 0"));
}

#[test]
fn test_thresholds_defaults() {
    let (_tmp, config_path) = setup_test_env();
    run_tfb(&config_path, &["init"]);

    let (stdout, _, success) = run_tfb(&config_path, &["thresholds", "masonry"]);
    assert!(success);
    assert!(stdout.contains("low:    0.60"));
    assert!(stdout.contains("medium: 0.80"));
    assert!(stdout.contains("never calibrated"));
}

#[test]
fn test_stats() {
    let (_tmp, config_path, _) = setup_with_approved();

    let (stdout, stderr, success) = run_tfb(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("approved:    2"));
    assert!(stdout.contains("electrical"));
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/tfb.sqlite\"\n\n[patterns]\npromotion_threshold = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_tfb(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("promotion_threshold"), "stderr: {}", stderr);
}
