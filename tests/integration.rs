use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pio_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pio"))
}

fn setup_test_env(extra_config: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let logs_dir = root.join("logs");
    fs::create_dir_all(logs_dir.join("api")).unwrap();
    fs::write(
        logs_dir.join("api/server.log"),
        "INFO started\n\
         127.0.0.1 - \"GET /health HTTP/1.1\" 200 OK\n\
         INFO recommended 12 papers to ada\n\
         \n\
         127.0.0.1 - \"GET /health HTTP/1.1\" 200 OK\n",
    )
    .unwrap();
    fs::write(logs_dir.join("worker.log"), "INFO nothing to drop\n").unwrap();

    let images_dir = root.join("images");
    fs::create_dir_all(images_dir.join("2401.00001")).unwrap();
    fs::write(images_dir.join("2401.00001/fig1.png"), b"\x89PNG").unwrap();
    fs::write(images_dir.join("2401.00001/notes.txt"), "not an image").unwrap();

    fs::write(
        root.join("recs.jsonl"),
        "{\"paper_id\": \"2401.00001\", \"title\": \"Sparse Attention\", \"relevance_score\": 0.91}\n\
         {\"paper_id\": \"2401.00002\", \"title\": \"Dense Retrieval\"}\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[logs]
dir = "{root}/logs"

[storage]
bucket = "paper-images"
prefix = "papers"

[backend]
base_url = "http://127.0.0.1:9"
timeout_secs = 2

{extra}
"#,
        root = root.display(),
        extra = extra_config
    );

    let config_path = config_dir.join("pio.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pio(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pio_binary();
    let workdir = config_path.parent().unwrap();
    let output = Command::new(&binary)
        .current_dir(workdir)
        .env_remove("DATABASE_URL")
        .env_remove("BACKEND_URL")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pio binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_migrate_list_needs_no_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (stdout, stderr, success) = run_pio(&missing, &["migrate", "list"]);
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains("create_core_tables"));
    assert!(stdout.contains("add_paper_embeddings"));
}

#[test]
fn test_migrate_status_requires_database_url() {
    let (_tmp, config_path) = setup_test_env("");
    let (_, stderr, success) = run_pio(&config_path, &["migrate", "status"]);
    assert!(!success);
    assert!(stderr.contains("db.url"), "stderr={}", stderr);
}

#[test]
fn test_log_clean_rewrites_noisy_file() {
    let (tmp, config_path) = setup_test_env("");
    let (stdout, stderr, success) = run_pio(&config_path, &["log-clean"]);
    assert!(success, "stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files scanned: 2"), "stdout={}", stdout);
    assert!(stdout.contains("files rewritten: 1"));
    assert!(stdout.contains("lines removed: 3"));

    let cleaned = fs::read_to_string(tmp.path().join("logs/api/server.log")).unwrap();
    assert_eq!(cleaned, "INFO started\nINFO recommended 12 papers to ada\n");
}

#[test]
fn test_log_clean_dry_run_changes_nothing() {
    let (tmp, config_path) = setup_test_env("");
    let path = tmp.path().join("logs/api/server.log");
    let before = fs::read_to_string(&path).unwrap();

    let (stdout, _, success) = run_pio(&config_path, &["log-clean", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("(dry-run)"));
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn test_log_clean_custom_pattern() {
    let (tmp, config_path) = setup_test_env("");
    let (_, _, success) = run_pio(&config_path, &["log-clean", "--pattern", "^INFO"]);
    assert!(success);
    let worker = fs::read_to_string(tmp.path().join("logs/worker.log")).unwrap();
    assert_eq!(worker, "");
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env("[embedding]\nprovider = \"magic\"\n");
    let (_, stderr, success) = run_pio(&config_path, &["doctor", "config"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"), "stderr={}", stderr);
}

#[test]
fn test_upload_dry_run_lists_images_only() {
    let (tmp, config_path) = setup_test_env("");
    let images = tmp.path().join("images");
    let (stdout, stderr, success) =
        run_pio(&config_path, &["upload", images.to_str().unwrap(), "--dry-run"]);
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains("papers/2401.00001/fig1.png"));
    assert!(!stdout.contains("notes.txt"));
    assert!(stdout.contains("files: 1"));
}

#[test]
fn test_recommend_batch_dry_run() {
    let (tmp, config_path) = setup_test_env("");
    let recs = tmp.path().join("recs.jsonl");
    let (stdout, stderr, success) = run_pio(
        &config_path,
        &[
            "recommend",
            "batch",
            recs.to_str().unwrap(),
            "--user",
            "ada",
            "--user",
            "grace",
            "--dry-run",
        ],
    );
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains("records: 2"));
    assert!(stdout.contains("would attempt: 4"));
}

#[test]
fn test_recommend_batch_requires_targets() {
    let (tmp, config_path) = setup_test_env("");
    let recs = tmp.path().join("recs.jsonl");
    let (_, _, success) = run_pio(
        &config_path,
        &["recommend", "batch", recs.to_str().unwrap()],
    );
    assert!(!success);
}

#[test]
fn test_recommend_batch_reports_failures() {
    // Backend points at a closed port, so every POST fails.
    let (tmp, config_path) = setup_test_env("");
    let recs = tmp.path().join("recs.jsonl");
    let (stdout, stderr, success) = run_pio(
        &config_path,
        &["recommend", "batch", recs.to_str().unwrap(), "--user", "ada"],
    );
    assert!(!success);
    assert!(stdout.contains("attempted: 2"), "stdout={}", stdout);
    assert!(stdout.contains("failed: 2"));
    assert!(stderr.contains("2 of 2 recommendations failed"));
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env("");
    let (_, stderr, success) = run_pio(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr={}", stderr);
}

#[test]
fn test_doctor_list() {
    let (_tmp, config_path) = setup_test_env("");
    let (stdout, _, success) = run_pio(&config_path, &["doctor", "--list"]);
    assert!(success);
    for name in ["config", "database", "backend", "llm", "storage"] {
        assert!(stdout.contains(name), "missing {} in {}", name, stdout);
    }
}

#[test]
fn test_doctor_reports_failed_checks() {
    let (_tmp, config_path) = setup_test_env("");
    let (stdout, stderr, success) = run_pio(&config_path, &["doctor", "config", "database"]);
    assert!(!success);
    assert!(stdout.contains("config"));
    assert!(stdout.contains("FAIL"));
    assert!(stderr.contains("1 of 2 checks failed"), "stderr={}", stderr);
}

#[test]
fn test_doctor_unknown_check() {
    let (_tmp, config_path) = setup_test_env("");
    let (_, stderr, success) = run_pio(&config_path, &["doctor", "frobnicate"]);
    assert!(!success);
    assert!(stderr.contains("unknown check"));
}

#[test]
fn test_completions() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_pio(&tmp.path().join("none.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("pio"));
}
