use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docdex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docdex");
    path
}

/// Temp workspace with a config pointing providers at a closed port so any
/// accidental network call fails fast instead of hanging.
fn setup_workspace() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let data_dir = root.join("data");
    fs::create_dir_all(root.join("config")).unwrap();

    let config = format!(
        r#"[storage]
data_dir = "{data}"

[embedding]
base_url = "http://127.0.0.1:1"
max_retries = 0
timeout_secs = 1

[llm]
base_url = "http://127.0.0.1:1"
max_retries = 0
timeout_secs = 1
"#,
        data = data_dir.display()
    );
    let config_path = root.join("config").join("docdex.toml");
    fs::write(&config_path, config).unwrap();

    (tmp, config_path)
}

fn run_docdex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docdex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docdex binary at {:?}: {}", binary, e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn init_creates_database_and_is_idempotent() {
    let (tmp, config_path) = setup_workspace();

    let (stdout, stderr, ok) = run_docdex(&config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data").join("docdex.sqlite").exists());
    assert!(tmp.path().join("data").join("processed").is_dir());
    assert!(tmp.path().join("data").join("summaries").is_dir());

    // Second run succeeds against the existing database.
    let (_, stderr, ok) = run_docdex(&config_path, &["init"]);
    assert!(ok, "repeat init failed: {}", stderr);
}

#[test]
fn documents_on_empty_store_prints_placeholder() {
    let (_tmp, config_path) = setup_workspace();
    run_docdex(&config_path, &["init"]);

    let (stdout, stderr, ok) = run_docdex(&config_path, &["documents"]);
    assert!(ok, "documents failed: {}", stderr);
    assert!(stdout.contains("No documents ingested."));
}

#[test]
fn check_on_empty_store_is_consistent() {
    let (_tmp, config_path) = setup_workspace();
    run_docdex(&config_path, &["init"]);

    let (stdout, stderr, ok) = run_docdex(&config_path, &["check"]);
    assert!(ok, "check failed: {}", stderr);
    assert!(stdout.contains("consistent: true"));
}

#[test]
fn cleanup_on_empty_store_cleans_nothing() {
    let (_tmp, config_path) = setup_workspace();
    run_docdex(&config_path, &["init"]);

    let (stdout, stderr, ok) = run_docdex(&config_path, &["cleanup"]);
    assert!(ok, "cleanup failed: {}", stderr);
    assert!(stdout.contains("cleaned: 0"));
}

#[test]
fn ingest_rejects_non_pdf_files() {
    let (tmp, config_path) = setup_workspace();
    run_docdex(&config_path, &["init"]);

    let txt = tmp.path().join("notes.txt");
    fs::write(&txt, "plain text, not a pdf").unwrap();

    let (_, stderr, ok) = run_docdex(&config_path, &["ingest", txt.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("ingestion failed"), "stderr: {}", stderr);
}

#[test]
fn ingest_fails_cleanly_on_corrupt_pdf() {
    let (tmp, config_path) = setup_workspace();
    run_docdex(&config_path, &["init"]);

    let pdf = tmp.path().join("broken.pdf");
    fs::write(&pdf, b"%PDF-1.4 this is not a real pdf body").unwrap();

    let (_, _, ok) = run_docdex(&config_path, &["ingest", pdf.to_str().unwrap()]);
    assert!(!ok);

    // Failed ingestion leaves no stray copy in the data directory.
    assert!(!tmp.path().join("data").join("broken.pdf").exists());

    let (stdout, _, ok) = run_docdex(&config_path, &["documents"]);
    assert!(ok);
    assert!(stdout.contains("No documents ingested."));
}

#[test]
fn query_with_unreachable_llm_reports_failure() {
    let (_tmp, config_path) = setup_workspace();
    run_docdex(&config_path, &["init"]);

    // Empty index + --no-rag goes straight to the (unreachable) LLM.
    let (_, stderr, ok) = run_docdex(&config_path, &["query", "anything", "--no-rag"]);
    assert!(!ok);
    assert!(stderr.contains("query failed"), "stderr: {}", stderr);
}

#[test]
fn missing_config_fails_with_a_clear_error() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("absent.toml");

    let (_, stderr, ok) = run_docdex(&config_path, &["documents"]);
    assert!(!ok);
    assert!(!stderr.is_empty());
}
