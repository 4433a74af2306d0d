use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn vkeep_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("vkeep");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Test documents: the two-paragraph classification scenario plus a
    // longer unclassified report and an empty file.
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("marked.txt"),
        "(S) Alpha paragraph.\n\n(U) Bravo paragraph.",
    )
    .unwrap();
    fs::write(
        files_dir.join("report.md"),
        "Quarterly supply report covering convoy routes.\n\nDelta battalion logistics summary for the northern sector.",
    )
    .unwrap();
    fs::write(files_dir.join("blank.txt"), "\n\n  \n").unwrap();

    let config_content = format!(
        r#"[storage]
base_dir = "{root}/data/stores"
jobs_dir = "{root}/data/jobs"

[chunking]
min_block_size = 5

[embedding]
provider = "hash"
dims = 64

[query]
top_k = 8
score_threshold = 0.2
"#,
        root = root.display()
    );

    let config_path = config_dir.join("vkeep.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_vkeep(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = vkeep_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run vkeep binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Pull the store id out of `vkeep create` output.
fn parse_store_id(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("store id: "))
        .unwrap_or_else(|| panic!("no store id in output: {}", stdout))
        .to_string()
}

#[test]
fn test_init_creates_directories() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_vkeep(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/stores").is_dir());
    assert!(tmp.path().join("data/jobs").is_dir());

    // Idempotent.
    let (_, _, success2) = run_vkeep(&config_path, &["init"]);
    assert!(success2, "second init failed (not idempotent)");
}

#[test]
fn test_create_empty_store_is_queryable() {
    let (_tmp, config_path) = setup_test_env();
    run_vkeep(&config_path, &["init"]);

    let (stdout, stderr, success) = run_vkeep(&config_path, &["create", "empty-store"]);
    assert!(success, "create failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files accepted: 0"));
    assert!(stdout.contains("ok"));
    let store_id = parse_store_id(&stdout);

    // Listed, durable, and distinct from "does not exist".
    let (stdout, _, success) = run_vkeep(&config_path, &["stores"]);
    assert!(success);
    assert!(stdout.contains(&store_id));
    assert!(stdout.contains("empty-store"));

    // Queries succeed and return nothing (the placeholder never surfaces).
    let (stdout, _, success) = run_vkeep(&config_path, &["query", &store_id, "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_classification_scenario_end_to_end() {
    let (tmp, config_path) = setup_test_env();
    run_vkeep(&config_path, &["init"]);

    let marked = tmp.path().join("files/marked.txt");
    let (stdout, stderr, success) = run_vkeep(
        &config_path,
        &["create", "marked-docs", marked.to_str().unwrap()],
    );
    assert!(success, "create failed: stdout={}, stderr={}", stdout, stderr);
    // Two blocks, one chunk each.
    assert!(stdout.contains("chunks embedded: 2"), "stdout: {}", stdout);
    let store_id = parse_store_id(&stdout);

    // Unfiltered query sees both chunks.
    let (stdout, _, success) = run_vkeep(
        &config_path,
        &["query", &store_id, "Bravo", "--threshold", "0.0", "--top-k", "10"],
    );
    assert!(success);
    assert!(stdout.contains("1."));
    assert!(stdout.contains("2."));

    // Restricted to UNCLASSIFIED: exactly the Bravo paragraph.
    let (stdout, _, success) = run_vkeep(
        &config_path,
        &[
            "query",
            &store_id,
            "Bravo",
            "--classifications",
            "UNCLASSIFIED",
            "--threshold",
            "0.0",
            "--top-k",
            "10",
        ],
    );
    assert!(success);
    assert!(stdout.contains("1. "), "stdout: {}", stdout);
    assert!(!stdout.contains("2. "), "stdout: {}", stdout);
    assert!(stdout.contains("(UNCLASSIFIED)"));
    assert!(stdout.contains("Bravo paragraph"));

    // Lowercase shorthand filters work too.
    let (stdout, _, success) = run_vkeep(
        &config_path,
        &[
            "query", &store_id, "Alpha", "--classifications", "s", "--threshold", "0.0",
        ],
    );
    assert!(success);
    assert!(stdout.contains("(SECRET)"));
    assert!(!stdout.contains("(UNCLASSIFIED)"));
}

#[test]
fn test_create_from_directory_skips_blank_files() {
    let (tmp, config_path) = setup_test_env();
    run_vkeep(&config_path, &["init"]);

    let files = tmp.path().join("files");
    let (stdout, stderr, success) = run_vkeep(
        &config_path,
        &[
            "create",
            "corpus",
            files.to_str().unwrap(),
            "--classification",
            "U",
        ],
    );
    assert!(success, "create failed: stdout={}, stderr={}", stdout, stderr);
    // marked.txt and report.md accepted; blank.txt skipped, not fatal.
    assert!(stdout.contains("files accepted: 2 (skipped: 1)"), "stdout: {}", stdout);
    assert!(stderr.contains("no qualifying blocks"), "stderr: {}", stderr);
}

#[test]
fn test_add_appends_to_existing_store() {
    let (tmp, config_path) = setup_test_env();
    run_vkeep(&config_path, &["init"]);

    let marked = tmp.path().join("files/marked.txt");
    let (stdout, _, success) = run_vkeep(
        &config_path,
        &["create", "growing", marked.to_str().unwrap()],
    );
    assert!(success);
    let store_id = parse_store_id(&stdout);

    let report = tmp.path().join("files/report.md");
    let (stdout, stderr, success) = run_vkeep(
        &config_path,
        &[
            "add",
            &store_id,
            report.to_str().unwrap(),
            "--classification",
            "U",
        ],
    );
    assert!(success, "add failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files accepted: 1"));
    assert!(stdout.contains("chunks embedded: 2"));

    // Newly added content is queryable.
    let (stdout, _, success) = run_vkeep(
        &config_path,
        &["query", &store_id, "convoy routes", "--threshold", "0.0"],
    );
    assert!(success);
    assert!(stdout.contains("report.md"), "stdout: {}", stdout);

    // Adding to a missing store is an error.
    let (_, stderr, success) = run_vkeep(
        &config_path,
        &["add", "no-such-store", report.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_jobs_are_durable_and_inspectable() {
    let (tmp, config_path) = setup_test_env();
    run_vkeep(&config_path, &["init"]);

    let marked = tmp.path().join("files/marked.txt");
    let (stdout, _, success) = run_vkeep(
        &config_path,
        &["create", "tracked", marked.to_str().unwrap()],
    );
    assert!(success);
    let job_id = stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("job: "))
        .expect("no job id in create output")
        .to_string();

    let (stdout, _, success) = run_vkeep(&config_path, &["jobs", "list"]);
    assert!(success);
    assert!(stdout.contains(&job_id));
    assert!(stdout.contains("create_store"));
    assert!(stdout.contains("completed"));
    assert!(stdout.contains("2/2 (100%)"));

    let (stdout, _, success) = run_vkeep(&config_path, &["jobs", "show", &job_id]);
    assert!(success);
    assert!(stdout.contains("\"status\": \"completed\""));
    assert!(stdout.contains("\"completed_at\""));

    // Status filtering.
    let (stdout, _, success) = run_vkeep(&config_path, &["jobs", "list", "--status", "failed"]);
    assert!(success);
    assert!(stdout.contains("No jobs."));

    // Cancelling a finished job is refused, record untouched.
    let (stdout, _, success) = run_vkeep(&config_path, &["jobs", "cancel", &job_id]);
    assert!(success);
    assert!(stdout.contains("already finished"));
    let (stdout, _, _) = run_vkeep(&config_path, &["jobs", "show", &job_id]);
    assert!(stdout.contains("\"status\": \"completed\""));
}

#[test]
fn test_delete_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_vkeep(&config_path, &["init"]);

    let (stdout, _, success) = run_vkeep(&config_path, &["create", "doomed"]);
    assert!(success);
    let store_id = parse_store_id(&stdout);

    let (stdout, _, success) = run_vkeep(&config_path, &["delete", &store_id]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (stdout, _, success) = run_vkeep(&config_path, &["delete", &store_id]);
    assert!(success, "second delete must not fail");
    assert!(stdout.contains("not found"));

    let (stdout, _, _) = run_vkeep(&config_path, &["stores"]);
    assert!(!stdout.contains(&store_id));
}

#[test]
fn test_query_json_output() {
    let (tmp, config_path) = setup_test_env();
    run_vkeep(&config_path, &["init"]);

    let marked = tmp.path().join("files/marked.txt");
    let (stdout, _, success) = run_vkeep(
        &config_path,
        &["create", "json-docs", marked.to_str().unwrap()],
    );
    assert!(success);
    let store_id = parse_store_id(&stdout);

    let (stdout, _, success) = run_vkeep(
        &config_path,
        &[
            "query", &store_id, "Bravo", "--json", "--threshold", "0.0",
        ],
    );
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("query --json not JSON");
    let results = parsed.as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results[0].get("relevance").is_some());
    assert_eq!(
        results[0]["metadata"]["original_filename"],
        serde_json::json!("marked.txt")
    );
}
