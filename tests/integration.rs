use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn vivy_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("vivy");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Work dump. No links end in .mid, so nothing touches the network.
    let works = serde_json::json!([
        {
            "id": "w1",
            "link": "https://wiki.example.org/Ave_Maria",
            "general_information": { "title": ["Ave Maria"], "composer": ["Victoria"] },
            "translations": {
                "text": ["English", "Hail Mary, full of grace, the Lord is with thee"]
            },
            "download_links": { "CPDL": ["https://scores.example.org/w1/ave.pdf"] }
        },
        {
            "id": "w2",
            "general_information": { "title": ["Untranslated"] },
            "download_links": { "CPDL": ["https://scores.example.org/w2/x.mid"] }
        }
    ]);
    fs::write(root.join("works.json"), works.to_string()).unwrap();

    // Raw index for the sort pass: one record with a MIDI file, one with nothing.
    let raw = root.join("raw");
    fs::create_dir_all(raw.join("data/r1_0")).unwrap();
    fs::write(raw.join("data/r1_0/score.MID"), b"MThd").unwrap();
    let raw_index = serde_json::json!([
        record_json("r1_0", "o magnum mysterium"),
        record_json("r2_0", "missing score"),
    ]);
    fs::write(raw.join("index.json"), raw_index.to_string()).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/db/vivy.sqlite"

[storage]
root = "{root}/index"

[ingest]
workers = 2
checkpoint_every = 1

[sort]
source_root = "{root}/raw"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("vivy.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn record_json(id: &str, title: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": title,
        "composer": "lauridsen",
        "method": 1,
        "text": "O great mystery, and wonderful sacrament",
        "link": "https://wiki.example.org/O_magnum",
        "directory": format!("data/{}", id),
        "version": "0.2"
    })
}

fn run_vivy(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = vivy_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run vivy binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn root_of(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().to_path_buf()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_vivy(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_vivy(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_and_extract() {
    let (tmp, config_path) = setup_test_env();
    let works = tmp.path().join("works.json");
    let output = tmp.path().join("out/raw.json");

    let (stdout, stderr, success) =
        run_vivy(&config_path, &["import", works.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("works imported: 2"));

    let (stdout, stderr, success) =
        run_vivy(&config_path, &["extract", "--output", output.to_str().unwrap()]);
    assert!(success, "extract failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("works written: 1"));

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let items = raw.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "w1");
    assert!(items[0].get("general_information").is_none());
}

#[test]
fn test_ingest_dry_run_and_run() {
    let (tmp, config_path) = setup_test_env();
    let works = tmp.path().join("works.json");
    run_vivy(&config_path, &["import", works.to_str().unwrap()]);

    let (stdout, stderr, success) = run_vivy(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("works found: 1"));
    assert!(stdout.contains("candidate texts: 1"));
    assert!(!tmp.path().join("index").exists(), "dry run must not create the index root");

    let (stdout, stderr, success) =
        run_vivy(&config_path, &["ingest", "--progress", "off"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("no eligible links: 1"));
    assert!(stdout.contains("ok"));

    let index = fs::read_to_string(tmp.path().join("index/index.json")).unwrap();
    assert_eq!(index.trim(), "[]");
    assert!(tmp.path().join("index/error.json").exists());
}

#[test]
fn test_dry_run_from_json_dump_writes_nothing() {
    let (tmp, config_path) = setup_test_env();
    let works = tmp.path().join("works.json");
    let config = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        format!(
            "{}\n[source]\nkind = \"json\"\npath = \"{}\"\n",
            config,
            works.display()
        ),
    )
    .unwrap();

    let (stdout, stderr, success) = run_vivy(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("works found: 1"));
    assert!(!tmp.path().join("db").exists());
    assert!(!tmp.path().join("index").exists());
}

#[test]
fn test_dry_run_without_database_fails() {
    let (tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_vivy(&config_path, &["ingest", "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("No database"));
    assert!(!tmp.path().join("db/vivy.sqlite").exists());
}

#[test]
fn test_ingest_rejects_unknown_progress_mode() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success) = run_vivy(&config_path, &["ingest", "--progress", "loud"]);
    assert!(!success);
}

#[test]
fn test_copy_update_and_stats() {
    let (tmp, config_path) = setup_test_env();
    let root = root_of(&config_path);

    let file = root.join("motet.mid");
    fs::write(&file, b"MThd").unwrap();
    let record_path = root.join("record.json");
    fs::write(&record_path, record_json("c1_0", "o magnum mysterium").to_string()).unwrap();

    let (stdout, stderr, success) = run_vivy(
        &config_path,
        &[
            "copy",
            file.to_str().unwrap(),
            "--record",
            record_path.to_str().unwrap(),
        ],
    );
    assert!(success, "copy failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1/1 files copied"));
    assert!(tmp.path().join("index/data/c1_0/motet.mid").exists());

    let (stdout, stderr, success) = run_vivy(
        &config_path,
        &[
            "update",
            "c1_0",
            "--title",
            "Ave Verum Corpus",
            "--additional",
            r#"{"voicing": "SATB"}"#,
        ],
    );
    assert!(success, "update failed: stdout={}, stderr={}", stdout, stderr);
    let index = fs::read_to_string(tmp.path().join("index/index.json")).unwrap();
    assert!(index.contains("\"title\": \"ave verum corpus\""));
    assert!(index.contains("\"voicing\": \"SATB\""));

    let (_, _, success) = run_vivy(&config_path, &["update", "nope_0", "--text", "anything"]);
    assert!(!success, "update of a missing record should fail");

    let (_, _, success) = run_vivy(
        &config_path,
        &["update", "c1_0", "--links", "https://scores.example.org/x.mid"],
    );
    assert!(!success, "--links without --add should be rejected");

    let (stdout, stderr, success) = run_vivy(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Records:     1"));
    assert!(stdout.contains("Files:       1"));
}

#[test]
fn test_sort_copies_midi_and_logs_missing() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_vivy(&config_path, &["sort"]);
    assert!(success, "sort failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("copied: 1"));
    assert!(stdout.contains("no score file: 1"));

    assert!(tmp.path().join("index/data/r1_0/score.MID").exists());
    let errors = fs::read_to_string(tmp.path().join("index/error.json")).unwrap();
    assert!(errors.contains("No .MID, .MIDI, or .MXL file found"));

    let (stdout, _, success) = run_vivy(&config_path, &["sort"]);
    assert!(success);
    assert!(stdout.contains("already present: 1"));
}

#[test]
fn test_checkpoint_command() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_vivy(&config_path, &["checkpoint"]);
    assert!(success, "checkpoint failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 0"));
    assert!(tmp.path().join("index/index.json").exists());
}
