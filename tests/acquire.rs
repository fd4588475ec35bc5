use async_trait::async_trait;
use serde_json::{json, Map};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use vivy_ingest::acquire::{
    AcquirePolicy, Acquirer, ErrorSink, Failure, InsertRequest, UpdateOp, ALREADY_EXISTS,
};
use vivy_ingest::fetch::{FetchError, Fetcher};
use vivy_ingest::index::IndexLayout;
use vivy_ingest::models::{ErrorRecord, IndexRecord};
use vivy_ingest::store::memory::InMemoryStagingStore;
use vivy_ingest::store::StagingStore;

/// Serves fixed bodies for `url(name)`; anything else is a 404.
struct StubFetcher {
    files: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, body)| (url(name), body.as_bytes().to_vec()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

struct Harness {
    tmp: TempDir,
    staging: Arc<InMemoryStagingStore>,
    fetcher: Arc<StubFetcher>,
    acquirer: Acquirer,
}

impl Harness {
    fn new(files: &[(&str, &str)]) -> Self {
        let tmp = TempDir::new().unwrap();
        let staging = Arc::new(InMemoryStagingStore::new());
        let fetcher = Arc::new(StubFetcher::new(files));
        let acquirer = Acquirer::new(
            IndexLayout::new(tmp.path(), "error.json"),
            staging.clone() as Arc<dyn StagingStore>,
            fetcher.clone() as Arc<dyn Fetcher>,
            AcquirePolicy {
                allowed_extensions: vec![".mid".to_string()],
                record_version: "0.2".to_string(),
            },
        );
        Self {
            tmp,
            staging,
            fetcher,
            acquirer,
        }
    }

    fn record_dir(&self, id: &str) -> std::path::PathBuf {
        self.tmp.path().join("data").join(id)
    }
}

fn url(name: &str) -> String {
    format!("https://scores.example.org/files/{}", name)
}

fn request(id: &str, links: &[&str]) -> InsertRequest {
    InsertRequest {
        method: 1,
        title: "Ave Maria (SATB)".to_string(),
        composer: " Tomás Luis de VICTORIA ".to_string(),
        text: "Hail Mary, full of grace, the Lord is with thee".to_string(),
        source_url: "https://wiki.example.org/Ave_Maria".to_string(),
        links: links.iter().map(|l| url(l)).collect(),
        custom_id: Some(id.to_string()),
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_insert_downloads_and_stages() {
    let h = Harness::new(&[("a.mid", "AAA"), ("b.mid", "BB")]);
    let outcome = h
        .acquirer
        .insert(&request("w1_0", &["a.mid", "b.mid"]))
        .await
        .unwrap();

    assert!(outcome.status);
    assert_eq!(outcome.id, "w1_0");
    assert_eq!(outcome.message, "2/2 files downloaded");
    assert_eq!(files_in(&h.record_dir("w1_0")), vec!["a.mid", "b.mid"]);
    assert_eq!(fs::read(h.record_dir("w1_0").join("a.mid")).unwrap(), b"AAA");

    let record = h.staging.get_record("w1_0").await.unwrap().unwrap();
    assert_eq!(record.title, "ave maria satb");
    assert_eq!(record.composer, "tomás luis de victoria");
    assert_eq!(record.directory, "data/w1_0");
    assert_eq!(record.link, "https://wiki.example.org/Ave_Maria");
    assert_eq!(record.version, "0.2");
}

#[tokio::test]
async fn test_insert_is_idempotent() {
    let h = Harness::new(&[("a.mid", "AAA")]);
    let first = h.acquirer.insert(&request("w1_0", &["a.mid"])).await.unwrap();
    let second = h.acquirer.insert(&request("w1_0", &["a.mid"])).await.unwrap();

    assert!(first.status);
    assert!(second.status);
    assert_eq!(second.message, ALREADY_EXISTS);
    assert_eq!(second.downloaded, 0);
    assert_eq!(h.fetcher.calls().len(), 1);
    assert_eq!(h.staging.records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_insert_is_all_or_nothing() {
    let h = Harness::new(&[("a.mid", "AAA"), ("c.mid", "CCC")]);
    let outcome = h
        .acquirer
        .insert(&request("w2_0", &["a.mid", "missing.mid", "c.mid"]))
        .await
        .unwrap();

    assert!(!outcome.status);
    assert_eq!(outcome.failure, Some(Failure::Download));
    assert_eq!(outcome.downloaded, 1);
    assert_eq!(outcome.attempted, 2);
    assert!(!h.record_dir("w2_0").exists());
    assert!(h.staging.get_record("w2_0").await.unwrap().is_none());
    assert!(!h.fetcher.calls().contains(&url("c.mid")));

    let errors = h.staging.errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].id, "w2_0");
    assert_eq!(errors[0].link, url("missing.mid"));
    assert_eq!(errors[0].data.title, "ave maria satb");
}

#[tokio::test]
async fn test_insert_without_eligible_links_is_a_noop() {
    let h = Harness::new(&[]);
    let outcome = h
        .acquirer
        .insert(&request("w3_0", &["score.pdf", "score.mxl"]))
        .await
        .unwrap();

    assert!(outcome.status);
    assert_eq!(outcome.attempted, 0);
    assert!(!h.record_dir("w3_0").exists());
    assert!(h.staging.records().await.unwrap().is_empty());
    assert!(h.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_insert_dedups_links_and_filters_case_insensitively() {
    let h = Harness::new(&[("a.mid", "A"), ("B.MID", "B")]);
    let outcome = h
        .acquirer
        .insert(&request("w4_0", &["a.mid", "a.mid", "B.MID", "c.pdf"]))
        .await
        .unwrap();

    assert!(outcome.status);
    assert_eq!(outcome.message, "2/2 files downloaded");
    assert_eq!(h.fetcher.calls().len(), 2);
}

#[tokio::test]
async fn test_insert_keeps_files_sharing_a_remote_name() {
    let h = Harness::new(&[("ed1/score.mid", "ONE"), ("ed2/score.mid", "TWO")]);
    let outcome = h
        .acquirer
        .insert(&request("w4_1", &["ed1/score.mid", "ed2/score.mid"]))
        .await
        .unwrap();

    assert!(outcome.status);
    assert_eq!(outcome.message, "2/2 files downloaded");
    let dir = h.record_dir("w4_1");
    assert_eq!(files_in(&dir), vec!["score.mid", "score_1.mid"]);
    assert_eq!(fs::read(dir.join("score.mid")).unwrap(), b"ONE");
    assert_eq!(fs::read(dir.join("score_1.mid")).unwrap(), b"TWO");
}

#[tokio::test]
async fn test_error_log_first_write_wins() {
    let h = Harness::new(&[]);
    let first = h.acquirer.insert(&request("w5_0", &["one.mid"])).await.unwrap();
    let second = h.acquirer.insert(&request("w5_0", &["two.mid"])).await.unwrap();

    assert!(!first.status);
    assert!(!second.status);
    let errors = h.staging.errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].link, url("one.mid"));
}

#[tokio::test]
async fn test_update_add_keeps_existing_files() {
    let h = Harness::new(&[("a.mid", "A"), ("b.mid", "B")]);
    h.acquirer.insert(&request("w6_0", &["a.mid"])).await.unwrap();

    let outcome = h
        .acquirer
        .update(
            "w6_0",
            &[UpdateOp::ReplaceLinks {
                links: vec![url("b.mid")],
                add: true,
            }],
        )
        .await
        .unwrap();

    assert!(outcome.status);
    assert_eq!(outcome.message, "1/1 files downloaded (added)");
    assert_eq!(files_in(&h.record_dir("w6_0")), vec!["a.mid", "b.mid"]);
}

#[tokio::test]
async fn test_update_replace_drops_old_files() {
    let h = Harness::new(&[("a.mid", "A"), ("c.mid", "C")]);
    h.acquirer.insert(&request("w7_0", &["a.mid"])).await.unwrap();

    let outcome = h
        .acquirer
        .update(
            "w7_0",
            &[UpdateOp::ReplaceLinks {
                links: vec![url("c.mid")],
                add: false,
            }],
        )
        .await
        .unwrap();

    assert!(outcome.status);
    assert_eq!(outcome.message, "1/1 files downloaded (replaced)");
    assert_eq!(files_in(&h.record_dir("w7_0")), vec!["c.mid"]);
}

#[tokio::test]
async fn test_update_partial_download_failure_still_commits() {
    let h = Harness::new(&[("a.mid", "A"), ("b.mid", "B")]);
    h.acquirer.insert(&request("w8_0", &["a.mid"])).await.unwrap();

    let outcome = h
        .acquirer
        .update(
            "w8_0",
            &[
                UpdateOp::SetText("  New ''text'' for this piece  ".to_string()),
                UpdateOp::ReplaceLinks {
                    links: vec![url("b.mid"), url("gone.mid")],
                    add: true,
                },
            ],
        )
        .await
        .unwrap();

    assert!(outcome.status);
    assert_eq!(outcome.downloaded, 1);
    assert_eq!(outcome.attempted, 2);
    assert!(outcome.message.contains("text updated"));
    assert!(outcome.message.contains("1/2 files downloaded (added)"));

    let record = h.staging.get_record("w8_0").await.unwrap().unwrap();
    assert_eq!(record.text, "New text for this piece");
    assert_eq!(files_in(&h.record_dir("w8_0")), vec!["a.mid", "b.mid"]);
    assert_eq!(h.staging.errors().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_fields_and_additional() {
    let h = Harness::new(&[("a.mid", "A")]);
    h.acquirer.insert(&request("w9_0", &["a.mid"])).await.unwrap();

    let mut extra = Map::new();
    extra.insert("voicing".to_string(), json!("SATB"));
    let outcome = h
        .acquirer
        .update(
            "w9_0",
            &[
                UpdateOp::SetTitle("O Magnum Mysterium!".to_string()),
                UpdateOp::SetComposer("Lauridsen".to_string()),
                UpdateOp::SetMethod(2),
                UpdateOp::SetVersion("0.3".to_string()),
                UpdateOp::MergeAdditional(extra),
            ],
        )
        .await
        .unwrap();
    assert!(outcome.status);

    let record = h.staging.get_record("w9_0").await.unwrap().unwrap();
    assert_eq!(record.title, "o magnum mysterium");
    assert_eq!(record.composer, "lauridsen");
    assert_eq!(record.method, 2);
    assert_eq!(record.version, "0.3");
    assert_eq!(record.additional.get("voicing"), Some(&json!("SATB")));
}

#[tokio::test]
async fn test_update_missing_record_and_bad_arguments() {
    let h = Harness::new(&[]);
    let missing = h
        .acquirer
        .update("nope", &[UpdateOp::SetText("x".to_string())])
        .await
        .unwrap();
    assert!(!missing.status);
    assert_eq!(missing.failure, Some(Failure::NotFound));

    let empty = h.acquirer.update("nope", &[]).await.unwrap();
    assert!(!empty.status);
    assert_eq!(empty.failure, Some(Failure::InvalidArguments));

    let mut shadowing = Map::new();
    shadowing.insert("id".to_string(), json!("other"));
    let shadow = h
        .acquirer
        .update("nope", &[UpdateOp::MergeAdditional(shadowing)])
        .await
        .unwrap();
    assert_eq!(shadow.failure, Some(Failure::InvalidArguments));
}

fn copy_record(id: &str) -> IndexRecord {
    IndexRecord {
        id: id.to_string(),
        title: "ave verum corpus".to_string(),
        composer: "mozart".to_string(),
        method: 1,
        text: "Hail, true body, born of the Virgin Mary".to_string(),
        link: "https://wiki.example.org/Ave_verum".to_string(),
        directory: IndexLayout::relative_dir(id),
        version: "0.2".to_string(),
        additional: Map::new(),
    }
}

#[tokio::test]
async fn test_copy_commits_record_verbatim() {
    let h = Harness::new(&[]);
    let source_dir = TempDir::new().unwrap();
    let source = source_dir.path().join("ave_verum.mid");
    fs::write(&source, b"MThd").unwrap();

    let record = copy_record("c1_0");
    let outcome = h.acquirer.copy(&source, &record).await.unwrap();
    assert!(outcome.status);
    assert_eq!(outcome.message, "1/1 files copied");
    assert_eq!(files_in(&h.record_dir("c1_0")), vec!["ave_verum.mid"]);
    assert_eq!(h.staging.get_record("c1_0").await.unwrap(), Some(record.clone()));

    let again = h.acquirer.copy(&source, &record).await.unwrap();
    assert_eq!(again.message, ALREADY_EXISTS);
}

#[tokio::test]
async fn test_copy_failure_rolls_back() {
    let h = Harness::new(&[]);
    let record = copy_record("c2_0");
    let outcome = h
        .acquirer
        .copy(Path::new("/definitely/not/here.mid"), &record)
        .await
        .unwrap();

    assert!(!outcome.status);
    assert_eq!(outcome.failure, Some(Failure::Copy));
    assert!(!h.record_dir("c2_0").exists());
    assert!(h.staging.get_record("c2_0").await.unwrap().is_none());
    assert_eq!(h.staging.errors().await.unwrap().len(), 1);
}

#[derive(Default)]
struct CollectingSink {
    errors: Mutex<Vec<ErrorRecord>>,
}

#[async_trait]
impl ErrorSink for CollectingSink {
    async fn report(&self, error: ErrorRecord) -> anyhow::Result<()> {
        self.errors.lock().unwrap().push(error);
        Ok(())
    }
}

#[tokio::test]
async fn test_custom_error_sink_replaces_staging_log() {
    let tmp = TempDir::new().unwrap();
    let staging = Arc::new(InMemoryStagingStore::new());
    let sink = Arc::new(CollectingSink::default());
    let acquirer = Acquirer::new(
        IndexLayout::new(tmp.path(), "error.json"),
        staging.clone() as Arc<dyn StagingStore>,
        Arc::new(StubFetcher::new(&[])),
        AcquirePolicy {
            allowed_extensions: vec![".mid".to_string()],
            record_version: "0.2".to_string(),
        },
    )
    .with_error_sink(sink.clone());

    let outcome = acquirer.insert(&request("s1_0", &["x.mid"])).await.unwrap();
    assert!(!outcome.status);
    assert!(staging.errors().await.unwrap().is_empty());
    let collected = sink.errors.lock().unwrap();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].id, "s1_0");
}

#[tokio::test]
async fn test_generated_id_when_no_custom_id() {
    let h = Harness::new(&[("a.mid", "A")]);
    let mut req = request("unused", &["a.mid"]);
    req.custom_id = None;
    let outcome = h.acquirer.insert(&req).await.unwrap();

    assert!(outcome.status);
    assert_eq!(outcome.id.len(), 32);
    assert!(outcome.id.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(h.record_dir(&outcome.id).join("a.mid").exists());
}
