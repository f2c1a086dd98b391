//! Test doubles for the engine's capabilities.
//!
//! Image references encode the behaviour of each row:
//! - `http://ok/face`      decodes to a 1px-wide image the primary detector accepts
//! - `http://ok/fallback`  2px wide, only the fallback detector accepts it
//! - `http://ok/none`      3px wide, neither detector accepts it
//! - `http://ok/panic`     4px wide, detectors panic on it
//! - anything else         fails to download (404)
#![allow(dead_code)]

use async_trait::async_trait;
use face_screen::config::AppConfig;
use face_screen::models::dataset::{Dataset, DatasetLayout};
use face_screen::models::job::Job;
use face_screen::services::artifacts::ArtifactStore;
use face_screen::services::checkpoint::{CheckpointError, CheckpointWriter, CsvCheckpointWriter};
use face_screen::services::detector::{DetectError, FaceDetector};
use face_screen::services::engine::Engine;
use face_screen::services::fetch::{FetchError, FetchedImage, ImageFetcher};
use face_screen::services::registry::JobRegistry;
use image::{DynamicImage, ImageFormat};
use parking_lot::Mutex;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub const FACE: &str = "http://ok/face";
pub const FALLBACK: &str = "http://ok/fallback";
pub const NO_FACE: &str = "http://ok/none";
pub const PANIC: &str = "http://ok/panic";
pub const BROKEN: &str = "http://broken/missing.jpg";

fn png_of_width(width: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::new_rgb8(width, 1)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

#[derive(Default)]
pub struct FakeFetcher {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, reference: &str, _timeout: Duration) -> Result<FetchedImage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let width = match reference {
            FACE => 1,
            FALLBACK => 2,
            NO_FACE => 3,
            PANIC => 4,
            "" => return Err(FetchError::EmptyReference),
            _ => return Err(FetchError::Status(404)),
        };
        FetchedImage::decode(png_of_width(width))
    }
}

/// Accepts images whose width is in `accepts`; records every threshold it saw.
pub struct FakeDetector {
    accepts: Vec<u32>,
    pub calls: AtomicUsize,
    pub thresholds: Mutex<Vec<f32>>,
}

impl FakeDetector {
    pub fn primary() -> Self {
        Self::accepting(vec![1])
    }

    pub fn fallback() -> Self {
        Self::accepting(vec![1, 2])
    }

    fn accepting(accepts: Vec<u32>) -> Self {
        Self {
            accepts,
            calls: AtomicUsize::new(0),
            thresholds: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceDetector for FakeDetector {
    async fn detect(&self, image: &FetchedImage, threshold: f32) -> Result<bool, DetectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.thresholds.lock().push(threshold);
        let width = image.image.width();
        if width == 4 {
            panic!("detector blew up");
        }
        Ok(self.accepts.contains(&width))
    }
}

/// How a `RecordingCheckpoints` misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    None,
    /// The first write reports an I/O error, later ones succeed.
    FailFirst,
    /// Every write panics.
    Panic,
}

/// Real CSV writer that also keeps a copy of every dataset it wrote.
pub struct RecordingCheckpoints {
    inner: CsvCheckpointWriter,
    fault: WriteFault,
    pub attempts: AtomicUsize,
    pub snapshots: Mutex<Vec<Dataset>>,
}

impl RecordingCheckpoints {
    pub fn new(dir: &Path) -> Self {
        Self::with_fault(dir, WriteFault::None)
    }

    pub fn with_fault(dir: &Path, fault: WriteFault) -> Self {
        Self {
            inner: CsvCheckpointWriter::new(dir),
            fault,
            attempts: AtomicUsize::new(0),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> Vec<Dataset> {
        self.snapshots.lock().clone()
    }
}

#[async_trait]
impl CheckpointWriter for RecordingCheckpoints {
    async fn write(&self, job_id: Uuid, dataset: &Dataset) -> Result<PathBuf, CheckpointError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            WriteFault::Panic => panic!("checkpoint writer blew up"),
            WriteFault::FailFirst if attempt == 0 => {
                return Err(CheckpointError::Io(std::io::Error::other("disk full")));
            }
            _ => {}
        }
        self.snapshots.lock().push(dataset.clone());
        self.inner.write(job_id, dataset).await
    }
}

pub struct TestEngine {
    pub engine: Engine,
    pub dir: TempDir,
    pub fetcher: Arc<FakeFetcher>,
    pub primary: Arc<FakeDetector>,
    pub fallback: Arc<FakeDetector>,
    pub checkpoints: Arc<RecordingCheckpoints>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_fetcher(FakeFetcher::default())
    }

    pub fn with_fetcher(fetcher: FakeFetcher) -> Self {
        Self::build(fetcher, WriteFault::None)
    }

    pub fn with_write_fault(fault: WriteFault) -> Self {
        Self::build(FakeFetcher::default(), fault)
    }

    fn build(fetcher: FakeFetcher, fault: WriteFault) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(fetcher);
        let primary = Arc::new(FakeDetector::primary());
        let fallback = Arc::new(FakeDetector::fallback());
        let checkpoints = Arc::new(RecordingCheckpoints::with_fault(
            &dir.path().join("results"),
            fault,
        ));

        let engine = Engine::assemble(
            fetcher.clone(),
            primary.clone(),
            fallback.clone(),
            checkpoints.clone(),
            ArtifactStore::new(dir.path().join("no_face_images")),
            DatasetLayout::default(),
            dir.path().join("uploads"),
        );

        Self {
            engine,
            dir,
            fetcher,
            primary,
            fallback,
            checkpoints,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.engine.registry()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetcher.calls.load(Ordering::SeqCst)
    }
}

/// Build a CSV with an `id` column, the photo column and an outcome column.
pub fn csv_of(rows: &[(&str, &str)]) -> String {
    let mut csv = String::from("id,Name,Check-In Photo,Face_Status\n");
    for (i, (url, status)) in rows.iter().enumerate() {
        csv.push_str(&format!("{},Guest {},{},{}\n", i + 1, i + 1, url, status));
    }
    csv
}

pub fn dataset_of(rows: &[(&str, &str)]) -> Dataset {
    Dataset::from_reader(csv_of(rows).as_bytes(), &DatasetLayout::default()).expect("valid csv")
}

/// Poll the registry until `pred` holds or five seconds pass.
pub async fn wait_for<F>(registry: &JobRegistry, id: Uuid, pred: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    for _ in 0..500 {
        let job = registry.get(id).expect("job exists");
        if pred(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not reach the expected state in time");
}

pub async fn wait_terminal(registry: &JobRegistry, id: Uuid) -> Job {
    wait_for(registry, id, |job| job.status.is_terminal()).await
}

pub fn assert_counters_consistent(job: &Job) {
    assert!(job.processed <= job.rows_to_process, "processed exceeds rows_to_process");
    assert_eq!(job.outcome_total(), job.processed, "outcome counters do not sum to processed");
}

pub fn test_config(dir: &Path) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        upload_dir: dir.join("uploads"),
        results_dir: dir.join("results"),
        no_face_dir: dir.join("no_face_images"),
        cf_account_id: "test-account".to_string(),
        cf_api_token: "test-token".to_string(),
        primary_model: "primary".to_string(),
        fallback_model: "fallback".to_string(),
        detection_label: "person".to_string(),
        url_column: "Check-In Photo".to_string(),
        status_column: "Face_Status".to_string(),
        id_column: "id".to_string(),
        concurrency: 3,
        download_timeout_secs: 5,
        primary_threshold: 0.80,
        fallback_threshold: 0.70,
        checkpoint_interval: 50,
        persist_artifacts: true,
        retention_ttl_secs: 3600,
        sweep_interval_secs: 3600,
        max_upload_bytes: 1024 * 1024,
    }
}
