//! Shared helpers for the integration tests.
//!
//! * PDFs generated in memory with lopdf (one raw RGB image per page).
//! * [`ScriptedExecutor`]: an `Executor` whose behaviour is fixed up front and
//!   which counts how often it was called.
//! * [`Recorder`]: a progress callback that keeps every event.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use convertmorph_compress::output::{ContentProfile, RawCompression, RawLocalResult, RawRemoteResult};
use convertmorph_compress::pipeline::Executor;
use convertmorph_compress::progress::AttemptProgress;
use convertmorph_compress::{
    CompressionProgressCallback, ExecutionError, ExecutionMode, InputFile, LevelSettings, LocalProcessingError,
    ProgressEvent, RemoteProcessingError,
};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MIB: usize = 1024 * 1024;

/// Route library logs to the test harness. `RUST_LOG=convertmorph_compress=debug`
/// shows the dispatch transitions.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── PDF fixtures ─────────────────────────────────────────────────────────────

/// A valid PDF with `pages` pages, each showing its own `w × h` RGB image
/// stored uncompressed.
pub fn sample_pdf(w: u32, h: u32, pages: usize) -> Vec<u8> {
    build_pdf(w, h, pages, false)
}

/// Like [`sample_pdf`] but every page draws the same image object.
pub fn shared_image_pdf(w: u32, h: u32, pages: usize) -> Vec<u8> {
    build_pdf(w, h, pages, true)
}

fn image_stream(w: u32, h: u32, seed: u32) -> Stream {
    let mut px = Vec::with_capacity((w * h * 3) as usize);
    for y in 0..h {
        for x in 0..w {
            px.push(((x + seed) % 256) as u8);
            px.push(((y * 2 + seed) % 256) as u8);
            px.push(((x ^ y) % 256) as u8);
        }
    }
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => w as i64,
            "Height" => h as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        px,
    )
    .with_compression(false)
}

fn build_pdf(w: u32, h: u32, pages: usize, shared: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let shared_id = doc.add_object(image_stream(w, h, 0));

    let mut kids: Vec<Object> = Vec::new();
    for i in 0..pages {
        let image_id = if shared || i == 0 {
            shared_id
        } else {
            doc.add_object(image_stream(w, h, i as u32 * 17))
        };
        let content = Stream::new(Dictionary::new(), b"q 612 0 0 792 0 0 cm /Im0 Do Q".to_vec());
        let content_id = doc.add_object(content);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => pages as i64,
            "Kids" => kids,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("fixture PDF serialises");
    out
}

/// A PDF whose page tree is empty.
pub fn pageless_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Count" => 0,
        "Kids" => Vec::<Object>::new(),
    });
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("fixture PDF serialises");
    out
}

/// A one-page PDF whose trailer names a standard security handler. The
/// objects themselves are plain; only the `Encrypt` entry matters.
pub fn encrypted_pdf() -> Vec<u8> {
    let mut doc = Document::load_mem(&sample_pdf(40, 30, 1)).expect("fixture PDF parses");
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "O" => Object::String(vec![0u8; 32], StringFormat::Hexadecimal),
        "U" => Object::String(vec![0u8; 32], StringFormat::Hexadecimal),
        "P" => -4,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("fixture PDF serialises");
    out
}

/// `size` bytes that start like a PDF; only useful with scripted executors.
pub fn fake_pdf(name: &str, size: usize) -> InputFile {
    let mut data = vec![b' '; size];
    let magic = b"%PDF-1.7\n";
    let n = magic.len().min(size);
    data[..n].copy_from_slice(&magic[..n]);
    InputFile::pdf(name, data)
}

// ── Scripted executor ────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum Behavior {
    /// Report `steps`, then return a blob of `keep_pct` percent of the input.
    Succeed { steps: Vec<u8>, keep_pct: u64 },
    /// Report `steps`, then fail with a mode-appropriate error.
    Fail { steps: Vec<u8> },
    /// Report `steps`, then never finish.
    Hang { steps: Vec<u8> },
}

pub struct ScriptedExecutor {
    mode: ExecutionMode,
    available: bool,
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(mode: ExecutionMode, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            mode,
            available: true,
            behavior,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding(mode: ExecutionMode) -> Arc<Self> {
        Self::new(
            mode,
            Behavior::Succeed {
                steps: vec![10, 40, 80],
                keep_pct: 60,
            },
        )
    }

    pub fn failing(mode: ExecutionMode) -> Arc<Self> {
        Self::new(mode, Behavior::Fail { steps: vec![5, 30] })
    }

    pub fn unavailable(mode: ExecutionMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            available: false,
            behavior: Behavior::Fail { steps: vec![] },
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn with_delay(mode: ExecutionMode, behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode,
            available: true,
            behavior,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn error(&self) -> ExecutionError {
        match self.mode {
            ExecutionMode::Local => LocalProcessingError::Parse {
                detail: "forced failure".into(),
            }
            .into(),
            ExecutionMode::Remote => RemoteProcessingError::Status {
                status: 503,
                detail: "forced failure".into(),
            }
            .into(),
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn execute(
        &self,
        file: &InputFile,
        _settings: &LevelSettings,
        progress: &AttemptProgress,
    ) -> Result<RawCompression, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let steps = match &self.behavior {
            Behavior::Succeed { steps, .. } | Behavior::Fail { steps } | Behavior::Hang { steps } => steps,
        };
        for &p in steps {
            progress.report(p, format!("step {p}"));
            tokio::task::yield_now().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.behavior {
            Behavior::Fail { .. } => Err(self.error()),
            Behavior::Hang { .. } => std::future::pending().await,
            Behavior::Succeed { keep_pct, .. } => {
                let kept = (file.size() * keep_pct / 100) as usize;
                let blob = vec![b'%'; kept];
                Ok(match self.mode {
                    ExecutionMode::Local => RawCompression::Local(RawLocalResult {
                        data: blob,
                        original_size: file.size(),
                        file_name: format!("{}-local.pdf", file.name()),
                        content_profile: ContentProfile::Mixed,
                        images_total: 0,
                        images_recompressed: 0,
                        pages: 1,
                    }),
                    ExecutionMode::Remote => RawCompression::Remote(RawRemoteResult {
                        compressed_size: blob.len() as u64,
                        body: Bytes::from(blob),
                        source_name: file.name().to_string(),
                        file_name: None,
                        original_size: file.size(),
                        content_profile: None,
                    }),
                })
            }
        }
    }
}

// ── Blocking worker ──────────────────────────────────────────────────────────

/// Reports once from a blocking thread, then keeps that thread busy until
/// its attempt is cancelled. `stopped()` turns true when the thread exits.
pub struct BlockingWorker {
    stopped: Arc<AtomicBool>,
}

impl BlockingWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for the worker thread to exit.
    pub async fn wait_stopped(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            while !self.stopped() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl Executor for BlockingWorker {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    async fn execute(
        &self,
        _file: &InputFile,
        _settings: &LevelSettings,
        progress: &AttemptProgress,
    ) -> Result<RawCompression, ExecutionError> {
        let progress = progress.clone();
        let stopped = Arc::clone(&self.stopped);
        let _ = tokio::task::spawn_blocking(move || {
            progress.report(5, "working");
            while !progress.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            stopped.store(true, Ordering::SeqCst);
        })
        .await;
        Err(LocalProcessingError::Cancelled.into())
    }
}

// ── Progress recorder ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<ProgressEvent>>,
    pub fallbacks: Mutex<Vec<(ExecutionMode, ExecutionMode, String)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.events().iter().map(|e| e.percent).collect()
    }

    pub fn fallbacks(&self) -> Vec<(ExecutionMode, ExecutionMode, String)> {
        self.fallbacks.lock().unwrap().clone()
    }
}

impl CompressionProgressCallback for Recorder {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_fallback(&self, from: ExecutionMode, to: ExecutionMode, reason: &str) {
        self.fallbacks.lock().unwrap().push((from, to, reason.to_string()));
    }
}

/// Percent values within each run of same-mode events must not decrease.
pub fn assert_monotonic_per_mode(events: &[ProgressEvent]) {
    for pair in events.windows(2) {
        if pair[0].mode == pair[1].mode && pair[0].is_fallback == pair[1].is_fallback {
            assert!(
                pair[1].percent >= pair[0].percent,
                "progress went backwards: {:?} → {:?}",
                pair[0],
                pair[1]
            );
        }
    }
}
