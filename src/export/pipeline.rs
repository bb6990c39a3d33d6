use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

use super::ExportError;
use super::compose::{CaptionFont, CompositionOptions, FontColor, Placement, RenderedPage, compose};
use super::document::{ExportDocument, png_blob};
use super::fetch::ImageFetcher;
use crate::records::ImageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Idle,
    Loading,
    Exporting,
    Done,
    Cancelled,
}

/// Published on every step so a hosting UI can render progress.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    pub phase: ExportPhase,
    pub current: usize,
    pub total: usize,
    pub last_error: Option<String>,
}

impl ExportProgress {
    fn idle() -> Self {
        Self {
            phase: ExportPhase::Idle,
            current: 0,
            total: 0,
            last_error: None,
        }
    }
}

#[derive(Debug)]
pub enum ExportOutcome {
    Saved {
        path: PathBuf,
        pages: usize,
        warnings: Vec<String>,
    },
    Cancelled,
    /// An export was already running; the request was a no-op.
    Busy,
}

/// Lets the owner of a torn-down view abandon a running batch.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ExporterConfig {
    pub file_prefix: String,
    pub watermark: String,
    pub output_dir: PathBuf,
    pub font: Option<CaptionFont>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            file_prefix: "kidscolor".to_string(),
            watermark: "kidscolor.app".to_string(),
            output_dir: PathBuf::from("."),
            font: None,
        }
    }
}

/// Drives per-image processing for single and batch exports. Images are
/// processed strictly in input order, one at a time; the composited pages
/// share one document and page order must match input order.
pub struct Exporter<F: ImageFetcher> {
    fetcher: F,
    config: ExporterConfig,
    busy: AtomicBool,
    cancelled: Arc<AtomicBool>,
    progress: watch::Sender<ExportProgress>,
}

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<F: ImageFetcher> Exporter<F> {
    pub fn new(fetcher: F, config: ExporterConfig) -> Self {
        let (progress, _) = watch::channel(ExportProgress::idle());
        Self {
            fetcher,
            config,
            busy: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            progress,
        }
    }

    pub fn progress(&self) -> watch::Receiver<ExportProgress> {
        self.progress.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.cancelled.store(false, Ordering::SeqCst);
        Some(BusyGuard(&self.busy))
    }

    fn publish(&self, phase: ExportPhase, current: usize, total: usize, last_error: Option<String>) {
        self.progress.send_replace(ExportProgress {
            phase,
            current,
            total,
            last_error,
        });
    }

    /// Exports one customized page as a PNG file. Load errors are fatal
    /// here; there is no other image to fall back to.
    pub async fn export_png(
        &self,
        record: &ImageRecord,
        options: &CompositionOptions,
    ) -> Result<ExportOutcome, ExportError> {
        let Some(_guard) = self.try_acquire() else {
            return Ok(ExportOutcome::Busy);
        };
        self.publish(ExportPhase::Loading, 1, 1, None);

        let bitmap = match self.fetcher.fetch(&record.image_url).await {
            Ok(bitmap) => bitmap,
            Err(err) => {
                self.publish(ExportPhase::Idle, 1, 1, Some(err.to_string()));
                return Err(err.into());
            }
        };
        if self.cancelled.load(Ordering::SeqCst) {
            self.publish(ExportPhase::Cancelled, 1, 1, None);
            return Ok(ExportOutcome::Cancelled);
        }
        self.publish(ExportPhase::Exporting, 1, 1, None);

        let saved = compose(&bitmap, options, self.config.font.as_ref())
            .and_then(|page| png_blob(&page, record, &self.config.file_prefix))
            .and_then(|(bytes, filename)| self.save(&filename, &bytes));
        let path = match saved {
            Ok(path) => path,
            Err(err) => {
                self.publish(ExportPhase::Idle, 1, 1, Some(err.to_string()));
                return Err(err);
            }
        };

        self.publish(ExportPhase::Done, 1, 1, None);
        info!("saved {}", path.display());
        Ok(ExportOutcome::Saved {
            path,
            pages: 1,
            warnings: Vec::new(),
        })
    }

    /// Exports a batch into one cumulative PDF. Per-image failures degrade
    /// that page and the batch continues; each input contributes exactly one
    /// page, in input order.
    pub async fn export_batch(
        &self,
        records: &[ImageRecord],
        options: Option<&CompositionOptions>,
    ) -> Result<ExportOutcome, ExportError> {
        let Some(_guard) = self.try_acquire() else {
            return Ok(ExportOutcome::Busy);
        };
        let total = records.len();
        let mut last_error: Option<String> = None;

        // Bare square when no caption was requested: the empty overlay mode
        // draws no band.
        let default_options =
            CompositionOptions::new("", Placement::OverlayBottom, FontColor::Black, 36.0);
        let options = options.unwrap_or(&default_options);

        let mut pages: Vec<Option<RenderedPage>> = Vec::with_capacity(total);
        for (index, record) in records.iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                self.publish(ExportPhase::Cancelled, index, total, last_error);
                return Ok(ExportOutcome::Cancelled);
            }
            self.publish(ExportPhase::Loading, index + 1, total, last_error.clone());

            let fetched = self.fetcher.fetch(&record.image_url).await;
            if self.cancelled.load(Ordering::SeqCst) {
                // Result of the in-flight fetch is discarded on arrival.
                self.publish(ExportPhase::Cancelled, index, total, last_error);
                return Ok(ExportOutcome::Cancelled);
            }

            let page = match fetched {
                Ok(bitmap) => match compose(&bitmap, options, self.config.font.as_ref()) {
                    Ok(page) => Some(page),
                    Err(err) => {
                        warn!("render failed for '{}': {}", record.keyword, err);
                        last_error = Some(err.to_string());
                        None
                    }
                },
                Err(err) => {
                    warn!("load failed for '{}': {}", record.keyword, err);
                    last_error = Some(err.to_string());
                    None
                }
            };

            self.publish(ExportPhase::Exporting, index + 1, total, last_error.clone());
            pages.push(page);
        }

        if self.cancelled.load(Ordering::SeqCst) {
            self.publish(ExportPhase::Cancelled, total, total, last_error);
            return Ok(ExportOutcome::Cancelled);
        }

        // Document assembly is fully synchronous and never crosses an await:
        // the pdf handle is not Send, so it must not be held while fetching.
        let result = self.assemble_and_save(records, &pages);
        match result {
            Ok((path, pages, warnings)) => {
                self.publish(ExportPhase::Done, total, total, last_error);
                info!("saved {} pages to {}", pages, path.display());
                Ok(ExportOutcome::Saved {
                    path,
                    pages,
                    warnings,
                })
            }
            Err(err) => {
                self.publish(ExportPhase::Idle, total, total, Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn assemble_and_save(
        &self,
        records: &[ImageRecord],
        pages: &[Option<RenderedPage>],
    ) -> Result<(PathBuf, usize, Vec<String>), ExportError> {
        let mut doc = ExportDocument::new(&self.config.file_prefix, &self.config.watermark)?;
        for (record, page) in records.iter().zip(pages) {
            doc.append(record, page.as_ref());
        }
        let count = doc.page_count();
        let warnings = doc.warnings().to_vec();
        let (bytes, filename) = doc.finalize()?;
        let path = self.save(&filename, &bytes)?;
        Ok((path, count, warnings))
    }

    fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.config.output_dir).map_err(|err| {
            ExportError::Finalize(format!(
                "failed to create {}: {}",
                self.config.output_dir.display(),
                err
            ))
        })?;
        let path = self.config.output_dir.join(filename);
        fs::write(&path, bytes)
            .map_err(|err| ExportError::Finalize(format!("failed to write {}: {}", path.display(), err)))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fetch::{FetchFuture, LoadError};
    use image::DynamicImage;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockState {
        calls: usize,
        fail_indices: Vec<usize>,
        cancel_after: Option<(usize, CancelHandle)>,
        delay: Option<Duration>,
    }

    #[derive(Clone)]
    struct MockFetcher {
        state: Arc<Mutex<MockState>>,
    }

    impl MockFetcher {
        fn new(fail_indices: Vec<usize>) -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState {
                    calls: 0,
                    fail_indices,
                    cancel_after: None,
                    delay: None,
                })),
            }
        }

        fn calls(&self) -> usize {
            self.state.lock().expect("state lock").calls
        }
    }

    impl ImageFetcher for MockFetcher {
        fn fetch(&self, url: &str) -> FetchFuture {
            let state = self.state.clone();
            let url = url.to_string();
            Box::pin(async move {
                let (index, fail, cancel, delay) = {
                    let mut state = state.lock().expect("state lock");
                    let index = state.calls;
                    state.calls += 1;
                    let fail = state.fail_indices.contains(&index);
                    let cancel = match &state.cancel_after {
                        Some((after, handle)) if index + 1 >= *after => Some(handle.clone()),
                        _ => None,
                    };
                    (index, fail, cancel, state.delay)
                };
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if let Some(handle) = cancel {
                    handle.cancel();
                }
                if fail {
                    return Err(LoadError::Network {
                        url,
                        message: format!("mock failure at index {}", index),
                    });
                }
                Ok(DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
                    4,
                    4,
                    image::Rgb([255, 255, 255]),
                )))
            })
        }
    }

    fn record(keyword: &str) -> ImageRecord {
        serde_json::from_str(&format!(
            r#"{{"id":"{0}","keyword":"{0}","imageUrl":"https://cdn.example/{0}.png"}}"#,
            keyword
        ))
        .expect("build record")
    }

    fn exporter_in(dir: &std::path::Path, fetcher: MockFetcher) -> Exporter<MockFetcher> {
        Exporter::new(
            fetcher,
            ExporterConfig {
                output_dir: dir.to_path_buf(),
                ..ExporterConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn batch_with_failures_still_covers_every_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = MockFetcher::new(vec![1]);
        let exporter = exporter_in(dir.path(), fetcher);
        let records = vec![record("lion"), record("tiger"), record("bear"), record("fox")];

        let outcome = exporter
            .export_batch(&records, None)
            .await
            .expect("batch export");
        match outcome {
            ExportOutcome::Saved { path, pages, warnings } => {
                assert_eq!(pages, 4);
                assert_eq!(warnings.len(), 1);
                assert!(warnings[0].contains("tiger"));
                assert!(path.ends_with("kidscolor-4-pages.pdf"));
                assert!(path.exists());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!exporter.is_busy());

        let progress = exporter.progress().borrow().clone();
        assert_eq!(progress.phase, ExportPhase::Done);
        assert_eq!(progress.current, 4);
        assert_eq!(progress.total, 4);
    }

    #[tokio::test]
    async fn cancel_mid_batch_skips_remaining_fetches_and_saves_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = MockFetcher::new(Vec::new());
        let exporter = exporter_in(dir.path(), fetcher.clone());
        fetcher.state.lock().expect("state lock").cancel_after =
            Some((2, exporter.cancel_handle()));
        let records: Vec<ImageRecord> = ["lion", "tiger", "bear", "fox", "owl"]
            .iter()
            .map(|keyword| record(keyword))
            .collect();

        let outcome = exporter
            .export_batch(&records, None)
            .await
            .expect("batch export");
        assert!(matches!(outcome, ExportOutcome::Cancelled));
        assert_eq!(fetcher.calls(), 2);
        assert!(!exporter.is_busy());

        let saved: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .collect();
        assert!(saved.is_empty(), "cancelled batch must not save a document");
    }

    #[tokio::test]
    async fn second_export_while_busy_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = MockFetcher::new(Vec::new());
        fetcher.state.lock().expect("state lock").delay = Some(Duration::from_millis(100));
        let exporter = Arc::new(exporter_in(dir.path(), fetcher));
        let records = vec![record("lion"), record("tiger")];

        let background = {
            let exporter = exporter.clone();
            let records = records.clone();
            tokio::spawn(async move { exporter.export_batch(&records, None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = exporter
            .export_batch(&records, None)
            .await
            .expect("second export");
        assert!(matches!(second, ExportOutcome::Busy));

        let first = background.await.expect("join").expect("first export");
        assert!(matches!(first, ExportOutcome::Saved { .. }));
        assert!(!exporter.is_busy());
    }

    #[tokio::test]
    async fn single_png_export_uses_the_keyword_filename() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = exporter_in(dir.path(), MockFetcher::new(Vec::new()));
        let options =
            CompositionOptions::new("Happy Birthday!", Placement::StripBelow, FontColor::Blue, 36.0);

        let outcome = exporter
            .export_png(&record("red panda"), &options)
            .await
            .expect("png export");
        match outcome {
            ExportOutcome::Saved { path, .. } => {
                assert!(path.ends_with("kidscolor-red-panda.png"));
                assert!(path.exists());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!exporter.is_busy());
    }

    #[tokio::test]
    async fn single_export_load_failure_clears_the_busy_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = exporter_in(dir.path(), MockFetcher::new(vec![0, 1]));
        let options =
            CompositionOptions::new("", Placement::OverlayBottom, FontColor::Black, 36.0);

        let err = exporter
            .export_png(&record("ghost"), &options)
            .await
            .expect_err("load should fail");
        assert!(matches!(err, ExportError::Load(_)));
        assert!(!exporter.is_busy());

        let progress = exporter.progress().borrow().clone();
        assert_eq!(progress.phase, ExportPhase::Idle);
        assert!(progress.last_error.is_some(), "failure must be published");
    }

    fn require_send<T: Send>(value: T) -> T {
        value
    }

    #[tokio::test]
    async fn batch_future_moves_between_threads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = exporter_in(dir.path(), MockFetcher::new(Vec::new()));
        let records = vec![record("lion")];

        // The pdf handle is thread-local, so the batch future is only Send
        // because document assembly happens after the last await.
        let outcome = require_send(exporter.export_batch(&records, None))
            .await
            .expect("batch export");
        assert!(matches!(outcome, ExportOutcome::Saved { .. }));
    }
}
