//! Bounded-duration capture.
//!
//! A capture runs the fetcher on a dedicated `capture-worker` thread while the
//! calling task waits for it with a deadline. Once the deadline passes the
//! caller raises a [`CancelFlag`]; the worker's progress hook notices the flag
//! and fails the download with [`CaptureCancelled`]. The worker is never
//! killed, so the caller keeps waiting until it has actually exited and only
//! then records the end of the [`CaptureWindow`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};

use crate::fetcher::{FetchProgress, FetchRequest, FormatConstraints, MediaFetcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub url: String,
    pub destination: String,
    pub max_duration: Duration,
    pub format: FormatConstraints,
}

impl CaptureJob {
    fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            url: self.url.clone(),
            destination: self.destination.clone(),
            format: self.format.clone(),
        }
    }
}

/// When a capture actually started and when the caller saw it finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CaptureWindow {
    pub fn elapsed(&self) -> chrono::TimeDelta {
        self.end - self.start
    }
}

/// Set-once stop request shared between the caller and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that raised the flag.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raised from the progress hook once the duration limit has been reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureCancelled;

impl fmt::Display for CaptureCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("capture duration limit reached")
    }
}

impl std::error::Error for CaptureCancelled {}

pub struct BoundedCapture {
    fetcher: Arc<dyn MediaFetcher>,
    cancel: CancelFlag,
}

impl BoundedCapture {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            fetcher,
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Runs `job` to completion or until `job.max_duration` has elapsed.
    ///
    /// Download failures stay inside the worker and are only logged; the
    /// window is returned regardless. Fails only when the worker thread cannot
    /// be spawned.
    pub async fn run(&self, job: CaptureJob) -> anyhow::Result<CaptureWindow> {
        let request = job.fetch_request();
        let fetcher = Arc::clone(&self.fetcher);
        let cancel = self.cancel.clone();
        let span = tracing::Span::current();
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel::<()>();

        tracing::info!(
            url = %job.url,
            destination = %job.destination,
            fetcher = fetcher.name(),
            max_duration_secs = job.max_duration.as_secs_f64(),
            "capture start"
        );

        let start = Utc::now();
        let worker = std::thread::Builder::new()
            .name("capture-worker".to_owned())
            .spawn(move || {
                span.in_scope(|| run_worker(fetcher.as_ref(), &request, &cancel));
                let _ = done_tx.send(());
            })
            .context("spawn capture worker")?;

        // A dropped sender (worker panicked) also resolves the receiver.
        if tokio::time::timeout(job.max_duration, &mut done_rx)
            .await
            .is_err()
        {
            tracing::info!(
                max_duration_secs = job.max_duration.as_secs_f64(),
                "stopping download after duration limit"
            );
            self.cancel.cancel();
            let _ = done_rx.await;
        }

        join_worker(worker).await?;
        let end = Utc::now();

        let window = CaptureWindow { start, end };
        tracing::info!(
            start = %window.start,
            end = %window.end,
            elapsed_secs = window.elapsed().num_milliseconds() as f64 / 1000.0,
            "capture complete"
        );
        Ok(window)
    }
}

fn run_worker(fetcher: &dyn MediaFetcher, request: &FetchRequest, cancel: &CancelFlag) {
    let mut on_progress = |progress: &FetchProgress| -> anyhow::Result<()> {
        if cancel.is_cancelled() {
            return Err(CaptureCancelled.into());
        }
        log_progress(progress);
        Ok(())
    };

    match fetcher.fetch(request, &mut on_progress) {
        Ok(()) => tracing::info!(fetcher = fetcher.name(), "download finished"),
        Err(err) if err.downcast_ref::<CaptureCancelled>().is_some() => {
            tracing::warn!(fetcher = fetcher.name(), "download interrupted: {err}");
        }
        Err(err) => {
            tracing::warn!(fetcher = fetcher.name(), "download interrupted: {err:#}");
        }
    }
}

fn log_progress(progress: &FetchProgress) {
    match progress {
        FetchProgress::Downloading {
            downloaded_bytes,
            total_bytes,
            speed,
            eta,
        } => tracing::debug!(?downloaded_bytes, ?total_bytes, ?speed, ?eta, "downloading"),
        FetchProgress::Finished => tracing::debug!("download stream finished"),
        FetchProgress::Idle => tracing::trace!("waiting for data"),
    }
}

async fn join_worker(worker: JoinHandle<()>) -> anyhow::Result<()> {
    let joined = tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("join capture worker")?;
    if joined.is_err() {
        tracing::warn!("capture worker panicked");
    }
    Ok(())
}
