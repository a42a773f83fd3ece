//! Seams between the capture core and the programs that actually talk to the
//! network.
//!
//! A [`MediaFetcher`] downloads media and reports progress through a hook. The
//! hook is the only way the capture core can ask a running download to stop:
//! when it returns an error the fetcher must unwind and return that error.

use std::time::Duration;

use crate::formats::StreamInfo;

/// Upper bound on how long a fetcher may go without calling its progress hook.
///
/// Fetchers emit [`FetchProgress::Idle`] at this interval while they wait on
/// I/O so that a stop request is noticed even when no data arrives.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatConstraints {
    /// Cap on the selected video height; `None` selects the best available.
    pub max_resolution: Option<u32>,
    pub free_formats: bool,
    pub legacy_server_connect: bool,
}

impl FormatConstraints {
    pub fn format_selector(&self) -> String {
        match self.max_resolution {
            Some(height) => {
                format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]/best")
            }
            None => "best".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Output path template; `%(ext)s` is replaced with the media extension.
    pub destination: String,
    pub format: FormatConstraints,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchProgress {
    Downloading {
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
        speed: Option<f64>,
        eta: Option<u64>,
    },
    Finished,
    Idle,
}

pub type ProgressHook<'a> = dyn FnMut(&FetchProgress) -> anyhow::Result<()> + 'a;

pub trait MediaFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Blocks until the download completes, fails, or the hook returns an error.
    fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: &mut ProgressHook<'_>,
    ) -> anyhow::Result<()>;
}

pub trait InfoExtractor: Send + Sync {
    /// Reads stream metadata without downloading any media.
    fn extract_info(&self, url: &str) -> anyhow::Result<StreamInfo>;
}
