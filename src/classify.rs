use chrono::DateTime;
use url::Url;

use crate::fetcher::InfoExtractor;
use crate::formats::StreamInfo;

/// Hosts whose URLs carry live-state metadata worth checking before a capture.
const STRUCTURED_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamVerdict {
    /// Bare media stream, or metadata could not be read.
    Generic,
    /// Platform video that is live now (or not a live stream at all).
    LiveStructured,
    /// Scheduled live stream that has not started.
    Deferred,
    /// Live stream that is already over.
    Ended,
}

impl StreamVerdict {
    /// Terminal verdicts end the run without a capture.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deferred | Self::Ended)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::LiveStructured => "live-structured",
            Self::Deferred => "deferred",
            Self::Ended => "ended",
        }
    }
}

pub fn is_structured_platform(url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    STRUCTURED_HOSTS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

pub fn classify_url(url: &str, extractor: &dyn InfoExtractor) -> StreamVerdict {
    if !is_structured_platform(url) {
        tracing::info!(url, "non-platform url; skipping live stream check");
        return StreamVerdict::Generic;
    }
    classify_info(extractor.extract_info(url))
}

pub fn classify_info(info: anyhow::Result<StreamInfo>) -> StreamVerdict {
    let info = match info {
        Ok(info) => info,
        Err(err) => {
            tracing::warn!("could not extract stream info; assuming generic stream: {err:#}");
            return StreamVerdict::Generic;
        }
    };

    if info
        .extractor
        .as_deref()
        .is_some_and(|extractor| extractor.eq_ignore_ascii_case("generic"))
    {
        tracing::info!("generic stream detected; proceeding without live checks");
        return StreamVerdict::Generic;
    }

    let is_live = info.is_live.unwrap_or(false);
    let was_live = info.was_live.unwrap_or(false);
    match (is_live, was_live) {
        (true, false) => {
            match info.release_timestamp.and_then(format_scheduled_time) {
                Some(scheduled) => {
                    tracing::info!("stream is scheduled to go live at {scheduled}");
                }
                None => tracing::info!("stream is scheduled but no start time is available"),
            }
            StreamVerdict::Deferred
        }
        (true, true) => {
            tracing::info!("stream has already ended");
            StreamVerdict::Ended
        }
        (false, _) => {
            tracing::info!("not a live stream; proceeding anyway");
            StreamVerdict::LiveStructured
        }
    }
}

fn format_scheduled_time(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp(timestamp, 0)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
