use std::fs::File;
use std::io::{BufWriter, Read, Write as _};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use url::Url;

use crate::fetcher::{
    FetchProgress, FetchRequest, HEARTBEAT_INTERVAL, MediaFetcher, ProgressHook,
};
use crate::finalize::EXT_PLACEHOLDER;

const CHUNK_SIZE: usize = 64 * 1024;

/// Streams a bare media URL (Icecast mount, progressive file) straight to disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    connect_timeout: Duration,
    heartbeat: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

impl MediaFetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: &mut ProgressHook<'_>,
    ) -> anyhow::Result<()> {
        let url = Url::parse(&request.url).context("parse stream url")?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("stream url must be http/https: {url}");
        }
        if request.format.max_resolution.is_some()
            || request.format.free_formats
            || request.format.legacy_server_connect
        {
            tracing::debug!("format constraints do not apply to direct http streams");
        }

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(None::<Duration>)
            .build()
            .context("build http client")?;
        let response = client
            .get(url.clone())
            .header(USER_AGENT, concat!("ncspan-grabber/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "audio/*,video/*;q=0.9,*/*;q=0.8")
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let total_bytes = response.content_length();
        let ext = extension_for(content_type.as_deref(), &url);
        let out_path = PathBuf::from(request.destination.replace(EXT_PLACEHOLDER, &ext));
        tracing::info!(
            content_type = ?content_type,
            out = %out_path.display(),
            "http stream open"
        );

        let file = File::create(&out_path)
            .with_context(|| format!("create capture file: {}", out_path.display()))?;
        let mut out = BufWriter::new(file);

        let chunks = spawn_body_reader(response)?;
        let mut downloaded: u64 = 0;
        let outcome = loop {
            match chunks.recv_timeout(self.heartbeat) {
                Ok(Ok(chunk)) => {
                    if let Err(err) = out.write_all(&chunk) {
                        break Err(anyhow::Error::from(err)
                            .context(format!("write capture file: {}", out_path.display())));
                    }
                    downloaded += chunk.len() as u64;
                    let progress = FetchProgress::Downloading {
                        downloaded_bytes: Some(downloaded),
                        total_bytes,
                        speed: None,
                        eta: None,
                    };
                    if let Err(err) = on_progress(&progress) {
                        break Err(err);
                    }
                }
                Ok(Err(err)) => break Err(err),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Err(err) = on_progress(&FetchProgress::Idle) {
                        break Err(err);
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break on_progress(&FetchProgress::Finished);
                }
            }
        };

        // Keep whatever arrived before a stop request; a cut live stream is still a capture.
        out.flush()
            .with_context(|| format!("flush capture file: {}", out_path.display()))?;
        tracing::debug!(downloaded, out = %out_path.display(), "http stream closed");
        outcome
    }
}

type Chunk = anyhow::Result<Vec<u8>>;

fn spawn_body_reader(
    mut response: reqwest::blocking::Response,
) -> anyhow::Result<mpsc::Receiver<Chunk>> {
    let (tx, rx) = mpsc::sync_channel::<Chunk>(16);
    std::thread::Builder::new()
        .name("http-body".to_owned())
        .spawn(move || {
            let mut buf = vec![0_u8; CHUNK_SIZE];
            loop {
                let chunk = match response.read(&mut buf) {
                    Ok(0) => return,
                    Ok(n) => Ok(buf[..n].to_vec()),
                    Err(err) => Err(anyhow::Error::from(err).context("read http body")),
                };
                let failed = chunk.is_err();
                if tx.send(chunk).is_err() || failed {
                    return;
                }
            }
        })
        .context("spawn http body reader")?;
    Ok(rx)
}

fn extension_for(content_type: Option<&str>, url: &Url) -> String {
    let mime = content_type
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase());
    let from_mime = match mime.as_deref() {
        Some("audio/mpeg" | "audio/mp3") => Some("mp3"),
        Some("audio/aac" | "audio/aacp") => Some("aac"),
        Some("audio/ogg" | "application/ogg") => Some("ogg"),
        Some("audio/opus") => Some("opus"),
        Some("audio/flac") => Some("flac"),
        Some("audio/mp4" | "audio/x-m4a") => Some("m4a"),
        Some("video/mp4") => Some("mp4"),
        Some("video/webm") => Some("webm"),
        Some("video/mp2t") => Some("ts"),
        Some("video/x-flv") => Some("flv"),
        _ => None,
    };
    if let Some(ext) = from_mime {
        return ext.to_owned();
    }

    let last_segment = url.path().rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => "bin".to_owned(),
    }
}
