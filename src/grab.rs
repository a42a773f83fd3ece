use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::Instrument as _;

use crate::archive::{ArchiveFields, ArchiveRecord};
use crate::capture::{BoundedCapture, CaptureJob};
use crate::cli::{FetcherKind, GrabArgs};
use crate::fetcher::{FormatConstraints, InfoExtractor, MediaFetcher};
use crate::http_fetch::HttpFetcher;
use crate::ytdlp::{YtDlpConfig, YtDlpFetcher};

pub async fn run(args: GrabArgs) -> anyhow::Result<()> {
    let ytdlp = Arc::new(YtDlpFetcher::new(YtDlpConfig::from_env()));
    let fetcher: Arc<dyn MediaFetcher> = match args.fetcher {
        FetcherKind::YtDlp => ytdlp.clone(),
        FetcherKind::Http => Arc::new(HttpFetcher::default()),
    };
    run_with(args, ytdlp, fetcher).await
}

/// Classify, capture, then finalize.
///
/// Returns early with `Ok(())` when the stream is scheduled or already over;
/// nothing is downloaded or written in that case.
pub async fn run_with(
    args: GrabArgs,
    extractor: Arc<dyn InfoExtractor>,
    fetcher: Arc<dyn MediaFetcher>,
) -> anyhow::Result<()> {
    let span = tracing::info_span!("grab", url = %args.url);
    grab(args, extractor, fetcher).instrument(span).await
}

async fn grab(
    args: GrabArgs,
    extractor: Arc<dyn InfoExtractor>,
    fetcher: Arc<dyn MediaFetcher>,
) -> anyhow::Result<()> {
    let output_dir = PathBuf::from(&args.output_dir);
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("create output dir: {}", output_dir.display()))?;

    tracing::info!("starting download");
    let verdict = {
        let url = args.url.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            span.in_scope(|| crate::classify::classify_url(&url, extractor.as_ref()))
        })
        .await
        .context("join stream classification")?
    };
    if verdict.is_terminal() {
        tracing::info!(verdict = verdict.as_str(), "no capture attempted");
        return Ok(());
    }
    tracing::debug!(verdict = verdict.as_str(), "stream classified");

    let destination = match args.output.as_deref() {
        Some(template) => output_dir.join(template),
        None => crate::finalize::temp_template(&output_dir),
    };
    let job = CaptureJob {
        url: args.url.clone(),
        destination: destination.to_string_lossy().to_string(),
        max_duration: Duration::from_secs(args.duration),
        format: FormatConstraints {
            max_resolution: args.max_resolution,
            free_formats: args.free_formats,
            legacy_server_connect: args.legacy_server_connect,
        },
    };
    let window = BoundedCapture::new(fetcher)
        .run(job)
        .await
        .context("capture")?;

    let finalized = match args.output.as_deref() {
        Some(template) => Some(crate::finalize::explicit_output(&output_dir, template)?),
        None => crate::finalize::rename_temp_artifact(&output_dir, &window, &args.prefix)
            .context("finalize capture")?,
    };
    let Some(finalized) = finalized else {
        tracing::warn!(
            output_dir = %output_dir.display(),
            "no finished capture file found; skipping archive metadata"
        );
        return Ok(());
    };

    let record = ArchiveRecord::new(
        finalized.identifier,
        finalized.filename,
        ArchiveFields {
            title: args.ia_title,
            description: args.ia_description,
            creator: args.ia_creator,
            license_url: args.ia_license,
        },
    );
    crate::archive::write_sidecars(&output_dir, &record).context("write archive metadata")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::fetcher::{FetchProgress, FetchRequest, ProgressHook};
    use crate::formats::StreamInfo;

    struct FixedInfo(StreamInfo);

    impl InfoExtractor for FixedInfo {
        fn extract_info(&self, _url: &str) -> anyhow::Result<StreamInfo> {
            Ok(self.0.clone())
        }
    }

    /// Writes a small file to the requested destination.
    #[derive(Default)]
    struct WritingFetcher {
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl MediaFetcher for WritingFetcher {
        fn name(&self) -> &'static str {
            "writing"
        }

        fn fetch(
            &self,
            request: &FetchRequest,
            on_progress: &mut ProgressHook<'_>,
        ) -> anyhow::Result<()> {
            self.requests.lock().unwrap().push(request.clone());
            let path = request.destination.replace("%(ext)s", "mp4");
            std::fs::write(&path, b"media")?;
            on_progress(&FetchProgress::Finished)
        }
    }

    fn args(output_dir: &std::path::Path, url: &str) -> GrabArgs {
        GrabArgs {
            url: url.to_owned(),
            output: None,
            duration: 5,
            debug: false,
            log_file: None,
            prefix: "show_".to_owned(),
            output_dir: output_dir.to_string_lossy().to_string(),
            free_formats: true,
            max_resolution: Some(720),
            legacy_server_connect: false,
            ia_title: None,
            ia_description: None,
            ia_creator: Some("KXYZ".to_owned()),
            ia_license: None,
            fetcher: FetcherKind::YtDlp,
        }
    }

    fn youtube_info(is_live: bool, was_live: bool) -> FixedInfo {
        FixedInfo(StreamInfo {
            extractor: Some("youtube".to_owned()),
            is_live: Some(is_live),
            was_live: Some(was_live),
            release_timestamp: None,
        })
    }

    fn list_dir(dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
        let mut names = std::fs::read_dir(dir)?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().to_string()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    #[tokio::test]
    async fn ended_stream_is_not_captured() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let out = temp.path().join("captures");
        let fetcher = Arc::new(WritingFetcher::default());

        run_with(
            args(&out, "https://www.youtube.com/watch?v=abc"),
            Arc::new(youtube_info(true, true)),
            fetcher.clone(),
        )
        .await?;

        assert!(fetcher.requests.lock().unwrap().is_empty());
        assert!(out.is_dir());
        assert!(list_dir(&out)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn capture_is_renamed_and_described() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = Arc::new(WritingFetcher::default());

        run_with(
            args(temp.path(), "https://www.youtube.com/watch?v=abc"),
            Arc::new(youtube_info(false, false)),
            fetcher.clone(),
        )
        .await?;

        let requests = fetcher.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].destination.ends_with("temp.%(ext)s"));
        assert_eq!(requests[0].format.max_resolution, Some(720));
        assert!(requests[0].format.free_formats);

        let names = list_dir(temp.path())?;
        assert_eq!(names.len(), 3, "{names:?}");
        let media = names
            .iter()
            .find(|name| name.ends_with(".mp4"))
            .expect("renamed capture");
        assert!(media.starts_with("show_live_"));
        let identifier = media.trim_end_matches(".mp4");
        assert!(names.contains(&format!("{identifier}_files.xml")));
        assert!(names.contains(&format!("{identifier}_meta.xml")));

        let meta = std::fs::read_to_string(temp.path().join(format!("{identifier}_meta.xml")))?;
        assert!(meta.contains("KXYZ"));
        Ok(())
    }

    #[tokio::test]
    async fn explicit_output_skips_the_rename() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let mut grab = args(temp.path(), "https://radio.example/stream");
        grab.output = Some("concert.mp4".to_owned());

        run_with(
            grab,
            Arc::new(youtube_info(true, true)),
            Arc::new(WritingFetcher::default()),
        )
        .await?;

        assert_eq!(
            list_dir(temp.path())?,
            vec!["concert.mp4", "concert_files.xml", "concert_meta.xml"]
        );
        Ok(())
    }
}
