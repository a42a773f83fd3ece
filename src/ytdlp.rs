use std::collections::VecDeque;
use std::io::{BufRead as _, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::Context as _;

use crate::fetcher::{
    FetchProgress, FetchRequest, HEARTBEAT_INTERVAL, InfoExtractor, MediaFetcher, ProgressHook,
};
use crate::formats::StreamInfo;

const PROGRESS_MARKER: &str = "[ncspan-progress]";
const PROGRESS_TEMPLATE: &str = "download:[ncspan-progress] %(progress.status)s \
%(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.speed)s %(progress.eta)s";
const STDERR_TAIL_LINES: usize = 20;
/// How long yt-dlp gets to finalize its output after SIGINT.
const STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub bin: String,
    /// Arguments placed before the generated ones (e.g. `-m yt_dlp` for `python3`).
    pub leading_args: Vec<String>,
}

impl YtDlpConfig {
    pub fn from_env() -> Self {
        let bin =
            std::env::var("NCSPAN_GRABBER_YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_owned());
        let leading_args = std::env::var("NCSPAN_GRABBER_YTDLP_ARGS")
            .map(|args| args.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        Self { bin, leading_args }
    }
}

#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    config: YtDlpConfig,
    heartbeat: Duration,
}

impl YtDlpFetcher {
    pub fn new(config: YtDlpConfig) -> Self {
        Self {
            config,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    fn spawn(&self, args: &[String]) -> anyhow::Result<Child> {
        tracing::debug!(bin = %self.config.bin, ?args, "yt-dlp exec");
        let mut cmd = Command::new(&self.config.bin);
        cmd.args(&self.config.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a stop reaches ffmpeg and any other helper too.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }
        cmd.spawn()
            .with_context(|| format!("spawn yt-dlp: {}", self.config.bin))
    }

    /// Forwards child output to `on_progress` until both pipes close.
    ///
    /// Every line reaches the hook, so a chatty child cannot starve a stop
    /// request.
    ///
    /// Returns the last few stderr lines for error reporting.
    fn pump(
        &self,
        lines: &mpsc::Receiver<OutputLine>,
        on_progress: &mut ProgressHook<'_>,
    ) -> anyhow::Result<VecDeque<String>> {
        let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        loop {
            match lines.recv_timeout(self.heartbeat) {
                Ok(OutputLine::Stdout(line)) => match parse_progress_line(&line) {
                    Some(progress) => on_progress(&progress)?,
                    None => {
                        tracing::debug!("yt-dlp: {line}");
                        on_progress(&FetchProgress::Idle)?;
                    }
                },
                Ok(OutputLine::Stderr(line)) => {
                    log_stderr_line(&line);
                    if stderr_tail.len() == STDERR_TAIL_LINES {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(line);
                    on_progress(&FetchProgress::Idle)?;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => on_progress(&FetchProgress::Idle)?,
                Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(stderr_tail),
            }
        }
    }
}

impl MediaFetcher for YtDlpFetcher {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: &mut ProgressHook<'_>,
    ) -> anyhow::Result<()> {
        let args = build_download_args(request);
        let mut child = self.spawn(&args)?;

        let (tx, rx) = mpsc::channel();
        let stdout = child.stdout.take().context("open yt-dlp stdout")?;
        let stderr = child.stderr.take().context("open yt-dlp stderr")?;
        spawn_line_reader("yt-dlp-stdout", stdout, tx.clone(), OutputLine::Stdout)?;
        spawn_line_reader("yt-dlp-stderr", stderr, tx, OutputLine::Stderr)?;

        let stderr_tail = match self.pump(&rx, on_progress) {
            Ok(tail) => tail,
            Err(err) => {
                stop_child(&mut child);
                return Err(err);
            }
        };

        let status = child.wait().context("wait yt-dlp")?;
        if !status.success() {
            anyhow::bail!(
                "yt-dlp failed ({status}): {}",
                last_error_line(&stderr_tail).unwrap_or("no error output")
            );
        }
        Ok(())
    }
}

impl InfoExtractor for YtDlpFetcher {
    fn extract_info(&self, url: &str) -> anyhow::Result<StreamInfo> {
        let args = build_info_args(url);
        let output = self
            .spawn(&args)?
            .wait_with_output()
            .context("wait yt-dlp")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines = stderr.lines().map(str::to_owned).collect::<VecDeque<_>>();
            anyhow::bail!(
                "yt-dlp failed ({}): {}",
                output.status,
                last_error_line(&lines).unwrap_or("no error output")
            );
        }
        serde_json::from_slice(&output.stdout).context("parse yt-dlp info json")
    }
}

#[derive(Debug)]
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

fn spawn_line_reader<R>(
    name: &str,
    pipe: R,
    tx: mpsc::Sender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) -> anyhow::Result<()>
where
    R: Read + Send + 'static,
{
    let span = tracing::Span::current();
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            let _entered = span.enter();
            for line in BufReader::new(pipe).lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
        })
        .with_context(|| format!("spawn {name} reader"))?;
    Ok(())
}

/// Asks the whole yt-dlp process group to stop, then kills what is left.
///
/// SIGINT lets yt-dlp (and ffmpeg) close the live download and rename the
/// `.part` file. Whatever survives the grace period, or ignores SIGINT, gets
/// SIGKILL before the child is reaped.
#[cfg(unix)]
fn stop_child(child: &mut Child) {
    let group = child.id();
    signal_group("-INT", group);
    if !wait_for_exit(child, STOP_GRACE) {
        tracing::warn!(
            grace_secs = STOP_GRACE.as_secs_f64(),
            "yt-dlp did not stop after SIGINT; killing it"
        );
    }
    signal_group("-KILL", group);
    reap_child(child);
}

#[cfg(not(unix))]
fn stop_child(child: &mut Child) {
    reap_child(child);
}

#[cfg(unix)]
fn signal_group(signal: &str, group: u32) {
    let status = Command::new("kill")
        .arg(signal)
        .arg("--")
        .arg(format!("-{group}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = status {
        tracing::debug!(?err, signal, group, "signal yt-dlp process group");
    }
}

#[cfg(unix)]
fn wait_for_exit(child: &mut Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(None) => return false,
            Err(err) => {
                tracing::debug!(?err, "poll yt-dlp");
                return false;
            }
        }
    }
}

fn reap_child(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(err) = child.kill() {
        tracing::debug!(?err, "kill yt-dlp");
    }
    if let Err(err) = child.wait() {
        tracing::debug!(?err, "reap yt-dlp");
    }
}

fn build_download_args(request: &FetchRequest) -> Vec<String> {
    let mut args = vec![
        "-o".to_owned(),
        request.destination.clone(),
        "--format".to_owned(),
        request.format.format_selector(),
        "--no-playlist".to_owned(),
        "--live-from-start".to_owned(),
        "--newline".to_owned(),
        "--progress-template".to_owned(),
        PROGRESS_TEMPLATE.to_owned(),
    ];
    if request.format.free_formats {
        args.push("--prefer-free-formats".to_owned());
    }
    if request.format.legacy_server_connect {
        args.push("--legacy-server-connect".to_owned());
    }
    args.push("--".to_owned());
    args.push(request.url.clone());
    args
}

fn build_info_args(url: &str) -> Vec<String> {
    vec![
        "--dump-single-json".to_owned(),
        "--skip-download".to_owned(),
        "--no-playlist".to_owned(),
        "--no-warnings".to_owned(),
        "--".to_owned(),
        url.to_owned(),
    ]
}

fn parse_progress_line(line: &str) -> Option<FetchProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.split_whitespace();
    let status = fields.next()?;
    match status {
        "finished" => Some(FetchProgress::Finished),
        "downloading" => {
            let downloaded_bytes = fields.next().and_then(parse_number).map(|v| v as u64);
            let total_bytes = fields.next().and_then(parse_number).map(|v| v as u64);
            let speed = fields.next().and_then(parse_number);
            let eta = fields.next().and_then(parse_number).map(|v| v as u64);
            Some(FetchProgress::Downloading {
                downloaded_bytes,
                total_bytes,
                speed,
                eta,
            })
        }
        _ => Some(FetchProgress::Idle),
    }
}

fn parse_number(field: &str) -> Option<f64> {
    field
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

fn log_stderr_line(line: &str) {
    if line.starts_with("ERROR:") || line.starts_with("WARNING:") {
        tracing::warn!("yt-dlp: {line}");
    } else {
        tracing::debug!("yt-dlp: {line}");
    }
}

fn last_error_line(lines: &VecDeque<String>) -> Option<&str> {
    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.iter().rev().find(|line| !line.trim().is_empty()))
        .map(String::as_str)
}
