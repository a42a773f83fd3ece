use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Download a live stream or direct media stream for a bounded duration."
)]
pub struct Cli {
    #[command(flatten)]
    pub grab: GrabArgs,
}

#[derive(Debug, Clone, clap::Args)]
pub struct GrabArgs {
    /// Live stream URL (YouTube) or generic audio/video stream URL.
    pub url: String,

    /// Explicit output filename template (e.g. `video.%(ext)s`); disables renaming.
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Maximum capture duration in seconds.
    #[arg(short = 'd', long, default_value_t = 60)]
    pub duration: u64,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Additional log file (appended to).
    #[arg(long)]
    pub log_file: Option<String>,

    /// Prefix for the timestamped filename.
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Directory to save the capture and its sidecar files into (created if absent).
    #[arg(long, default_value = ".")]
    pub output_dir: String,

    /// Prefer patent-unencumbered formats (VP9/Opus).
    #[arg(long)]
    pub free_formats: bool,

    /// Maximum video height (e.g. 720, 480).
    #[arg(long)]
    pub max_resolution: Option<u32>,

    /// Use the legacy server connection method.
    #[arg(long)]
    pub legacy_server_connect: bool,

    /// Internet Archive title (default: the capture identifier).
    #[arg(long)]
    pub ia_title: Option<String>,

    /// Internet Archive description.
    #[arg(long)]
    pub ia_description: Option<String>,

    /// Internet Archive creator.
    #[arg(long)]
    pub ia_creator: Option<String>,

    /// Internet Archive license URL.
    #[arg(long)]
    pub ia_license: Option<String>,

    /// Backend used to fetch the media.
    #[arg(long, value_enum, default_value_t = FetcherKind::YtDlp)]
    pub fetcher: FetcherKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetcherKind {
    /// Drive the external `yt-dlp` program.
    #[value(name = "yt-dlp")]
    YtDlp,
    /// Stream a direct HTTP(S) media URL to disk.
    Http,
}
