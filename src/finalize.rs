use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::capture::CaptureWindow;

pub const EXT_PLACEHOLDER: &str = "%(ext)s";
const TEMP_PREFIX: &str = "temp.";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";
const IN_PROGRESS_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedCapture {
    pub path: PathBuf,
    /// File name inside the output directory.
    pub filename: String,
    /// File name without its extension; keys the sidecar documents.
    pub identifier: String,
}

impl FinalizedCapture {
    fn from_path(path: PathBuf) -> anyhow::Result<Self> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("capture path has no file name: {}", path.display()))?
            .to_owned();
        let identifier = Path::new(&filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&filename)
            .to_owned();
        Ok(Self {
            path,
            filename,
            identifier,
        })
    }
}

/// Download template used when no explicit output name is given.
pub fn temp_template(output_dir: &Path) -> PathBuf {
    output_dir.join(format!("{TEMP_PREFIX}{EXT_PLACEHOLDER}"))
}

pub fn timestamped_file_name(window: &CaptureWindow, prefix: &str, ext: &str) -> String {
    format!(
        "{prefix}live_{}_to_{}.{ext}",
        window.start.format(TIMESTAMP_FORMAT),
        window.end.format(TIMESTAMP_FORMAT)
    )
}

/// An explicit `--output` template is used verbatim: no timestamps, no rename.
pub fn explicit_output(output_dir: &Path, template: &str) -> anyhow::Result<FinalizedCapture> {
    let path = output_dir.join(template);
    FinalizedCapture::from_path(path).context("resolve explicit output")
}

/// Finds the finished `temp.*` artifact left by the capture.
///
/// In-progress files are ignored. When several candidates exist the largest
/// one wins and the rest are reported and left alone.
pub fn find_temp_artifact(output_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(output_dir)
        .with_context(|| format!("read output dir: {}", output_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(TEMP_PREFIX) || is_in_progress(name) {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("stat capture candidate: {name}"))?;
        if !metadata.is_file() {
            continue;
        }
        candidates.push((metadata.len(), entry.path()));
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let mut candidates = candidates.into_iter();
    let artifact = candidates.next().map(|(_, path)| path);
    for (_, ignored) in candidates {
        tracing::warn!(path = %ignored.display(), "ignoring extra capture artifact");
    }
    Ok(artifact)
}

/// Renames the temp artifact to `<prefix>live_<start>_to_<end>.<ext>`.
///
/// Returns `None` when the capture left no finished file behind.
pub fn rename_temp_artifact(
    output_dir: &Path,
    window: &CaptureWindow,
    prefix: &str,
) -> anyhow::Result<Option<FinalizedCapture>> {
    let Some(temp_path) = find_temp_artifact(output_dir)? else {
        return Ok(None);
    };
    let ext = temp_path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| anyhow::anyhow!("capture has no extension: {}", temp_path.display()))?;

    let final_name = timestamped_file_name(window, prefix, ext);
    let final_path = output_dir.join(&final_name);
    std::fs::rename(&temp_path, &final_path).with_context(|| {
        format!(
            "rename capture: {} -> {}",
            temp_path.display(),
            final_path.display()
        )
    })?;
    tracing::info!(
        from = %temp_path.display(),
        to = %final_path.display(),
        "renamed capture"
    );

    FinalizedCapture::from_path(final_path).map(Some)
}

fn is_in_progress(name: &str) -> bool {
    IN_PROGRESS_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
        || name.contains(".part-Frag")
}
