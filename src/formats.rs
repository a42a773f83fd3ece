use serde::{Deserialize, Serialize};

/// Subset of the info dict printed by `yt-dlp --dump-single-json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub extractor: Option<String>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub was_live: Option<bool>,
    #[serde(default)]
    pub release_timestamp: Option<i64>,
}

/// `<identifier>_files.xml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "files")]
pub struct ArchiveFiles {
    #[serde(rename = "file", default)]
    pub files: Vec<ArchiveFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveFile {
    #[serde(rename = "@name")]
    pub name: String,
}

/// `<identifier>_meta.xml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "metadata")]
pub struct ArchiveMetadata {
    pub title: String,
    pub identifier: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creator: String,
    #[serde(rename = "licenseurl", default)]
    pub license_url: String,
    pub mediatype: String,
}
