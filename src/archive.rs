use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;

use crate::formats::{ArchiveFile, ArchiveFiles, ArchiveMetadata};

const MEDIA_TYPE: &str = "movies";

/// Optional descriptive fields supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub creator: Option<String>,
    pub license_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub identifier: String,
    pub filename: String,
    pub title: String,
    pub description: String,
    pub creator: String,
    pub license_url: String,
}

impl ArchiveRecord {
    pub fn new(identifier: String, filename: String, fields: ArchiveFields) -> Self {
        Self {
            title: fields.title.unwrap_or_else(|| identifier.clone()),
            description: fields.description.unwrap_or_default(),
            creator: fields.creator.unwrap_or_default(),
            license_url: fields.license_url.unwrap_or_default(),
            identifier,
            filename,
        }
    }

    pub fn files_document(&self) -> ArchiveFiles {
        ArchiveFiles {
            files: vec![ArchiveFile {
                name: self.filename.clone(),
            }],
        }
    }

    pub fn metadata_document(&self) -> ArchiveMetadata {
        ArchiveMetadata {
            title: self.title.clone(),
            identifier: self.identifier.clone(),
            description: self.description.clone(),
            creator: self.creator.clone(),
            license_url: self.license_url.clone(),
            mediatype: MEDIA_TYPE.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPaths {
    pub files_xml: PathBuf,
    pub meta_xml: PathBuf,
}

pub fn sidecar_paths(output_dir: &Path, identifier: &str) -> SidecarPaths {
    SidecarPaths {
        files_xml: output_dir.join(format!("{identifier}_files.xml")),
        meta_xml: output_dir.join(format!("{identifier}_meta.xml")),
    }
}

/// Writes `<identifier>_files.xml` and `<identifier>_meta.xml`, replacing old copies.
pub fn write_sidecars(output_dir: &Path, record: &ArchiveRecord) -> anyhow::Result<SidecarPaths> {
    let paths = sidecar_paths(output_dir, &record.identifier);

    let files_xml = to_xml(&record.files_document()).context("serialize files xml")?;
    std::fs::write(&paths.files_xml, files_xml)
        .with_context(|| format!("write files xml: {}", paths.files_xml.display()))?;

    let meta_xml = to_xml(&record.metadata_document()).context("serialize meta xml")?;
    std::fs::write(&paths.meta_xml, meta_xml)
        .with_context(|| format!("write meta xml: {}", paths.meta_xml.display()))?;

    tracing::info!(
        files = %paths.files_xml.display(),
        meta = %paths.meta_xml.display(),
        "wrote archive metadata"
    );
    Ok(paths)
}

fn to_xml<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let mut xml = String::new();
    let mut serializer = quick_xml::se::Serializer::new(&mut xml);
    serializer.indent(' ', 2);
    value.serialize(serializer)?;
    xml.push('\n');
    Ok(xml)
}
