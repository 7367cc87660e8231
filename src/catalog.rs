use camino::{Utf8Path, Utf8PathBuf};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::Metadata;
use crate::error::EtlError;
use crate::fs_util::write_bytes_atomic;

/// What a catalog builder receives after a publication.
#[derive(Debug, Clone)]
pub struct CatalogEntry<'a> {
    pub json_key: &'a str,
    pub location: &'a str,
    pub hash: Option<&'a str>,
    pub metadata: &'a Metadata,
    /// Previous catalog head to chain from, instead of the latest one.
    pub head_metadata: Option<&'a str>,
}

pub trait CatalogBuilder: Send + Sync {
    /// Records the entry. Returns where the document went, if anywhere.
    fn build(&self, entry: &CatalogEntry<'_>) -> Result<Option<Utf8PathBuf>, EtlError>;
}

#[derive(Debug, Serialize)]
struct CatalogDocument<'a> {
    id: &'a str,
    location: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous: Option<&'a str>,
    updated: String,
    properties: &'a Metadata,
}

/// Writes one JSON document per dataset under `<root>/metadata/`.
#[derive(Debug, Clone)]
pub struct LocalCatalog {
    root: Utf8PathBuf,
}

impl LocalCatalog {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn document_path(&self, json_key: &str) -> Utf8PathBuf {
        self.root.join("metadata").join(format!("{json_key}.json"))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl CatalogBuilder for LocalCatalog {
    fn build(&self, entry: &CatalogEntry<'_>) -> Result<Option<Utf8PathBuf>, EtlError> {
        let document = CatalogDocument {
            id: entry.json_key,
            location: entry.location,
            hash: entry.hash,
            previous: entry.head_metadata,
            updated: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            properties: entry.metadata,
        };
        let content = serde_json::to_vec_pretty(&document)
            .map_err(|err| EtlError::ZarrMetadata(err.to_string()))?;
        let path = self.document_path(entry.json_key);
        write_bytes_atomic(&path, &content)?;
        info!(json_key = entry.json_key, %path, "catalog entry written");
        Ok(Some(path))
    }
}

/// Skips catalog generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCatalog;

impl CatalogBuilder for NoCatalog {
    fn build(&self, entry: &CatalogEntry<'_>) -> Result<Option<Utf8PathBuf>, EtlError> {
        debug!(json_key = entry.json_key, "catalog disabled");
        Ok(None)
    }
}
