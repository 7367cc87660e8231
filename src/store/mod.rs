//! Uniform key/value access to a dataset's Zarr, wherever it lives.
//!
//! `Local` and `S3` address the Zarr by path and share [`FsMapper`]. `Ipld`
//! addresses it by content hash: its "current version" is whatever hash the
//! dataset's IPNS key points at, and every flush of a mapper yields a new one.

mod ipld;
mod local;
mod s3;

use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::info;

pub use ipld::{Ipld, IpldMapper};
pub use local::Local;
pub use s3::S3;

use crate::domain::StoreKind;
use crate::error::EtlError;
use crate::ipfs::IpfsClient;
use crate::object_store::{FileSystem, S3Connector};
use crate::zarr::ZarrDataset;

/// Key/value view of a Zarr store.
pub trait ZarrMapper: Send + Sync {
    /// Human readable location: a path, an `s3://` url or `/ipfs/<hash>`.
    fn location(&self) -> String;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EtlError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), EtlError>;
    fn delete(&self, key: &str) -> Result<(), EtlError>;
    fn keys(&self) -> Result<Vec<String>, EtlError>;

    fn contains(&self, key: &str) -> Result<bool, EtlError> {
        Ok(self.get(key)?.is_some())
    }

    /// Makes pending writes durable. Content-addressed mappers return the new root hash.
    fn flush(&self) -> Result<Option<String>, EtlError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathMapperOptions {
    /// Reconnect and rebuild the mapper instead of reusing the cached one.
    pub refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpldMapperOptions {
    /// Root the mapper at the latest published hash; otherwise start an empty store.
    pub set_root: bool,
}

impl Default for IpldMapperOptions {
    fn default() -> Self {
        Self { set_root: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperOptions {
    Path(PathMapperOptions),
    Ipld(IpldMapperOptions),
}

impl MapperOptions {
    fn describe(&self) -> &'static str {
        match self {
            MapperOptions::Path(_) => "path-addressed stores",
            MapperOptions::Ipld(_) => "ipld",
        }
    }
}

/// Backend-neutral contract every store variant fulfils.
pub trait StoreInterface {
    type Options: Copy;

    fn mapper(&mut self, options: Self::Options) -> Result<Arc<dyn ZarrMapper>, EtlError>;

    /// Whether the dataset already has published data. Never writes anything.
    fn has_existing(&mut self) -> Result<bool, EtlError>;

    fn location(&self) -> String;

    /// Opens the existing Zarr; `None` is the normal first-run answer.
    fn dataset(&mut self, options: Self::Options) -> Result<Option<ZarrDataset>, EtlError> {
        if !self.has_existing()? {
            return Ok(None);
        }
        let mapper = self.mapper(options)?;
        ZarrDataset::open(mapper.as_ref()).map(Some)
    }
}

/// Path-addressed mapper over any [`FileSystem`].
pub struct FsMapper {
    fs: Arc<dyn FileSystem>,
    root: String,
}

impl FsMapper {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<String>) -> Self {
        Self {
            fs,
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    fn full_path(&self, key: &str) -> String {
        format!("{}/{}", self.root, key.trim_start_matches('/'))
    }
}

impl ZarrMapper for FsMapper {
    fn location(&self) -> String {
        self.root.clone()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EtlError> {
        self.fs.read(&self.full_path(key))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), EtlError> {
        self.fs.write(&self.full_path(key), value)
    }

    fn delete(&self, key: &str) -> Result<(), EtlError> {
        self.fs.remove(&self.full_path(key))
    }

    fn keys(&self) -> Result<Vec<String>, EtlError> {
        let prefix = format!("{}/", self.root);
        Ok(self
            .fs
            .list(&self.root)?
            .into_iter()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    fn contains(&self, key: &str) -> Result<bool, EtlError> {
        self.fs.exists(&self.full_path(key))
    }
}

/// Clients the backends need to reach the network.
#[derive(Clone)]
pub struct Backends {
    pub ipfs: Arc<dyn IpfsClient>,
    pub s3: Arc<dyn S3Connector>,
}

/// Where a dataset's Zarr goes, derived from the dataset's identity.
#[derive(Debug, Clone)]
pub struct StoreTarget {
    pub name: String,
    pub json_key: String,
    pub ipns_key: String,
    pub output_path: Utf8PathBuf,
    pub s3_bucket: Option<String>,
    pub custom_latest_hash: Option<String>,
    pub ipfs_chunker: Option<String>,
}

pub enum Store {
    Local(Local),
    S3(S3),
    Ipld(Ipld),
}

impl Store {
    /// Only validates configuration; no connection is opened here.
    pub fn build(
        kind: StoreKind,
        target: &StoreTarget,
        backends: &Backends,
    ) -> Result<Self, EtlError> {
        Ok(match kind {
            StoreKind::Local => Store::Local(Local::new(&target.output_path, &target.name)),
            StoreKind::S3 => Store::S3(S3::new(
                &target.json_key,
                target.s3_bucket.as_deref(),
                Arc::clone(&backends.s3),
            )?),
            StoreKind::Ipld => Store::Ipld(Ipld::new(
                Arc::clone(&backends.ipfs),
                target.ipns_key.clone(),
                target.custom_latest_hash.clone(),
                target.ipfs_chunker.clone(),
            )),
        })
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            Store::Local(_) => StoreKind::Local,
            Store::S3(_) => StoreKind::S3,
            Store::Ipld(_) => StoreKind::Ipld,
        }
    }

    pub fn is_content_addressed(&self) -> bool {
        matches!(self, Store::Ipld(_))
    }

    /// Options that open the current version for reading.
    pub fn read_options(&self) -> MapperOptions {
        match self {
            Store::Local(_) | Store::S3(_) => MapperOptions::Path(PathMapperOptions::default()),
            Store::Ipld(_) => MapperOptions::Ipld(IpldMapperOptions { set_root: true }),
        }
    }

    pub fn mapper(&mut self, options: MapperOptions) -> Result<Arc<dyn ZarrMapper>, EtlError> {
        match (self, options) {
            (Store::Local(local), MapperOptions::Path(options)) => local.mapper(options),
            (Store::S3(s3), MapperOptions::Path(options)) => s3.mapper(options),
            (Store::Ipld(ipld), MapperOptions::Ipld(options)) => ipld.mapper(options),
            (store, options) => Err(EtlError::MapperOptionsMismatch {
                store: store.kind().to_string(),
                options: options.describe().to_string(),
            }),
        }
    }

    pub fn has_existing(&mut self) -> Result<bool, EtlError> {
        match self {
            Store::Local(local) => local.has_existing(),
            Store::S3(s3) => s3.has_existing(),
            Store::Ipld(ipld) => ipld.has_existing(),
        }
    }

    pub fn dataset(&mut self, options: MapperOptions) -> Result<Option<ZarrDataset>, EtlError> {
        match (self, options) {
            (Store::Local(local), MapperOptions::Path(options)) => local.dataset(options),
            (Store::S3(s3), MapperOptions::Path(options)) => s3.dataset(options),
            (Store::Ipld(ipld), MapperOptions::Ipld(options)) => ipld.dataset(options),
            (store, options) => Err(EtlError::MapperOptionsMismatch {
                store: store.kind().to_string(),
                options: options.describe().to_string(),
            }),
        }
    }

    pub fn location(&self) -> String {
        match self {
            Store::Local(local) => local.location(),
            Store::S3(s3) => s3.location(),
            Store::Ipld(ipld) => ipld.location(),
        }
    }

    /// Flushes `mapper`. For IPLD the resulting hash is published under the
    /// dataset's IPNS key and returned.
    pub fn publish(&mut self, mapper: &dyn ZarrMapper) -> Result<Option<String>, EtlError> {
        let hash = mapper.flush()?;
        match (self, hash) {
            (Store::Ipld(ipld), Some(hash)) => {
                ipld.publish_hash(&hash)?;
                Ok(Some(hash))
            }
            (Store::Ipld(_), None) => Err(EtlError::InvalidConfig(
                "IPLD store was handed a mapper that produced no hash".to_string(),
            )),
            (store, _) => {
                info!(location = %mapper.location(), store = %store.kind(), "data written");
                Ok(None)
            }
        }
    }

    pub fn as_local(&self) -> Option<&Local> {
        match self {
            Store::Local(local) => Some(local),
            _ => None,
        }
    }

    pub fn as_s3(&self) -> Option<&S3> {
        match self {
            Store::S3(s3) => Some(s3),
            _ => None,
        }
    }

    pub fn as_ipld(&self) -> Option<&Ipld> {
        match self {
            Store::Ipld(ipld) => Some(ipld),
            _ => None,
        }
    }
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.location())
    }
}
