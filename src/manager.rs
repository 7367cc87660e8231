//! The per-run dataset lifecycle.
//!
//! A [`DatasetManager`] pairs one [`DatasetSource`] (the per-dataset logic:
//! fetching, normalizing and parsing its inputs) with one [`EtlContext`] (the
//! run's settings, bound store and accumulated state). The manager sequences
//! the phases and owns everything that is common to every source: metadata
//! merging, attribute alignment and publication.

use std::fmt;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::compute::ComputeConfig;
use crate::domain::{ChunkRequest, DateRange, Metadata, StoreKind, TemporalResolution};
use crate::error::EtlError;
use crate::store::{
    Backends, IpldMapperOptions, MapperOptions, PathMapperOptions, Store, StoreTarget, ZarrMapper,
};
use crate::zarr::ZarrDataset;

/// What a dataset source has to provide. Everything else is the manager's job.
pub trait DatasetSource {
    fn name(&self) -> &str;

    fn temporal_resolution(&self) -> TemporalResolution;

    /// Key under which the dataset is published; several keys may share one source type.
    fn json_key(&self) -> String {
        format!("{}-{}", self.name(), self.temporal_resolution())
    }

    fn requested_chunks(&self) -> ChunkRequest;

    /// Descriptive template (title, provider, ...) merged into the run's metadata.
    fn static_metadata(&self) -> Metadata;

    /// Fetches whatever the publisher has that is not available locally yet,
    /// recording downloaded files in `ctx.new_files`. Returns whether parse should run.
    fn update_local_input(
        &mut self,
        ctx: &mut EtlContext,
        request: &UpdateRequest,
    ) -> Result<bool, EtlError>;

    /// Normalizes raw inputs into one canonical file per day.
    fn prepare_input_files(
        &mut self,
        ctx: &mut EtlContext,
        keep_originals: bool,
    ) -> Result<(), EtlError>;

    /// Writes the intermediate store description for the prepared inputs.
    fn create_zarr_json(&mut self, ctx: &mut EtlContext) -> Result<(), EtlError>;

    /// Writes new data through `ctx.output_mapper()`. Returns whether anything was written.
    fn parse(&mut self, ctx: &mut EtlContext) -> Result<bool, EtlError>;

    /// Source-specific attribute edits, applied after the common alignment.
    fn set_zarr_metadata(&self, _dataset: &mut ZarrDataset) -> Result<(), EtlError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    pub rebuild: bool,
    pub date_range: Option<DateRange>,
}

/// Construction-time settings of a manager. Fixed for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub output_root: Utf8PathBuf,
    pub input_root: Utf8PathBuf,
    pub s3_bucket: Option<String>,
    pub rebuild_requested: bool,
    pub allow_overwrite: bool,
    pub custom_output_path: Option<Utf8PathBuf>,
    pub custom_input_path: Option<Utf8PathBuf>,
    pub custom_latest_hash: Option<String>,
    pub test_mode: bool,
    pub compute: ComputeConfig,
}

impl ManagerSettings {
    pub fn new(output_root: impl Into<Utf8PathBuf>, input_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            input_root: input_root.into(),
            s3_bucket: None,
            rebuild_requested: false,
            allow_overwrite: false,
            custom_output_path: None,
            custom_input_path: None,
            custom_latest_hash: None,
            test_mode: false,
            compute: ComputeConfig::default(),
        }
    }
}

/// State shared between the manager and its source during one run.
pub struct EtlContext {
    name: String,
    json_key: String,
    settings: ManagerSettings,
    store: Store,
    overwrite_allowed: bool,
    input_path: Utf8PathBuf,
    output_path: Utf8PathBuf,
    chunks: ChunkRequest,
    output_mapper: Option<Arc<dyn ZarrMapper>>,
    /// Files the update phase of this run found; empty until it has run.
    pub new_files: Vec<Utf8PathBuf>,
    pub metadata: Metadata,
}

impl EtlContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn json_key(&self) -> &str {
        &self.json_key
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Whether the bound store already holds published data.
    pub fn has_existing_output(&mut self) -> Result<bool, EtlError> {
        self.store.has_existing()
    }

    pub fn overwrite_allowed(&self) -> bool {
        self.overwrite_allowed
    }

    pub fn rebuild_requested(&self) -> bool {
        self.settings.rebuild_requested
    }

    pub fn compute(&self) -> &ComputeConfig {
        &self.settings.compute
    }

    pub fn chunks(&self) -> &ChunkRequest {
        &self.chunks
    }

    pub fn input_path(&self) -> &Utf8Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Utf8Path {
        &self.output_path
    }

    /// The view new data is written through. Created on first use and kept
    /// until the run publishes it.
    ///
    /// On IPLD the view is rooted at the latest hash only when appending to
    /// existing data; a rebuild starts from an empty store.
    pub fn output_mapper(&mut self) -> Result<Arc<dyn ZarrMapper>, EtlError> {
        if let Some(mapper) = &self.output_mapper {
            return Ok(Arc::clone(mapper));
        }
        let options = match self.store.kind() {
            StoreKind::Ipld => {
                let set_root = !self.settings.rebuild_requested && self.store.has_existing()?;
                MapperOptions::Ipld(IpldMapperOptions { set_root })
            }
            StoreKind::Local | StoreKind::S3 => {
                MapperOptions::Path(PathMapperOptions { refresh: false })
            }
        };
        let mapper = self.store.mapper(options)?;
        debug!(location = %mapper.location(), "opened output mapper");
        self.output_mapper = Some(Arc::clone(&mapper));
        Ok(mapper)
    }

    fn take_output_mapper(&mut self) -> Option<Arc<dyn ZarrMapper>> {
        self.output_mapper.take()
    }
}

/// Identity of a manager. Two managers are the same dataset when name and
/// test mode agree, whatever else differs in their configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagerIdentity {
    pub name: String,
    pub test_mode: bool,
}

/// Outcome of a publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub location: String,
    /// New content hash, only for content-addressed stores.
    pub hash: Option<String>,
}

pub struct DatasetManager {
    source: Box<dyn DatasetSource>,
    ctx: EtlContext,
}

impl DatasetManager {
    /// Binds `source` to the store named by `store`. Nothing is read or
    /// written here; invalid store names and missing buckets fail immediately.
    pub fn new(
        source: Box<dyn DatasetSource>,
        store: &str,
        settings: ManagerSettings,
        backends: &Backends,
    ) -> Result<Self, EtlError> {
        let kind: StoreKind = store.parse()?;
        let name = source.name().to_string();
        let json_key = source.json_key();
        let chunks = source.requested_chunks();
        let output_path = settings
            .custom_output_path
            .clone()
            .unwrap_or_else(|| settings.output_root.clone());
        let input_path = settings
            .custom_input_path
            .clone()
            .unwrap_or_else(|| settings.input_root.join(&name));
        let ipns_key = if settings.test_mode {
            format!("{json_key}_test")
        } else {
            json_key.clone()
        };

        let target = StoreTarget {
            name: name.clone(),
            json_key: json_key.clone(),
            ipns_key,
            output_path: output_path.clone(),
            s3_bucket: settings.s3_bucket.clone(),
            custom_latest_hash: settings.custom_latest_hash.clone(),
            ipfs_chunker: chunks.ipfs_chunker.clone(),
        };
        let store = Store::build(kind, &target, backends)?;
        // IPLD history is append-only, so it always accepts overwrites.
        let overwrite_allowed = settings.allow_overwrite || store.is_content_addressed();

        debug!(dataset = %name, %json_key, store = %kind, overwrite_allowed, "manager created");
        Ok(Self {
            source,
            ctx: EtlContext {
                name,
                json_key,
                settings,
                store,
                overwrite_allowed,
                input_path,
                output_path,
                chunks,
                output_mapper: None,
                new_files: Vec::new(),
                metadata: Metadata::new(),
            },
        })
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn json_key(&self) -> &str {
        self.ctx.json_key()
    }

    pub fn temporal_resolution(&self) -> TemporalResolution {
        self.source.temporal_resolution()
    }

    pub fn identity(&self) -> ManagerIdentity {
        ManagerIdentity {
            name: self.ctx.name.clone(),
            test_mode: self.ctx.settings.test_mode,
        }
    }

    pub fn context(&self) -> &EtlContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut EtlContext {
        &mut self.ctx
    }

    pub fn store(&self) -> &Store {
        &self.ctx.store
    }

    pub fn overwrite_allowed(&self) -> bool {
        self.ctx.overwrite_allowed
    }

    pub fn metadata(&self) -> &Metadata {
        &self.ctx.metadata
    }

    pub fn new_files(&self) -> &[Utf8PathBuf] {
        &self.ctx.new_files
    }

    pub fn static_metadata(&self) -> Metadata {
        self.source.static_metadata()
    }

    /// The custom hash when one was given, otherwise whatever the dataset's
    /// IPNS key resolves to. Non-IPLD stores only know the custom hash.
    pub fn latest_hash(&self) -> Result<Option<String>, EtlError> {
        match self.ctx.store.as_ipld() {
            Some(ipld) => ipld.latest_hash(),
            None => Ok(self.ctx.settings.custom_latest_hash.clone()),
        }
    }

    pub fn update_local_input(&mut self, request: &UpdateRequest) -> Result<bool, EtlError> {
        self.ctx.new_files.clear();
        let found = self.source.update_local_input(&mut self.ctx, request)?;
        info!(
            dataset = %self.ctx.name,
            new_files = self.ctx.new_files.len(),
            found,
            "local input updated"
        );
        Ok(found)
    }

    pub fn prepare_input_files(&mut self, keep_originals: bool) -> Result<(), EtlError> {
        self.source.prepare_input_files(&mut self.ctx, keep_originals)
    }

    pub fn create_zarr_json(&mut self) -> Result<(), EtlError> {
        self.source.create_zarr_json(&mut self.ctx)
    }

    pub fn parse(&mut self) -> Result<bool, EtlError> {
        self.source.parse(&mut self.ctx)
    }

    /// Merges the source's static template over the accumulated metadata.
    pub fn populate_metadata(&mut self) {
        for (key, value) in self.source.static_metadata() {
            self.ctx.metadata.insert(key, value);
        }
    }

    /// Copies the run's metadata onto `dataset`'s attributes, then lets the
    /// source adjust them.
    ///
    /// Attributes must stay flat: nested objects are stored as JSON strings and
    /// null values remove the attribute.
    pub fn set_zarr_metadata(&self, dataset: &mut ZarrDataset) -> Result<(), EtlError> {
        let attrs = dataset.attrs_mut();
        for (key, value) in &self.ctx.metadata {
            match value {
                Value::Null => {
                    attrs.remove(key);
                }
                Value::Object(_) => {
                    let encoded = serde_json::to_string(value)
                        .map_err(|err| EtlError::ZarrMetadata(err.to_string()))?;
                    attrs.insert(key.clone(), Value::String(encoded));
                }
                other => {
                    attrs.insert(key.clone(), other.clone());
                }
            }
        }
        attrs.insert(
            "temporal_resolution".to_string(),
            Value::String(self.source.temporal_resolution().to_string()),
        );
        self.source.set_zarr_metadata(dataset)
    }

    /// Publishes what parse wrote: aligns the Zarr attributes with the run's
    /// metadata and flushes the output view to the store.
    pub fn finalize(&mut self) -> Result<Published, EtlError> {
        self.populate_metadata();
        let mapper = match self.ctx.take_output_mapper() {
            Some(mapper) => mapper,
            None => {
                let options = self.ctx.store.read_options();
                self.ctx.store.mapper(options)?
            }
        };
        self.publish_through(mapper.as_ref())
    }

    /// Rewrites the metadata of the existing Zarr without touching its data.
    /// Returns `None` when the dataset has never been published.
    pub fn only_update_metadata(&mut self) -> Result<Option<Published>, EtlError> {
        self.populate_metadata();
        if !self.ctx.store.has_existing()? {
            warn!(
                dataset = %self.ctx.name,
                location = %self.ctx.store,
                "no existing data to update metadata for"
            );
            return Ok(None);
        }
        let options = self.ctx.store.read_options();
        let mapper = self.ctx.store.mapper(options)?;
        self.publish_through(mapper.as_ref()).map(Some)
    }

    fn publish_through(&mut self, mapper: &dyn ZarrMapper) -> Result<Published, EtlError> {
        let mut dataset = ZarrDataset::open(mapper)?;
        self.set_zarr_metadata(&mut dataset)?;
        dataset.write_attrs(mapper)?;
        let hash = self.ctx.store.publish(mapper)?;
        let location = match &hash {
            Some(hash) => format!("/ipfs/{hash}"),
            None => mapper.location(),
        };
        info!(dataset = %self.ctx.name, %location, "dataset published");
        Ok(Published { location, hash })
    }
}

impl fmt::Display for DatasetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for DatasetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetManager")
            .field("name", &self.ctx.name)
            .field("json_key", &self.ctx.json_key)
            .field("store", &self.ctx.store.kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_to_no_overrides() {
        let settings = ManagerSettings::new("/out", "/in");
        assert!(!settings.rebuild_requested);
        assert!(!settings.allow_overwrite);
        assert!(settings.custom_latest_hash.is_none());
        assert_eq!(settings.compute, ComputeConfig::default());
    }
}
