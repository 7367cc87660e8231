use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::catalog::{CatalogBuilder, CatalogEntry, LocalCatalog};
use crate::config::ResolvedConfig;
use crate::domain::{CoordinateRange, DateRange, StoreKind};
use crate::error::EtlError;
use crate::ipfs::KuboClient;
use crate::logging::LogConfig;
use crate::manager::{DatasetManager, ManagerSettings, Published, UpdateRequest};
use crate::object_store::ObjectStoreConnector;
use crate::registry::{Era5Options, Registry, SourceArgs};
use crate::store::Backends;

/// One `run_etl` invocation: which dataset, where to, and which phases.
#[derive(Debug, Clone, Default)]
pub struct EtlRequest {
    pub dataset_name: String,
    pub store: String,
    pub s3_bucket: Option<String>,
    pub date_range: Option<DateRange>,
    pub latitude_range: Option<CoordinateRange>,
    pub longitude_range: Option<CoordinateRange>,
    pub rebuild: bool,
    pub only_parse: bool,
    pub only_update_input: bool,
    pub only_prepare_input: bool,
    pub only_metadata: bool,
    pub local_output: bool,
    pub allow_overwrite: bool,
    pub test_mode: bool,
    pub custom_output_path: Option<Utf8PathBuf>,
    pub custom_head_metadata: Option<String>,
    pub custom_latest_hash: Option<String>,
    pub era5: Era5Options,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EtlReport {
    pub dataset: String,
    pub json_key: String,
    pub store: String,
    /// `None` when the update phase was skipped.
    pub new_data_found: Option<bool>,
    pub input_prepared: bool,
    pub metadata_updated: bool,
    /// `None` when parse did not run.
    pub parsed: Option<bool>,
    pub location: Option<String>,
    pub published_hash: Option<String>,
    pub catalog_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);

    fn error(&self, _error: &EtlError) {}
}

/// The clients every run shares.
#[derive(Clone)]
pub struct Services {
    pub backends: Backends,
    pub catalog: Arc<dyn CatalogBuilder>,
}

impl Services {
    /// Production clients. Only builds them; nothing is contacted yet.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, EtlError> {
        let ipfs = KuboClient::new(config.ipfs_api.clone(), config.ipfs_offline)?;
        let s3 = ObjectStoreConnector::new(config.s3_endpoint.clone(), config.s3_region.clone());
        Ok(Self {
            backends: Backends {
                ipfs: Arc::new(ipfs),
                s3: Arc::new(s3),
            },
            catalog: Arc::new(LocalCatalog::new(config.output_root.clone())),
        })
    }
}

pub struct App {
    registry: Registry,
    services: Services,
    config: ResolvedConfig,
    logging: Option<LogConfig>,
}

impl App {
    pub fn new(registry: Registry, services: Services, config: ResolvedConfig) -> Self {
        Self {
            registry,
            services,
            config,
            logging: None,
        }
    }

    /// Installs `logging` for the duration of every run.
    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs the phases `request` asks for, in order: update, metadata-only
    /// refresh, prepare, parse and publish. The first failing phase ends the run.
    pub fn run_etl(
        &self,
        request: &EtlRequest,
        sink: &dyn ProgressSink,
    ) -> Result<EtlReport, EtlError> {
        let _log_guard = match &self.logging {
            Some(logging) => Some(logging.install(&request.dataset_name)?),
            None => None,
        };
        let start = Instant::now();
        let result = self.run_phases(request, sink, start);
        if let Err(err) = &result {
            tracing::error!(dataset = %request.dataset_name, error = %err, "ETL failed");
            sink.error(err);
        }
        result
    }

    pub fn build_manager(&self, request: &EtlRequest) -> Result<DatasetManager, EtlError> {
        let entry = self
            .registry
            .get_dataset_manager_from_name(&request.dataset_name)
            .ok_or_else(|| EtlError::UnknownDataset(request.dataset_name.clone()))?;
        let store = if request.local_output {
            StoreKind::Local.as_str()
        } else {
            request.store.as_str()
        };
        // Rejected before the source is even constructed.
        store.parse::<StoreKind>()?;

        let source = entry.build(&SourceArgs {
            json_key: entry.json_key().to_string(),
            date_range: request.date_range,
            latitude_range: request.latitude_range,
            longitude_range: request.longitude_range,
            era5: request.era5,
        })?;
        let settings = ManagerSettings {
            output_root: self.config.output_root.clone(),
            input_root: self.config.input_root.clone(),
            s3_bucket: request.s3_bucket.clone(),
            rebuild_requested: request.rebuild,
            allow_overwrite: request.allow_overwrite,
            custom_output_path: request.custom_output_path.clone(),
            custom_input_path: None,
            custom_latest_hash: request.custom_latest_hash.clone(),
            test_mode: request.test_mode,
            compute: self.config.compute.clone(),
        };
        DatasetManager::new(source, store, settings, &self.services.backends)
    }

    fn run_phases(
        &self,
        request: &EtlRequest,
        sink: &dyn ProgressSink,
        start: Instant,
    ) -> Result<EtlReport, EtlError> {
        let emit = |message: String| {
            sink.event(ProgressEvent {
                message,
                elapsed: Some(start.elapsed()),
            })
        };

        emit(format!("phase=Resolve; {}", request.dataset_name));
        let mut manager = self.build_manager(request)?;
        let mut report = EtlReport {
            dataset: manager.name().to_string(),
            json_key: manager.json_key().to_string(),
            store: manager.store().kind().to_string(),
            ..EtlReport::default()
        };

        let mut trigger_parse = request.only_parse;
        if request.only_parse {
            info!("only parse flag present, skipping update of local input and using locally available data");
        } else if request.only_metadata {
            info!("only metadata flag present, skipping update of local input and parse to update metadata of the existing Zarr");
        } else {
            info!(dataset = %manager, "updating local input");
            emit("phase=Update; checking publisher for new data".to_string());
            trigger_parse = manager.update_local_input(&UpdateRequest {
                rebuild: request.rebuild,
                date_range: request.date_range,
            })?;
            report.new_data_found = Some(trigger_parse);
            if request.only_update_input {
                info!("ending here because only update local input flag is set");
                return Ok(report);
            }
        }

        if request.only_metadata {
            info!(dataset = %manager, "preparing metadata");
            emit("phase=Metadata; refreshing metadata of existing data".to_string());
            if let Some(published) = manager.only_update_metadata()? {
                report.metadata_updated = true;
                self.record_publication(&manager, request, &published, &mut report)?;
                info!(dataset = %manager, "metadata successfully updated");
            }
        }

        if request.only_prepare_input {
            info!("only prepare input requested, preparing source files and creating the Zarr JSON");
            emit("phase=Prepare; normalizing input files".to_string());
            manager.prepare_input_files(true)?;
            manager.create_zarr_json()?;
            report.input_prepared = true;
        }

        if trigger_parse {
            info!(dataset = %manager, "parsing");
            emit("phase=Parse; writing new data".to_string());
            let parsed = manager.parse()?;
            report.parsed = Some(parsed);
            if parsed {
                info!(dataset = %manager, "data successfully parsed");
                emit("phase=Publish; publishing dataset".to_string());
                let published = manager.finalize()?;
                self.record_publication(&manager, request, &published, &mut report)?;
            } else {
                info!("no new data parsed, ending here");
            }
        } else {
            info!("no new data detected and parse not set to force, ending here");
        }

        emit("phase=Done".to_string());
        Ok(report)
    }

    fn record_publication(
        &self,
        manager: &DatasetManager,
        request: &EtlRequest,
        published: &Published,
        report: &mut EtlReport,
    ) -> Result<(), EtlError> {
        let catalog_path = self.services.catalog.build(&CatalogEntry {
            json_key: manager.json_key(),
            location: &published.location,
            hash: published.hash.as_deref(),
            metadata: manager.metadata(),
            head_metadata: request.custom_head_metadata.as_deref(),
        })?;
        report.location = Some(published.location.clone());
        report.published_hash = published.hash.clone();
        report.catalog_path = catalog_path.map(|path| path.to_string());
        Ok(())
    }
}
