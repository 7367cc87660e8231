#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use zarr_etl_manager::domain::{ChunkRequest, Metadata, TemporalResolution};
use zarr_etl_manager::error::EtlError;
use zarr_etl_manager::ipfs::IpfsClient;
use zarr_etl_manager::manager::{DatasetSource, EtlContext, UpdateRequest};
use zarr_etl_manager::object_store::{FileSystem, S3Connector, S3Credentials};
use zarr_etl_manager::store::Backends;
use zarr_etl_manager::zarr::ZarrDataset;

/// In-memory blocks and names. Hashes are derived from content.
#[derive(Default)]
pub struct MemoryIpfs {
    blocks: Mutex<HashMap<String, Vec<u8>>>,
    names: Mutex<HashMap<String, String>>,
    pub chunkers: Mutex<Vec<Option<String>>>,
    pub resolve_calls: AtomicUsize,
    pub publish_calls: AtomicUsize,
    pub add_calls: AtomicUsize,
}

impl MemoryIpfs {
    pub fn name(&self, key: &str) -> Option<String> {
        self.names.lock().unwrap().get(key).cloned()
    }

    pub fn set_name(&self, key: &str, cid: &str) {
        self.names
            .lock()
            .unwrap()
            .insert(key.to_string(), cid.to_string());
    }

    pub fn resolves(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
            + self.publish_calls.load(Ordering::SeqCst)
            + self.add_calls.load(Ordering::SeqCst)
    }
}

impl IpfsClient for MemoryIpfs {
    fn add(&self, data: &[u8], chunker: Option<&str>) -> Result<String, EtlError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.chunkers
            .lock()
            .unwrap()
            .push(chunker.map(str::to_string));
        let digest = format!("{:x}", Sha256::digest(data));
        let cid = format!("bafy{}", &digest[..40]);
        self.blocks
            .lock()
            .unwrap()
            .insert(cid.clone(), data.to_vec());
        Ok(cid)
    }

    fn cat(&self, cid: &str) -> Result<Vec<u8>, EtlError> {
        self.blocks
            .lock()
            .unwrap()
            .get(cid)
            .cloned()
            .ok_or_else(|| EtlError::IpfsStatus {
                status: 500,
                message: format!("block {cid} not found"),
            })
    }

    fn resolve(&self, key: &str) -> Result<Option<String>, EtlError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.name(key))
    }

    fn publish(&self, key: &str, cid: &str) -> Result<(), EtlError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        self.set_name(key, cid);
        Ok(())
    }
}

/// Object store held in a map, keyed by full `s3://` path.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFs {
    pub fn insert(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

impl FileSystem for MemoryFs {
    fn protocol(&self) -> &'static str {
        "s3"
    }

    fn exists(&self, path: &str) -> Result<bool, EtlError> {
        let dir = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .any(|key| key == path || key.starts_with(&dir)))
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, EtlError> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<(), EtlError> {
        self.insert(path, content);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), EtlError> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(&dir))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct CountingConnector {
    pub fs: Arc<MemoryFs>,
    pub connects: AtomicUsize,
    pub buckets: Mutex<Vec<String>>,
}

impl CountingConnector {
    pub fn connections(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl S3Connector for CountingConnector {
    fn connect(
        &self,
        bucket: &str,
        _credentials: Option<S3Credentials>,
    ) -> Result<Arc<dyn FileSystem>, EtlError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.buckets.lock().unwrap().push(bucket.to_string());
        Ok(Arc::clone(&self.fs) as Arc<dyn FileSystem>)
    }
}

pub struct TestBackends {
    pub ipfs: Arc<MemoryIpfs>,
    pub s3: Arc<CountingConnector>,
}

impl TestBackends {
    pub fn new() -> Self {
        Self {
            ipfs: Arc::new(MemoryIpfs::default()),
            s3: Arc::new(CountingConnector::default()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            ipfs: Arc::clone(&self.ipfs) as Arc<dyn IpfsClient>,
            s3: Arc::clone(&self.s3) as Arc<dyn S3Connector>,
        }
    }
}

/// Phase call counters shared between a test and the source it registered.
#[derive(Default)]
pub struct Calls {
    pub update: AtomicUsize,
    pub prepare: AtomicUsize,
    pub zarr_json: AtomicUsize,
    pub parse: AtomicUsize,
}

impl Calls {
    pub fn update(&self) -> usize {
        self.update.load(Ordering::SeqCst)
    }

    pub fn prepare(&self) -> usize {
        self.prepare.load(Ordering::SeqCst)
    }

    pub fn zarr_json(&self) -> usize {
        self.zarr_json.load(Ordering::SeqCst)
    }

    pub fn parse(&self) -> usize {
        self.parse.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FakeSource {
    pub name: String,
    pub json_key: Option<String>,
    pub update_finds_data: bool,
    pub update_fails: bool,
    pub parse_writes: bool,
    pub chunker: Option<String>,
    pub calls: Arc<Calls>,
}

impl FakeSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            json_key: None,
            update_finds_data: true,
            update_fails: false,
            parse_writes: true,
            chunker: None,
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn boxed(&self) -> Box<dyn DatasetSource> {
        Box::new(self.clone())
    }
}

pub fn static_metadata() -> Metadata {
    let Value::Object(map) = json!({
        "title": "Test precipitation",
        "provider": "Test Center",
        "spatial resolution": 0.05,
        "coordinate reference system": {"name": "EPSG:4326"},
        "license": null,
    }) else {
        unreachable!()
    };
    map
}

impl DatasetSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn temporal_resolution(&self) -> TemporalResolution {
        TemporalResolution::Daily
    }

    fn json_key(&self) -> String {
        self.json_key
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.name, self.temporal_resolution()))
    }

    fn requested_chunks(&self) -> ChunkRequest {
        let chunks = ChunkRequest::new(
            &[("time", 200), ("latitude", 100), ("longitude", 100)],
            &[("time", 400), ("latitude", 50), ("longitude", 50)],
        );
        match &self.chunker {
            Some(chunker) => chunks.with_ipfs_chunker(chunker.clone()),
            None => chunks,
        }
    }

    fn static_metadata(&self) -> Metadata {
        static_metadata()
    }

    fn update_local_input(
        &mut self,
        ctx: &mut EtlContext,
        _request: &UpdateRequest,
    ) -> Result<bool, EtlError> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        if self.update_fails {
            return Err(EtlError::Source("publisher unreachable".to_string()));
        }
        if self.update_finds_data {
            ctx.new_files
                .push(ctx.input_path().join("20240101.nc"));
        }
        Ok(self.update_finds_data)
    }

    fn prepare_input_files(
        &mut self,
        _ctx: &mut EtlContext,
        _keep_originals: bool,
    ) -> Result<(), EtlError> {
        self.calls.prepare.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_zarr_json(&mut self, _ctx: &mut EtlContext) -> Result<(), EtlError> {
        self.calls.zarr_json.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn parse(&mut self, ctx: &mut EtlContext) -> Result<bool, EtlError> {
        self.calls.parse.fetch_add(1, Ordering::SeqCst);
        if !self.parse_writes {
            return Ok(false);
        }
        let mapper = ctx.output_mapper()?;
        ZarrDataset::create(mapper.as_ref(), Metadata::new())?;
        mapper.set("precip/.zarray", br#"{"zarr_format": 2}"#)?;
        mapper.set("precip/0.0.0", &[0u8; 16])?;
        Ok(true)
    }

    fn set_zarr_metadata(&self, dataset: &mut ZarrDataset) -> Result<(), EtlError> {
        dataset
            .attrs_mut()
            .insert("source_hook".to_string(), Value::Bool(true));
        Ok(())
    }
}
