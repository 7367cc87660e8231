use std::sync::Arc;

use tracing::{debug, info};

use crate::error::EtlError;
use crate::object_store::{FileSystem, S3Connector, S3Credentials};
use crate::store::{FsMapper, PathMapperOptions, StoreInterface, ZarrMapper};

/// Zarr in an S3 bucket at `s3://<bucket>/datasets/<json_key>.zarr`.
pub struct S3 {
    bucket: String,
    json_key: String,
    connector: Arc<dyn S3Connector>,
    fs: Option<Arc<dyn FileSystem>>,
    mapper: Option<Arc<FsMapper>>,
}

impl S3 {
    pub fn new(
        json_key: &str,
        bucket: Option<&str>,
        connector: Arc<dyn S3Connector>,
    ) -> Result<Self, EtlError> {
        let bucket = bucket
            .map(str::trim)
            .filter(|bucket| !bucket.is_empty())
            .ok_or(EtlError::MissingBucket)?;
        Ok(Self {
            bucket: bucket.to_string(),
            json_key: json_key.to_string(),
            connector,
            fs: None,
            mapper: None,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn url(&self) -> String {
        format!("s3://{}/datasets/{}.zarr", self.bucket, self.json_key)
    }

    /// Connects on first use. Explicit credentials from the environment win;
    /// without them the connector uses the default provider chain.
    pub fn fs(&mut self, refresh: bool) -> Result<Arc<dyn FileSystem>, EtlError> {
        if let (Some(fs), false) = (&self.fs, refresh) {
            return Ok(Arc::clone(fs));
        }
        let credentials = S3Credentials::from_env(|key| std::env::var(key).ok());
        if credentials.is_none() {
            debug!("AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY unset; using ambient credentials");
        }
        let fs = self.connector.connect(&self.bucket, credentials)?;
        info!(bucket = %self.bucket, "Connected to S3 filesystem");
        self.fs = Some(Arc::clone(&fs));
        Ok(fs)
    }
}

impl std::fmt::Debug for S3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3")
            .field("url", &self.url())
            .field("connected", &self.fs.is_some())
            .finish_non_exhaustive()
    }
}

impl StoreInterface for S3 {
    type Options = PathMapperOptions;

    fn mapper(&mut self, options: PathMapperOptions) -> Result<Arc<dyn ZarrMapper>, EtlError> {
        if let (Some(mapper), false) = (&self.mapper, options.refresh) {
            return Ok(Arc::clone(mapper) as Arc<dyn ZarrMapper>);
        }
        let mapper = Arc::new(FsMapper::new(self.fs(options.refresh)?, self.url()));
        self.mapper = Some(Arc::clone(&mapper));
        Ok(mapper)
    }

    fn has_existing(&mut self) -> Result<bool, EtlError> {
        let url = self.url();
        self.fs(false)?.exists(&url)
    }

    fn location(&self) -> String {
        self.url()
    }
}
