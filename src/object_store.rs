//! Blocking facade over the `object_store` crate.
//!
//! The local and S3 backends address files by full path (`/abs/path` or
//! `s3://bucket/key`). [`BlockingObjectStore`] maps those paths onto an
//! [`ObjectStore`] and drives its futures on a private current-thread runtime.

use std::future::Future;
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::error::EtlError;

/// Path-addressed byte storage. Paths are absolute filesystem paths for the
/// local implementation and `s3://bucket/key` URLs for object stores.
pub trait FileSystem: Send + Sync {
    fn protocol(&self) -> &'static str;
    fn exists(&self, path: &str) -> Result<bool, EtlError>;
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, EtlError>;
    fn write(&self, path: &str, content: &[u8]) -> Result<(), EtlError>;
    fn remove(&self, path: &str) -> Result<(), EtlError>;
    /// Every file below `prefix`, as full paths.
    fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl S3Credentials {
    /// Explicit credentials: both `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` must be set.
    pub fn from_env<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_key_id = env("AWS_ACCESS_KEY_ID").filter(|value| !value.is_empty())?;
        let secret_access_key = env("AWS_SECRET_ACCESS_KEY").filter(|value| !value.is_empty())?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: env("AWS_SESSION_TOKEN").filter(|value| !value.is_empty()),
        })
    }
}

/// Opens a bucket. `None` credentials leave discovery to the provider chain.
pub trait S3Connector: Send + Sync {
    fn connect(
        &self,
        bucket: &str,
        credentials: Option<S3Credentials>,
    ) -> Result<Arc<dyn FileSystem>, EtlError>;
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConnector {
    endpoint: Option<String>,
    region: String,
}

impl ObjectStoreConnector {
    pub fn new(endpoint: Option<String>, region: impl Into<String>) -> Self {
        Self {
            endpoint,
            region: region.into(),
        }
    }
}

impl S3Connector for ObjectStoreConnector {
    fn connect(
        &self,
        bucket: &str,
        credentials: Option<S3Credentials>,
    ) -> Result<Arc<dyn FileSystem>, EtlError> {
        let root = format!("s3://{bucket}");
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&self.region);
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        match credentials {
            Some(credentials) => {
                builder = builder
                    .with_access_key_id(credentials.access_key_id)
                    .with_secret_access_key(credentials.secret_access_key);
                if let Some(token) = credentials.session_token {
                    builder = builder.with_token(token);
                }
            }
            None => debug!(bucket, "using web identity, container or instance credentials"),
        }
        let store = builder.build().map_err(|source| EtlError::ObjectStore {
            path: root.clone(),
            source,
        })?;
        Ok(Arc::new(BlockingObjectStore::new(Arc::new(store), root)?))
    }
}

/// Synchronous [`FileSystem`] backed by any [`ObjectStore`].
pub struct BlockingObjectStore {
    store: Arc<dyn ObjectStore>,
    /// `s3://bucket` for buckets, empty for the local filesystem.
    root: String,
    runtime: Runtime,
}

impl BlockingObjectStore {
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<String>) -> Result<Self, EtlError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| EtlError::Filesystem(format!("object store runtime: {err}")))?;
        Ok(Self {
            store,
            root: root.into().trim_end_matches('/').to_string(),
            runtime,
        })
    }

    /// The local filesystem, addressed by absolute path.
    pub fn local() -> Result<Self, EtlError> {
        Self::new(Arc::new(LocalFileSystem::new()), "")
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn object_path(&self, path: &str) -> Result<Path, EtlError> {
        if self.root.is_empty() {
            let absolute = std::path::absolute(path)
                .map_err(|err| EtlError::Filesystem(format!("{path}: {err}")))?;
            return Path::from_absolute_path(absolute).map_err(|source| EtlError::ObjectStore {
                path: path.to_string(),
                source: source.into(),
            });
        }
        let key = match path.strip_prefix(&self.root) {
            Some("") => "",
            Some(rest) if rest.starts_with('/') => rest,
            _ => {
                return Err(EtlError::InvalidConfig(format!(
                    "{path} is outside {}",
                    self.root
                )));
            }
        };
        Path::parse(key.trim_matches('/')).map_err(|source| EtlError::ObjectStore {
            path: path.to_string(),
            source: source.into(),
        })
    }

    fn full_path(&self, location: &Path) -> String {
        if self.root.is_empty() {
            format!("/{location}")
        } else {
            format!("{}/{location}", self.root)
        }
    }
}

fn store_error(path: &str) -> impl FnOnce(object_store::Error) -> EtlError + '_ {
    move |source| EtlError::ObjectStore {
        path: path.to_string(),
        source,
    }
}

impl FileSystem for BlockingObjectStore {
    fn protocol(&self) -> &'static str {
        if self.root.is_empty() { "file" } else { "s3" }
    }

    /// True for an object at `path` or anything below it.
    fn exists(&self, path: &str) -> Result<bool, EtlError> {
        let location = self.object_path(path)?;
        self.block_on(async {
            match self.store.head(&location).await {
                Ok(_) => return Ok(true),
                Err(object_store::Error::NotFound { .. }) => {}
                Err(source) => return Err(store_error(path)(source)),
            }
            let mut below = self.store.list(Some(&location));
            let first = below.try_next().await.map_err(store_error(path))?;
            Ok(first.is_some())
        })
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, EtlError> {
        let location = self.object_path(path)?;
        self.block_on(async {
            let result = match self.store.get(&location).await {
                Ok(result) => result,
                Err(object_store::Error::NotFound { .. }) => return Ok(None),
                Err(source) => return Err(store_error(path)(source)),
            };
            let bytes = result.bytes().await.map_err(store_error(path))?;
            Ok(Some(bytes.to_vec()))
        })
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<(), EtlError> {
        let location = self.object_path(path)?;
        let payload = PutPayload::from(content.to_vec());
        self.block_on(self.store.put(&location, payload))
            .map_err(store_error(path))?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), EtlError> {
        let location = self.object_path(path)?;
        match self.block_on(self.store.delete(&location)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(store_error(path)(source)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError> {
        let location = self.object_path(prefix)?;
        let mut files = self.block_on(
            self.store
                .list(Some(&location))
                .map_ok(|meta| self.full_path(&meta.location))
                .try_collect::<Vec<_>>(),
        )
        .map_err(store_error(prefix))?;
        files.sort();
        Ok(files)
    }
}
