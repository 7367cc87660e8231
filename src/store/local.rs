use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::EtlError;
use crate::object_store::BlockingObjectStore;
use crate::store::{FsMapper, PathMapperOptions, StoreInterface, ZarrMapper};

/// Zarr on the local filesystem at `<output_path>/<name>.zarr`.
pub struct Local {
    path: Utf8PathBuf,
    fs: Option<Arc<BlockingObjectStore>>,
    mapper: Option<Arc<FsMapper>>,
}

impl Local {
    pub fn new(output_path: &Utf8Path, name: &str) -> Self {
        Self {
            path: output_path.join(format!("{name}.zarr")),
            fs: None,
            mapper: None,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn fs(&mut self, refresh: bool) -> Result<Arc<BlockingObjectStore>, EtlError> {
        if let (Some(fs), false) = (&self.fs, refresh) {
            return Ok(Arc::clone(fs));
        }
        let fs = Arc::new(BlockingObjectStore::local()?);
        self.fs = Some(Arc::clone(&fs));
        Ok(fs)
    }
}

impl StoreInterface for Local {
    type Options = PathMapperOptions;

    fn mapper(&mut self, options: PathMapperOptions) -> Result<Arc<dyn ZarrMapper>, EtlError> {
        if let (Some(mapper), false) = (&self.mapper, options.refresh) {
            return Ok(Arc::clone(mapper) as Arc<dyn ZarrMapper>);
        }
        let mapper = Arc::new(FsMapper::new(self.fs(options.refresh)?, self.path.as_str()));
        self.mapper = Some(Arc::clone(&mapper));
        Ok(mapper)
    }

    fn has_existing(&mut self) -> Result<bool, EtlError> {
        Ok(self.path.as_std_path().exists())
    }

    fn location(&self) -> String {
        self.path.to_string()
    }
}
