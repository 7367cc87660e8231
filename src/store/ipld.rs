use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EtlError;
use crate::ipfs::IpfsClient;
use crate::store::{IpldMapperOptions, StoreInterface, ZarrMapper};

/// Zarr on IPFS, located through the hash published under the dataset's IPNS key.
pub struct Ipld {
    client: Arc<dyn IpfsClient>,
    ipns_key: String,
    custom_latest_hash: Option<String>,
    chunker: Option<String>,
    published: Option<String>,
}

impl Ipld {
    pub fn new(
        client: Arc<dyn IpfsClient>,
        ipns_key: String,
        custom_latest_hash: Option<String>,
        chunker: Option<String>,
    ) -> Self {
        Self {
            client,
            ipns_key,
            custom_latest_hash,
            chunker,
            published: None,
        }
    }

    pub fn ipns_key(&self) -> &str {
        &self.ipns_key
    }

    pub fn chunker(&self) -> Option<&str> {
        self.chunker.as_deref()
    }

    /// The hash of the current dataset version: the custom override when
    /// given, otherwise whatever the IPNS key resolves to right now.
    pub fn latest_hash(&self) -> Result<Option<String>, EtlError> {
        if let Some(hash) = &self.custom_latest_hash {
            return Ok(Some(hash.clone()));
        }
        self.client.resolve(&self.ipns_key)
    }

    pub(crate) fn publish_hash(&mut self, hash: &str) -> Result<(), EtlError> {
        self.client.publish(&self.ipns_key, hash)?;
        info!(key = %self.ipns_key, %hash, "published new dataset hash");
        self.published = Some(hash.to_string());
        Ok(())
    }
}

impl StoreInterface for Ipld {
    type Options = IpldMapperOptions;

    /// A fresh mapper on every call. Unrooted mappers never look up the latest hash.
    fn mapper(&mut self, options: IpldMapperOptions) -> Result<Arc<dyn ZarrMapper>, EtlError> {
        info!(chunker = ?self.chunker, "IPFS chunker");
        let root = if options.set_root {
            self.latest_hash()?
        } else {
            None
        };
        Ok(Arc::new(IpldMapper::new(
            Arc::clone(&self.client),
            self.chunker.clone(),
            root,
        )))
    }

    fn has_existing(&mut self) -> Result<bool, EtlError> {
        Ok(self.latest_hash()?.is_some())
    }

    fn location(&self) -> String {
        match self.custom_latest_hash.as_ref().or(self.published.as_ref()) {
            Some(hash) => format!("/ipfs/{hash}"),
            None => "/ipfs/".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RootNode {
    entries: BTreeMap<String, String>,
}

struct IpldState {
    root: Option<String>,
    index: Option<BTreeMap<String, String>>,
}

/// Each value is its own block; the root block maps keys to block hashes.
pub struct IpldMapper {
    client: Arc<dyn IpfsClient>,
    chunker: Option<String>,
    state: Mutex<IpldState>,
}

impl IpldMapper {
    pub fn new(client: Arc<dyn IpfsClient>, chunker: Option<String>, root: Option<String>) -> Self {
        Self {
            client,
            chunker,
            state: Mutex::new(IpldState { root, index: None }),
        }
    }

    pub fn root(&self) -> Result<Option<String>, EtlError> {
        Ok(self.lock()?.root.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, IpldState>, EtlError> {
        self.state
            .lock()
            .map_err(|_| EtlError::Source("IPLD mapper lock poisoned".to_string()))
    }

    /// Loads the key index from the root block the first time it is needed.
    fn with_index<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<T, EtlError> {
        let mut state = self.lock()?;
        if state.index.is_none() {
            let index = match &state.root {
                Some(root) => {
                    let raw = self.client.cat(root)?;
                    let node: RootNode =
                        serde_json::from_slice(&raw).map_err(|err| EtlError::IpldBlock {
                            cid: root.clone(),
                            message: err.to_string(),
                        })?;
                    node.entries
                }
                None => BTreeMap::new(),
            };
            state.index = Some(index);
        }
        let index = state
            .index
            .as_mut()
            .ok_or_else(|| EtlError::Source("IPLD index missing".to_string()))?;
        Ok(f(index))
    }
}

impl ZarrMapper for IpldMapper {
    fn location(&self) -> String {
        match self.root() {
            Ok(Some(root)) => format!("/ipfs/{root}"),
            _ => "/ipfs/".to_string(),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EtlError> {
        match self.with_index(|index| index.get(key).cloned())? {
            Some(cid) => self.client.cat(&cid).map(Some),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), EtlError> {
        let cid = self.client.add(value, self.chunker.as_deref())?;
        self.with_index(|index| {
            index.insert(key.to_string(), cid);
        })
    }

    fn delete(&self, key: &str) -> Result<(), EtlError> {
        self.with_index(|index| {
            index.remove(key);
        })
    }

    fn keys(&self) -> Result<Vec<String>, EtlError> {
        self.with_index(|index| index.keys().cloned().collect())
    }

    fn contains(&self, key: &str) -> Result<bool, EtlError> {
        self.with_index(|index| index.contains_key(key))
    }

    fn flush(&self) -> Result<Option<String>, EtlError> {
        let entries = self.with_index(|index| index.clone())?;
        let node = serde_json::to_vec(&RootNode { entries })
            .map_err(|err| EtlError::Source(err.to_string()))?;
        let root = self.client.add(&node, None)?;
        self.lock()?.root = Some(root.clone());
        Ok(Some(root))
    }
}
