use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::EtlError;

/// Content-addressed network client: block storage plus mutable name pointers.
pub trait IpfsClient: Send + Sync {
    /// Stores `data` and returns its content hash.
    fn add(&self, data: &[u8], chunker: Option<&str>) -> Result<String, EtlError>;
    fn cat(&self, cid: &str) -> Result<Vec<u8>, EtlError>;
    /// Hash currently published under `key`, `None` when nothing was ever published.
    fn resolve(&self, key: &str) -> Result<Option<String>, EtlError>;
    fn publish(&self, key: &str, cid: &str) -> Result<(), EtlError>;
}

/// Client for the Kubo HTTP RPC API (`/api/v0`).
#[derive(Clone)]
pub struct KuboClient {
    client: Client,
    api: String,
    offline: bool,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(rename = "Keys", default)]
    keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Message")]
    message: String,
}

impl KuboClient {
    pub fn new(api: impl Into<String>, offline: bool) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("zarr-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| EtlError::IpfsHttp(err.to_string()))?;
        Ok(Self {
            client,
            api: api.into().trim_end_matches('/').to_string(),
            offline,
        })
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{command}", self.api)
    }

    fn post(&self, command: &str, query: &[(&str, &str)]) -> Result<Response, EtlError> {
        self.client
            .post(self.endpoint(command))
            .query(query)
            .send()
            .map_err(|err| EtlError::IpfsHttp(err.to_string()))
    }

    fn handle_status(response: Response) -> Result<Response, EtlError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response
            .text()
            .unwrap_or_else(|_| "IPFS request failed".to_string());
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|err| err.message)
            .unwrap_or(body);
        Err(EtlError::IpfsStatus { status, message })
    }

    fn key_id(&self, name: &str) -> Result<Option<String>, EtlError> {
        let response = Self::handle_status(self.post("key/list", &[])?)?;
        let list: KeyList = response
            .json()
            .map_err(|err| EtlError::IpfsHttp(err.to_string()))?;
        Ok(list
            .keys
            .into_iter()
            .find(|key| key.name == name)
            .map(|key| key.id))
    }

    fn ensure_key(&self, name: &str) -> Result<String, EtlError> {
        if let Some(id) = self.key_id(name)? {
            return Ok(id);
        }
        info!(key = %name, "generating IPNS key");
        let response =
            Self::handle_status(self.post("key/gen", &[("arg", name), ("type", "ed25519")])?)?;
        let key: KeyEntry = response
            .json()
            .map_err(|err| EtlError::IpfsHttp(err.to_string()))?;
        Ok(key.id)
    }
}

impl IpfsClient for KuboClient {
    fn add(&self, data: &[u8], chunker: Option<&str>) -> Result<String, EtlError> {
        let mut query = vec![("cid-version", "1"), ("pin", "true")];
        if let Some(chunker) = chunker {
            query.push(("chunker", chunker));
        }
        let form = Form::new().part("file", Part::bytes(data.to_vec()).file_name("block"));
        let response = self
            .client
            .post(self.endpoint("add"))
            .query(&query)
            .multipart(form)
            .send()
            .map_err(|err| EtlError::IpfsHttp(err.to_string()))?;
        let added: AddResponse = Self::handle_status(response)?
            .json()
            .map_err(|err| EtlError::IpfsHttp(err.to_string()))?;
        Ok(added.hash)
    }

    fn cat(&self, cid: &str) -> Result<Vec<u8>, EtlError> {
        let response = Self::handle_status(self.post("cat", &[("arg", cid)])?)?;
        let bytes = response
            .bytes()
            .map_err(|err| EtlError::IpfsHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn resolve(&self, key: &str) -> Result<Option<String>, EtlError> {
        let Some(id) = self.key_id(key)? else {
            debug!(key = %key, "no IPNS key on this node");
            return Ok(None);
        };
        let name = format!("/ipns/{id}");
        let mut query = vec![("arg", name.as_str()), ("recursive", "true")];
        if self.offline {
            query.push(("offline", "true"));
        }
        let response = self.post("name/resolve", &query)?;
        match Self::handle_status(response) {
            Ok(response) => {
                let resolved: ResolveResponse = response
                    .json()
                    .map_err(|err| EtlError::IpfsHttp(err.to_string()))?;
                Ok(Some(
                    resolved
                        .path
                        .trim_start_matches("/ipfs/")
                        .trim_end_matches('/')
                        .to_string(),
                ))
            }
            Err(EtlError::IpfsStatus { message, .. }) if is_unresolvable(&message) => {
                warn!(key = %key, %message, "IPNS name did not resolve");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn publish(&self, key: &str, cid: &str) -> Result<(), EtlError> {
        self.ensure_key(key)?;
        let path = format!("/ipfs/{cid}");
        let mut query = vec![("arg", path.as_str()), ("key", key)];
        if self.offline {
            query.push(("allow-offline", "true"));
        }
        Self::handle_status(self.post("name/publish", &query)?)?;
        Ok(())
    }
}

fn is_unresolvable(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("could not resolve")
        || message.contains("not found")
        || message.contains("no record")
}
