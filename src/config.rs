use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::compute::{ComputeConfig, ComputeOverrides};
use crate::error::EtlError;

pub const DEFAULT_CONFIG_FILE: &str = "zarr-etl.json";
pub const DEFAULT_IPFS_API: &str = "http://127.0.0.1:5001";
pub const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub output_root: Option<String>,
    #[serde(default)]
    pub input_root: Option<String>,
    #[serde(default)]
    pub ipfs_api: Option<String>,
    #[serde(default)]
    pub ipfs_offline: Option<bool>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub s3_region: Option<String>,
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub compute: ComputeOverrides,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Parent of every `<name>.zarr` written by the local store.
    pub output_root: Utf8PathBuf,
    /// Parent of each source's raw input directory.
    pub input_root: Utf8PathBuf,
    pub ipfs_api: String,
    pub ipfs_offline: bool,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub log_dir: Option<Utf8PathBuf>,
    pub log_level: String,
    pub compute: ComputeConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `zarr-etl.json` in the working directory when it exists.
    /// Environment variables fill in anything the file leaves unset.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EtlError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.as_std_path().exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(config_path.as_std_path())
                .map_err(|_| EtlError::ConfigRead(config_path.to_string()))?;
            serde_json::from_str(&content).map_err(|err| EtlError::ConfigParse(err.to_string()))?
        };

        let cwd = std::env::current_dir().map_err(|err| EtlError::Filesystem(err.to_string()))?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| EtlError::Filesystem("working directory is not UTF-8".to_string()))?;

        Self::resolve_config(config, &cwd, |key| std::env::var(key).ok())
    }

    pub fn resolve_config<F>(
        config: Config,
        cwd: &Utf8PathBuf,
        env: F,
    ) -> Result<ResolvedConfig, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let output_root = config
            .output_root
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| cwd.join("datasets"));
        let input_root = config
            .input_root
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| cwd.join("climate"));

        let ipfs_api = config
            .ipfs_api
            .or_else(|| env("IPFS_API"))
            .unwrap_or_else(|| DEFAULT_IPFS_API.to_string());
        let s3_endpoint = config.s3_endpoint.or_else(|| env("AWS_ENDPOINT_URL"));
        let s3_region = config
            .s3_region
            .or_else(|| env("AWS_REGION"))
            .or_else(|| env("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_S3_REGION.to_string());

        let mut compute = ComputeConfig::default();
        compute.apply(&config.compute);
        compute.validate()?;

        Ok(ResolvedConfig {
            output_root,
            input_root,
            ipfs_api,
            ipfs_offline: config.ipfs_offline.unwrap_or(false),
            s3_endpoint,
            s3_region,
            log_dir: config.log_dir.map(Utf8PathBuf::from),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            compute,
        })
    }
}
