use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EtlError {
    #[error("store must be one of 'local', 'ipld', or 's3' (got '{0}')")]
    InvalidStore(String),

    #[error("must provide bucket name if parsing to S3")]
    MissingBucket,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("mapper options for {options} do not apply to the {store} store")]
    MapperOptionsMismatch { store: String, options: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no dataset source registered for {0}")]
    UnknownDataset(String),

    #[error("dataset source already registered: {0}")]
    DuplicateSource(String),

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("invalid coordinate range: {0}")]
    InvalidCoordinateRange(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("object store operation on {path} failed: {source}")]
    ObjectStore {
        path: String,
        #[source]
        source: object_store::Error,
    },

    #[error("IPFS request failed: {0}")]
    IpfsHttp(String),

    #[error("IPFS returned status {status}: {message}")]
    IpfsStatus { status: u16, message: String },

    #[error("malformed IPLD block {cid}: {message}")]
    IpldBlock { cid: String, message: String },

    #[error("invalid Zarr metadata: {0}")]
    ZarrMetadata(String),

    #[error("no Zarr group found at {0}")]
    MissingZarrGroup(String),

    #[error("{0}")]
    Source(String),
}
