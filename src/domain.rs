use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::EtlError;

pub const DATE_FORMAT_FOLDER: &str = "%Y%m%d";
pub const DATE_HOURLY_FORMAT_FOLDER: &str = "%Y%m%d%H";
pub const DATE_FORMAT_METADATA: &str = "%Y/%m/%d";

/// Descriptive metadata accumulated for a dataset, kept in insertion order.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalResolution {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Seasonal,
}

impl TemporalResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalResolution::Hourly => "hourly",
            TemporalResolution::Daily => "daily",
            TemporalResolution::Weekly => "weekly",
            TemporalResolution::Monthly => "monthly",
            TemporalResolution::Yearly => "yearly",
            TemporalResolution::Seasonal => "seasonal",
        }
    }

    /// strftime pattern used to name per-period input folders.
    pub fn folder_date_format(&self) -> &'static str {
        match self {
            TemporalResolution::Hourly => DATE_HOURLY_FORMAT_FOLDER,
            _ => DATE_FORMAT_FOLDER,
        }
    }
}

impl fmt::Display for TemporalResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TemporalResolution {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "hourly" => Ok(TemporalResolution::Hourly),
            "daily" => Ok(TemporalResolution::Daily),
            "weekly" => Ok(TemporalResolution::Weekly),
            "monthly" => Ok(TemporalResolution::Monthly),
            "yearly" => Ok(TemporalResolution::Yearly),
            "seasonal" => Ok(TemporalResolution::Seasonal),
            _ => Err(EtlError::InvalidConfig(format!(
                "unknown temporal resolution: {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Local,
    Ipld,
    S3,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Local => "local",
            StoreKind::Ipld => "ipld",
            StoreKind::S3 => "s3",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "local" => Ok(StoreKind::Local),
            "ipld" => Ok(StoreKind::Ipld),
            "s3" => Ok(StoreKind::S3),
            _ => Err(EtlError::InvalidStore(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EtlError> {
        if start > end {
            return Err(EtlError::InvalidDateRange(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoordinateRange {
    min: f64,
    max: f64,
}

impl CoordinateRange {
    pub fn new(min: f64, max: f64) -> Result<Self, EtlError> {
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(EtlError::InvalidCoordinateRange(format!("[{min}, {max}]")));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

/// Chunking requested by a source for the compute layer, the Zarr output and IPFS blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    #[serde(default)]
    pub compute: BTreeMap<String, usize>,
    #[serde(default)]
    pub zarr: BTreeMap<String, usize>,
    #[serde(default)]
    pub ipfs_chunker: Option<String>,
}

impl ChunkRequest {
    pub fn new(compute: &[(&str, usize)], zarr: &[(&str, usize)]) -> Self {
        Self {
            compute: compute
                .iter()
                .map(|(dim, size)| (dim.to_string(), *size))
                .collect(),
            zarr: zarr
                .iter()
                .map(|(dim, size)| (dim.to_string(), *size))
                .collect(),
            ipfs_chunker: None,
        }
    }

    pub fn with_ipfs_chunker(mut self, chunker: impl Into<String>) -> Self {
        self.ipfs_chunker = Some(chunker.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_store_kind() {
        assert_eq!("ipld".parse::<StoreKind>().unwrap(), StoreKind::Ipld);
        let err = "gcs".parse::<StoreKind>().unwrap_err();
        assert_matches!(err, EtlError::InvalidStore(ref value) if value == "gcs");
        assert!(err.to_string().contains("'local', 'ipld', or 's3'"));
    }

    #[test]
    fn hourly_folders_include_hour() {
        assert_eq!(
            TemporalResolution::Hourly.folder_date_format(),
            DATE_HOURLY_FORMAT_FOLDER
        );
        assert_eq!(
            TemporalResolution::Monthly.folder_date_format(),
            DATE_FORMAT_FOLDER
        );
    }

    #[test]
    fn reversed_date_range_rejected() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_matches!(
            DateRange::new(start, end),
            Err(EtlError::InvalidDateRange(_))
        );
    }

    #[test]
    fn date_range_serializes_as_iso_dates() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(range).unwrap(),
            serde_json::json!({"start": "2024-01-01", "end": "2024-01-31"})
        );
    }
}
