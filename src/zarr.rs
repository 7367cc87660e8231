use serde_json::{Value, json};

use crate::domain::Metadata;
use crate::error::EtlError;
use crate::store::ZarrMapper;

pub const ZGROUP: &str = ".zgroup";
pub const ZATTRS: &str = ".zattrs";
pub const ZMETADATA: &str = ".zmetadata";
const ZARRAY_SUFFIX: &str = "/.zarray";

/// Group-level view of a Zarr v2 store: attributes and the arrays it holds.
///
/// Chunk bytes are never touched here; writing array data belongs to the
/// source that parses the input.
#[derive(Debug, Clone)]
pub struct ZarrDataset {
    location: String,
    attrs: Metadata,
    arrays: Vec<String>,
    consolidated: bool,
}

impl ZarrDataset {
    pub fn open(mapper: &dyn ZarrMapper) -> Result<Self, EtlError> {
        let location = mapper.location();
        if !mapper.contains(ZGROUP)? {
            return Err(EtlError::MissingZarrGroup(location));
        }
        let attrs = match mapper.get(ZATTRS)? {
            Some(raw) => parse_object(&raw, ZATTRS)?,
            None => Metadata::new(),
        };
        let mut arrays = mapper
            .keys()?
            .into_iter()
            .filter_map(|key| key.strip_suffix(ZARRAY_SUFFIX).map(str::to_string))
            .collect::<Vec<_>>();
        arrays.sort();
        Ok(Self {
            location,
            attrs,
            arrays,
            consolidated: mapper.contains(ZMETADATA)?,
        })
    }

    /// Writes an empty group carrying `attrs`.
    pub fn create(mapper: &dyn ZarrMapper, attrs: Metadata) -> Result<Self, EtlError> {
        mapper.set(ZGROUP, &to_bytes(&json!({ "zarr_format": 2 }))?)?;
        let dataset = Self {
            location: mapper.location(),
            attrs,
            arrays: Vec::new(),
            consolidated: false,
        };
        dataset.write_attrs(mapper)?;
        Ok(dataset)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn attrs(&self) -> &Metadata {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Metadata {
        &mut self.attrs
    }

    pub fn arrays(&self) -> &[String] {
        &self.arrays
    }

    pub fn is_consolidated(&self) -> bool {
        self.consolidated
    }

    pub fn write_attrs(&self, mapper: &dyn ZarrMapper) -> Result<(), EtlError> {
        let attrs = Value::Object(self.attrs.clone());
        mapper.set(ZATTRS, &to_bytes(&attrs)?)?;
        if self.consolidated {
            let raw = mapper
                .get(ZMETADATA)?
                .ok_or_else(|| EtlError::ZarrMetadata(format!("{ZMETADATA} disappeared")))?;
            let mut consolidated = parse_object(&raw, ZMETADATA)?;
            let entries = consolidated
                .entry("metadata")
                .or_insert_with(|| Value::Object(Metadata::new()));
            let Value::Object(entries) = entries else {
                return Err(EtlError::ZarrMetadata(format!(
                    "{ZMETADATA} metadata is not an object"
                )));
            };
            entries.insert(ZATTRS.to_string(), attrs);
            mapper.set(ZMETADATA, &to_bytes(&Value::Object(consolidated))?)?;
        }
        Ok(())
    }
}

fn parse_object(raw: &[u8], key: &str) -> Result<Metadata, EtlError> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(EtlError::ZarrMetadata(format!("{key} is not a JSON object"))),
        Err(err) => Err(EtlError::ZarrMetadata(format!("{key}: {err}"))),
    }
}

fn to_bytes(value: &Value) -> Result<Vec<u8>, EtlError> {
    serde_json::to_vec_pretty(value).map_err(|err| EtlError::ZarrMetadata(err.to_string()))
}
