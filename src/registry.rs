use tracing::{debug, warn};

use crate::domain::{CoordinateRange, DateRange};
use crate::error::EtlError;
use crate::manager::DatasetSource;

/// Toggles understood by the ERA5 family of sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Era5Options {
    pub enable_caching: bool,
    pub skip_finalization: bool,
}

/// Everything a factory may use to configure the source it builds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceArgs {
    pub json_key: String,
    pub date_range: Option<DateRange>,
    pub latitude_range: Option<CoordinateRange>,
    pub longitude_range: Option<CoordinateRange>,
    pub era5: Era5Options,
}

pub type SourceFactory =
    Box<dyn Fn(&SourceArgs) -> Result<Box<dyn DatasetSource>, EtlError> + Send + Sync>;

pub struct SourceEntry {
    name: String,
    json_key: String,
    factory: SourceFactory,
}

impl SourceEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn json_key(&self) -> &str {
        &self.json_key
    }

    /// Builds the source. It must publish under the key it was registered with.
    pub fn build(&self, args: &SourceArgs) -> Result<Box<dyn DatasetSource>, EtlError> {
        let source = (self.factory)(args)?;
        let json_key = source.json_key();
        if json_key != self.json_key {
            return Err(EtlError::InvalidConfig(format!(
                "source {} registered as {} publishes under {json_key}",
                self.name, self.json_key
            )));
        }
        Ok(source)
    }
}

impl std::fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceEntry")
            .field("name", &self.name)
            .field("json_key", &self.json_key)
            .finish_non_exhaustive()
    }
}

/// Table of every dataset source a binary knows about, filled at startup.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<SourceEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        json_key: impl Into<String>,
        factory: F,
    ) -> Result<(), EtlError>
    where
        F: Fn(&SourceArgs) -> Result<Box<dyn DatasetSource>, EtlError> + Send + Sync + 'static,
    {
        let name = name.into();
        let json_key = json_key.into();
        if self
            .entries
            .iter()
            .any(|entry| entry.name == name && entry.json_key == json_key)
        {
            return Err(EtlError::DuplicateSource(format!("{name} ({json_key})")));
        }
        debug!(%name, %json_key, "registered dataset source");
        self.entries.push(SourceEntry {
            name,
            json_key,
            factory: Box::new(factory),
        });
        Ok(())
    }

    /// Finds the source registered under `name`.
    ///
    /// GFS sources publish many keys from one source type, so names containing
    /// `gfs` are matched against each entry's json key instead of its name.
    pub fn get_dataset_manager_from_name(&self, name: &str) -> Option<&SourceEntry> {
        let by_json_key = name.contains("gfs");
        let found = self.entries.iter().find(|entry| {
            if by_json_key {
                entry.json_key == name
            } else {
                entry.name == name
            }
        });
        if found.is_none() {
            warn!(
                %name,
                "failed to set manager from name, could not find corresponding source"
            );
        }
        found
    }

    pub fn entries(&self) -> impl Iterator<Item = &SourceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
