//! Command surface shared by every dataset binary.
//!
//! A binary registers its sources and hands the registry to
//! [`run_etl_as_script`]:
//!
//! ```no_run
//! use zarr_etl_manager::cli::run_etl_as_script;
//! use zarr_etl_manager::registry::Registry;
//!
//! fn main() -> std::process::ExitCode {
//!     let registry = Registry::new();
//!     run_etl_as_script(registry)
//! }
//! ```

use std::ffi::OsString;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use clap::Parser;
use miette::IntoDiagnostic;

use crate::app::{App, EtlRequest, Services};
use crate::config::ConfigLoader;
use crate::domain::{CoordinateRange, DateRange};
use crate::error::EtlError;
use crate::logging::LogConfig;
use crate::output::{ConsoleOutput, JsonOutput, OutputMode};
use crate::registry::{Era5Options, Registry};

#[derive(Parser, Debug)]
#[command(name = "zarr-etl")]
#[command(about = "Update, parse and publish a climate dataset as Zarr")]
#[command(version)]
pub struct EtlArgs {
    /// A registered source key
    pub source: String,

    /// One of 'local', 'ipld' or 's3'
    pub store: String,

    /// Bucket holding the dataset's Zarrs, required with the 's3' store
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Rebuild the whole dataset instead of appending
    #[arg(long)]
    pub rebuild: bool,

    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    pub date_range: Option<Vec<NaiveDate>>,

    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    pub latitude_range: Option<Vec<f64>>,

    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    pub longitude_range: Option<Vec<f64>>,

    /// Skip the input update and parse local data
    #[arg(long)]
    pub only_parse: bool,

    /// Only refresh the metadata of the existing dataset
    #[arg(long)]
    pub only_metadata: bool,

    /// Stop after updating local input
    #[arg(long)]
    pub only_update_input: bool,

    /// Normalize input files and write the Zarr JSON
    #[arg(long)]
    pub only_prepare_input: bool,

    /// Write to the local store regardless of STORE
    #[arg(long)]
    pub local_output: bool,

    #[arg(long)]
    pub custom_output_path: Option<Utf8PathBuf>,

    /// Catalog head to chain the new metadata from
    #[arg(long)]
    pub custom_head_metadata: Option<String>,

    /// Dataset hash to use instead of the published one
    #[arg(long)]
    pub custom_latest_hash: Option<String>,

    #[arg(long)]
    pub era5_enable_caching: bool,

    /// Skip the ERA5 finalization check and overwriting
    #[arg(long)]
    pub era5_skip_finalization: bool,

    /// Path to a zarr-etl.json config
    #[arg(long)]
    pub config: Option<String>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl EtlArgs {
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }

    pub fn to_request(&self) -> Result<EtlRequest, EtlError> {
        let date_range = match self.date_range.as_deref() {
            Some([start, end]) => Some(DateRange::new(*start, *end)?),
            Some(_) => return Err(EtlError::InvalidDateRange("expected START END".to_string())),
            None => None,
        };
        Ok(EtlRequest {
            dataset_name: self.source.clone(),
            store: self.store.clone(),
            s3_bucket: self.s3_bucket.clone(),
            date_range,
            latitude_range: coordinate_range(self.latitude_range.as_deref())?,
            longitude_range: coordinate_range(self.longitude_range.as_deref())?,
            rebuild: self.rebuild,
            only_parse: self.only_parse,
            only_update_input: self.only_update_input,
            only_prepare_input: self.only_prepare_input,
            only_metadata: self.only_metadata,
            local_output: self.local_output,
            allow_overwrite: false,
            test_mode: false,
            custom_output_path: self.custom_output_path.clone(),
            custom_head_metadata: self.custom_head_metadata.clone(),
            custom_latest_hash: self.custom_latest_hash.clone(),
            era5: Era5Options {
                enable_caching: self.era5_enable_caching,
                skip_finalization: self.era5_skip_finalization,
            },
        })
    }
}

fn coordinate_range(values: Option<&[f64]>) -> Result<Option<CoordinateRange>, EtlError> {
    match values {
        Some([min, max]) => CoordinateRange::new(*min, *max).map(Some),
        Some(_) => Err(EtlError::InvalidCoordinateRange(
            "expected MIN MAX".to_string(),
        )),
        None => Ok(None),
    }
}

/// Parses the process arguments and runs the requested ETL phases.
pub fn run_etl_as_script(registry: Registry) -> ExitCode {
    run_etl_with_args(registry, std::env::args_os())
}

pub fn run_etl_with_args<I, T>(registry: Registry, args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = match EtlArgs::try_parse_from(args) {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(if err.use_stderr() { 2 } else { 0 });
        }
    };
    if let Err(report) = run(registry, args) {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<EtlError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

pub fn map_exit_code(error: &EtlError) -> u8 {
    match error {
        EtlError::InvalidStore(_)
        | EtlError::MissingBucket
        | EtlError::InvalidConfig(_)
        | EtlError::MapperOptionsMismatch { .. }
        | EtlError::ConfigRead(_)
        | EtlError::ConfigParse(_)
        | EtlError::UnknownDataset(_)
        | EtlError::DuplicateSource(_)
        | EtlError::InvalidDateRange(_)
        | EtlError::InvalidCoordinateRange(_) => 2,
        EtlError::ObjectStore { .. } | EtlError::IpfsHttp(_)
        | EtlError::IpfsStatus { .. } => 3,
        _ => 1,
    }
}

fn run(registry: Registry, args: EtlArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let request = args.to_request()?;
    let services = Services::from_config(&config)?;
    let logging = LogConfig::from_config(&config);
    let app = App::new(registry, services, config).with_logging(logging);

    match args.output_mode() {
        OutputMode::Json => {
            let report = app.run_etl(&request, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Human => {
            let report = app.run_etl(&request, &ConsoleOutput)?;
            ConsoleOutput::print_report(&report);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        EtlArgs::command().debug_assert();
    }
}
