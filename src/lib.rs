pub mod app;
pub mod catalog;
pub mod cli;
pub mod compute;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod ipfs;
pub mod logging;
pub mod manager;
pub mod object_store;
pub mod output;
pub mod registry;
pub mod store;
pub mod zarr;
