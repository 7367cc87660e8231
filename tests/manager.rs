mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::Value;

use common::{FakeSource, TestBackends, static_metadata};
use zarr_etl_manager::domain::StoreKind;
use zarr_etl_manager::error::EtlError;
use zarr_etl_manager::manager::{DatasetManager, ManagerSettings, UpdateRequest};

fn settings(root: &Utf8PathBuf) -> ManagerSettings {
    let mut settings = ManagerSettings::new(root.join("datasets"), root.join("climate"));
    settings.s3_bucket = Some("climate-zarrs".to_string());
    settings
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn store_kind_follows_request() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    for (name, kind) in [
        ("local", StoreKind::Local),
        ("ipld", StoreKind::Ipld),
        ("s3", StoreKind::S3),
    ] {
        let manager = DatasetManager::new(
            FakeSource::new("chirps_final_05").boxed(),
            name,
            settings(&root),
            &doubles.backends(),
        )
        .unwrap();
        assert_eq!(manager.store().kind(), kind);
    }
}

#[test]
fn invalid_store_fails_before_io() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let err = DatasetManager::new(
        FakeSource::new("chirps_final_05").boxed(),
        "gcs",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap_err();
    assert_matches!(err, EtlError::InvalidStore(ref store) if store == "gcs");
    assert_eq!(doubles.ipfs.calls(), 0);
    assert_eq!(doubles.s3.connections(), 0);
    assert!(!root.join("datasets").exists());
}

#[test]
fn ipld_always_allows_overwrite() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    for allow in [true, false] {
        let mut settings = settings(&root);
        settings.allow_overwrite = allow;
        let manager = DatasetManager::new(
            FakeSource::new("vhi").boxed(),
            "ipld",
            settings,
            &doubles.backends(),
        )
        .unwrap();
        assert!(manager.overwrite_allowed());
    }

    let local = DatasetManager::new(
        FakeSource::new("vhi").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    assert!(!local.overwrite_allowed());
}

#[test]
fn populate_metadata_is_idempotent() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut manager = DatasetManager::new(
        FakeSource::new("cpc_precip").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    manager
        .context_mut()
        .metadata
        .insert("date range".to_string(), Value::from("2024/01/01"));

    manager.populate_metadata();
    let once = manager.metadata().clone();
    manager.populate_metadata();
    assert_eq!(manager.metadata(), &once);
    assert_eq!(once["title"], "Test precipitation");
    assert_eq!(once["date range"], "2024/01/01");
}

#[test]
fn static_metadata_overrides_accumulated_values() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut manager = DatasetManager::new(
        FakeSource::new("cpc_precip").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    manager
        .context_mut()
        .metadata
        .insert("title".to_string(), Value::from("stale"));
    manager.populate_metadata();
    assert_eq!(manager.metadata()["title"], static_metadata()["title"]);
}

#[test]
fn new_files_reset_each_update() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut manager = DatasetManager::new(
        FakeSource::new("era5_land").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    assert!(manager.new_files().is_empty());

    manager.update_local_input(&UpdateRequest::default()).unwrap();
    manager.update_local_input(&UpdateRequest::default()).unwrap();
    assert_eq!(
        manager.new_files(),
        [root.join("climate").join("era5_land").join("20240101.nc")]
    );
}

#[test]
fn parse_then_finalize_on_local_store() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut manager = DatasetManager::new(
        FakeSource::new("chirps_final_05").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();

    assert!(manager.parse().unwrap());
    let published = manager.finalize().unwrap();
    assert!(published.hash.is_none());
    assert_eq!(
        published.location,
        root.join("datasets").join("chirps_final_05.zarr").to_string()
    );

    let raw = std::fs::read(root.join("datasets/chirps_final_05.zarr/.zattrs")).unwrap();
    let attrs: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(attrs["title"], "Test precipitation");
    assert_eq!(attrs["temporal_resolution"], "daily");
    assert_eq!(attrs["source_hook"], true);
    assert_eq!(
        attrs["coordinate reference system"],
        r#"{"name":"EPSG:4326"}"#
    );
    assert!(attrs.get("license").is_none());
}

#[test]
fn finalize_on_ipld_publishes_new_hash() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut source = FakeSource::new("vhi");
    source.chunker = Some("size-262144".to_string());
    let mut manager = DatasetManager::new(
        source.boxed(),
        "ipld",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();

    assert!(manager.parse().unwrap());
    let published = manager.finalize().unwrap();
    let hash = published.hash.unwrap();
    assert_eq!(doubles.ipfs.name("vhi-daily"), Some(hash.clone()));
    assert_eq!(published.location, format!("/ipfs/{hash}"));
    assert_eq!(manager.latest_hash().unwrap(), Some(hash));
}

#[test]
fn test_mode_publishes_under_test_key() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut settings = settings(&root);
    settings.test_mode = true;
    let mut manager = DatasetManager::new(
        FakeSource::new("vhi").boxed(),
        "ipld",
        settings,
        &doubles.backends(),
    )
    .unwrap();

    manager.parse().unwrap();
    let hash = manager.finalize().unwrap().hash;
    assert_eq!(doubles.ipfs.name("vhi-daily_test"), hash);
    assert_eq!(doubles.ipfs.name("vhi-daily"), None);
}

#[test]
fn append_roots_output_at_existing_hash() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut first = DatasetManager::new(
        FakeSource::new("vhi").boxed(),
        "ipld",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    first.parse().unwrap();
    let first_hash = first.finalize().unwrap().hash.unwrap();

    let mut second = DatasetManager::new(
        FakeSource::new("vhi").boxed(),
        "ipld",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    let mapper = second.context_mut().output_mapper().unwrap();
    assert_eq!(mapper.location(), format!("/ipfs/{first_hash}"));

    let mut rebuild_settings = settings(&root);
    rebuild_settings.rebuild_requested = true;
    let mut rebuild = DatasetManager::new(
        FakeSource::new("vhi").boxed(),
        "ipld",
        rebuild_settings,
        &doubles.backends(),
    )
    .unwrap();
    let mapper = rebuild.context_mut().output_mapper().unwrap();
    assert_eq!(mapper.location(), "/ipfs/");
}

#[test]
fn metadata_only_update_without_data_is_noop() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut manager = DatasetManager::new(
        FakeSource::new("vhi").boxed(),
        "ipld",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    assert!(manager.only_update_metadata().unwrap().is_none());
    assert_eq!(doubles.ipfs.name("vhi-daily"), None);
}

#[test]
fn metadata_only_update_rewrites_attrs() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut manager = DatasetManager::new(
        FakeSource::new("cpc_precip").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    manager.parse().unwrap();
    manager.finalize().unwrap();

    let mut again = DatasetManager::new(
        FakeSource::new("cpc_precip").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    again
        .context_mut()
        .metadata
        .insert("update note".to_string(), Value::from("metadata only"));
    let published = again.only_update_metadata().unwrap().unwrap();
    assert!(published.hash.is_none());

    let raw = std::fs::read(root.join("datasets/cpc_precip.zarr/.zattrs")).unwrap();
    let attrs: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(attrs["update note"], "metadata only");
}

#[test]
fn identity_distinguishes_test_mode() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let production = DatasetManager::new(
        FakeSource::new("chirps_final_05").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    let mut test_settings = settings(&root);
    test_settings.test_mode = true;
    let test = DatasetManager::new(
        FakeSource::new("chirps_final_05").boxed(),
        "local",
        test_settings,
        &doubles.backends(),
    )
    .unwrap();
    let other_store = DatasetManager::new(
        FakeSource::new("chirps_final_05").boxed(),
        "s3",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();

    assert_eq!(production.to_string(), "chirps_final_05");
    assert_ne!(production.identity(), test.identity());
    assert_eq!(production.identity(), other_store.identity());

    let identities: HashSet<_> = [&production, &test, &other_store]
        .iter()
        .map(|manager| manager.identity())
        .collect();
    assert_eq!(identities.len(), 2);
}

#[test]
fn custom_output_path_moves_local_store() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut settings = settings(&root);
    settings.custom_output_path = Some(root.join("scratch"));
    let manager = DatasetManager::new(
        FakeSource::new("rtma").boxed(),
        "local",
        settings,
        &doubles.backends(),
    )
    .unwrap();
    assert_eq!(
        manager.store().location(),
        root.join("scratch").join("rtma.zarr").to_string()
    );
}

#[test]
fn bound_store_and_overwrite_policy_hold_through_the_run() {
    let (_temp, root) = temp_root();
    let doubles = TestBackends::new();
    let mut manager = DatasetManager::new(
        FakeSource::new("cpc_precip").boxed(),
        "local",
        settings(&root),
        &doubles.backends(),
    )
    .unwrap();
    assert!(!manager.context_mut().has_existing_output().unwrap());

    manager.parse().unwrap();
    assert!(manager.context_mut().has_existing_output().unwrap());
    manager.finalize().unwrap();

    let ctx = manager.context();
    assert_eq!(ctx.store().kind(), StoreKind::Local);
    assert!(!ctx.overwrite_allowed());
    assert_eq!(doubles.ipfs.calls(), 0);
}
