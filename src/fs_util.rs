use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tempfile::Builder;
use zip::ZipArchive;

use crate::error::EtlError;

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EtlError> {
    let parent = path
        .parent()
        .ok_or_else(|| EtlError::Filesystem(format!("no parent directory for {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix(".zarr-etl-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| EtlError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), EtlError> {
    let content = fs::read(source.as_std_path())
        .map_err(|err| EtlError::Filesystem(format!("read {source}: {err}")))?;
    write_bytes_atomic(dest, &content)
}

/// Sibling directory that keeps untouched copies of raw inputs.
pub fn originals_dir(input_dir: &Utf8Path) -> Utf8PathBuf {
    let name = input_dir.file_name().unwrap_or("input");
    match input_dir.parent() {
        Some(parent) => parent.join(format!("{name}_originals")),
        None => Utf8PathBuf::from(format!("{name}_originals")),
    }
}

/// Copies `files` into `<input_dir>_originals` before they get normalized in place.
pub fn preserve_originals(
    files: &[Utf8PathBuf],
    input_dir: &Utf8Path,
) -> Result<Utf8PathBuf, EtlError> {
    let target = originals_dir(input_dir);
    fs::create_dir_all(target.as_std_path())
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    for file in files {
        let name = file
            .file_name()
            .ok_or_else(|| EtlError::Filesystem(format!("not a file: {file}")))?;
        copy_file_atomic(file, &target.join(name))?;
    }
    Ok(target)
}

/// Inflates `source` (`*.gz`) next to itself and returns the new path.
pub fn decompress_gz(source: &Utf8Path) -> Result<Utf8PathBuf, EtlError> {
    let target = match source.extension() {
        Some("gz") => source.with_extension(""),
        _ => {
            return Err(EtlError::Filesystem(format!(
                "expected a .gz file, got {source}"
            )));
        }
    };
    let file = fs::File::open(source.as_std_path())
        .map_err(|err| EtlError::Filesystem(format!("open gz {source}: {err}")))?;
    let mut decoder = GzDecoder::new(file);
    let mut content = Vec::new();
    io::copy(&mut decoder, &mut content)
        .map_err(|err| EtlError::Filesystem(format!("inflate {source}: {err}")))?;
    write_bytes_atomic(&target, &content)?;
    Ok(target)
}

/// Unpacks every entry of `archive` below `target_dir` and returns the files written.
/// Entries that would land outside `target_dir` abort the extraction.
pub fn extract_zip(archive: &Utf8Path, target_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, EtlError> {
    let failed = |what: &str, err: &dyn std::fmt::Display| {
        EtlError::Filesystem(format!("{archive}: {what}: {err}"))
    };
    let file = fs::File::open(archive.as_std_path()).map_err(|err| failed("open", &err))?;
    let mut zip = ZipArchive::new(file).map_err(|err| failed("read archive", &err))?;

    let mut extracted = Vec::new();
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| failed(&format!("entry {index}"), &err))?;
        let relative = entry
            .enclosed_name()
            .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
            .ok_or_else(|| failed("unsafe entry name", &entry.name()))?;
        let dest = target_dir.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(dest.as_std_path()).map_err(|err| failed(relative.as_str(), &err))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| failed(relative.as_str(), &err))?;
        }
        let mut out =
            fs::File::create(dest.as_std_path()).map_err(|err| failed(relative.as_str(), &err))?;
        io::copy(&mut entry, &mut out).map_err(|err| failed(relative.as_str(), &err))?;
        extracted.push(dest);
    }
    Ok(extracted)
}
