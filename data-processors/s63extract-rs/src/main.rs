//! S-63 ENC tree extractor backend
//!
//! Walks an `ENC_ROOT`-style tree of encrypted cells, decrypts every
//! cell covered by the imported permit listing and mirrors the results
//! under the output directory.
use s63::S63Client;
use std::fs;
use std::path::{Path, PathBuf};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::prelude::*;
use walkdir::WalkDir;

mod config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let config = config::Config::new()?;

    let mut client = S63Client::new(&config.hw_id, &config.m_key, &config.m_id)?;
    client.set_max_unzip_size(config.max_unzip_size);
    let report = client.import_permit_file(&config.permit_file)?;
    info!(
        "{}: {} cell permits installed, {} skipped",
        config.permit_file,
        report.installed,
        report.skipped.len()
    );

    let output_dir = Path::new(&config.output_dir);
    fs::create_dir_all(output_dir)?;

    let mut candidates = 0u64;
    let mut decrypted: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(&config.input_dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("input walk: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_enc_cell(entry.path()) {
            continue;
        }
        candidates += 1;
        let rel = entry
            .path()
            .strip_prefix(&config.input_dir)
            .unwrap_or(entry.path())
            .to_path_buf();
        let out_path = output_dir.join(&rel);
        if let Err(e) = prepare_output(&out_path) {
            warn!("{}: cannot prepare output: {e}", out_path.display());
            continue;
        }
        match client.decrypt_and_unzip(entry.path(), &out_path) {
            Ok(()) => {
                debug!("{} decrypted", rel.display());
                decrypted.push(rel);
            }
            Err(e) => match e.sse() {
                Some(code) => warn!("SSE {code}: {}: {e}", rel.display()),
                None => warn!("{}: {e}", rel.display()),
            },
        }
    }

    if let Err(e) = wipe_empty_dirs(output_dir) {
        warn!("output cleanup: {e}");
    }
    write_filename_index(output_dir, &decrypted)?;
    info!("{} of {candidates} cells decrypted", decrypted.len());
    Ok(())
}

/// An ENC cell carries a purely numeric extension: `.000` for the base
/// cell, `.001` and up for updates
fn is_enc_cell(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_digit()))
}

/// Creates the parent directory and drops any stale previous output
fn prepare_output(out_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if out_path.exists() {
        fs::remove_file(out_path)?;
    }
    Ok(())
}

/// Removes subdirectories that ended up empty; returns whether `dir`
/// itself is now empty
fn wipe_empty_dirs(dir: &Path) -> std::io::Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let mut empty = true;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if wipe_empty_dirs(&path)? {
            fs::remove_dir(&path)?;
        } else {
            empty = false;
        }
    }
    Ok(empty)
}

/// Writes `s57filenames.txt`: one decrypted relative path per line
fn write_filename_index(output_dir: &Path, names: &[PathBuf]) -> std::io::Result<()> {
    let mut body = String::new();
    for name in names {
        body.push_str(&name.display().to_string());
        body.push('\n');
    }
    fs::write(output_dir.join("s57filenames.txt"), body)
}
