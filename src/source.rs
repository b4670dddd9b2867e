use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};

use backoff::{ExponentialBackoff, retry_notify};
use log::warn;

use crate::{LabeledImage, error::Result};

fn read_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_millis(500),
        max_elapsed_time: Some(Duration::from_secs(2)),
        ..ExponentialBackoff::default()
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

/// Reads a whole file, retrying only transient I/O failures.
pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();

    let result = retry_notify(
        read_policy(),
        || {
            fs::read(path).map_err(|e| {
                if is_transient(&e) {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        },
        |err: io::Error, wait: Duration| {
            warn!("Retrying read of {} in {:?}: {}", path.display(), wait, err);
        },
    );

    result.map_err(|e| match e {
        backoff::Error::Permanent(err) => err.into(),
        backoff::Error::Transient { err, .. } => err.into(),
    })
}

/// Loads one image, labelled with its path.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<LabeledImage> {
    let path = path.as_ref();
    let bytes = read_bytes(path)?;
    LabeledImage::from_bytes(path.to_string_lossy(), &bytes)
}

/// Regular files directly inside `dir`, sorted by file name.
pub fn list_directory<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Loads every file of `dir` in name order. Any undecodable file fails the
/// whole listing.
pub fn load_directory<P: AsRef<Path>>(dir: P) -> Result<Vec<LabeledImage>> {
    list_directory(dir)?.iter().map(load_image).collect()
}
