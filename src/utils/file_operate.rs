use std::{fs::File, io::Read, path::Path};

use anyhow::{Context, Result};

use crate::utils::file_status::write_status;

/// Try to open a node and remember in the status map whether that worked.
/// Returns "OK" or the failure reason for the log.
pub fn check_read<P: AsRef<Path>>(path: P) -> String {
    let path_ref = path.as_ref();
    let key = path_ref.to_string_lossy();
    match File::open(path_ref) {
        // character devices such as the MSR node count as readable too
        Ok(_) if !path_ref.is_dir() => {
            write_status(&key, true);
            "OK".to_string()
        }
        Ok(_) => {
            write_status(&key, false);
            "Failed: is a directory".to_string()
        }
        Err(e) => {
            write_status(&key, false);
            format!("Failed: {e}")
        }
    }
}

pub fn check_read_simple<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists() && path.as_ref().is_file()
}

pub fn read_file<P: AsRef<Path>>(path: P, max_len: usize) -> Result<String> {
    let path_ref = path.as_ref();
    let mut file = File::open(path_ref)
        .with_context(|| format!("Failed to open file for reading: {}", path_ref.display()))?;

    let mut content = String::with_capacity(max_len);
    let bytes_read = file
        .read_to_string(&mut content)
        .with_context(|| format!("Failed to read from file: {}", path_ref.display()))?;

    content.truncate(bytes_read);
    Ok(content)
}

/// Read a node holding a single unsigned integer, as sysfs counters do.
pub fn read_u64<P: AsRef<Path>>(path: P) -> Result<u64> {
    let path_ref = path.as_ref();
    let buf = read_file(path_ref, 32)?;
    buf.trim().parse::<u64>().with_context(|| {
        format!(
            "Failed to parse integer from {}: {:?}",
            path_ref.display(),
            buf.trim()
        )
    })
}
