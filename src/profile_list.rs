//src/profile_list.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::ProfileError;

/// Reads a text file listing one profile path per line:
/// ```text
/// profiles/sample_0.profile
/// profiles/sample_1.profile.gz
/// ```
/// Surrounding whitespace is trimmed and blank lines are skipped.
pub fn read_profile_list<P: AsRef<Path>>(filepath: P) -> Result<Vec<PathBuf>, ProfileError> {
    let filepath = filepath.as_ref();
    let file = File::open(filepath).map_err(|e| ProfileError::io(filepath, e))?;
    read_profile_list_from(BufReader::new(file)).map_err(|e| match e {
        ProfileError::Io { path: None, source } => ProfileError::io(filepath, source),
        other => other,
    })
}

pub fn read_profile_list_from<R: BufRead>(reader: R) -> Result<Vec<PathBuf>, ProfileError> {
    let mut paths = Vec::new();
    for line_result in reader.lines() {
        let line = line_result?;
        let entry = line.trim();
        if entry.is_empty() {
            continue;
        }
        paths.push(PathBuf::from(entry));
    }
    Ok(paths)
}
