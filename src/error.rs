//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Exit status used when a profile has no usable `@@` column declaration.
pub const EXIT_MISSING_COLUMNS: i32 = 2;

/// Errors raised while reading, transforming or writing taxonomic profiles.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Appears the headers {} are missing from the header (should start with line @@)",
        .missing.join(", ")
    )]
    MissingColumns { missing: Vec<&'static str> },

    #[error("line {line_number}: {reason}")]
    MalformedLine { line_number: usize, reason: String },

    #[error("line {line_number}: abundance {value:?} is not a number")]
    InvalidAbundance { line_number: usize, value: String },

    #[error("cannot normalize a profile with zero total abundance")]
    ZeroMass,

    #[error("taxon {tax_id} references parent {parent} which is not in the profile")]
    MissingAncestor { tax_id: String, parent: String },

    #[error("no profiles listed")]
    EmptyProfileList,

    #[error("could not start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ProfileError {
    /// Wrap an I/O error that happened while touching `path`.
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        ProfileError::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Process exit status for this error. A missing column declaration gets its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProfileError::MissingColumns { .. } => EXIT_MISSING_COLUMNS,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for ProfileError {
    fn from(source: std::io::Error) -> Self {
        ProfileError::Io { path: None, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_uses_distinguished_exit_code() {
        let err = ProfileError::MissingColumns {
            missing: vec!["TAXID", "PERCENTAGE"],
        };
        assert_eq!(err.exit_code(), EXIT_MISSING_COLUMNS);
        assert!(err.to_string().contains("TAXID, PERCENTAGE"));
        assert_eq!(ProfileError::ZeroMass.exit_code(), 1);
    }
}
