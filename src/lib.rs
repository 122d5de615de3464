// src/lib.rs
pub mod types;
pub mod error;
pub mod profile;
pub mod push_up;
pub mod emd_unifrac;
pub mod distance_matrix;
pub mod profile_list;

use log::info;
use std::path::{Path, PathBuf};

pub use crate::distance_matrix::{
    build_distance_matrix, build_distance_matrix_with, DistanceMatrix,
};
pub use crate::emd_unifrac::{EmdUnifrac, ProfileDistance};
pub use crate::error::ProfileError;
pub use crate::profile::TaxonomicProfile;
pub use crate::push_up::MissingAncestorPolicy;
pub use crate::types::{ColumnLayout, TaxonomicNode};

use crate::profile_list::read_profile_list;

/// Settings for a distance matrix run.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixConfig {
    /// Abundances below this are zeroed before comparing. Same units as the
    /// profiles' `PERCENTAGE` column, so `1.0` means 1%.
    pub threshold: f64,
    /// Worker threads for the pairwise loop; `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

impl MatrixConfig {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            threads: None,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

/// The matrix together with the profile paths its rows and columns refer to.
#[derive(Debug)]
pub struct DistanceResults {
    pub profile_paths: Vec<PathBuf>,
    pub matrix: DistanceMatrix,
}

/// Load and threshold every profile named in `list_path`, one file at a time.
pub fn load_profiles<P: AsRef<Path>>(
    list_path: P,
    threshold: f64,
) -> Result<(Vec<PathBuf>, Vec<TaxonomicProfile>), ProfileError> {
    let paths = read_profile_list(list_path)?;
    let profiles = load_profiles_from_paths(&paths, threshold)?;
    Ok((paths, profiles))
}

/// Load and threshold the given profiles, in order.
pub fn load_profiles_from_paths(
    paths: &[PathBuf],
    threshold: f64,
) -> Result<Vec<TaxonomicProfile>, ProfileError> {
    if paths.is_empty() {
        return Err(ProfileError::EmptyProfileList);
    }

    let mut profiles = Vec::with_capacity(paths.len());
    for path in paths {
        let mut profile = TaxonomicProfile::from_file(path)?;
        profile.threshold(threshold);
        profiles.push(profile);
    }
    info!("Loaded {} profiles (threshold {})", profiles.len(), threshold);
    Ok(profiles)
}

/// Unified pipeline: profile list -> parse -> threshold -> pairwise distances.
pub fn compute_distance_matrix<P, D, F>(
    list_path: P,
    config: &MatrixConfig,
    metric: &D,
    on_pair: F,
) -> Result<DistanceResults, ProfileError>
where
    P: AsRef<Path>,
    D: ProfileDistance,
    F: Fn() + Sync + Send,
{
    let profile_paths = read_profile_list(list_path)?;
    compute_distance_matrix_from_paths(profile_paths, config, metric, on_pair)
}

/// [`compute_distance_matrix`] for a profile list the caller has already read.
pub fn compute_distance_matrix_from_paths<D, F>(
    profile_paths: Vec<PathBuf>,
    config: &MatrixConfig,
    metric: &D,
    on_pair: F,
) -> Result<DistanceResults, ProfileError>
where
    D: ProfileDistance,
    F: Fn() + Sync + Send,
{
    let profiles = load_profiles_from_paths(&profile_paths, config.threshold)?;

    let matrix = match config.threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
            pool.install(|| build_distance_matrix_with(&profiles, metric, on_pair))
        }
        None => build_distance_matrix_with(&profiles, metric, on_pair),
    };
    info!("Computed {}x{} distance matrix", matrix.size(), matrix.size());

    Ok(DistanceResults {
        profile_paths,
        matrix,
    })
}

/// Number of pairs evaluated for `n` profiles.
pub fn pair_count(n: usize) -> u64 {
    let n = n as u64;
    n * n.saturating_sub(1) / 2
}
