//src/distance_matrix.rs

use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::emd_unifrac::ProfileDistance;
use crate::error::ProfileError;
use crate::profile::TaxonomicProfile;

/// Square, symmetric matrix of pairwise profile distances with a zero diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    size: usize,
    /// Row-major, `size * size` values.
    values: Vec<f64>,
}

impl DistanceMatrix {
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            values: vec![0.0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.size..(i + 1) * self.size]
    }

    /// Set both `(i, j)` and `(j, i)`.
    fn set_symmetric(&mut self, i: usize, j: usize, value: f64) {
        self.values[i * self.size + j] = value;
        self.values[j * self.size + i] = value;
    }

    /// Comma separated, one row per line, numbers in `%.18e` notation.
    pub fn write_csv<W: Write>(&self, mut out: W) -> Result<(), ProfileError> {
        for i in 0..self.size {
            let line: Vec<String> = self.row(i).iter().map(|&v| format_scientific(v)).collect();
            writeln!(out, "{}", line.join(","))?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ProfileError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| ProfileError::io(path, e))?;
        self.write_csv(BufWriter::new(file)).map_err(|e| match e {
            ProfileError::Io { path: None, source } => ProfileError::io(path, source),
            other => other,
        })
    }
}

/// Format like C's `%.18e`: 18 fractional digits, signed exponent of at least two digits.
pub fn format_scientific(value: f64) -> String {
    let formatted = format!("{:.18e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        // inf / NaN
        None => formatted,
    }
}

/// Pairwise distances between all profiles. See [`build_distance_matrix_with`].
pub fn build_distance_matrix<D: ProfileDistance>(
    profiles: &[TaxonomicProfile],
    metric: &D,
) -> DistanceMatrix {
    build_distance_matrix_with(profiles, metric, || {})
}

/// Pairwise distances between all profiles, calling `on_pair` after each pair.
///
/// Only pairs `i < j` are evaluated, in parallel; each result fills both symmetric cells
/// and the diagonal stays 0.
pub fn build_distance_matrix_with<D, F>(
    profiles: &[TaxonomicProfile],
    metric: &D,
    on_pair: F,
) -> DistanceMatrix
where
    D: ProfileDistance,
    F: Fn() + Sync,
{
    let n = profiles.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();

    let distances: Vec<(usize, usize, f64)> = pairs
        .par_iter()
        .map(|&(i, j)| {
            let d = metric.eval(&profiles[i], &profiles[j]);
            on_pair();
            (i, j, d)
        })
        .collect();

    let mut matrix = DistanceMatrix::zeros(n);
    for (i, j, d) in distances {
        matrix.set_symmetric(i, j, d);
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emd_unifrac::EmdUnifrac;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Distance = absolute difference of the root mass, enough to check the driver.
    struct RootMass;

    impl ProfileDistance for RootMass {
        fn eval(&self, a: &TaxonomicProfile, b: &TaxonomicProfile) -> f64 {
            (a.total_root_abundance() - b.total_root_abundance()).abs()
        }
    }

    fn profile_with_root(mass: f64) -> TaxonomicProfile {
        let text = format!("@@TAXID\tTAXPATH\tPERCENTAGE\n1\t1\t{}\n", mass);
        TaxonomicProfile::from_reader(Cursor::new(text)).unwrap()
    }

    #[test]
    fn matrix_is_symmetric_with_zero_diagonal() {
        let profiles: Vec<_> = [10.0, 25.0, 70.0, 71.5]
            .iter()
            .map(|&m| profile_with_root(m))
            .collect();
        let calls = AtomicUsize::new(0);
        let matrix = build_distance_matrix_with(&profiles, &RootMass, || {
            calls.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(calls.load(Ordering::Relaxed), 6);
        assert_eq!(matrix.size(), 4);
        for i in 0..4 {
            assert_eq!(matrix.get(i, i), 0.0);
            for j in 0..4 {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
            }
        }
        assert_eq!(matrix.get(0, 2), 60.0);
        assert_eq!(matrix.get(3, 1), 46.5);
    }

    #[test]
    fn single_and_empty_inputs() {
        let matrix = build_distance_matrix(&[], &EmdUnifrac);
        assert_eq!(matrix.size(), 0);

        let matrix = build_distance_matrix(&[profile_with_root(3.0)], &EmdUnifrac);
        assert_eq!(matrix.row(0), &[0.0]);
    }

    #[test]
    fn csv_uses_numpy_style_scientific_notation() {
        assert_eq!(format_scientific(0.0), "0.000000000000000000e+00");
        assert_eq!(format_scientific(1.5), "1.500000000000000000e+00");
        assert_eq!(format_scientific(0.25), "2.500000000000000000e-01");
        assert_eq!(format_scientific(1234.0), "1.234000000000000000e+03");

        let mut matrix = DistanceMatrix::zeros(2);
        matrix.set_symmetric(0, 1, 2.0);
        let mut buf = Vec::new();
        matrix.write_csv(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "0.000000000000000000e+00,2.000000000000000000e+00\n\
             2.000000000000000000e+00,0.000000000000000000e+00\n"
        );
    }
}
