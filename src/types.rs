//src/types.rs

use ahash::AHashMap;
use crate::error::ProfileError;

/// A parent map: taxon -> parent taxon, derived from the second to last entry of each `TAXPATH`.
pub type ParentMap = AHashMap<String, String>;

pub const TAXID: &str = "TAXID";
pub const RANK: &str = "RANK";
pub const TAXPATH: &str = "TAXPATH";
pub const TAXPATHSN: &str = "TAXPATHSN";
pub const PERCENTAGE: &str = "PERCENTAGE";

/// One row of a profile, keyed by its taxid in the owning profile.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomicNode {
    /// Clade abundance. Cumulative (includes descendants) except mid-way through a push-up.
    pub abundance: f64,
    /// Ancestor taxids from the root down to this node, inclusive.
    pub tax_path: Vec<String>,
    /// Human readable names parallel to `tax_path`, if the profile declares `TAXPATHSN`.
    pub tax_path_names: Option<Vec<String>>,
    pub rank: Option<String>,
}

impl TaxonomicNode {
    /// Depth in the taxonomy, 1 for a root-level taxon.
    pub fn depth(&self) -> usize {
        self.tax_path.len()
    }

    /// The immediate parent taxid, `None` at the root level.
    pub fn parent_id(&self) -> Option<&str> {
        let depth = self.depth();
        if depth >= 2 {
            Some(self.tax_path[depth - 2].as_str())
        } else {
            None
        }
    }
}

/// Column positions as declared by the `@@` line(s) of a profile.
///
/// Positions are indexes among the whitespace separated tokens of the declaration line.
/// The value is never mutated: a further declaration line yields a new layout in which
/// only the tokens it names are overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnLayout {
    pub tax_id: Option<usize>,
    pub rank: Option<usize>,
    pub tax_path: Option<usize>,
    pub tax_path_names: Option<usize>,
    pub abundance: Option<usize>,
}

/// Column positions with the mandatory ones guaranteed present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub tax_id: usize,
    pub tax_path: usize,
    pub abundance: usize,
    pub rank: Option<usize>,
    pub tax_path_names: Option<usize>,
}

impl ColumnLayout {
    /// Apply a `@@` declaration line on top of this layout. Unknown tokens are ignored.
    pub fn with_declaration(self, line: &str) -> Self {
        let mut layout = self;
        for (pos, token) in line.split_whitespace().enumerate() {
            match token.replace('@', "").as_str() {
                TAXID => layout.tax_id = Some(pos),
                RANK => layout.rank = Some(pos),
                TAXPATH => layout.tax_path = Some(pos),
                TAXPATHSN => layout.tax_path_names = Some(pos),
                PERCENTAGE => layout.abundance = Some(pos),
                _ => {}
            }
        }
        layout
    }

    /// Check that `TAXID`, `TAXPATH` and `PERCENTAGE` were all declared.
    pub fn resolve(&self) -> Result<ResolvedColumns, ProfileError> {
        match (self.tax_id, self.tax_path, self.abundance) {
            (Some(tax_id), Some(tax_path), Some(abundance)) => Ok(ResolvedColumns {
                tax_id,
                tax_path,
                abundance,
                rank: self.rank,
                tax_path_names: self.tax_path_names,
            }),
            _ => {
                let mut missing = Vec::new();
                if self.tax_id.is_none() {
                    missing.push(TAXID);
                }
                if self.tax_path.is_none() {
                    missing.push(TAXPATH);
                }
                if self.abundance.is_none() {
                    missing.push(PERCENTAGE);
                }
                Err(ProfileError::MissingColumns { missing })
            }
        }
    }

    /// Column names in the order profiles are written out.
    pub fn output_columns(&self) -> Vec<&'static str> {
        let mut cols = vec![TAXID];
        if self.rank.is_some() {
            cols.push(RANK);
        }
        cols.push(TAXPATH);
        if self.tax_path_names.is_some() {
            cols.push(TAXPATHSN);
        }
        cols.push(PERCENTAGE);
        cols
    }

    /// The declaration line matching the written column order.
    pub fn declaration(&self) -> String {
        format!("@@{}", self.output_columns().join("\t"))
    }

    /// True when the declared positions already match the written column order.
    pub fn is_canonical(&self) -> bool {
        let declared = [
            (TAXID, self.tax_id),
            (RANK, self.rank),
            (TAXPATH, self.tax_path),
            (TAXPATHSN, self.tax_path_names),
            (PERCENTAGE, self.abundance),
        ];
        self.output_columns()
            .iter()
            .enumerate()
            .all(|(pos, name)| {
                declared.iter().any(|(declared_name, declared_pos)| {
                    declared_name == name && *declared_pos == Some(pos)
                })
            })
    }
}
