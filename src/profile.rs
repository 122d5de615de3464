//src/profile.rs

use ahash::AHashMap;
use flate2::read::MultiGzDecoder;
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::ProfileError;
use crate::types::{ColumnLayout, ParentMap, ResolvedColumns, TaxonomicNode};

/// Abundances at or below this are treated as zero when writing.
pub const EPSILON: f64 = 1e-16;

/// Header line prepended by [`TaxonomicProfile::merge`].
pub const MERGED_HEADER: &str = "# This is a merged file, ignore files in headers below";

/// One sample's taxonomic profile (CAMI format).
///
/// ```text
/// @SampleID:sample_0
/// @@TAXID	RANK	TAXPATH	TAXPATHSN	PERCENTAGE
/// 2	superkingdom	2	Bacteria	98.8
/// 1239	phylum	2|1239	Bacteria|Firmicutes	61.2
/// ```
#[derive(Debug, Clone)]
pub struct TaxonomicProfile {
    pub input_file_name: Option<PathBuf>,
    header: Vec<String>,
    nodes: AHashMap<String, TaxonomicNode>,
    parents: ParentMap,
    layout: ColumnLayout,
    epsilon: f64,
}

impl TaxonomicProfile {
    /// An empty profile with no declared columns.
    pub fn new() -> Self {
        Self {
            input_file_name: None,
            header: Vec::new(),
            nodes: AHashMap::new(),
            parents: ParentMap::new(),
            layout: ColumnLayout::default(),
            epsilon: EPSILON,
        }
    }

    /// Parse a profile from disk. Files ending in `.gz` are decompressed on the fly.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| ProfileError::io(path, e))?;

        let is_gz = path
            .extension()
            .map(|ext| ext == "gz")
            .unwrap_or(false);

        let reader: Box<dyn BufRead> = if is_gz {
            Box::new(BufReader::new(MultiGzDecoder::new(f)))
        } else {
            Box::new(BufReader::new(f))
        };

        let mut profile = Self::from_reader(reader).map_err(|e| match e {
            ProfileError::Io { path: None, source } => ProfileError::io(path, source),
            other => other,
        })?;
        profile.input_file_name = Some(path.to_path_buf());
        debug!(
            "Parsed {} taxa (max depth {}) from {}",
            profile.len(),
            profile.max_depth(),
            path.display()
        );
        Ok(profile)
    }

    /// Parse a profile from any line source.
    ///
    /// Blank lines are skipped, `@`/`#` lines are kept verbatim as header and `@@` lines
    /// additionally declare the column positions used by every following data line.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ProfileError> {
        let mut profile = Self::new();
        let mut layout = ColumnLayout::default();

        for (idx, line_result) in reader.lines().enumerate() {
            let line_number = idx + 1;
            let line = line_result?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if line.starts_with("@@") {
                layout = layout.with_declaration(line);
            }
            if line.starts_with('@') || line.starts_with('#') {
                profile.header.push(line.to_string());
                continue;
            }

            let columns = layout.resolve()?;
            let (tax_id, node) = decode_line(line, &columns, line_number)?;
            profile.insert_or_accumulate(tax_id, node);
        }

        profile.layout = layout;
        Ok(profile)
    }

    /// Add a node, or only its abundance if the taxid is already known.
    /// Path, names and rank of the first occurrence win.
    fn insert_or_accumulate(&mut self, tax_id: String, node: TaxonomicNode) {
        if let Some(existing) = self.nodes.get_mut(&tax_id) {
            existing.abundance += node.abundance;
            return;
        }
        if let Some(parent) = node.parent_id() {
            self.parents.insert(tax_id.clone(), parent.to_string());
        }
        self.nodes.insert(tax_id, node);
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn nodes(&self) -> &AHashMap<String, TaxonomicNode> {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut AHashMap<String, TaxonomicNode> {
        &mut self.nodes
    }

    pub fn node(&self, tax_id: &str) -> Option<&TaxonomicNode> {
        self.nodes.get(tax_id)
    }

    pub fn parents(&self) -> &ParentMap {
        &self.parents
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.values().map(TaxonomicNode::depth).max().unwrap_or(0)
    }

    /// Sum of the abundances of root-level taxa.
    pub fn total_root_abundance(&self) -> f64 {
        self.nodes
            .values()
            .filter(|node| node.depth() == 1)
            .map(|node| node.abundance)
            .sum()
    }

    /// Zero every abundance strictly below `threshold`. Structure is left alone and
    /// nothing is renormalized.
    pub fn threshold(&mut self, threshold: f64) {
        let mut zeroed = 0usize;
        for node in self.nodes.values_mut() {
            if node.abundance < threshold {
                node.abundance = 0.0;
                zeroed += 1;
            }
        }
        debug!("Threshold {} zeroed {} of {} taxa", threshold, zeroed, self.nodes.len());
    }

    /// Fold `other` into this profile.
    ///
    /// Shared taxids add their abundances and keep this profile's path, names and rank;
    /// taxids only in `other` are copied over. Taxonomic consistency between the two
    /// profiles is not checked.
    pub fn merge(&mut self, other: &TaxonomicProfile) {
        self.header.insert(0, MERGED_HEADER.to_string());
        for (tax_id, other_node) in &other.nodes {
            self.insert_or_accumulate(tax_id.clone(), other_node.clone());
        }
    }

    /// Write the profile, root-level taxa first and deepest last, so the output re-parses
    /// with every ancestor ahead of its descendants. Taxa at or below epsilon are dropped.
    pub fn write_to<W: Write>(&self, mut out: W) -> Result<(), ProfileError> {
        let canonical = self.layout.is_canonical();
        for head in &self.header {
            if head.starts_with("@@") && !canonical {
                writeln!(out, "{}", self.layout.declaration())?;
            } else {
                writeln!(out, "{}", head)?;
            }
        }

        let mut entries: Vec<(&String, &TaxonomicNode)> = self.nodes.iter().collect();
        entries.sort_by(|(key_a, a), (key_b, b)| {
            a.depth().cmp(&b.depth()).then_with(|| key_a.cmp(key_b))
        });

        for (key, node) in entries {
            if node.abundance <= self.epsilon {
                continue;
            }
            write!(out, "{}\t", key)?;
            if self.layout.rank.is_some() {
                write!(out, "{}\t", node.rank.as_deref().unwrap_or(""))?;
            }
            write!(out, "{}\t", node.tax_path.join("|"))?;
            if self.layout.tax_path_names.is_some() {
                let names = node
                    .tax_path_names
                    .as_ref()
                    .map(|names| names.join("|"))
                    .unwrap_or_default();
                write!(out, "{}\t", names)?;
            }
            writeln!(out, "{:.6}", node.abundance)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ProfileError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| ProfileError::io(path, e))?;
        self.write_to(BufWriter::new(file)).map_err(|e| match e {
            ProfileError::Io { path: None, source } => ProfileError::io(path, source),
            other => other,
        })
    }
}

impl Default for TaxonomicProfile {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one tab separated data line with the resolved column positions.
fn decode_line(
    line: &str,
    columns: &ResolvedColumns,
    line_number: usize,
) -> Result<(String, TaxonomicNode), ProfileError> {
    let fields: Vec<&str> = line.split('\t').collect();

    let tax_id = mandatory_field(&fields, columns.tax_id, "TAXID", line_number)?.to_string();
    let tax_path: Vec<String> = mandatory_field(&fields, columns.tax_path, "TAXPATH", line_number)?
        .split('|')
        .map(str::to_string)
        .collect();
    let raw_abundance = mandatory_field(&fields, columns.abundance, "PERCENTAGE", line_number)?;
    let abundance: f64 = raw_abundance
        .parse()
        .map_err(|_| ProfileError::InvalidAbundance {
            line_number,
            value: raw_abundance.to_string(),
        })?;

    let rank = optional_field(&fields, columns.rank).map(str::to_string);
    let tax_path_names = optional_field(&fields, columns.tax_path_names)
        .map(|names| names.split('|').map(str::to_string).collect());

    Ok((
        tax_id,
        TaxonomicNode {
            abundance,
            tax_path,
            tax_path_names,
            rank,
        },
    ))
}

fn mandatory_field<'a>(
    fields: &[&'a str],
    pos: usize,
    name: &str,
    line_number: usize,
) -> Result<&'a str, ProfileError> {
    fields
        .get(pos)
        .map(|f| f.trim())
        .ok_or_else(|| ProfileError::MalformedLine {
            line_number,
            reason: format!("missing {} column (index {})", name, pos),
        })
}

// A trailing optional column can vanish once the line is right-trimmed.
fn optional_field<'a>(fields: &[&'a str], pos: Option<usize>) -> Option<&'a str> {
    pos.map(|p| fields.get(p).map(|f| f.trim()).unwrap_or(""))
}
