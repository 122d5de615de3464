//src/emd_unifrac.rs

use ahash::AHashMap;
use log::debug;
use std::collections::BTreeMap;

use crate::profile::TaxonomicProfile;

/// A dissimilarity between two profiles that share a taxonomy.
///
/// Implementations must be symmetric and return 0 for profiles that are identical once
/// normalized. The distance matrix relies on both without checking them.
pub trait ProfileDistance: Sync {
    fn eval(&self, a: &TaxonomicProfile, b: &TaxonomicProfile) -> f64;
}

/// Earth mover's distance over the taxonomy spelled out by the profiles' `TAXPATH`s.
///
/// Every edge has unit length and an implicit root sits above all root-level taxa, so
/// moving mass between two superkingdoms costs 2. Profiles are compared on their
/// normalized exclusive masses; a profile without mass counts as empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmdUnifrac;

impl ProfileDistance for EmdUnifrac {
    fn eval(&self, a: &TaxonomicProfile, b: &TaxonomicProfile) -> f64 {
        let tree = UnionTree::from_profiles(&[a, b]);
        let mut diff: AHashMap<String, f64> = AHashMap::with_capacity(tree.len());

        for (profile, sign) in [(a, 1.0), (b, -1.0)] {
            let fractions = profile.exclusive_fractions().unwrap_or_else(|e| {
                debug!("EMDUnifrac treats profile as empty: {}", e);
                AHashMap::new()
            });
            for (tax_id, mass) in fractions {
                *diff.entry(tax_id).or_insert(0.0) += sign * mass;
            }
        }

        let mut distance = 0.0;
        for taxa in tree.levels.values().rev() {
            for tax_id in taxa {
                let moved = diff.get(tax_id).copied().unwrap_or(0.0);
                distance += moved.abs();
                if let Some(parent) = tree.parents.get(tax_id) {
                    *diff.entry(parent.clone()).or_insert(0.0) += moved;
                }
            }
        }
        distance
    }
}

/// The taxonomy covered by a set of profiles, including path ancestors that carry no
/// row of their own.
///
/// When paths disagree about a taxid's parent, the shallowest placement wins, ties going
/// to the smallest parent taxid, so the tree does not depend on the order of the
/// profiles. Along the chosen parents the path depth strictly decreases, so there are
/// no cycles.
struct UnionTree {
    parents: AHashMap<String, String>,
    levels: BTreeMap<usize, Vec<String>>,
}

impl UnionTree {
    fn from_profiles(profiles: &[&TaxonomicProfile]) -> Self {
        let mut placements: AHashMap<String, (usize, Option<String>)> = AHashMap::new();

        for profile in profiles {
            let mut tax_ids: Vec<&String> = profile.nodes().keys().collect();
            tax_ids.sort();
            for tax_id in tax_ids {
                let Some(node) = profile.node(tax_id) else {
                    continue;
                };
                let ancestors = &node.tax_path[..node.tax_path.len().saturating_sub(1)];
                let chain = ancestors.iter().chain(std::iter::once(tax_id));
                let mut parent: Option<&String> = None;
                for (idx, taxon) in chain.enumerate() {
                    let candidate = (idx + 1, parent.cloned());
                    match placements.get_mut(taxon) {
                        Some(current) if candidate < *current => *current = candidate,
                        Some(_) => {}
                        None => {
                            placements.insert(taxon.clone(), candidate);
                        }
                    }
                    parent = Some(taxon);
                }
            }
        }

        let parents: AHashMap<String, String> = placements
            .iter()
            .filter_map(|(taxon, (_, parent))| parent.clone().map(|p| (taxon.clone(), p)))
            .collect();

        let mut depths: AHashMap<String, usize> = AHashMap::with_capacity(placements.len());
        for taxon in placements.keys() {
            resolve_depth(taxon, &parents, &mut depths);
        }

        let mut levels: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (taxon, depth) in depths {
            levels.entry(depth).or_default().push(taxon);
        }
        for taxa in levels.values_mut() {
            taxa.sort();
        }
        Self { parents, levels }
    }

    fn len(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }
}

/// Depth of `taxon` along the chosen parents, memoized in `depths`.
fn resolve_depth(
    taxon: &str,
    parents: &AHashMap<String, String>,
    depths: &mut AHashMap<String, usize>,
) {
    let mut unresolved: Vec<&str> = Vec::new();
    let mut current = taxon;
    let mut base = 0;
    loop {
        if let Some(&depth) = depths.get(current) {
            base = depth;
            break;
        }
        unresolved.push(current);
        match parents.get(current) {
            Some(parent) => current = parent.as_str(),
            None => break,
        }
    }
    for (offset, taxon) in unresolved.iter().rev().enumerate() {
        depths.insert(taxon.to_string(), base + offset + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(rows: &str) -> TaxonomicProfile {
        let text = format!("@@TAXID\tTAXPATH\tPERCENTAGE\n{}", rows);
        TaxonomicProfile::from_reader(Cursor::new(text)).unwrap()
    }

    #[test]
    fn identical_profiles_are_at_distance_zero() {
        let a = parse("1\t1\t50\n2\t1|2\t30\n3\t1|3\t20\n");
        let b = a.clone();
        assert!(EmdUnifrac.eval(&a, &b).abs() < 1e-12);
    }

    #[test]
    fn sibling_move_costs_two_edges() {
        let a = parse("1\t1\t100\n2\t1|2\t100\n");
        let b = parse("1\t1\t100\n3\t1|3\t100\n");
        assert!((EmdUnifrac.eval(&a, &b) - 2.0).abs() < 1e-12);
        assert!((EmdUnifrac.eval(&b, &a) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn nested_clades_use_exclusive_masses() {
        let a = parse("1\t1\t100\n2\t1|2\t100\n3\t1|2|3\t50\n");
        let b = parse("1\t1\t100\n2\t1|2\t100\n");
        // half of a sits on 3, one edge below where b keeps it
        assert!((EmdUnifrac.eval(&a, &b) - 0.5).abs() < 1e-12);
        assert!((EmdUnifrac.eval(&b, &a) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn moving_across_roots_passes_the_implicit_root() {
        let a = parse("1\t1\t10\n2\t1|2\t10\n");
        let b = parse("6\t6\t40\n");
        assert!((EmdUnifrac.eval(&a, &b) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn path_ancestors_without_rows_are_part_of_the_tree() {
        // taxon 2 only appears inside paths
        let a = parse("3\t1|2|3\t5\n");
        let b = parse("4\t1|2|4\t5\n");
        assert!((EmdUnifrac.eval(&a, &b) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn conflicting_paths_resolve_the_same_way_in_both_directions() {
        // taxon 3 sits under 2 in a but directly under 1 in b
        let a = parse("1\t1\t10\n2\t1|2\t10\n3\t1|2|3\t10\n");
        let b = parse("1\t1\t20\n3\t1|3\t10\n4\t1|4\t10\n");

        let forward = UnionTree::from_profiles(&[&a, &b]);
        let backward = UnionTree::from_profiles(&[&b, &a]);
        assert_eq!(forward.parents.get("3").map(String::as_str), Some("1"));
        let sorted = |tree: &UnionTree| -> BTreeMap<String, String> {
            tree.parents.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        assert_eq!(sorted(&forward), sorted(&backward));
        assert_eq!(forward.levels, backward.levels);

        let ab = EmdUnifrac.eval(&a, &b);
        let ba = EmdUnifrac.eval(&b, &a);
        assert_eq!(ab, ba);
        // a = {3: 1.0}, b = {3: 0.5, 4: 0.5}: 0.5 moves from 3 to 4 through 1
        assert!((ab - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_profile_is_compared_as_no_mass() {
        let a = parse("1\t1\t100\n");
        let b = TaxonomicProfile::new();
        assert!((EmdUnifrac.eval(&a, &b) - 1.0).abs() < 1e-12);
    }
}
