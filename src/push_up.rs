//src/push_up.rs

use ahash::AHashMap;
use log::{debug, warn};
use std::collections::BTreeMap;

use crate::error::ProfileError;
use crate::profile::TaxonomicProfile;

/// Direction of a push-up pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushUp {
    /// Each child's cumulative mass is removed from its parent.
    Subtract,
    /// Each child's clade mass is added into its parent.
    Add,
}

/// What to do with a child whose parent taxid is not in the profile.
///
/// Profiles are not checked for taxonomic consistency, so a missing ancestor is normal
/// input. The default drops the child's contribution to the ancestors and leaves the
/// child itself untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingAncestorPolicy {
    #[default]
    DropSilently,
    /// Refuse to aggregate, reporting the first orphaned taxon.
    Strict,
}

/// `(child, parent)` pairs grouped by the child's depth, for depths >= 2.
#[derive(Debug, Default)]
pub struct DepthLevels {
    levels: BTreeMap<usize, Vec<(String, String)>>,
}

impl DepthLevels {
    pub fn from_profile(profile: &TaxonomicProfile) -> Self {
        let mut levels: BTreeMap<usize, Vec<(String, String)>> = BTreeMap::new();
        for (child, parent) in profile.parents() {
            if let Some(node) = profile.node(child) {
                levels
                    .entry(node.depth())
                    .or_default()
                    .push((child.clone(), parent.clone()));
            }
        }
        // Fixed order inside a level keeps floating point sums reproducible.
        for pairs in levels.values_mut() {
            pairs.sort();
        }
        Self { levels }
    }

    /// The first `(child, parent)` pair whose parent is absent from `masses`.
    fn first_orphan(&self, masses: &AHashMap<String, f64>) -> Option<&(String, String)> {
        self.levels
            .values()
            .flatten()
            .find(|(_, parent)| !masses.contains_key(parent))
    }
}

/// Run one push-up pass over `masses`, deepest level first. Returns how many children
/// had no parent to push into.
///
/// `Subtract` removes each child's original cumulative mass, read from a snapshot taken
/// before the pass. `Add` pushes each child's current mass, which the deeper levels have
/// already restored to its clade total. Updates inside a level are applied one after the
/// other.
pub fn push_up(
    masses: &mut AHashMap<String, f64>,
    levels: &DepthLevels,
    operation: PushUp,
) -> usize {
    let original = match operation {
        PushUp::Subtract => Some(masses.clone()),
        PushUp::Add => None,
    };

    let mut dropped = 0;
    for pairs in levels.levels.values().rev() {
        for (child, parent) in pairs {
            let child_mass = match &original {
                Some(snapshot) => snapshot.get(child),
                None => masses.get(child),
            }
            .copied()
            .unwrap_or(0.0);
            match masses.get_mut(parent) {
                Some(parent_mass) => match operation {
                    PushUp::Subtract => *parent_mass -= child_mass,
                    PushUp::Add => *parent_mass += child_mass,
                },
                None => dropped += 1,
            }
        }
    }
    dropped
}

impl TaxonomicProfile {
    fn abundances(&self) -> AHashMap<String, f64> {
        self.nodes()
            .iter()
            .map(|(tax_id, node)| (tax_id.clone(), node.abundance))
            .collect()
    }

    /// Subtract pass and normalization on a copy of the abundances: each taxon's own
    /// share of the total mass, descendants excluded.
    fn normalized_exclusive(
        &self,
        levels: &DepthLevels,
        policy: MissingAncestorPolicy,
    ) -> Result<AHashMap<String, f64>, ProfileError> {
        let mut masses = self.abundances();

        if policy == MissingAncestorPolicy::Strict {
            if let Some((child, parent)) = levels.first_orphan(&masses) {
                return Err(ProfileError::MissingAncestor {
                    tax_id: child.clone(),
                    parent: parent.clone(),
                });
            }
        }

        let dropped = push_up(&mut masses, levels, PushUp::Subtract);
        if dropped > 0 {
            warn!(
                "{} taxa reference a parent missing from the profile; their mass is not pushed up",
                dropped
            );
        }

        let total: f64 = masses.values().sum();
        if total == 0.0 || !total.is_finite() {
            return Err(ProfileError::ZeroMass);
        }
        for mass in masses.values_mut() {
            *mass /= total;
        }
        Ok(masses)
    }

    /// Each taxon's normalized exclusive mass. The profile itself is not modified.
    pub fn exclusive_fractions(&self) -> Result<AHashMap<String, f64>, ProfileError> {
        let levels = DepthLevels::from_profile(self);
        self.normalized_exclusive(&levels, MissingAncestorPolicy::DropSilently)
    }

    /// Rescale the cumulative abundances so the whole tree carries a total mass of 1.
    ///
    /// Subtract pass, divide by the total exclusive mass, add pass; both passes run
    /// deepest level first. Afterwards every taxon again holds its clade's mass and the
    /// root-level taxa sum to 1, unless some mass was dropped at a missing ancestor.
    pub fn normalize(&mut self) -> Result<(), ProfileError> {
        self.normalize_with(MissingAncestorPolicy::DropSilently)
    }

    /// [`normalize`](Self::normalize) with an explicit missing-ancestor policy. On error
    /// the profile is left unchanged.
    pub fn normalize_with(&mut self, policy: MissingAncestorPolicy) -> Result<(), ProfileError> {
        let levels = DepthLevels::from_profile(self);
        let mut masses = self.normalized_exclusive(&levels, policy)?;
        push_up(&mut masses, &levels, PushUp::Add);

        for (tax_id, node) in self.nodes_mut().iter_mut() {
            if let Some(&mass) = masses.get(tax_id) {
                node.abundance = mass;
            }
        }
        debug!("Normalized {} taxa, root mass {}", self.len(), self.total_root_abundance());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SMALL: &str = "@@TAXID\tRANK\tTAXPATH\tTAXPATHSN\tPERCENTAGE\n\
        1\tsuperkingdom\t1\tBacteria\t50.0\n\
        2\tphylum\t1|2\tBacteria|Firmicutes\t30.0\n\
        3\tphylum\t1|3\tBacteria|Proteobacteria\t20.0\n";

    fn parse(text: &str) -> TaxonomicProfile {
        TaxonomicProfile::from_reader(Cursor::new(text)).unwrap()
    }

    fn abundance(profile: &TaxonomicProfile, tax_id: &str) -> f64 {
        profile.node(tax_id).unwrap().abundance
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {} got {}",
            expected,
            actual
        );
    }

    #[test]
    fn normalize_small_profile() {
        let mut profile = parse(SMALL);
        profile.normalize().unwrap();
        assert_close(abundance(&profile, "1"), 1.0);
        assert_close(abundance(&profile, "2"), 0.6);
        assert_close(abundance(&profile, "3"), 0.4);
    }

    #[test]
    fn threshold_before_normalize() {
        let mut profile = parse(SMALL);
        profile.threshold(25.0);
        profile.normalize().unwrap();
        // exclusive masses 20, 30, 0 out of 50
        assert_close(abundance(&profile, "1"), 1.0);
        assert_close(abundance(&profile, "2"), 0.6);
        assert_close(abundance(&profile, "3"), 0.0);
    }

    #[test]
    fn normalize_conserves_mass_across_deeper_trees() {
        let mut profile = parse(
            "@@TAXID\tTAXPATH\tPERCENTAGE\n\
             1\t1\t100\n\
             6\t6\t20\n\
             2\t1|2\t60\n\
             5\t1|5\t30\n\
             3\t1|2|3\t40\n\
             4\t1|2|4\t10\n",
        );
        profile.normalize().unwrap();

        assert_close(profile.total_root_abundance(), 1.0);
        assert_close(abundance(&profile, "3"), 1.0 / 3.0);
        assert_close(abundance(&profile, "4"), 1.0 / 12.0);
        assert_close(abundance(&profile, "2"), 0.5);
        assert_close(abundance(&profile, "5"), 0.25);
        assert_close(abundance(&profile, "1"), 5.0 / 6.0);
        assert_close(abundance(&profile, "6"), 1.0 / 6.0);
    }

    #[test]
    fn three_level_chain_keeps_total_mass() {
        let mut profile = parse(
            "@@TAXID\tTAXPATH\tPERCENTAGE\n\
             1\t1\t100\n\
             2\t1|2\t60\n\
             3\t1|2|3\t40\n",
        );
        let fractions = profile.exclusive_fractions().unwrap();
        assert_close(fractions["1"], 0.4);
        assert_close(fractions["2"], 0.2);
        assert_close(fractions["3"], 0.4);

        profile.normalize().unwrap();
        assert_close(abundance(&profile, "1"), 1.0);
        assert_close(abundance(&profile, "2"), 0.6);
        assert_close(abundance(&profile, "3"), 0.4);
        assert_close(profile.total_root_abundance(), 1.0);
    }

    #[test]
    fn missing_ancestor_drops_mass_silently() {
        let text = "@@TAXID\tTAXPATH\tPERCENTAGE\n\
            1\t1\t50\n\
            3\t1|2|3\t20\n\
            4\t1|4\t10\n";
        let mut profile = parse(text);
        profile.normalize().unwrap();

        assert_close(abundance(&profile, "3"), 2.0 / 7.0);
        assert_close(abundance(&profile, "4"), 1.0 / 7.0);
        assert_close(abundance(&profile, "1"), 5.0 / 7.0);
        assert_close(profile.total_root_abundance(), 5.0 / 7.0);
    }

    #[test]
    fn strict_policy_reports_missing_ancestor_without_mutating() {
        let text = "@@TAXID\tTAXPATH\tPERCENTAGE\n\
            1\t1\t50\n\
            3\t1|2|3\t20\n";
        let mut profile = parse(text);
        match profile.normalize_with(MissingAncestorPolicy::Strict) {
            Err(ProfileError::MissingAncestor { tax_id, parent }) => {
                assert_eq!(tax_id, "3");
                assert_eq!(parent, "2");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(abundance(&profile, "1"), 50.0);
        assert_eq!(abundance(&profile, "3"), 20.0);
    }

    #[test]
    fn zero_mass_is_an_error_and_leaves_profile_alone() {
        let mut profile = parse(SMALL);
        profile.threshold(100.0);
        assert!(matches!(profile.normalize(), Err(ProfileError::ZeroMass)));
        assert_eq!(abundance(&profile, "1"), 0.0);

        let mut empty = TaxonomicProfile::new();
        assert!(matches!(empty.normalize(), Err(ProfileError::ZeroMass)));
    }

    #[test]
    fn exclusive_fractions_do_not_touch_the_profile() {
        let profile = parse(SMALL);
        let fractions = profile.exclusive_fractions().unwrap();
        assert_close(fractions["1"], 0.0);
        assert_close(fractions["2"], 0.6);
        assert_close(fractions["3"], 0.4);
        assert_eq!(abundance(&profile, "1"), 50.0);
    }

    #[test]
    fn subtract_then_add_restores_cumulative_values() {
        let profile = parse(SMALL);
        let levels = DepthLevels::from_profile(&profile);
        let mut masses = profile.abundances();

        assert_eq!(push_up(&mut masses, &levels, PushUp::Subtract), 0);
        assert_close(masses["1"], 0.0);
        assert_eq!(push_up(&mut masses, &levels, PushUp::Add), 0);
        assert_close(masses["1"], 50.0);
        assert_close(masses["2"], 30.0);
    }
}
