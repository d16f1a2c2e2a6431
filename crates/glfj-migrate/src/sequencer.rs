//! Ordering of kinds and of groups within a run.

use std::collections::{BTreeSet, HashSet};

use crate::types::{EntityKind, SourceGroup};

/// How a kind takes part in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindPlan {
    /// Read, upsert and report every entity.
    Migrate,
    /// Not selected, but a selected kind needs its target refs: existence
    /// checks only, no creates.
    Hydrate,
}

/// A group scheduled for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGroup {
    pub group: SourceGroup,
    /// Attached to the group's record.
    pub warning: Option<String>,
    /// When set, the group is reported as skipped with this reason.
    pub skip: Option<String>,
}

/// Decides what runs and in which order.
#[derive(Debug, Clone)]
pub struct DependencySequencer {
    selected: BTreeSet<EntityKind>,
}

impl DependencySequencer {
    /// Create a sequencer for the selected kinds.
    pub fn new(selected: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            selected: selected.into_iter().collect(),
        }
    }

    /// Kinds to process, in migration order.
    pub fn plan(&self) -> Vec<(EntityKind, KindPlan)> {
        let mut needed: HashSet<EntityKind> = HashSet::new();
        let mut frontier: Vec<EntityKind> = self.selected.iter().copied().collect();
        while let Some(kind) = frontier.pop() {
            for dep in kind.depends_on() {
                if needed.insert(*dep) {
                    frontier.push(*dep);
                }
            }
        }

        EntityKind::ALL
            .into_iter()
            .filter_map(|kind| {
                if self.selected.contains(&kind) {
                    Some((kind, KindPlan::Migrate))
                } else if needed.contains(&kind) {
                    Some((kind, KindPlan::Hydrate))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Order groups parent-before-child.
    ///
    /// Groups are sorted by path depth, then lexically by full path. A
    /// group whose parent is not in the listing is an orphan: it becomes a
    /// top-level group with a warning, or is skipped when the listing was
    /// cut short and the parent may simply not have been read.
    pub fn order_groups(
        &self,
        mut groups: Vec<SourceGroup>,
        listing_complete: bool,
    ) -> Vec<PlannedGroup> {
        groups.sort_by(|a, b| {
            a.depth()
                .cmp(&b.depth())
                .then_with(|| a.full_path.cmp(&b.full_path))
        });
        groups.dedup_by(|a, b| a.full_path == b.full_path);

        let known: HashSet<String> = groups.iter().map(|g| g.full_path.clone()).collect();
        let mut skipped: HashSet<String> = HashSet::new();

        groups
            .into_iter()
            .map(|mut group| {
                let mut warning = None;
                let mut skip = None;

                if let Some(parent) = group.parent_path.clone() {
                    if skipped.contains(&parent) {
                        skip = Some(format!("parent group '{parent}' was skipped"));
                    } else if !known.contains(&parent) {
                        if listing_complete {
                            group.parent_path = None;
                            warning = Some(format!(
                                "parent group '{parent}' not found in source; migrated as top-level"
                            ));
                        } else {
                            skip = Some(format!(
                                "parent group '{parent}' not read (group listing incomplete)"
                            ));
                        }
                    }
                }

                if skip.is_some() {
                    skipped.insert(group.full_path.clone());
                }
                PlannedGroup {
                    group,
                    warning,
                    skip,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Visibility;
    use proptest::prelude::*;

    fn group(full_path: &str) -> SourceGroup {
        SourceGroup {
            id: 0,
            full_path: full_path.to_string(),
            name: full_path.rsplit('/').next().unwrap_or_default().to_string(),
            description: None,
            visibility: Visibility::Public,
            parent_path: full_path.rsplit_once('/').map(|(p, _)| p.to_string()),
            members: Vec::new(),
        }
    }

    fn paths(planned: &[PlannedGroup]) -> Vec<&str> {
        planned.iter().map(|p| p.group.full_path.as_str()).collect()
    }

    #[test]
    fn test_plan_hydrates_dependencies() {
        let plan = DependencySequencer::new([EntityKind::Wiki]).plan();
        assert_eq!(
            plan,
            vec![
                (EntityKind::User, KindPlan::Hydrate),
                (EntityKind::Group, KindPlan::Hydrate),
                (EntityKind::Project, KindPlan::Hydrate),
                (EntityKind::Wiki, KindPlan::Migrate),
            ]
        );
    }

    #[test]
    fn test_plan_users_only() {
        let plan = DependencySequencer::new([EntityKind::User]).plan();
        assert_eq!(plan, vec![(EntityKind::User, KindPlan::Migrate)]);
        assert!(DependencySequencer::new([]).plan().is_empty());
    }

    #[test]
    fn test_order_groups_by_depth_then_path() {
        let sequencer = DependencySequencer::new([EntityKind::Group]);
        let planned = sequencer.order_groups(
            vec![
                group("eng/backend/api"),
                group("ops"),
                group("eng/backend"),
                group("eng"),
                group("eng/alpha"),
            ],
            true,
        );

        assert_eq!(
            paths(&planned),
            vec!["eng", "ops", "eng/alpha", "eng/backend", "eng/backend/api"]
        );
        assert!(planned.iter().all(|p| p.warning.is_none() && p.skip.is_none()));
    }

    #[test]
    fn test_orphan_group_becomes_top_level() {
        let sequencer = DependencySequencer::new([EntityKind::Group]);
        let planned = sequencer.order_groups(vec![group("gone/child")], true);

        assert_eq!(planned[0].group.parent_path, None);
        assert!(planned[0].warning.as_deref().unwrap().contains("gone"));
        assert!(planned[0].skip.is_none());
    }

    #[test]
    fn test_orphan_in_incomplete_listing_is_skipped_with_children() {
        let sequencer = DependencySequencer::new([EntityKind::Group]);
        let planned =
            sequencer.order_groups(vec![group("gone/child"), group("gone/child/leaf")], false);

        assert!(planned.iter().all(|p| p.skip.is_some()));
    }

    fn group_tree() -> impl Strategy<Value = Vec<String>> {
        // Build paths by picking a parent among already generated ones.
        prop::collection::vec((any::<prop::sample::Index>(), "[a-z]{1,4}"), 1..40).prop_map(
            |steps| {
                let mut paths: Vec<String> = Vec::new();
                for (index, segment) in steps {
                    let candidates: Vec<&String> =
                        paths.iter().filter(|p| p.split('/').count() < 5).collect();
                    let path = if candidates.is_empty() || segment.len() == 1 {
                        segment
                    } else {
                        format!("{}/{segment}", index.get(&candidates))
                    };
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
                paths
            },
        )
    }

    proptest! {
        #[test]
        fn prop_parent_always_precedes_child(mut tree in group_tree(), seed in any::<u64>()) {
            // Shuffle deterministically so input order carries no information.
            tree.sort_by_key(|p| p.len() as u64 ^ seed);
            let sequencer = DependencySequencer::new([EntityKind::Group]);
            let planned = sequencer.order_groups(tree.iter().map(|p| group(p)).collect(), true);

            let mut seen = HashSet::new();
            for p in &planned {
                if let Some(parent) = &p.group.parent_path {
                    prop_assert!(seen.contains(parent), "{} before {}", p.group.full_path, parent);
                }
                prop_assert!(p.warning.is_none());
                seen.insert(p.group.full_path.clone());
            }
            prop_assert_eq!(planned.len(), tree.len());
        }
    }
}
