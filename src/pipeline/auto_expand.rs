//! Filter-driven auto-expansion.
//!
//! A node is expanded when some reveal option asks for a node below it to be
//! visible.  Reveal depths are either path indices (`depthInPath`, compared
//! to `NodeFilteringMeta::depth_in_path`) or hierarchy depths
//! (`depthInHierarchy`, compared to `parent_keys.len()`).

use crate::hierarchy::{NodeFilteringMeta, ProcessedNode, RevealOption};

/// What the reveal options under some node ask for.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct RevealDemand {
    /// Expand regardless of depth.
    always: bool,
    /// Deepest hierarchy depth that must be visible.
    max_hierarchy_depth: Option<usize>,
}

impl RevealDemand {
    fn merge(&mut self, other: RevealDemand) {
        self.always |= other.always;
        self.max_hierarchy_depth = self.max_hierarchy_depth.max(other.max_hierarchy_depth);
    }

    fn expands(&self, depth: usize) -> bool {
        self.always || matches!(self.max_hierarchy_depth, Some(h) if h > depth)
    }
}

/// `inclusive` says whether a path depth equal to the node's own path index
/// demands expansion.  It does for the grouping nodes above that node, it
/// doesn't for the node itself.
fn reveal_demand(reveal: &RevealOption, path_index: usize, inclusive: bool) -> RevealDemand {
    match reveal {
        RevealOption::Flag(flag) => RevealDemand {
            always: *flag,
            max_hierarchy_depth: None,
        },
        RevealOption::DepthInPath { depth_in_path } => RevealDemand {
            always: if inclusive {
                *depth_in_path >= path_index
            } else {
                *depth_in_path > path_index
            },
            max_hierarchy_depth: None,
        },
        RevealOption::DepthInHierarchy { depth_in_hierarchy } => RevealDemand {
            always: false,
            max_hierarchy_depth: Some(*depth_in_hierarchy),
        },
    }
}

fn node_demand(meta: &NodeFilteringMeta, inclusive: bool) -> RevealDemand {
    let mut demand = RevealDemand::default();
    if meta.is_filter_target {
        if let Some(reveal) = meta.filter_target_options.as_ref().and_then(|o| o.reveal.as_ref()) {
            demand.merge(reveal_demand(reveal, meta.depth_in_path, inclusive));
        }
    }
    for path in &meta.filtered_children_identifier_paths {
        if let Some(reveal) = path.options.as_ref().and_then(|o| o.reveal.as_ref()) {
            demand.merge(reveal_demand(reveal, meta.depth_in_path, inclusive));
        }
    }
    demand
}

/// Whether a non-grouping node should be expanded to reveal something below
/// it.
pub fn node_auto_expand(node: &ProcessedNode) -> bool {
    match &node.filtering {
        Some(meta) => node_demand(meta, false).expands(node.parent_keys.len()),
        None => false,
    }
}

/// Whether a grouping node should be expanded because something it groups,
/// directly or through nested grouping nodes, is to be revealed.
///
/// The grouped subtree is laid out in an arena in breadth-first order so a
/// reverse pass visits children before their parents.
pub fn grouping_node_auto_expand(group: &ProcessedNode) -> bool {
    let mut arena: Vec<(Option<usize>, &ProcessedNode)> = vec![(None, group)];
    let mut cur = 0;
    while cur < arena.len() {
        let node = arena[cur].1;
        for child in node.grouped_children() {
            arena.push((Some(cur), child));
        }
        cur += 1;
    }

    let mut demands = vec![RevealDemand::default(); arena.len()];
    for idx in (1..arena.len()).rev() {
        let (parent, node) = arena[idx];
        if !node.is_grouping() {
            if let Some(meta) = &node.filtering {
                demands[idx].merge(node_demand(meta, true));
            }
        }
        if let Some(parent) = parent {
            let demand = demands[idx];
            demands[parent].merge(demand);
        }
    }
    demands[0].expands(group.parent_keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{
        FilteringPathOptions, GroupingNodeInfo, HierarchyFilteringPath, HierarchyNodeIdentifier,
        HierarchyNodeKey, InstanceKey, ProcessedChildren, SourceNode,
    };

    fn target(depth: usize, reveal: Option<RevealOption>) -> ProcessedNode {
        let mut node = ProcessedNode::from_source(
            SourceNode::instance(InstanceKey::new("a.b", "0x1"), "x"),
            "x".to_string(),
        );
        node.parent_keys = (0..depth)
            .map(|i| HierarchyNodeKey::generic(&i.to_string()))
            .collect();
        node.filtering = Some(NodeFilteringMeta {
            is_filter_target: true,
            filter_target_options: reveal.map(FilteringPathOptions::reveal),
            depth_in_path: depth,
            ..Default::default()
        });
        node
    }

    fn group(depth: usize, children: Vec<ProcessedNode>) -> ProcessedNode {
        let mut node = ProcessedNode::from_source(SourceNode::generic("g", "g"), "g".to_string());
        node.key = HierarchyNodeKey::LabelGrouping {
            label: "g".to_string(),
            group_id: None,
        };
        node.parent_keys = (0..depth)
            .map(|i| HierarchyNodeKey::generic(&i.to_string()))
            .collect();
        node.children = ProcessedChildren::Grouped(children);
        node.grouping = Some(GroupingNodeInfo {
            grouped_instance_keys: vec![],
            non_grouping_ancestor: None,
        });
        node
    }

    #[test]
    fn test_target_reveal_depths() {
        assert!(node_auto_expand(&target(1, Some(RevealOption::Flag(true)))));
        assert!(!node_auto_expand(&target(1, Some(RevealOption::Flag(false)))));
        assert!(!node_auto_expand(&target(1, None)));
        // The target itself is at path index 1; revealing it doesn't expand it.
        assert!(!node_auto_expand(&target(1, Some(RevealOption::DepthInPath { depth_in_path: 1 }))));
        assert!(node_auto_expand(&target(1, Some(RevealOption::DepthInPath { depth_in_path: 2 }))));
        assert!(!node_auto_expand(&target(
            1,
            Some(RevealOption::DepthInHierarchy { depth_in_hierarchy: 1 })
        )));
        assert!(node_auto_expand(&target(
            1,
            Some(RevealOption::DepthInHierarchy { depth_in_hierarchy: 2 })
        )));
    }

    #[test]
    fn test_children_paths_reveal() {
        let mut node = target(0, None);
        if let Some(meta) = &mut node.filtering {
            meta.is_filter_target = false;
            meta.filtered_children_identifier_paths = vec![HierarchyFilteringPath::new(
                vec![HierarchyNodeIdentifier::generic("child")],
                Some(FilteringPathOptions::reveal(RevealOption::Flag(true))),
            )];
        }
        assert!(node_auto_expand(&node));
    }

    #[test]
    fn test_grouping_node_monotonicity() {
        let g = group(0, vec![target(1, None), target(1, None)]);
        assert!(!grouping_node_auto_expand(&g));

        let g = group(0, vec![target(1, None), target(1, Some(RevealOption::Flag(true)))]);
        assert!(grouping_node_auto_expand(&g));
    }

    #[test]
    fn test_grouping_node_depths() {
        // Revealing the grouped node itself expands the group above it.
        let g = group(0, vec![target(1, Some(RevealOption::DepthInPath { depth_in_path: 1 }))]);
        assert!(grouping_node_auto_expand(&g));

        // A hierarchy depth pointing at the group itself doesn't.
        let g = group(
            1,
            vec![target(2, Some(RevealOption::DepthInHierarchy { depth_in_hierarchy: 1 }))],
        );
        assert!(!grouping_node_auto_expand(&g));

        // Nested groups: the outer group at depth 1 expands for a reveal at
        // depth 2, the inner group at depth 2 doesn't.
        let reveal = Some(RevealOption::DepthInHierarchy { depth_in_hierarchy: 2 });
        let inner = group(2, vec![target(3, reveal.clone())]);
        assert!(!grouping_node_auto_expand(&inner));
        let outer = group(1, vec![inner]);
        assert!(grouping_node_auto_expand(&outer));
    }
}
