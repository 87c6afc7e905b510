//! Grouping of sibling nodes under synthetic grouping nodes.
//!
//! A level is grouped by a sequence of handlers.  Each handler buckets the
//! nodes it is given; every bucket that survives the hiding rules becomes a
//! grouping node whose members are grouped further by the remaining handlers,
//! and the nodes left over are handed to the remaining handlers at the same
//! level.

mod buckets;

use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use ustr::Ustr;

use self::buckets::{Bucket, GroupingHandler};
use super::formatter::ValueFormatter;
use crate::{
    abstract_source::ClassHierarchyInspector,
    error::Result,
    hierarchy::{
        BaseGroupingParams, GroupingAutoExpand, GroupingNodeInfo, GroupingParams, HierarchyNodeKey,
        LabelGroupingAction, ParentNode, ProcessedChildren, ProcessedNode, NodeProcessingParams,
    },
};

pub use self::buckets::{NOT_SPECIFIED_LABEL, OTHER_VALUES_LABEL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingKind {
    BaseClasses,
    Class,
    Properties,
    Label,
}

pub const DEFAULT_GROUPING_ORDER: [GroupingKind; 4] = [
    GroupingKind::BaseClasses,
    GroupingKind::Class,
    GroupingKind::Properties,
    GroupingKind::Label,
];

pub struct GroupingContext<'a> {
    pub inspector: &'a dyn ClassHierarchyInspector,
    pub formatter: &'a dyn ValueFormatter,
    pub order: &'a [GroupingKind],
    /// The parent of the level being grouped.
    pub parent: Option<&'a ParentNode>,
}

pub(crate) fn grouping_of(node: &ProcessedNode) -> Option<&GroupingParams> {
    node.processing.grouping.as_ref()
}

fn merge_children(a: &ProcessedChildren, b: &ProcessedChildren) -> ProcessedChildren {
    match (a, b) {
        (ProcessedChildren::Known(true), _) | (_, ProcessedChildren::Known(true)) => {
            ProcessedChildren::Known(true)
        }
        (ProcessedChildren::Known(false), ProcessedChildren::Known(false)) => {
            ProcessedChildren::Known(false)
        }
        _ => ProcessedChildren::Unknown,
    }
}

/// Collapse instance nodes that asked for label merging and share a label and
/// group id into the first of them.
fn merge_same_label_nodes(nodes: Vec<ProcessedNode>) -> Vec<ProcessedNode> {
    let mut result: Vec<ProcessedNode> = Vec::with_capacity(nodes.len());
    let mut merge_targets: HashMap<(String, Option<String>), usize> = HashMap::new();
    for node in nodes {
        let merge_key = match (&node.key, grouping_of(&node).and_then(|g| g.by_label.as_ref())) {
            (HierarchyNodeKey::Instances { .. }, Some(params))
                if params.action == LabelGroupingAction::Merge =>
            {
                Some((node.label.clone(), params.group_id.clone()))
            }
            _ => None,
        };
        let merge_key = match merge_key {
            Some(merge_key) => merge_key,
            None => {
                result.push(node);
                continue;
            }
        };
        match merge_targets.get(&merge_key) {
            Some(&idx) => {
                let target = &mut result[idx];
                target.children = merge_children(&target.children, &node.children);
                if let (
                    HierarchyNodeKey::Instances { instance_keys },
                    HierarchyNodeKey::Instances {
                        instance_keys: merged,
                    },
                ) = (&mut target.key, node.key)
                {
                    for key in merged {
                        if !instance_keys.contains(&key) {
                            instance_keys.push(key);
                        }
                    }
                }
            }
            None => {
                merge_targets.insert(merge_key, result.len());
                result.push(node);
            }
        }
    }
    result
}

async fn create_handlers(
    ctx: &GroupingContext<'_>,
    nodes: &[ProcessedNode],
) -> Result<Vec<GroupingHandler>> {
    let mut handlers = vec![];
    for kind in ctx.order {
        match kind {
            GroupingKind::BaseClasses => {
                let classes: Vec<Ustr> = nodes
                    .iter()
                    .filter_map(|n| grouping_of(n)?.by_base_classes.as_ref())
                    .flat_map(|p| p.full_class_names.iter().cloned())
                    .unique()
                    .collect();
                // Most base first: a class with fewer of the other listed
                // classes as ancestors is more base.
                let mut ranked = Vec::with_capacity(classes.len());
                for class_name in &classes {
                    let mut ancestors = 0;
                    for other in &classes {
                        if other != class_name
                            && ctx.inspector.class_derives_from(class_name, other).await?
                        {
                            ancestors += 1;
                        }
                    }
                    ranked.push((ancestors, *class_name));
                }
                ranked.sort_by_key(|(ancestors, _)| *ancestors);
                handlers.extend(ranked.into_iter().map(|(_, c)| GroupingHandler::BaseClass(c)));
            }
            GroupingKind::Class => {
                if nodes
                    .iter()
                    .any(|n| grouping_of(n).map_or(false, |g| g.by_class.is_some()))
                {
                    handlers.push(GroupingHandler::Class);
                }
            }
            GroupingKind::Properties => {
                let count = nodes
                    .iter()
                    .filter_map(|n| grouping_of(n)?.by_properties.as_ref())
                    .map(|p| p.property_groups.len())
                    .max()
                    .unwrap_or(0);
                handlers.extend((0..count).map(GroupingHandler::Properties));
            }
            GroupingKind::Label => {
                if nodes.iter().any(|n| GroupingHandler::Label.base_params(n).is_some()) {
                    handlers.push(GroupingHandler::Label);
                }
            }
        }
    }
    Ok(handlers)
}

fn member_params<'n>(
    handler: &GroupingHandler,
    bucket: &Bucket,
    nodes: &'n [ProcessedNode],
) -> Vec<&'n BaseGroupingParams> {
    bucket
        .members
        .iter()
        .filter_map(|idx| handler.base_params(&nodes[*idx]))
        .collect()
}

fn should_dissolve(params: &[&BaseGroupingParams], member_count: usize, alone: bool) -> bool {
    let all = |f: fn(&BaseGroupingParams) -> bool| !params.is_empty() && params.iter().all(|p| f(p));
    (member_count == 1 && all(|p| p.hide_if_one_grouped_node))
        || (alone && all(|p| p.hide_if_no_siblings))
}

fn static_auto_expand(params: &[&BaseGroupingParams], child_count: usize) -> Option<bool> {
    let wants = |mode: GroupingAutoExpand| params.iter().any(|p| p.auto_expand == Some(mode));
    if wants(GroupingAutoExpand::Always)
        || (wants(GroupingAutoExpand::SingleChild) && child_count == 1)
    {
        Some(true)
    } else {
        None
    }
}

/// Group `nodes`, whose grouping node chain so far is `parent_keys`, with
/// `handlers`.  `extra_siblings` counts the grouping nodes earlier handlers
/// already created next to them.
fn apply_handlers<'a>(
    ctx: &'a GroupingContext<'a>,
    handlers: &'a [GroupingHandler],
    nodes: Vec<ProcessedNode>,
    extra_siblings: usize,
    parent_keys: Vec<HierarchyNodeKey>,
) -> BoxFuture<'a, Result<Vec<ProcessedNode>>> {
    async move {
        let (handler, rest) = match handlers.split_first() {
            Some(split) if !nodes.is_empty() => split,
            _ => return Ok(nodes),
        };

        let bucketing = handler.bucket(ctx, &nodes).await?;
        let alone = bucketing.groups.len() == 1
            && bucketing.ungrouped.is_empty()
            && extra_siblings == 0;

        let mut leftover = bucketing.ungrouped;
        let mut kept = vec![];
        for bucket in bucketing.groups {
            let params = member_params(handler, &bucket, &nodes);
            if should_dissolve(&params, bucket.members.len(), alone) {
                leftover.extend(bucket.members.iter().cloned());
            } else {
                let params: Vec<BaseGroupingParams> = params.into_iter().cloned().collect();
                kept.push((bucket, params));
            }
        }
        leftover.sort_unstable();

        let mut slots: Vec<Option<ProcessedNode>> = nodes.into_iter().map(Some).collect();
        let group_count = kept.len();
        let mut output = Vec::with_capacity(group_count + leftover.len());
        for (bucket, params) in kept {
            let mut members: Vec<ProcessedNode> =
                bucket.members.iter().filter_map(|idx| slots[*idx].take()).collect();
            for member in members.iter_mut() {
                member.parent_keys.push(bucket.key.clone());
            }
            let mut child_parent_keys = parent_keys.clone();
            child_parent_keys.push(bucket.key.clone());

            let children = apply_handlers(ctx, rest, members, 0, child_parent_keys).await?;
            let grouped_instance_keys = children
                .iter()
                .flat_map(|c| c.instance_keys().iter().cloned())
                .unique()
                .collect();
            let params: Vec<&BaseGroupingParams> = params.iter().collect();
            trace!(label = %bucket.label, children = children.len(), "created_grouping_node");
            output.push(ProcessedNode {
                key: bucket.key,
                label: bucket.label,
                parent_keys: parent_keys.clone(),
                auto_expand: static_auto_expand(&params, children.len()),
                children: ProcessedChildren::Grouped(children),
                supports_filtering: None,
                extended_data: None,
                filtering: None,
                processing: NodeProcessingParams::default(),
                grouping: Some(GroupingNodeInfo {
                    grouped_instance_keys,
                    non_grouping_ancestor: ctx.parent.cloned().map(Box::new),
                }),
            });
        }

        let remaining: Vec<ProcessedNode> =
            leftover.iter().filter_map(|idx| slots[*idx].take()).collect();
        output.extend(
            apply_handlers(ctx, rest, remaining, extra_siblings + group_count, parent_keys).await?,
        );
        Ok(output)
    }
    .boxed()
}

/// Group a hierarchy level.  Nodes that asked for no grouping come back
/// unchanged and in order, after the grouping nodes.
pub async fn group_level(
    ctx: &GroupingContext<'_>,
    nodes: Vec<ProcessedNode>,
) -> Result<Vec<ProcessedNode>> {
    let nodes = merge_same_label_nodes(nodes);
    let handlers = create_handlers(ctx, &nodes).await?;
    if handlers.is_empty() {
        return Ok(nodes);
    }
    let parent_keys = match ctx.parent {
        Some(parent) => parent.child_parent_keys(),
        None => vec![],
    };
    apply_handlers(ctx, &handlers, nodes, 0, parent_keys).await
}

/// Find the grouping node reached by following `chain` of grouping keys down
/// from `nodes`.
pub fn find_grouping_node(
    nodes: Vec<ProcessedNode>,
    chain: &[HierarchyNodeKey],
) -> Option<ProcessedNode> {
    let (first, rest) = chain.split_first()?;
    let node = nodes
        .into_iter()
        .find(|n| n.is_grouping() && &n.key == first)?;
    if rest.is_empty() {
        return Some(node);
    }
    match node.children {
        ProcessedChildren::Grouped(children) => find_grouping_node(children, rest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abstract_source::StaticClassHierarchy,
        hierarchy::{InstanceKey, SourceNode},
        pipeline::formatter::DefaultValueFormatter,
    };
    use serde_json::{json, Value};

    fn node(class_name: &str, id: &str, label: &str, grouping: Value) -> ProcessedNode {
        let grouping: GroupingParams = serde_json::from_value(grouping).unwrap();
        let source =
            SourceNode::instance(InstanceKey::new(class_name, id), label).with_grouping(grouping);
        ProcessedNode::from_source(source, label.to_string())
    }

    fn inspector() -> StaticClassHierarchy {
        StaticClassHierarchy::new("imodel")
            .with_class("a.Base", "Base", &[])
            .with_class("a.Mid", "Mid", &["a.Base"])
            .with_class("a.b", "B", &["a.Mid"])
            .with_class("a.c", "C", &["a.Base"])
    }

    async fn group(nodes: Vec<ProcessedNode>) -> Vec<ProcessedNode> {
        let inspector = inspector();
        let ctx = GroupingContext {
            inspector: &inspector,
            formatter: &DefaultValueFormatter,
            order: &DEFAULT_GROUPING_ORDER,
            parent: None,
        };
        group_level(&ctx, nodes).await.unwrap()
    }

    fn labels(nodes: &[ProcessedNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.label.as_str()).collect()
    }

    #[tokio::test]
    async fn test_label_grouping() {
        let grouped = group(vec![
            node("a.b", "0x1", "Example element", json!({"byLabel": true})),
            node("a.b", "0x2", "Example element", json!({"byLabel": true})),
        ])
        .await;
        assert_eq!(grouped.len(), 1);
        let g = &grouped[0];
        assert_eq!(
            g.key,
            HierarchyNodeKey::LabelGrouping {
                label: "Example element".to_string(),
                group_id: None
            }
        );
        assert_eq!(g.label, "Example element");
        assert_eq!(labels(g.grouped_children()), vec!["Example element", "Example element"]);
        assert_eq!(g.instance_keys().len(), 2);
        assert!(g.grouped_children().iter().all(|c| c.parent_keys == vec![g.key.clone()]));
        assert!(g.parent_keys.is_empty());
        assert_eq!(g.auto_expand, None);
    }

    #[tokio::test]
    async fn test_label_merging() {
        let merge = json!({"byLabel": {"action": "merge"}});
        let grouped = group(vec![
            node("a.b", "0x1", "Same", merge.clone()),
            node("a.c", "0x2", "Other", merge.clone()),
            node("a.b", "0x3", "Same", merge),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["Same", "Other"]);
        assert_eq!(
            grouped[0].instance_keys(),
            &[InstanceKey::new("a.b", "0x1"), InstanceKey::new("a.b", "0x3")]
        );
        assert!(!grouped[0].is_grouping());
    }

    #[tokio::test]
    async fn test_class_grouping_hide_if_one_grouped_node() {
        let by_class = json!({"byClass": {"hideIfOneGroupedNode": true}});
        let grouped = group(vec![
            node("a.c", "0x1", "c1", by_class.clone()),
            node("a.b", "0x2", "b1", by_class.clone()),
            node("a.b", "0x3", "b2", by_class),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["B", "c1"]);
        assert_eq!(labels(grouped[0].grouped_children()), vec!["b1", "b2"]);
        assert!(!grouped[1].is_grouping());
    }

    #[tokio::test]
    async fn test_hide_if_no_siblings() {
        let by_class = json!({"byClass": {"hideIfNoSiblings": true}});
        let grouped = group(vec![
            node("a.b", "0x1", "b1", by_class.clone()),
            node("a.b", "0x2", "b2", by_class.clone()),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["b1", "b2"]);

        let grouped = group(vec![
            node("a.b", "0x1", "b1", by_class.clone()),
            node("a.c", "0x2", "c1", by_class),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_base_classes_nest_most_base_first() {
        let by_base = json!({"byBaseClasses": {"fullClassNames": ["a.Mid", "a.Base"]}, "byClass": true});
        let grouped = group(vec![
            node("a.b", "0x1", "b1", by_base.clone()),
            node("a.c", "0x2", "c1", by_base),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["Base"]);
        let base = &grouped[0];
        assert_eq!(labels(base.grouped_children()), vec!["Mid", "C"]);
        let mid = &base.grouped_children()[0];
        assert_eq!(labels(mid.grouped_children()), vec!["B"]);
        let class_group = &mid.grouped_children()[0];
        assert_eq!(
            class_group.parent_keys,
            vec![
                HierarchyNodeKey::ClassGrouping { class_name: Ustr::from("a.Base") },
                HierarchyNodeKey::ClassGrouping { class_name: Ustr::from("a.Mid") },
            ]
        );
        assert_eq!(class_group.grouped_children()[0].parent_keys.len(), 3);
        assert_eq!(base.instance_keys().len(), 2);

        let found = find_grouping_node(
            grouped,
            &[
                HierarchyNodeKey::ClassGrouping { class_name: Ustr::from("a.Base") },
                HierarchyNodeKey::ClassGrouping { class_name: Ustr::from("a.Mid") },
            ],
        )
        .unwrap();
        assert_eq!(found.label, "Mid");
    }

    #[tokio::test]
    async fn test_property_buckets_order() {
        let by_height = |value: Value| {
            json!({"byProperties": {
                "propertiesClassName": "a.b",
                "propertyGroups": [{
                    "propertyName": "height",
                    "propertyValue": value,
                    "ranges": [
                        {"fromValue": 0, "toValue": 5},
                        {"fromValue": 5, "toValue": 10, "rangeLabel": "Medium"},
                    ],
                }],
                "createGroupForOutOfRangesValues": true,
                "createGroupForUnspecifiedValues": true,
            }})
        };
        let grouped = group(vec![
            node("a.b", "0x1", "unset", by_height(Value::Null)),
            node("a.b", "0x2", "tall", by_height(json!(20))),
            node("a.b", "0x3", "mid", by_height(json!(7))),
            node("a.b", "0x4", "low", by_height(json!(1.5))),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["0 - 5", "Medium", "Other", "Not specified"]);
        assert!(matches!(
            grouped[2].key,
            HierarchyNodeKey::PropertyOtherValuesGrouping { .. }
        ));
    }

    #[tokio::test]
    async fn test_property_values_and_single_child_expansion() {
        let by_color = |value: Value| {
            json!({"byProperties": {
                "propertiesClassName": "a.b",
                "propertyGroups": [{"propertyName": "color", "propertyValue": value}],
                "autoExpand": "single-child",
            }})
        };
        let grouped = group(vec![
            node("a.b", "0x1", "r1", by_color(json!("red"))),
            node("a.b", "0x2", "g1", by_color(json!("green"))),
            node("a.b", "0x3", "r2", by_color(json!("red"))),
            node("a.b", "0x4", "n1", json!({})),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["red", "green", "n1"]);
        assert_eq!(grouped[0].auto_expand, None);
        assert_eq!(grouped[1].auto_expand, Some(true));
    }

    #[tokio::test]
    async fn test_empty_property_values_are_unspecified() {
        let by_color = |value: Value, unspecified: bool| {
            json!({"byProperties": {
                "propertiesClassName": "a.b",
                "propertyGroups": [{"propertyName": "color", "propertyValue": value}],
                "createGroupForUnspecifiedValues": unspecified,
            }})
        };
        let grouped = group(vec![
            node("a.b", "0x1", "blank", by_color(json!(""), true)),
            node("a.b", "0x2", "red", by_color(json!("red"), true)),
            node("a.b", "0x3", "unset", by_color(Value::Null, true)),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["red", "Not specified"]);
        assert_eq!(grouped[1].grouped_children().len(), 2);

        let grouped = group(vec![
            node("a.b", "0x1", "blank", by_color(json!(""), false)),
            node("a.b", "0x2", "red", by_color(json!("red"), false)),
        ])
        .await;
        assert_eq!(labels(&grouped), vec!["red", "blank"]);
    }
}
