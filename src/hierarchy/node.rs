use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    identifiers::{FilteringPathOptions, HierarchyFilteringPath},
    keys::{node_identity, HierarchyNodeKey, InstanceKey},
    processing::{GroupingParams, NodeProcessingParams, ProcessingFlags},
    values::ConcatenatedValue,
};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Transient metadata attached to nodes while a hierarchy filter is active.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFilteringMeta {
    /// This node is the target of at least one filtering path.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_filter_target: bool,
    /// Merged options of all the paths that target this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_target_options: Option<FilteringPathOptions>,
    /// Some ancestor of this node is a filter target, so this node is shown
    /// even though no path leads to it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_filter_target_ancestor: bool,
    /// Remaining path suffixes that apply to this node's children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filtered_children_identifier_paths: Vec<HierarchyFilteringPath>,
    /// Index of this node in the paths it matched.
    #[serde(default)]
    pub depth_in_path: usize,
}

impl NodeFilteringMeta {
    pub fn is_target_or_has_target_ancestor(&self) -> bool {
        self.is_filter_target || self.has_filter_target_ancestor
    }
}

/// A parent node as seen by hierarchy definitions.  Grouping nodes are never
/// parents from a definition's point of view; their children are defined by
/// their closest non-grouping ancestor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentNode {
    pub key: HierarchyNodeKey,
    pub label: String,
    pub parent_keys: Vec<HierarchyNodeKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtering: Option<NodeFilteringMeta>,
}

impl ParentNode {
    /// The `parent_keys` that children of this node get.
    pub fn child_parent_keys(&self) -> Vec<HierarchyNodeKey> {
        let mut keys = self.parent_keys.clone();
        keys.push(self.key.clone());
        keys
    }

    pub fn identity(&self) -> String {
        node_identity(&self.parent_keys, &self.key)
    }
}

/// A non-grouping node as produced by a hierarchy definition or parsed from a
/// query row, before labels are formatted.  Hierarchy levels are cached in this
/// form.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceNode {
    pub key: HierarchyNodeKey,
    pub label: ConcatenatedValue,
    pub parent_keys: Vec<HierarchyNodeKey>,
    /// `None` until we know whether the node has children.
    pub children: Option<bool>,
    pub auto_expand: Option<bool>,
    pub supports_filtering: Option<bool>,
    pub extended_data: Option<Map<String, Value>>,
    pub filtering: Option<NodeFilteringMeta>,
    pub processing: NodeProcessingParams,
}

impl SourceNode {
    pub fn new(key: HierarchyNodeKey, label: impl Into<ConcatenatedValue>) -> Self {
        SourceNode {
            key,
            label: label.into(),
            parent_keys: vec![],
            children: None,
            auto_expand: None,
            supports_filtering: None,
            extended_data: None,
            filtering: None,
            processing: NodeProcessingParams::default(),
        }
    }

    pub fn generic(id: &str, label: impl Into<ConcatenatedValue>) -> Self {
        Self::new(HierarchyNodeKey::generic(id), label)
    }

    pub fn instance(key: InstanceKey, label: impl Into<ConcatenatedValue>) -> Self {
        Self::new(HierarchyNodeKey::instances(vec![key]), label)
    }

    pub fn with_children(mut self, children: bool) -> Self {
        self.children = Some(children);
        self
    }

    pub fn with_flags(mut self, flags: ProcessingFlags) -> Self {
        self.processing.flags |= flags;
        self
    }

    pub fn with_grouping(mut self, grouping: GroupingParams) -> Self {
        self.processing.grouping = Some(grouping);
        self
    }

    pub fn instance_keys(&self) -> &[InstanceKey] {
        self.key.instance_keys()
    }

    pub fn as_parent(&self) -> ParentNode {
        ParentNode {
            key: self.key.clone(),
            label: self.label.to_plain_string(),
            parent_keys: self.parent_keys.clone(),
            extended_data: self.extended_data.clone(),
            filtering: self.filtering.clone(),
        }
    }
}

/// Information only grouping nodes have.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingNodeInfo {
    /// All instance keys grouped under this node, through any nested
    /// grouping nodes.
    pub grouped_instance_keys: Vec<InstanceKey>,
    /// The parent of the hierarchy level this grouping node was created in;
    /// `None` for root level grouping nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_grouping_ancestor: Option<Box<ParentNode>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProcessedChildren {
    Unknown,
    Known(bool),
    /// Grouping nodes hold onto the nodes they group.
    Grouped(Vec<ProcessedNode>),
}

/// A node with a formatted label that went through grouping.  This is what
/// post-processing hooks see.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedNode {
    pub key: HierarchyNodeKey,
    pub label: String,
    pub parent_keys: Vec<HierarchyNodeKey>,
    pub children: ProcessedChildren,
    pub auto_expand: Option<bool>,
    pub supports_filtering: Option<bool>,
    pub extended_data: Option<Map<String, Value>>,
    pub filtering: Option<NodeFilteringMeta>,
    pub processing: NodeProcessingParams,
    pub grouping: Option<GroupingNodeInfo>,
}

impl ProcessedNode {
    pub fn from_source(node: SourceNode, label: String) -> Self {
        ProcessedNode {
            key: node.key,
            label,
            parent_keys: node.parent_keys,
            children: match node.children {
                Some(c) => ProcessedChildren::Known(c),
                None => ProcessedChildren::Unknown,
            },
            auto_expand: node.auto_expand,
            supports_filtering: node.supports_filtering,
            extended_data: node.extended_data,
            filtering: node.filtering,
            processing: node.processing,
            grouping: None,
        }
    }

    pub fn is_grouping(&self) -> bool {
        self.grouping.is_some()
    }

    pub fn grouped_children(&self) -> &[ProcessedNode] {
        match &self.children {
            ProcessedChildren::Grouped(children) => children,
            _ => &[],
        }
    }

    /// Instance keys of this node, or for grouping nodes, of everything it
    /// groups.
    pub fn instance_keys(&self) -> &[InstanceKey] {
        match &self.grouping {
            Some(info) => &info.grouped_instance_keys,
            None => self.key.instance_keys(),
        }
    }

    pub fn as_parent(&self) -> ParentNode {
        ParentNode {
            key: self.key.clone(),
            label: self.label.clone(),
            parent_keys: self.parent_keys.clone(),
            extended_data: self.extended_data.clone(),
            filtering: self.filtering.clone(),
        }
    }

    pub fn into_hierarchy_node(self, children: bool) -> HierarchyNode {
        HierarchyNode {
            key: self.key,
            label: self.label,
            parent_keys: self.parent_keys,
            children,
            auto_expand: self.auto_expand,
            supports_filtering: self.supports_filtering,
            extended_data: self.extended_data,
            filtering: self.filtering,
            grouping: self.grouping,
        }
    }
}

/// The public node type returned by the hierarchy provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub key: HierarchyNodeKey,
    pub label: String,
    pub parent_keys: Vec<HierarchyNodeKey>,
    pub children: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_filtering: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtering: Option<NodeFilteringMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingNodeInfo>,
}

impl HierarchyNode {
    pub fn is_grouping(&self) -> bool {
        self.grouping.is_some()
    }

    pub fn as_parent(&self) -> ParentNode {
        ParentNode {
            key: self.key.clone(),
            label: self.label.clone(),
            parent_keys: self.parent_keys.clone(),
            extended_data: self.extended_data.clone(),
            filtering: self.filtering.clone(),
        }
    }
}
