use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use ustr::Ustr;

use crate::{
    abstract_source::{EcSqlQueryDef, Row},
    error::{ErrorLayer, HierarchyError, Result},
    hierarchy::{
        ConcatenatedValue, GroupingParams, HierarchyNodeKey, InstanceKey, ParentNode,
        ProcessedNode, ProcessingFlags, SourceNode,
    },
};

// Well-known columns of instance node queries.
pub const FULL_CLASS_NAME: &str = "FullClassName";
pub const EC_INSTANCE_ID: &str = "ECInstanceId";
pub const DISPLAY_LABEL: &str = "DisplayLabel";
pub const HAS_CHILDREN: &str = "HasChildren";
pub const HIDE_IF_NO_CHILDREN: &str = "HideIfNoChildren";
pub const HIDE_NODE_IN_HIERARCHY: &str = "HideNodeInHierarchy";
pub const GROUPING: &str = "Grouping";
pub const EXTENDED_DATA: &str = "ExtendedData";
pub const AUTO_EXPAND: &str = "AutoExpand";
pub const SUPPORTS_FILTERING: &str = "SupportsFiltering";

/// One source of nodes for a hierarchy level.
#[derive(Clone, Debug, PartialEq)]
pub enum HierarchyLevelDefinition {
    /// A node that exists regardless of the data source contents.
    GenericNode(SourceNode),
    /// Instance nodes of `full_class_name` (or classes derived from it),
    /// one per row of `query`.
    InstanceNodesQuery {
        full_class_name: Ustr,
        query: EcSqlQueryDef,
    },
}

impl HierarchyLevelDefinition {
    pub fn instances(full_class_name: &str, query: EcSqlQueryDef) -> Self {
        HierarchyLevelDefinition::InstanceNodesQuery {
            full_class_name: Ustr::from(full_class_name),
            query,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefineHierarchyLevelProps<'a> {
    /// `None` for the root level.
    pub parent_node: Option<&'a ParentNode>,
    /// Opaque, caller-provided filter that definitions may apply to the
    /// instances they select.
    pub instance_filter: Option<&'a Value>,
}

/// Describes what nodes exist at each level of a hierarchy.
///
/// Only `define_hierarchy_level` is required.  The hooks default to the
/// standard row parser and identity processing; returning `None` from a
/// processing hook removes the node from its level.
#[async_trait]
pub trait HierarchyDefinition: Send + Sync {
    async fn define_hierarchy_level(
        &self,
        props: DefineHierarchyLevelProps<'_>,
    ) -> Result<Vec<HierarchyLevelDefinition>>;

    async fn parse_node(&self, row: &Row, _parent: Option<&ParentNode>) -> Result<SourceNode> {
        default_node_parser(row)
    }

    async fn pre_process_node(&self, node: SourceNode) -> Result<Option<SourceNode>> {
        Ok(Some(node))
    }

    async fn post_process_node(&self, node: ProcessedNode) -> Result<Option<ProcessedNode>> {
        Ok(Some(node))
    }
}

fn parse_instance_id(row: &Row) -> Result<String> {
    match row.get(EC_INSTANCE_ID) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(n) => Ok(format!("0x{:x}", n)),
            None => Err(HierarchyError::sticky(
                ErrorLayer::DataLayer,
                format!("Invalid {} value: {}", EC_INSTANCE_ID, n),
            )),
        },
        _ => Err(HierarchyError::sticky(
            ErrorLayer::DataLayer,
            format!("Row is missing the {} column", EC_INSTANCE_ID),
        )),
    }
}

fn parse_label(row: &Row) -> Result<ConcatenatedValue> {
    Ok(match row.get(DISPLAY_LABEL) {
        None => ConcatenatedValue::default(),
        Some(Value::String(s)) => ConcatenatedValue::parse(s),
        Some(v @ Value::Array(_)) => serde_json::from_value(v.clone())?,
        Some(other) => ConcatenatedValue::from(other.to_string()),
    })
}

/// Turn a row with the well-known columns into an instance node.
pub fn default_node_parser(row: &Row) -> Result<SourceNode> {
    let class_name = row.require_str(FULL_CLASS_NAME)?;
    let id = parse_instance_id(row)?;
    let mut node = SourceNode::instance(InstanceKey::new(class_name, &id), parse_label(row)?);

    node.children = row.get_bool(HAS_CHILDREN);
    node.auto_expand = row.get_bool(AUTO_EXPAND);
    node.supports_filtering = row.get_bool(SUPPORTS_FILTERING);

    if row.get_bool(HIDE_IF_NO_CHILDREN) == Some(true) {
        node.processing.flags |= ProcessingFlags::HideIfNoChildren;
    }
    if row.get_bool(HIDE_NODE_IN_HIERARCHY) == Some(true) {
        node.processing.flags |= ProcessingFlags::HideInHierarchy;
    }
    if let Some(grouping) = row.get_json(GROUPING)? {
        let grouping: GroupingParams = serde_json::from_value(grouping)?;
        if !grouping.is_empty() {
            node.processing.grouping = Some(grouping);
        }
    }
    node.extended_data = match row.get_json(EXTENDED_DATA)? {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    };
    Ok(node)
}

/// The boundary between a user-supplied `HierarchyDefinition` and the rest of
/// the pipeline.  All calls go through the definition object itself so
/// implementations can rely on their own state in every hook.
#[derive(Clone)]
pub struct DefinitionAdapter {
    definition: Arc<dyn HierarchyDefinition>,
    imodel_key: String,
}

impl DefinitionAdapter {
    pub fn new(definition: Arc<dyn HierarchyDefinition>, imodel_key: &str) -> Self {
        DefinitionAdapter {
            definition,
            imodel_key: imodel_key.to_string(),
        }
    }

    pub async fn define_level(
        &self,
        parent: Option<&ParentNode>,
        instance_filter: Option<&Value>,
    ) -> Result<Vec<HierarchyLevelDefinition>> {
        let defs = self
            .definition
            .define_hierarchy_level(DefineHierarchyLevelProps {
                parent_node: parent,
                instance_filter,
            })
            .await?;
        trace!(count = defs.len(), "define_level");
        Ok(defs)
    }

    /// Make a node produced for `parent` consistent: parent keys assigned and
    /// every instance key attributed to our data source.
    pub fn normalize(&self, mut node: SourceNode, parent: Option<&ParentNode>) -> SourceNode {
        node.parent_keys = match parent {
            Some(parent) => parent.child_parent_keys(),
            None => vec![],
        };
        if let HierarchyNodeKey::Instances { instance_keys } = &mut node.key {
            for key in instance_keys.iter_mut() {
                if key.imodel_key.is_none() {
                    key.imodel_key = Some(self.imodel_key.clone());
                }
            }
        }
        node
    }

    pub async fn parse_node(&self, row: &Row, parent: Option<&ParentNode>) -> Result<SourceNode> {
        let node = self.definition.parse_node(row, parent).await?;
        Ok(self.normalize(node, parent))
    }

    pub async fn pre_process(&self, node: SourceNode) -> Result<Option<SourceNode>> {
        self.definition.pre_process_node(node).await
    }

    pub async fn post_process(&self, node: ProcessedNode) -> Result<Option<ProcessedNode>> {
        self.definition.post_process_node(node).await
    }
}
