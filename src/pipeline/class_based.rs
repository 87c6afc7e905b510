use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use ustr::Ustr;

use super::definition::{DefineHierarchyLevelProps, HierarchyDefinition, HierarchyLevelDefinition};
use crate::{
    abstract_source::ClassHierarchyInspector,
    error::Result,
    hierarchy::{HierarchyNodeKey, ParentNode},
};

/// What a child level factory gets to work with.
pub struct ChildLevelProps<'a> {
    pub parent: &'a ParentNode,
    /// Ids of the parent's instance keys of the class the factory was
    /// registered for.  Empty for generic parents.
    pub parent_instance_ids: Vec<String>,
    pub instance_filter: Option<&'a Value>,
}

pub type RootLevelFactory =
    Box<dyn Fn(Option<&Value>) -> Result<Vec<HierarchyLevelDefinition>> + Send + Sync>;
pub type ChildLevelFactory =
    Box<dyn Fn(ChildLevelProps<'_>) -> Result<Vec<HierarchyLevelDefinition>> + Send + Sync>;

enum ParentMatcher {
    /// Instance parents with at least one key of the class or a class derived
    /// from it.
    InstancesOf(Ustr),
    GenericNode(String),
}

/// A hierarchy definition assembled from per-parent-kind level factories.
///
/// Child levels of a parent are the concatenation of the levels of every
/// factory whose matcher accepts the parent, in registration order.
pub struct ClassBasedHierarchyDefinition {
    inspector: Arc<dyn ClassHierarchyInspector>,
    root: RootLevelFactory,
    children: Vec<(ParentMatcher, ChildLevelFactory)>,
}

impl ClassBasedHierarchyDefinition {
    pub fn new<F>(inspector: Arc<dyn ClassHierarchyInspector>, root: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<Vec<HierarchyLevelDefinition>> + Send + Sync + 'static,
    {
        ClassBasedHierarchyDefinition {
            inspector,
            root: Box::new(root),
            children: vec![],
        }
    }

    pub fn with_instances_parent<F>(mut self, class_name: &str, factory: F) -> Self
    where
        F: Fn(ChildLevelProps<'_>) -> Result<Vec<HierarchyLevelDefinition>> + Send + Sync + 'static,
    {
        self.children.push((
            ParentMatcher::InstancesOf(Ustr::from(class_name)),
            Box::new(factory),
        ));
        self
    }

    pub fn with_generic_parent<F>(mut self, id: &str, factory: F) -> Self
    where
        F: Fn(ChildLevelProps<'_>) -> Result<Vec<HierarchyLevelDefinition>> + Send + Sync + 'static,
    {
        self.children
            .push((ParentMatcher::GenericNode(id.to_string()), Box::new(factory)));
        self
    }

    /// `None` if the matcher doesn't accept the parent, otherwise the ids of
    /// the parent instances it accepted.
    async fn match_parent(
        &self,
        matcher: &ParentMatcher,
        parent: &ParentNode,
    ) -> Result<Option<Vec<String>>> {
        match (matcher, &parent.key) {
            (ParentMatcher::GenericNode(id), HierarchyNodeKey::Generic { id: parent_id, .. }) => {
                Ok(if id == parent_id { Some(vec![]) } else { None })
            }
            (ParentMatcher::InstancesOf(class_name), HierarchyNodeKey::Instances { instance_keys }) => {
                let mut ids = vec![];
                for key in instance_keys {
                    if self
                        .inspector
                        .class_derives_from(&key.class_name, class_name)
                        .await?
                    {
                        ids.push(key.id.clone());
                    }
                }
                Ok(if ids.is_empty() { None } else { Some(ids) })
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl HierarchyDefinition for ClassBasedHierarchyDefinition {
    async fn define_hierarchy_level(
        &self,
        props: DefineHierarchyLevelProps<'_>,
    ) -> Result<Vec<HierarchyLevelDefinition>> {
        let parent = match props.parent_node {
            None => return (self.root)(props.instance_filter),
            Some(parent) => parent,
        };

        let mut defs = vec![];
        for (matcher, factory) in &self.children {
            if let Some(parent_instance_ids) = self.match_parent(matcher, parent).await? {
                defs.extend(factory(ChildLevelProps {
                    parent,
                    parent_instance_ids,
                    instance_filter: props.instance_filter,
                })?);
            }
        }
        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abstract_source::{EcSqlQueryDef, StaticClassHierarchy},
        hierarchy::{InstanceKey, SourceNode},
    };

    fn definition() -> ClassBasedHierarchyDefinition {
        let inspector = Arc::new(
            StaticClassHierarchy::new("imodel")
                .with_class("a.Element", "Element", &[])
                .with_class("a.Wall", "Wall", &["a.Element"]),
        );
        ClassBasedHierarchyDefinition::new(
            inspector,
            |_| {
                Ok(vec![HierarchyLevelDefinition::GenericNode(SourceNode::generic(
                    "root", "Root",
                ))])
            },
        )
        .with_generic_parent(
            "root",
            |_| {
                Ok(vec![HierarchyLevelDefinition::instances(
                    "a.Element",
                    EcSqlQueryDef::new("SELECT * FROM a.Element"),
                )])
            },
        )
        .with_instances_parent(
            "a.Element",
            |props| {
                Ok(vec![HierarchyLevelDefinition::instances(
                    "a.Element",
                    EcSqlQueryDef::new(&format!(
                        "SELECT * FROM a.Element WHERE Parent.Id IN ({})",
                        props.parent_instance_ids.join(", ")
                    )),
                )])
            },
        )
    }

    #[tokio::test]
    async fn test_factories_by_parent_kind() {
        let def = definition();
        let root = def
            .define_hierarchy_level(DefineHierarchyLevelProps::default())
            .await
            .unwrap();
        assert_eq!(root.len(), 1);

        let generic_parent = SourceNode::generic("root", "Root").as_parent();
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps {
                parent_node: Some(&generic_parent),
                instance_filter: None,
            })
            .await
            .unwrap();
        assert_eq!(
            level,
            vec![HierarchyLevelDefinition::instances(
                "a.Element",
                EcSqlQueryDef::new("SELECT * FROM a.Element")
            )]
        );

        let mut wall = SourceNode::instance(InstanceKey::new("a.Wall", "0x1"), "Wall").as_parent();
        if let HierarchyNodeKey::Instances { instance_keys } = &mut wall.key {
            instance_keys.push(InstanceKey::new("a.Other", "0x2"));
        }
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps {
                parent_node: Some(&wall),
                instance_filter: None,
            })
            .await
            .unwrap();
        assert_eq!(
            level,
            vec![HierarchyLevelDefinition::instances(
                "a.Element",
                EcSqlQueryDef::new("SELECT * FROM a.Element WHERE Parent.Id IN (0x1)")
            )]
        );

        let unrelated = SourceNode::generic("other", "Other").as_parent();
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps {
                parent_node: Some(&unrelated),
                instance_filter: None,
            })
            .await
            .unwrap();
        assert!(level.is_empty());
    }
}
