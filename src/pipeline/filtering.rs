use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    auto_expand::{grouping_node_auto_expand, node_auto_expand},
    definition::{DefineHierarchyLevelProps, HierarchyDefinition, HierarchyLevelDefinition},
    ecsql::{
        apply_filter, apply_search, id_literal, parse_target_options, split_class_name,
        FilteredClass, SearchedInstance, FILTER_CLASS_NAME, FILTER_EC_INSTANCE_ID,
        FILTER_TARGET_OPTIONS, HAS_FILTER_TARGET_ANCESTOR, IS_FILTER_TARGET,
    },
};
use crate::{
    abstract_source::{ClassHierarchyInspector, EcSqlQueryDef, Row},
    error::Result,
    hierarchy::{
        dedupe_paths, ids_equal, FilteringPathOptions, HierarchyFilteringPath,
        HierarchyNodeIdentifier, HierarchyNodeKey, InstanceKey, NodeFilteringMeta, ParentNode,
        ProcessedNode, ProcessingFlags, SourceNode,
    },
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilteringMode {
    /// Only nodes on the paths (and everything below targets) are shown.
    #[default]
    Filter,
    /// Everything is shown; nodes on the paths are tagged and revealed.
    Search,
}

/// Paths a hierarchy should be filtered down to or searched for.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyFilter {
    pub paths: Vec<HierarchyFilteringPath>,
    #[serde(default)]
    pub mode: FilteringMode,
}

impl HierarchyFilter {
    pub fn new(paths: Vec<HierarchyFilteringPath>, mode: FilteringMode) -> Self {
        HierarchyFilter { paths, mode }
    }
}

/// The paths that apply to a level, if any do.
struct LevelPaths {
    paths: Vec<HierarchyFilteringPath>,
    /// The parent is a filter target or has one above it.
    has_target_ancestor: bool,
    depth_in_path: usize,
}

/// Decorates a hierarchy definition so that it only produces (or, in search
/// mode, tags) the nodes on a set of identifier paths.
///
/// Filtering state travels down the hierarchy in `NodeFilteringMeta`: each
/// node matched by a path carries the remaining suffixes for its children.  A
/// parent without that metadata is outside of the filter's reach and its
/// children are left alone.
pub struct FilteringHierarchyDefinition {
    source: Arc<dyn HierarchyDefinition>,
    inspector: Arc<dyn ClassHierarchyInspector>,
    filter: HierarchyFilter,
}

impl FilteringHierarchyDefinition {
    pub fn new(
        source: Arc<dyn HierarchyDefinition>,
        inspector: Arc<dyn ClassHierarchyInspector>,
        filter: HierarchyFilter,
    ) -> Self {
        FilteringHierarchyDefinition {
            source,
            inspector,
            filter,
        }
    }

    fn level_paths(&self, parent: Option<&ParentNode>) -> Option<LevelPaths> {
        match parent {
            None => Some(LevelPaths {
                paths: self.filter.paths.clone(),
                has_target_ancestor: false,
                depth_in_path: 0,
            }),
            Some(parent) => parent.filtering.as_ref().map(|meta| LevelPaths {
                paths: meta.filtered_children_identifier_paths.clone(),
                has_target_ancestor: meta.is_target_or_has_target_ancestor(),
                depth_in_path: meta.depth_in_path + 1,
            }),
        }
    }

    fn imodel_matches(&self, ident: &InstanceKey) -> bool {
        match &ident.imodel_key {
            Some(key) => key == self.inspector.imodel_key(),
            None => true,
        }
    }

    /// Classes are compatible when either derives from the other; a query for
    /// a base class may return the identified instance, and an identifier may
    /// name the instance by a base class.
    async fn classes_compatible(&self, a: &str, b: &str) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        Ok(self.inspector.class_derives_from(a, b).await?
            || self.inspector.class_derives_from(b, a).await?)
    }

    async fn identifier_matches_key(
        &self,
        ident: &HierarchyNodeIdentifier,
        key: &HierarchyNodeKey,
    ) -> Result<bool> {
        let ident = match ident {
            HierarchyNodeIdentifier::Generic(_) => return Ok(ident.matches_generic_key(key)),
            HierarchyNodeIdentifier::Instance(ident) => ident,
        };
        if !self.imodel_matches(ident) {
            return Ok(false);
        }
        for key in key.instance_keys() {
            if ids_equal(&key.id, &ident.id)
                && self.classes_compatible(&key.class_name, &ident.class_name).await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn paths_matching_key(
        &self,
        paths: &[HierarchyFilteringPath],
        key: &HierarchyNodeKey,
    ) -> Result<Vec<HierarchyFilteringPath>> {
        let mut matched = vec![];
        for path in paths {
            if let Some(first) = path.path.first() {
                if self.identifier_matches_key(first, key).await? {
                    matched.push(path.clone());
                }
            }
        }
        Ok(matched)
    }

    /// Rewrite an instance nodes query for the paths whose first identifier
    /// could be returned by it.  `None` if no path could.
    async fn filter_query_definition(
        &self,
        full_class_name: &str,
        query: EcSqlQueryDef,
        level: &LevelPaths,
    ) -> Result<Option<EcSqlQueryDef>> {
        let mut classes: Vec<FilteredClass> = vec![];
        let mut searched: Vec<SearchedInstance> = vec![];
        for path in &level.paths {
            let ident = match path.path.first() {
                Some(HierarchyNodeIdentifier::Instance(ident)) => ident,
                _ => continue,
            };
            // Identifiers we can't safely splice into ECSQL simply don't match.
            let id = match id_literal(&ident.id) {
                Some(id) => id,
                None => continue,
            };
            if split_class_name(&ident.class_name).is_none()
                || !self.imodel_matches(ident)
                || !self.classes_compatible(&ident.class_name, full_class_name).await?
            {
                continue;
            }

            match classes
                .iter_mut()
                .find(|c| c.full_class_name == ident.class_name.as_str())
            {
                Some(class) => {
                    if !class.ids.contains(&id) {
                        class.ids.push(id.clone());
                    }
                }
                None => classes.push(FilteredClass {
                    full_class_name: ident.class_name.to_string(),
                    ids: vec![id.clone()],
                }),
            }

            let is_target = path.path.len() == 1;
            let options = if is_target { path.options.as_ref() } else { None };
            match searched.iter_mut().find(|s| s.id == id) {
                Some(existing) => {
                    existing.is_target |= is_target;
                    existing.options =
                        FilteringPathOptions::merge(existing.options.as_ref(), options);
                }
                None => searched.push(SearchedInstance {
                    id,
                    is_target,
                    options: options.cloned(),
                }),
            }
        }

        if classes.is_empty() {
            return Ok(None);
        }
        if level.has_target_ancestor || self.filter.mode == FilteringMode::Search {
            Ok(Some(apply_search(query, &searched, level.has_target_ancestor)?))
        } else {
            Ok(Some(apply_filter(query, &classes)))
        }
    }
}

/// Filtering metadata of a node matched by `matched` (paths starting at the
/// node).  `None` when the node has nothing to do with the filter.
fn build_meta(
    matched: &[HierarchyFilteringPath],
    has_target_ancestor: bool,
    depth_in_path: usize,
) -> Option<NodeFilteringMeta> {
    let mut meta = NodeFilteringMeta {
        has_filter_target_ancestor: has_target_ancestor,
        depth_in_path,
        ..Default::default()
    };
    let mut suffixes = vec![];
    for path in matched {
        if path.path.len() == 1 {
            meta.is_filter_target = true;
            meta.filter_target_options = FilteringPathOptions::merge(
                meta.filter_target_options.as_ref(),
                path.options.as_ref(),
            );
        } else {
            suffixes.push(path.suffix());
        }
    }
    meta.filtered_children_identifier_paths = dedupe_paths(suffixes);

    if meta.is_filter_target
        || meta.has_filter_target_ancestor
        || !meta.filtered_children_identifier_paths.is_empty()
    {
        Some(meta)
    } else {
        None
    }
}

#[async_trait]
impl HierarchyDefinition for FilteringHierarchyDefinition {
    async fn define_hierarchy_level(
        &self,
        props: DefineHierarchyLevelProps<'_>,
    ) -> Result<Vec<HierarchyLevelDefinition>> {
        let defs = self.source.define_hierarchy_level(props).await?;
        let level = match self.level_paths(props.parent_node) {
            Some(level) => level,
            None => return Ok(defs),
        };
        let keep_unmatched =
            level.has_target_ancestor || self.filter.mode == FilteringMode::Search;

        let mut result = vec![];
        for def in defs {
            match def {
                HierarchyLevelDefinition::GenericNode(mut node) => {
                    let matched = self.paths_matching_key(&level.paths, &node.key).await?;
                    node.filtering =
                        build_meta(&matched, level.has_target_ancestor, level.depth_in_path);
                    if node.filtering.is_some() || keep_unmatched {
                        result.push(HierarchyLevelDefinition::GenericNode(node));
                    }
                }
                HierarchyLevelDefinition::InstanceNodesQuery {
                    full_class_name,
                    query,
                } => {
                    match self
                        .filter_query_definition(&full_class_name, query.clone(), &level)
                        .await?
                    {
                        Some(query) => result.push(HierarchyLevelDefinition::InstanceNodesQuery {
                            full_class_name,
                            query,
                        }),
                        None if keep_unmatched => {
                            result.push(HierarchyLevelDefinition::InstanceNodesQuery {
                                full_class_name,
                                query,
                            })
                        }
                        None => {
                            trace!(class = %full_class_name, "filtered_out_definition");
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    async fn parse_node(&self, row: &Row, parent: Option<&ParentNode>) -> Result<SourceNode> {
        let mut node = self.source.parse_node(row, parent).await?;
        let level = match self.level_paths(parent) {
            Some(level) => level,
            None => return Ok(node),
        };

        let matched = match row.get_str(FILTER_EC_INSTANCE_ID) {
            // Strict filter queries tell us which identifier the row matched.
            Some(filter_id) => {
                let filter_class = row.get_str(FILTER_CLASS_NAME).unwrap_or_default();
                level
                    .paths
                    .iter()
                    .filter(|path| {
                        matches!(
                            path.path.first(),
                            Some(HierarchyNodeIdentifier::Instance(ident))
                                if ident.class_name.as_str() == filter_class && ids_equal(&ident.id, filter_id)
                        )
                    })
                    .cloned()
                    .collect()
            }
            None => self.paths_matching_key(&level.paths, &node.key).await?,
        };

        let has_target_ancestor = level.has_target_ancestor
            || row.get_bool(HAS_FILTER_TARGET_ANCESTOR) == Some(true);
        let mut meta = build_meta(&matched, has_target_ancestor, level.depth_in_path);

        if row.get_bool(IS_FILTER_TARGET) == Some(true) {
            let meta = meta.get_or_insert_with(|| NodeFilteringMeta {
                has_filter_target_ancestor: has_target_ancestor,
                depth_in_path: level.depth_in_path,
                ..Default::default()
            });
            meta.is_filter_target = true;
            meta.filter_target_options = FilteringPathOptions::merge(
                meta.filter_target_options.as_ref(),
                parse_target_options(row.get(FILTER_TARGET_OPTIONS)).as_ref(),
            );
        }
        node.filtering = meta;
        Ok(node)
    }

    async fn pre_process_node(&self, node: SourceNode) -> Result<Option<SourceNode>> {
        let mut node = match self.source.pre_process_node(node).await? {
            Some(node) => node,
            None => return Ok(None),
        };
        let (is_target, has_target_ancestor) = match &node.filtering {
            Some(meta) => (meta.is_filter_target, meta.has_filter_target_ancestor),
            None => return Ok(Some(node)),
        };
        if is_target && node.processing.hide_in_hierarchy() {
            if !has_target_ancestor {
                trace!(key = ?node.key, "dropped_hidden_filter_target");
                return Ok(None);
            }
            node.processing.flags.remove(ProcessingFlags::HideInHierarchy);
        }
        Ok(Some(node))
    }

    async fn post_process_node(&self, node: ProcessedNode) -> Result<Option<ProcessedNode>> {
        let mut node = match self.source.post_process_node(node).await? {
            Some(node) => node,
            None => return Ok(None),
        };
        let expand = if node.is_grouping() {
            grouping_node_auto_expand(&node)
        } else {
            node_auto_expand(&node)
        };
        if expand {
            node.auto_expand = Some(true);
        }
        Ok(Some(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abstract_source::StaticClassHierarchy,
        hierarchy::RevealOption,
        pipeline::definition::default_node_parser,
    };

    /// Generic "a" and "b" at the root plus an "a.Element" query; "x" under
    /// "a".
    struct Source;

    #[async_trait]
    impl HierarchyDefinition for Source {
        async fn define_hierarchy_level(
            &self,
            props: DefineHierarchyLevelProps<'_>,
        ) -> Result<Vec<HierarchyLevelDefinition>> {
            Ok(match props.parent_node {
                None => vec![
                    HierarchyLevelDefinition::GenericNode(SourceNode::generic("a", "A")),
                    HierarchyLevelDefinition::GenericNode(SourceNode::generic("b", "B")),
                    HierarchyLevelDefinition::instances(
                        "a.Element",
                        EcSqlQueryDef::new("SELECT * FROM a.Element"),
                    ),
                ],
                Some(_) => vec![HierarchyLevelDefinition::GenericNode(SourceNode::generic(
                    "x", "X",
                ))],
            })
        }
    }

    fn inspector() -> Arc<dyn ClassHierarchyInspector> {
        Arc::new(
            StaticClassHierarchy::new("imodel")
                .with_class("a.Element", "Element", &[])
                .with_class("a.Wall", "Wall", &["a.Element"]),
        )
    }

    fn filtering(paths: Vec<HierarchyFilteringPath>, mode: FilteringMode) -> FilteringHierarchyDefinition {
        FilteringHierarchyDefinition::new(Arc::new(Source), inspector(), HierarchyFilter::new(paths, mode))
    }

    fn generic_path(ids: &[&str]) -> HierarchyFilteringPath {
        ids.iter()
            .map(|id| HierarchyNodeIdentifier::generic(id))
            .collect::<Vec<_>>()
            .into()
    }

    fn generic_node(def: &HierarchyLevelDefinition) -> &SourceNode {
        match def {
            HierarchyLevelDefinition::GenericNode(node) => node,
            _ => panic!("expected a generic node definition"),
        }
    }

    #[tokio::test]
    async fn test_filter_mode_drops_unmatched_definitions() {
        let def = filtering(vec![generic_path(&["a", "x"])], FilteringMode::Filter);
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps::default())
            .await
            .unwrap();
        assert_eq!(level.len(), 1);
        let a = generic_node(&level[0]);
        let meta = a.filtering.as_ref().unwrap();
        assert!(!meta.is_filter_target);
        assert_eq!(meta.filtered_children_identifier_paths, vec![generic_path(&["x"])]);

        let parent = a.as_parent();
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps {
                parent_node: Some(&parent),
                instance_filter: None,
            })
            .await
            .unwrap();
        let x = generic_node(&level[0]).filtering.clone().unwrap();
        assert!(x.is_filter_target);
        assert!(x.filtered_children_identifier_paths.is_empty());
        assert_eq!(x.depth_in_path, 1);
    }

    #[tokio::test]
    async fn test_search_mode_keeps_unmatched_definitions() {
        let def = filtering(vec![generic_path(&["b"])], FilteringMode::Search);
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps::default())
            .await
            .unwrap();
        assert_eq!(level.len(), 3);
        assert_eq!(generic_node(&level[0]).filtering, None);
        assert!(generic_node(&level[1]).filtering.as_ref().unwrap().is_filter_target);
        assert_eq!(
            level[2],
            HierarchyLevelDefinition::instances("a.Element", EcSqlQueryDef::new("SELECT * FROM a.Element"))
        );
    }

    #[tokio::test]
    async fn test_target_parent_passes_everything_through() {
        let def = filtering(vec![generic_path(&["a"])], FilteringMode::Filter);
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps::default())
            .await
            .unwrap();
        let parent = generic_node(&level[0]).as_parent();
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps {
                parent_node: Some(&parent),
                instance_filter: None,
            })
            .await
            .unwrap();
        let x = generic_node(&level[0]).filtering.clone().unwrap();
        assert!(x.has_filter_target_ancestor);
        assert!(!x.is_filter_target);
    }

    #[tokio::test]
    async fn test_instance_query_injection() {
        let wall = HierarchyFilteringPath::new(
            vec![HierarchyNodeIdentifier::instance("a.Wall", "0x0A")],
            Some(FilteringPathOptions::reveal(RevealOption::Flag(true))),
        );
        let foreign = HierarchyFilteringPath::from(vec![HierarchyNodeIdentifier::Instance(
            InstanceKey::new("a.Element", "0x5").with_imodel_key("elsewhere"),
        )]);
        let def = filtering(vec![wall.clone(), foreign], FilteringMode::Filter);
        let level = def
            .define_hierarchy_level(DefineHierarchyLevelProps::default())
            .await
            .unwrap();
        assert_eq!(level.len(), 1);
        match &level[0] {
            HierarchyLevelDefinition::InstanceNodesQuery { query, .. } => {
                assert_eq!(
                    query.ctes,
                    vec!["FilteringInfo(ECInstanceId, FilterClassName) AS (SELECT ECInstanceId, 'a.Wall' AS FilterClassName FROM [a].[Wall] WHERE ECInstanceId IN (0xa))".to_string()]
                );
                assert!(query.ecsql.contains("FROM (SELECT * FROM a.Element) [q] JOIN FilteringInfo"));
            }
            _ => panic!("expected a query definition"),
        }

        let search = filtering(vec![wall], FilteringMode::Search);
        let level = search
            .define_hierarchy_level(DefineHierarchyLevelProps::default())
            .await
            .unwrap();
        match &level[2] {
            HierarchyLevelDefinition::InstanceNodesQuery { query, .. } => {
                assert!(query.ctes[0].contains(r#"VALUES (0xa, 1, '{"reveal":true}')"#));
                assert!(query.ecsql.contains("0 AS [HasFilterTargetAncestor]"));
            }
            _ => panic!("expected a query definition"),
        }
    }

    #[tokio::test]
    async fn test_parse_node_from_filter_columns() {
        let path = HierarchyFilteringPath::from(vec![
            HierarchyNodeIdentifier::instance("a.Element", "0xa"),
            HierarchyNodeIdentifier::generic("x"),
        ]);
        let def = filtering(vec![path], FilteringMode::Filter);
        let row = Row::new()
            .with("FullClassName", "a.Wall")
            .with("ECInstanceId", "0xa")
            .with(FILTER_EC_INSTANCE_ID, "0xA")
            .with(FILTER_CLASS_NAME, "a.Element");
        let node = def.parse_node(&row, None).await.unwrap();
        assert_eq!(node, {
            let mut expected = default_node_parser(&row).unwrap();
            expected.filtering = Some(NodeFilteringMeta {
                filtered_children_identifier_paths: vec![generic_path(&["x"])],
                ..Default::default()
            });
            expected
        });
    }

    #[tokio::test]
    async fn test_parse_node_from_search_columns() {
        let def = filtering(vec![], FilteringMode::Search);
        let row = Row::new()
            .with("FullClassName", "a.Wall")
            .with("ECInstanceId", "0xa")
            .with(IS_FILTER_TARGET, 1)
            .with(FILTER_TARGET_OPTIONS, r#"{"reveal":{"depthInHierarchy":3}}"#)
            .with(HAS_FILTER_TARGET_ANCESTOR, 0);
        let meta = def.parse_node(&row, None).await.unwrap().filtering.unwrap();
        assert!(meta.is_filter_target);
        assert!(!meta.has_filter_target_ancestor);
        assert_eq!(
            meta.filter_target_options,
            Some(FilteringPathOptions::reveal(RevealOption::DepthInHierarchy {
                depth_in_hierarchy: 3
            }))
        );
    }

    #[tokio::test]
    async fn test_hidden_targets() {
        let def = filtering(vec![], FilteringMode::Filter);
        let mut node = SourceNode::generic("t", "T").with_flags(ProcessingFlags::HideInHierarchy);
        node.filtering = Some(NodeFilteringMeta {
            is_filter_target: true,
            ..Default::default()
        });
        assert_eq!(def.pre_process_node(node.clone()).await.unwrap(), None);

        if let Some(meta) = &mut node.filtering {
            meta.has_filter_target_ancestor = true;
        }
        let kept = def.pre_process_node(node).await.unwrap().unwrap();
        assert!(!kept.processing.hide_in_hierarchy());
    }
}
