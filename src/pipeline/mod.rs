//! Level materialization: definitions in, hierarchy nodes out.

mod auto_expand;
pub mod cache;
mod class_based;
mod definition;
pub mod ecsql;
mod events;
mod filtering;
mod formatter;
mod grouping;
mod provider;

pub use auto_expand::{grouping_node_auto_expand, node_auto_expand};
pub use cache::{HierarchyCache, LruMap, RequestKey};
pub use class_based::{ChildLevelProps, ClassBasedHierarchyDefinition};
pub use definition::{
    default_node_parser, DefineHierarchyLevelProps, DefinitionAdapter, HierarchyDefinition,
    HierarchyLevelDefinition,
};
pub use events::{DataChangedEvent, HierarchyChange};
pub use filtering::{FilteringHierarchyDefinition, FilteringMode, HierarchyFilter};
pub use formatter::{format_label, DefaultValueFormatter, ValueFormatter};
pub use grouping::{
    find_grouping_node, group_level, GroupingContext, GroupingKind, DEFAULT_GROUPING_ORDER,
    NOT_SPECIFIED_LABEL, OTHER_VALUES_LABEL,
};
pub use provider::{GetHierarchyNodesProps, HierarchyProvider, HierarchyProviderProps};
