//! The node and path model shared by every stage of the pipeline.

pub mod identifiers;
pub mod keys;
pub mod node;
pub mod processing;
pub mod values;

pub use identifiers::{
    dedupe_paths, FilteringPathOptions, GenericNodeIdentifier, HierarchyFilteringPath,
    HierarchyNodeIdentifier, RevealOption,
};
pub use keys::{ids_equal, node_identity, HierarchyNodeKey, InstanceKey};
pub use node::{
    GroupingNodeInfo, HierarchyNode, NodeFilteringMeta, ParentNode, ProcessedChildren,
    ProcessedNode, SourceNode,
};
pub use processing::{
    BaseClassGroupingParams, BaseGroupingParams, GroupingAutoExpand, GroupingParams,
    LabelGroupingAction, LabelGroupingParams, NodeProcessingParams, ProcessingFlags,
    PropertiesGroupingParams, PropertyGroup, PropertyValueRange,
};
pub use values::{ConcatenatedValue, ConcatenatedValuePart, PrimitiveValueType, TypedPrimitiveValue};
