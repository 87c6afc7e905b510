use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use ustr::Ustr;

bitflags! {
    /// Flags that change how a node participates in its hierarchy level rather
    /// than what the node is.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ProcessingFlags: u8 {
        /// The node never shows up itself; its children are spliced into the
        /// node's parent level in its place.
        const HideInHierarchy = 0b00000001;
        /// The node only shows up if it ends up having children.
        const HideIfNoChildren = 0b00000010;
    }
}

/// Processing parameters attached to a node by its hierarchy definition or by
/// the row it was parsed from.  These never reach the final `HierarchyNode`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProcessingParams {
    pub flags: ProcessingFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingParams>,
}

impl NodeProcessingParams {
    pub fn hide_in_hierarchy(&self) -> bool {
        self.flags.contains(ProcessingFlags::HideInHierarchy)
    }

    pub fn hide_if_no_children(&self) -> bool {
        self.flags.contains(ProcessingFlags::HideIfNoChildren)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingAutoExpand {
    Always,
    SingleChild,
}

/// Customization shared by every kind of grouping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BaseGroupingParams {
    /// Don't create the grouping node if it would be the only node in its
    /// hierarchy level.
    pub hide_if_no_siblings: bool,
    /// Don't create the grouping node if it would group only one node.
    pub hide_if_one_grouped_node: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<GroupingAutoExpand>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelGroupingAction {
    /// Put same-label nodes under a label grouping node.
    #[default]
    Group,
    /// Collapse same-label nodes into a single node.
    Merge,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LabelGroupingParams {
    #[serde(flatten)]
    pub base: BaseGroupingParams,
    pub action: LabelGroupingAction,
    /// Only nodes with the same group id get grouped or merged together.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BaseClassGroupingParams {
    #[serde(flatten)]
    pub base: BaseGroupingParams,
    pub full_class_names: Vec<Ustr>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PropertyValueRange {
    pub from_value: f64,
    pub to_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PropertyGroup {
    pub property_name: String,
    /// The node's value of the property, as selected by the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<PropertyValueRange>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PropertiesGroupingParams {
    #[serde(flatten)]
    pub base: BaseGroupingParams,
    pub properties_class_name: Ustr,
    pub property_groups: Vec<PropertyGroup>,
    pub create_group_for_out_of_ranges_values: bool,
    pub create_group_for_unspecified_values: bool,
}

/// Grouping requested for an instance node.  In JSON every kind may be given
/// either as a boolean or as an object with parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingParams {
    #[serde(
        default,
        deserialize_with = "flag_or_params",
        skip_serializing_if = "Option::is_none"
    )]
    pub by_label: Option<LabelGroupingParams>,
    #[serde(
        default,
        deserialize_with = "flag_or_params",
        skip_serializing_if = "Option::is_none"
    )]
    pub by_class: Option<BaseGroupingParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_base_classes: Option<BaseClassGroupingParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_properties: Option<PropertiesGroupingParams>,
}

impl GroupingParams {
    pub fn is_empty(&self) -> bool {
        self.by_label.is_none()
            && self.by_class.is_none()
            && self.by_base_classes.is_none()
            && self.by_properties.is_none()
    }
}

fn flag_or_params<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlagOr<T> {
        Flag(bool),
        Params(T),
    }

    Ok(match Option::<FlagOr<T>>::deserialize(deserializer)? {
        None | Some(FlagOr::Flag(false)) => None,
        Some(FlagOr::Flag(true)) => Some(T::default()),
        Some(FlagOr::Params(params)) => Some(params),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_grouping_params_flags_and_objects() {
        let params: GroupingParams = serde_json::from_value(json!({
            "byLabel": true,
            "byClass": false,
        }))
        .unwrap();
        assert_eq!(params.by_label, Some(LabelGroupingParams::default()));
        assert_eq!(params.by_class, None);

        let params: GroupingParams = serde_json::from_value(json!({
            "byLabel": {"action": "merge", "groupId": "g"},
            "byClass": {"hideIfOneGroupedNode": true, "autoExpand": "single-child"},
            "byBaseClasses": {"fullClassNames": ["a.base"], "hideIfNoSiblings": true},
        }))
        .unwrap();
        let by_label = params.by_label.unwrap();
        assert_eq!(by_label.action, LabelGroupingAction::Merge);
        assert_eq!(by_label.group_id.as_deref(), Some("g"));
        let by_class = params.by_class.unwrap();
        assert!(by_class.hide_if_one_grouped_node);
        assert_eq!(by_class.auto_expand, Some(GroupingAutoExpand::SingleChild));
        assert!(params.by_base_classes.unwrap().base.hide_if_no_siblings);
    }

    #[test]
    fn test_property_grouping_params() {
        let params: PropertiesGroupingParams = serde_json::from_value(json!({
            "propertiesClassName": "a.b",
            "propertyGroups": [{
                "propertyName": "height",
                "propertyValue": 3.5,
                "ranges": [{"fromValue": 0, "toValue": 5, "rangeLabel": "Low"}],
            }],
            "createGroupForOutOfRangesValues": true,
        }))
        .unwrap();
        assert_eq!(params.property_groups[0].ranges.as_ref().unwrap()[0].to_value, 5.0);
        assert!(params.create_group_for_out_of_ranges_values);
        assert!(!params.create_group_for_unspecified_values);
    }
}
