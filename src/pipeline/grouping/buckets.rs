use serde_json::Value;
use ustr::Ustr;

use super::{grouping_of, GroupingContext};
use crate::{
    error::Result,
    hierarchy::{
        BaseGroupingParams, HierarchyNodeKey, LabelGroupingAction, ProcessedNode,
        TypedPrimitiveValue,
    },
};

/// One grouping pass over a set of sibling nodes.
#[derive(Clone, Debug, PartialEq)]
pub(super) enum GroupingHandler {
    BaseClass(Ustr),
    Class,
    /// The property group at this index of each node's property grouping.
    Properties(usize),
    Label,
}

/// A would-be grouping node.  `members` index into the handler's input.
pub(super) struct Bucket {
    pub key: HierarchyNodeKey,
    pub label: String,
    pub members: Vec<usize>,
    /// Property buckets come out ranges first, then values, then "Other",
    /// then "Not specified".
    order: (u8, usize),
}

pub(super) struct Bucketing {
    pub groups: Vec<Bucket>,
    pub ungrouped: Vec<usize>,
}

const RANGE_BUCKET: u8 = 0;
const VALUE_BUCKET: u8 = 1;
const OTHER_BUCKET: u8 = 2;
const UNSPECIFIED_BUCKET: u8 = 3;

pub const OTHER_VALUES_LABEL: &str = "Other";
pub const NOT_SPECIFIED_LABEL: &str = "Not specified";

fn find_bucket(buckets: &[Bucket], key: &HierarchyNodeKey) -> Option<usize> {
    buckets.iter().position(|b| &b.key == key)
}

impl GroupingHandler {
    /// The customization a node asked this handler for, `None` if the node
    /// didn't ask for this kind of grouping at all.
    pub fn base_params<'n>(&self, node: &'n ProcessedNode) -> Option<&'n BaseGroupingParams> {
        let grouping = grouping_of(node)?;
        match self {
            GroupingHandler::BaseClass(_) => grouping.by_base_classes.as_ref().map(|p| &p.base),
            GroupingHandler::Class => grouping.by_class.as_ref(),
            GroupingHandler::Properties(_) => grouping.by_properties.as_ref().map(|p| &p.base),
            GroupingHandler::Label => grouping
                .by_label
                .as_ref()
                .filter(|p| p.action == LabelGroupingAction::Group)
                .map(|p| &p.base),
        }
    }

    pub async fn bucket(
        &self,
        ctx: &GroupingContext<'_>,
        nodes: &[ProcessedNode],
    ) -> Result<Bucketing> {
        let mut buckets: Vec<Bucket> = vec![];
        let mut ungrouped = vec![];
        for (idx, node) in nodes.iter().enumerate() {
            let placement = if node.is_grouping() || self.base_params(node).is_none() {
                None
            } else {
                self.placement(ctx, node).await?
            };
            let (key, order) = match placement {
                Some(placement) => placement,
                None => {
                    ungrouped.push(idx);
                    continue;
                }
            };
            match find_bucket(&buckets, &key) {
                Some(b) => buckets[b].members.push(idx),
                None => {
                    let label = self.bucket_label(ctx, node, &key).await?;
                    let order = match order.0 {
                        VALUE_BUCKET => (VALUE_BUCKET, buckets.len()),
                        _ => order,
                    };
                    buckets.push(Bucket {
                        key,
                        label,
                        members: vec![idx],
                        order,
                    });
                }
            }
        }
        buckets.sort_by_key(|b| b.order);
        Ok(Bucketing {
            groups: buckets,
            ungrouped,
        })
    }

    /// Which bucket a node that asked for this handler goes in, if any.
    async fn placement(
        &self,
        ctx: &GroupingContext<'_>,
        node: &ProcessedNode,
    ) -> Result<Option<(HierarchyNodeKey, (u8, usize))>> {
        let class_name = node.key.instance_keys().first().map(|k| k.class_name);
        let grouping = match grouping_of(node) {
            Some(grouping) => grouping,
            None => return Ok(None),
        };
        Ok(match self {
            GroupingHandler::BaseClass(base) => {
                let requested = grouping
                    .by_base_classes
                    .as_ref()
                    .map_or(false, |p| p.full_class_names.contains(base));
                let derives = match class_name {
                    Some(class_name) if requested => {
                        ctx.inspector.class_derives_from(&class_name, base).await?
                    }
                    _ => false,
                };
                if derives {
                    Some((HierarchyNodeKey::ClassGrouping { class_name: *base }, (0, 0)))
                } else {
                    None
                }
            }
            GroupingHandler::Class => {
                class_name.map(|class_name| (HierarchyNodeKey::ClassGrouping { class_name }, (0, 0)))
            }
            GroupingHandler::Label => Some((
                HierarchyNodeKey::LabelGrouping {
                    label: node.label.clone(),
                    group_id: grouping.by_label.as_ref().and_then(|p| p.group_id.clone()),
                },
                (0, 0),
            )),
            GroupingHandler::Properties(index) => {
                let params = match &grouping.by_properties {
                    Some(params) => params,
                    None => return Ok(None),
                };
                let group = match params.property_groups.get(*index) {
                    Some(group) => group,
                    None => return Ok(None),
                };
                let properties_class_name = params.properties_class_name;
                let property_name = group.property_name.clone();

                // Values that format to nothing are as good as missing.
                let unspecified = if params.create_group_for_unspecified_values {
                    Some((
                        HierarchyNodeKey::PropertyValueGrouping {
                            properties_class_name,
                            property_name: property_name.clone(),
                            formatted_property_value: String::new(),
                        },
                        (UNSPECIFIED_BUCKET, 0),
                    ))
                } else {
                    None
                };
                let value = match &group.property_value {
                    None | Some(Value::Null) => return Ok(unspecified),
                    Some(value) => value,
                };

                if let Some(ranges) = &group.ranges {
                    let in_range = value.as_f64().and_then(|v| {
                        ranges
                            .iter()
                            .position(|r| r.from_value <= v && v < r.to_value)
                    });
                    return Ok(match in_range {
                        Some(range_idx) => Some((
                            HierarchyNodeKey::PropertyRangeGrouping {
                                properties_class_name,
                                property_name,
                                from_value: ranges[range_idx].from_value,
                                to_value: ranges[range_idx].to_value,
                            },
                            (RANGE_BUCKET, range_idx),
                        )),
                        None if params.create_group_for_out_of_ranges_values => Some((
                            HierarchyNodeKey::PropertyOtherValuesGrouping {
                                properties_class_name,
                                property_name,
                            },
                            (OTHER_BUCKET, 0),
                        )),
                        None => None,
                    });
                }

                let formatted_property_value = match TypedPrimitiveValue::from_json(value) {
                    Some(typed) => ctx.formatter.format(&typed).await?,
                    None => value.to_string(),
                };
                if formatted_property_value.is_empty() {
                    return Ok(unspecified);
                }
                Some((
                    HierarchyNodeKey::PropertyValueGrouping {
                        properties_class_name,
                        property_name,
                        formatted_property_value,
                    },
                    (VALUE_BUCKET, 0),
                ))
            }
        })
    }

    async fn bucket_label(
        &self,
        ctx: &GroupingContext<'_>,
        node: &ProcessedNode,
        key: &HierarchyNodeKey,
    ) -> Result<String> {
        Ok(match key {
            HierarchyNodeKey::ClassGrouping { class_name } => {
                ctx.inspector.class_label(class_name).await?
            }
            HierarchyNodeKey::LabelGrouping { label, .. } => label.clone(),
            HierarchyNodeKey::PropertyValueGrouping {
                formatted_property_value,
                ..
            } => {
                if formatted_property_value.is_empty() {
                    NOT_SPECIFIED_LABEL.to_string()
                } else {
                    formatted_property_value.clone()
                }
            }
            HierarchyNodeKey::PropertyRangeGrouping {
                from_value,
                to_value,
                ..
            } => {
                let custom = match (self, grouping_of(node).and_then(|g| g.by_properties.as_ref())) {
                    (GroupingHandler::Properties(index), Some(params)) => params
                        .property_groups
                        .get(*index)
                        .and_then(|g| g.ranges.as_ref())
                        .and_then(|ranges| {
                            ranges
                                .iter()
                                .find(|r| r.from_value == *from_value && r.to_value == *to_value)
                        })
                        .and_then(|r| r.range_label.clone()),
                    _ => None,
                };
                match custom {
                    Some(label) => label,
                    None => format!(
                        "{} - {}",
                        ctx.formatter.format(&TypedPrimitiveValue::double(*from_value)).await?,
                        ctx.formatter.format(&TypedPrimitiveValue::double(*to_value)).await?
                    ),
                }
            }
            HierarchyNodeKey::PropertyOtherValuesGrouping { .. } => OTHER_VALUES_LABEL.to_string(),
            HierarchyNodeKey::Generic { .. } | HierarchyNodeKey::Instances { .. } => node.label.clone(),
        })
    }
}
