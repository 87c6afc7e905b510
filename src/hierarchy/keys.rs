use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use ustr::Ustr;

/// Identifies a single EC instance in a specific data source.
///
/// Instance ids are hex strings like "0x1c".  We compare them numerically when
/// both sides parse as hex and case-insensitively otherwise, because different
/// query paths are not consistent about casing or zero-padding.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceKey {
    pub class_name: Ustr,
    pub id: String,
    /// Key of the data source (iModel) the instance comes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imodel_key: Option<String>,
}

pub fn parse_hex_id(id: &str) -> Option<u64> {
    let digits = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

pub fn ids_equal(a: &str, b: &str) -> bool {
    match (parse_hex_id(a), parse_hex_id(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

impl InstanceKey {
    pub fn new(class_name: &str, id: &str) -> Self {
        InstanceKey {
            class_name: Ustr::from(class_name),
            id: id.to_string(),
            imodel_key: None,
        }
    }

    pub fn with_imodel_key(mut self, imodel_key: &str) -> Self {
        self.imodel_key = Some(imodel_key.to_string());
        self
    }
}

impl PartialEq for InstanceKey {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name
            && ids_equal(&self.id, &other.id)
            && self.imodel_key == other.imodel_key
    }
}

impl Eq for InstanceKey {}

impl Hash for InstanceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class_name.hash(state);
        match parse_hex_id(&self.id) {
            Some(n) => n.hash(state),
            None => self.id.to_ascii_lowercase().hash(state),
        }
        self.imodel_key.hash(state);
    }
}

/// The identity of a node.  Generic and instance keys come from hierarchy
/// definitions; the grouping variants are only ever created by the grouping
/// engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HierarchyNodeKey {
    #[serde(rename = "generic")]
    Generic {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    #[serde(rename = "instances", rename_all = "camelCase")]
    Instances { instance_keys: Vec<InstanceKey> },
    #[serde(rename = "class-grouping", rename_all = "camelCase")]
    ClassGrouping { class_name: Ustr },
    #[serde(rename = "label-grouping", rename_all = "camelCase")]
    LabelGrouping {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
    #[serde(rename = "property-grouping:value", rename_all = "camelCase")]
    PropertyValueGrouping {
        properties_class_name: Ustr,
        property_name: String,
        formatted_property_value: String,
    },
    #[serde(rename = "property-grouping:range", rename_all = "camelCase")]
    PropertyRangeGrouping {
        properties_class_name: Ustr,
        property_name: String,
        from_value: f64,
        to_value: f64,
    },
    #[serde(rename = "property-grouping:other", rename_all = "camelCase")]
    PropertyOtherValuesGrouping {
        properties_class_name: Ustr,
        property_name: String,
    },
}

impl HierarchyNodeKey {
    pub fn generic(id: &str) -> Self {
        HierarchyNodeKey::Generic {
            id: id.to_string(),
            source: None,
        }
    }

    pub fn instances(instance_keys: Vec<InstanceKey>) -> Self {
        HierarchyNodeKey::Instances { instance_keys }
    }

    pub fn is_grouping(&self) -> bool {
        !matches!(
            self,
            HierarchyNodeKey::Generic { .. } | HierarchyNodeKey::Instances { .. }
        )
    }

    pub fn instance_keys(&self) -> &[InstanceKey] {
        match self {
            HierarchyNodeKey::Instances { instance_keys } => instance_keys,
            _ => &[],
        }
    }
}

/// Canonical string for a node's position in the hierarchy, used to key
/// caches.  The root is represented by the empty string.
pub fn node_identity(parent_keys: &[HierarchyNodeKey], key: &HierarchyNodeKey) -> String {
    serde_json::to_string(&(parent_keys, key)).unwrap_or_default()
}
