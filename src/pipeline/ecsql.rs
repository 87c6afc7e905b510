//! Text of the synthetic ECSQL that filtering wraps instance node queries in.
//!
//! Consumers assert on this text, so it must not change casually.

use serde_json::Value;

use crate::{
    abstract_source::EcSqlQueryDef,
    error::Result,
    hierarchy::{keys::parse_hex_id, FilteringPathOptions},
};

// Synthetic columns added to filtered queries.
pub const FILTER_EC_INSTANCE_ID: &str = "FilterECInstanceId";
pub const FILTER_CLASS_NAME: &str = "FilterClassName";
pub const IS_FILTER_TARGET: &str = "IsFilterTarget";
pub const FILTER_TARGET_OPTIONS: &str = "FilterTargetOptions";
pub const HAS_FILTER_TARGET_ANCESTOR: &str = "HasFilterTargetAncestor";

/// Split "Schema.Class" (or "Schema:Class") into its parts, refusing anything
/// that isn't a plain identifier pair so it can be spliced into ECSQL.
pub fn split_class_name(full_class_name: &str) -> Option<(&str, &str)> {
    let (schema, class) = full_class_name.split_once(|c: char| c == '.' || c == ':')?;
    let is_ident = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_ident(schema) && is_ident(class) {
        Some((schema, class))
    } else {
        None
    }
}

/// Canonical hex literal for an instance id, if it is one.
pub fn id_literal(id: &str) -> Option<String> {
    parse_hex_id(id).map(|n| format!("0x{:x}", n))
}

fn string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Instances of one class that a strict filter lets through.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredClass {
    pub full_class_name: String,
    /// Canonical hex literals.
    pub ids: Vec<String>,
}

pub fn filter_cte(classes: &[FilteredClass]) -> String {
    let selects: Vec<String> = classes
        .iter()
        .map(|c| {
            let table = match split_class_name(&c.full_class_name) {
                Some((schema, class)) => format!("[{}].[{}]", schema, class),
                None => format!("[{}]", c.full_class_name),
            };
            format!(
                "SELECT ECInstanceId, {} AS FilterClassName FROM {} WHERE ECInstanceId IN ({})",
                string_literal(&c.full_class_name),
                table,
                c.ids.join(", ")
            )
        })
        .collect();
    format!(
        "FilteringInfo(ECInstanceId, FilterClassName) AS ({})",
        selects.join(" UNION ALL ")
    )
}

pub fn filter_query(ecsql: &str) -> String {
    format!(
        "SELECT [q].*, IdToHex([f].[ECInstanceId]) AS [{}], [f].[FilterClassName] AS [{}] FROM ({}) [q] JOIN FilteringInfo [f] ON [f].[ECInstanceId] = [q].[ECInstanceId]",
        FILTER_EC_INSTANCE_ID, FILTER_CLASS_NAME, ecsql
    )
}

/// An instance a search tags, whether or not it is a target itself.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchedInstance {
    /// Canonical hex literal.
    pub id: String,
    pub is_target: bool,
    pub options: Option<FilteringPathOptions>,
}

pub fn search_cte(instances: &[SearchedInstance]) -> Result<String> {
    let mut rows = Vec::with_capacity(instances.len());
    for instance in instances {
        let options = match &instance.options {
            Some(options) if instance.is_target => {
                string_literal(&serde_json::to_string(options)?)
            }
            _ => "CAST(NULL AS TEXT)".to_string(),
        };
        rows.push(format!(
            "VALUES ({}, {}, {})",
            instance.id,
            if instance.is_target { 1 } else { 0 },
            options
        ));
    }
    Ok(format!(
        "FilteringInfo(ECInstanceId, IsFilterTarget, FilterTargetOptions) AS ({})",
        rows.join(" UNION ALL ")
    ))
}

pub fn search_query(ecsql: &str, has_filter_target_ancestor: bool) -> String {
    format!(
        "SELECT [q].*, [f].[IsFilterTarget] AS [{}], [f].[FilterTargetOptions] AS [{}], {} AS [{}] FROM ({}) [q] LEFT JOIN FilteringInfo [f] ON [f].[ECInstanceId] = [q].[ECInstanceId]",
        IS_FILTER_TARGET,
        FILTER_TARGET_OPTIONS,
        if has_filter_target_ancestor { 1 } else { 0 },
        HAS_FILTER_TARGET_ANCESTOR,
        ecsql
    )
}

/// Wrap `query` so only the given instances come back, tagged with the
/// identifier they matched.
pub fn apply_filter(mut query: EcSqlQueryDef, classes: &[FilteredClass]) -> EcSqlQueryDef {
    query.ctes.push(filter_cte(classes));
    query.ecsql = filter_query(&query.ecsql);
    query
}

/// Wrap `query` so every instance comes back, the searched ones tagged.
pub fn apply_search(
    mut query: EcSqlQueryDef,
    instances: &[SearchedInstance],
    has_filter_target_ancestor: bool,
) -> Result<EcSqlQueryDef> {
    query.ctes.push(search_cte(instances)?);
    query.ecsql = search_query(&query.ecsql, has_filter_target_ancestor);
    Ok(query)
}

/// Parse the `FilterTargetOptions` column.
pub fn parse_target_options(value: Option<&Value>) -> Option<FilteringPathOptions> {
    match value? {
        Value::String(s) => serde_json::from_str(s).ok(),
        other => serde_json::from_value(other.clone()).ok(),
    }
}
