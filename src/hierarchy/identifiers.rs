use serde::{Deserialize, Serialize};

use super::keys::{HierarchyNodeKey, InstanceKey};

/// Identifies a generic (non-instance) node, optionally scoped to the hierarchy
/// definition that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericNodeIdentifier {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One hop of a filtering path.
///
/// Instance identifiers are tried first when deserializing because they are
/// the ones with the distinguishing `className` field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HierarchyNodeIdentifier {
    Instance(InstanceKey),
    Generic(GenericNodeIdentifier),
}

impl HierarchyNodeIdentifier {
    pub fn generic(id: &str) -> Self {
        HierarchyNodeIdentifier::Generic(GenericNodeIdentifier {
            id: id.to_string(),
            source: None,
        })
    }

    pub fn instance(class_name: &str, id: &str) -> Self {
        HierarchyNodeIdentifier::Instance(InstanceKey::new(class_name, id))
    }

    /// Generic identifiers only ever match generic keys with the same id and
    /// the same source.
    pub fn matches_generic_key(&self, key: &HierarchyNodeKey) -> bool {
        match (self, key) {
            (
                HierarchyNodeIdentifier::Generic(ident),
                HierarchyNodeKey::Generic { id, source },
            ) => &ident.id == id && &ident.source == source,
            _ => false,
        }
    }
}

/// How far towards the target of a path the hierarchy should be expanded.
///
/// `DepthInPath` is an index into the path (0 is the path's root identifier),
/// `DepthInHierarchy` is an absolute depth where root level nodes have depth 0
/// and grouping nodes count as levels.  The node at the requested depth is
/// made visible, which means its ancestors get expanded but it doesn't.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RevealOption {
    Flag(bool),
    DepthInPath {
        #[serde(rename = "depthInPath")]
        depth_in_path: usize,
    },
    DepthInHierarchy {
        #[serde(rename = "depthInHierarchy")]
        depth_in_hierarchy: usize,
    },
}

impl RevealOption {
    pub fn depth(&self) -> Option<usize> {
        match self {
            RevealOption::Flag(_) => None,
            RevealOption::DepthInPath { depth_in_path } => Some(*depth_in_path),
            RevealOption::DepthInHierarchy { depth_in_hierarchy } => Some(*depth_in_hierarchy),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteringPathOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reveal: Option<RevealOption>,
}

impl FilteringPathOptions {
    pub fn reveal(reveal: RevealOption) -> Self {
        FilteringPathOptions {
            reveal: Some(reveal),
        }
    }

    /// Merge the options of two paths that end up at the same node.
    ///
    /// A literal `true` beats everything, `false` loses to everything, and
    /// among structured depths the numerically greatest one wins.  Ties keep
    /// the first option.
    pub fn merge(
        a: Option<&FilteringPathOptions>,
        b: Option<&FilteringPathOptions>,
    ) -> Option<FilteringPathOptions> {
        let reveal = merge_reveal(
            a.and_then(|o| o.reveal.clone()),
            b.and_then(|o| o.reveal.clone()),
        );
        match (a, b, reveal) {
            (None, None, _) => None,
            (_, _, reveal) => Some(FilteringPathOptions { reveal }),
        }
    }
}

fn merge_reveal(a: Option<RevealOption>, b: Option<RevealOption>) -> Option<RevealOption> {
    use RevealOption::Flag;
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(Flag(true)), _) | (_, Some(Flag(true))) => Some(Flag(true)),
        (Some(Flag(false)), x) | (x, Some(Flag(false))) => x,
        (Some(a), Some(b)) => {
            if b.depth() > a.depth() {
                Some(b)
            } else {
                Some(a)
            }
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FilteringPathRep {
    Bare(Vec<HierarchyNodeIdentifier>),
    WithOptions {
        path: Vec<HierarchyNodeIdentifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<FilteringPathOptions>,
    },
}

/// A root-to-target chain of identifiers that filtering should reveal.  Paths
/// without options serialize as a bare array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "FilteringPathRep", into = "FilteringPathRep")]
pub struct HierarchyFilteringPath {
    pub path: Vec<HierarchyNodeIdentifier>,
    pub options: Option<FilteringPathOptions>,
}

impl From<FilteringPathRep> for HierarchyFilteringPath {
    fn from(rep: FilteringPathRep) -> Self {
        match rep {
            FilteringPathRep::Bare(path) => HierarchyFilteringPath {
                path,
                options: None,
            },
            FilteringPathRep::WithOptions { path, options } => {
                HierarchyFilteringPath { path, options }
            }
        }
    }
}

impl From<HierarchyFilteringPath> for FilteringPathRep {
    fn from(p: HierarchyFilteringPath) -> Self {
        match p.options {
            None => FilteringPathRep::Bare(p.path),
            options => FilteringPathRep::WithOptions {
                path: p.path,
                options,
            },
        }
    }
}

impl From<Vec<HierarchyNodeIdentifier>> for HierarchyFilteringPath {
    fn from(path: Vec<HierarchyNodeIdentifier>) -> Self {
        HierarchyFilteringPath {
            path,
            options: None,
        }
    }
}

impl HierarchyFilteringPath {
    pub fn new(path: Vec<HierarchyNodeIdentifier>, options: Option<FilteringPathOptions>) -> Self {
        HierarchyFilteringPath { path, options }
    }

    /// The path minus its first identifier, keeping the options.
    pub fn suffix(&self) -> HierarchyFilteringPath {
        HierarchyFilteringPath {
            path: self.path.iter().skip(1).cloned().collect(),
            options: self.options.clone(),
        }
    }
}

/// Collapse paths with identical identifiers into one, merging their options.
/// The order of first appearance is preserved.
pub fn dedupe_paths(paths: Vec<HierarchyFilteringPath>) -> Vec<HierarchyFilteringPath> {
    let mut result: Vec<HierarchyFilteringPath> = Vec::with_capacity(paths.len());
    for p in paths {
        match result.iter_mut().find(|existing| existing.path == p.path) {
            Some(existing) => {
                existing.options =
                    FilteringPathOptions::merge(existing.options.as_ref(), p.options.as_ref());
            }
            None => result.push(p),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn depth_in_path(d: usize) -> Option<FilteringPathOptions> {
        Some(FilteringPathOptions::reveal(RevealOption::DepthInPath { depth_in_path: d }))
    }

    #[test]
    fn test_identifier_deserialization() {
        let ident: HierarchyNodeIdentifier =
            serde_json::from_value(json!({"className": "a.b", "id": "0x1"})).unwrap();
        assert_eq!(ident, HierarchyNodeIdentifier::instance("a.b", "0x1"));

        let ident: HierarchyNodeIdentifier =
            serde_json::from_value(json!({"id": "root", "source": "s"})).unwrap();
        assert!(ident.matches_generic_key(&HierarchyNodeKey::Generic {
            id: "root".to_string(),
            source: Some("s".to_string())
        }));
        assert!(!ident.matches_generic_key(&HierarchyNodeKey::generic("root")));
    }

    #[test]
    fn test_path_serialization_forms() {
        let bare: HierarchyFilteringPath =
            serde_json::from_value(json!([{"id": "a"}, {"id": "b"}])).unwrap();
        assert_eq!(bare.path.len(), 2);
        assert_eq!(bare.options, None);
        assert_eq!(
            serde_json::to_value(&bare).unwrap(),
            json!([{"id": "a"}, {"id": "b"}])
        );

        let with_options: HierarchyFilteringPath = serde_json::from_value(json!({
            "path": [{"id": "a"}],
            "options": {"reveal": {"depthInHierarchy": 2}},
        }))
        .unwrap();
        assert_eq!(
            with_options.options,
            Some(FilteringPathOptions::reveal(RevealOption::DepthInHierarchy {
                depth_in_hierarchy: 2
            }))
        );
    }

    #[test]
    fn test_merge_options_precedence() {
        let t = Some(FilteringPathOptions::reveal(RevealOption::Flag(true)));
        let f = Some(FilteringPathOptions::reveal(RevealOption::Flag(false)));

        assert_eq!(FilteringPathOptions::merge(None, None), None);
        assert_eq!(FilteringPathOptions::merge(t.as_ref(), depth_in_path(5).as_ref()), t);
        assert_eq!(FilteringPathOptions::merge(depth_in_path(5).as_ref(), t.as_ref()), t);
        assert_eq!(
            FilteringPathOptions::merge(f.as_ref(), depth_in_path(1).as_ref()),
            depth_in_path(1)
        );
        assert_eq!(
            FilteringPathOptions::merge(depth_in_path(1).as_ref(), depth_in_path(3).as_ref()),
            depth_in_path(3)
        );
        assert_eq!(
            FilteringPathOptions::merge(None, depth_in_path(2).as_ref()),
            depth_in_path(2)
        );
    }

    #[test]
    fn test_dedupe_paths() {
        let a = HierarchyNodeIdentifier::generic("a");
        let b = HierarchyNodeIdentifier::generic("b");
        let deduped = dedupe_paths(vec![
            HierarchyFilteringPath::new(vec![a.clone()], depth_in_path(1)),
            HierarchyFilteringPath::new(vec![b.clone()], None),
            HierarchyFilteringPath::new(vec![a.clone()], depth_in_path(2)),
        ]);
        assert_eq!(
            deduped,
            vec![
                HierarchyFilteringPath::new(vec![a], depth_in_path(2)),
                HierarchyFilteringPath::new(vec![b], None),
            ]
        );
    }
}
