use std::fmt;

pub type Result<T> = std::result::Result<T, HierarchyError>;

/// Express which part of the pipeline seems to be responsible for an error.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorLayer {
    /// The request itself has structural issues, like a grouping node that
    /// claims a non-grouping ancestor it cannot have.  This should not be used
    /// for filter paths that fail to match anything; those are a miss, not an
    /// error.
    BadInput,
    /// The hierarchy definition (or one of its hooks) failed.
    DefinitionLayer,
    /// A row produced by the row source could not be turned into a node, like
    /// a row lacking an instance id.
    DataLayer,
    /// The row source itself failed while executing a query.
    RowSourceLayer,
    /// Configuration could not be loaded or is inconsistent.
    ConfigLayer,
}

/// Payload to provide details about what went wrong for investigation
/// purposes.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorDetails {
    pub layer: ErrorLayer,
    /// Stringified version of the lower level error.
    pub message: String,
}

/// Errors are `Clone` because pending hierarchy levels are shared between
/// concurrent requests and every one of them needs to observe the failure.
#[derive(Clone, Debug, PartialEq)]
pub enum HierarchyError {
    /// An error that will persist for the current data source state, like a
    /// malformed row.
    StickyProblem(ErrorDetails),
    /// An error that might go away if retried later.
    TransientProblem(ErrorDetails),
    /// The row source refused to produce more than `limit` rows for a
    /// hierarchy level.  When this happens while determining whether a node
    /// has children, the provider treats the node as having children.
    RowsLimitExceeded { limit: u32 },
    /// The request was made under a provider configuration that has since
    /// changed.  Never handed out to callers.
    Cancelled,
    Unsupported,
}

impl HierarchyError {
    pub fn sticky(layer: ErrorLayer, message: impl Into<String>) -> Self {
        HierarchyError::StickyProblem(ErrorDetails {
            layer,
            message: message.into(),
        })
    }

    pub fn is_rows_limit_exceeded(&self) -> bool {
        matches!(self, HierarchyError::RowsLimitExceeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, HierarchyError::Cancelled)
    }
}

impl fmt::Display for HierarchyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyError::StickyProblem(details) => {
                write!(f, "{:?}: {}", details.layer, details.message)
            }
            HierarchyError::TransientProblem(details) => {
                write!(f, "{:?} (transient): {}", details.layer, details.message)
            }
            HierarchyError::RowsLimitExceeded { limit } => {
                write!(f, "Query rows limit of {} exceeded", limit)
            }
            HierarchyError::Cancelled => write!(f, "Cancelled"),
            HierarchyError::Unsupported => write!(f, "Unsupported"),
        }
    }
}

impl std::error::Error for HierarchyError {}

// JSON parse errors are sticky data problems.
impl From<serde_json::Error> for HierarchyError {
    fn from(err: serde_json::Error) -> HierarchyError {
        HierarchyError::sticky(ErrorLayer::DataLayer, err.to_string())
    }
}

/// IO errors only happen when loading configuration.
impl From<std::io::Error> for HierarchyError {
    fn from(err: std::io::Error) -> HierarchyError {
        HierarchyError::sticky(ErrorLayer::ConfigLayer, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_limit_display() {
        let err = HierarchyError::RowsLimitExceeded { limit: 123 };
        assert!(err.is_rows_limit_exceeded());
        assert_eq!(err.to_string(), "Query rows limit of 123 exceeded");
    }

    #[test]
    fn test_json_errors_are_sticky_data_problems() {
        let err: HierarchyError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        match err {
            HierarchyError::StickyProblem(details) => {
                assert_eq!(details.layer, ErrorLayer::DataLayer)
            }
            _ => panic!("expected a sticky problem"),
        }
    }
}
