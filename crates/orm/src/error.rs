//! Error types for the mapping layer
//!
//! Provides error handling for query execution, schema registration,
//! and record persistence.

use std::fmt;

/// Result type alias for mapping-layer operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for mapping-layer operations
#[derive(Debug, Clone, PartialEq)]
pub enum OrmError {
    /// A query expected to match exactly one record matched none
    ObjectNotFound(String),
    /// A query expected to match exactly one record matched several
    MultipleObjectsFound(String),
    /// An unknown logical field name was used in a filter, projection, or accessor
    InvalidField(String),
    /// An update matched zero rows: the row disappeared between fetch and save
    RowVanished(String),
    /// Malformed schema, scale, or relationship definition
    Configuration(String),
    /// Unknown domain, or a label with no coded value in its domain
    Domain(String),
    /// Row store failure
    Backend(String),
}

impl fmt::Display for OrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrmError::ObjectNotFound(query) => {
                write!(f, "No record found matching: {}", query)
            }
            OrmError::MultipleObjectsFound(query) => {
                write!(f, "Multiple records found matching: {}", query)
            }
            OrmError::InvalidField(name) => write!(f, "Invalid field name: {}", name),
            OrmError::RowVanished(query) => {
                write!(f, "Update affected zero rows for: {}", query)
            }
            OrmError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            OrmError::Domain(msg) => write!(f, "Domain error: {}", msg),
            OrmError::Backend(msg) => write!(f, "Row store error: {}", msg),
        }
    }
}

impl std::error::Error for OrmError {}

// Convert from serde_json errors raised while translating values
impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = OrmError::ObjectNotFound("OBJECTID = 5".to_string());
        assert_eq!(err.to_string(), "No record found matching: OBJECTID = 5");

        let err = OrmError::InvalidField("widget_nam".to_string());
        assert_eq!(err.to_string(), "Invalid field name: widget_nam");
    }
}
