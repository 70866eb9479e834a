pub mod attrs;
pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{ErrorKind, FarsightError, PermissionError, QueryError};
pub use types::*;

/// Join ordered path parameters into a unique-attribute value with the
/// reserved separator. Fails when any parameter is empty, because a partial
/// join would collide with a different resource.
///
/// ```
/// assert_eq!(farsight_common::join_unique(&["us-central1", "ring-a"]).unwrap(), "us-central1|ring-a");
/// assert!(farsight_common::join_unique(&["us-central1", ""]).is_err());
/// ```
pub fn join_unique<S: AsRef<str>>(parts: &[S]) -> Result<String, QueryError> {
    if parts.is_empty() {
        return Err(QueryError::other("no path parameters to join"));
    }
    for part in parts {
        if part.as_ref().is_empty() {
            return Err(QueryError::other(format!(
                "empty path parameter in {:?}",
                parts.iter().map(|p| p.as_ref()).collect::<Vec<_>>()
            )));
        }
    }
    Ok(parts
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(&types::UNIQUE_SEPARATOR.to_string()))
}

/// Split a canonical query string back into its ordered path parameters.
///
/// ```
/// assert_eq!(farsight_common::split_unique("us-central1|ring-a"), vec!["us-central1", "ring-a"]);
/// ```
pub fn split_unique(query: &str) -> Vec<&str> {
    query.split(types::UNIQUE_SEPARATOR).collect()
}
