//! Multi-document YAML manifests of managed resources.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::ManagedResource;

/// Parse every YAML document in `raw` as a `ManagedResource`.
///
/// Empty documents (a bare `---`) are skipped. Store-owned metadata such as
/// resource versions is ignored by stores on create, so manifests may be
/// exported objects.
///
/// # Errors
///
/// Returns `Error::Invalid` naming the offending document index.
pub fn parse_manifests(raw: &str) -> Result<Vec<ManagedResource>> {
    serde_yaml::Deserializer::from_str(raw)
        .enumerate()
        .filter_map(|(index, document)| {
            match serde_yaml::Value::deserialize(document) {
                Ok(serde_yaml::Value::Null) => None,
                Ok(value) => Some(
                    serde_yaml::from_value::<ManagedResource>(value)
                        .map_err(|e| Error::invalid(format!("document {index}: {e}"))),
                ),
                Err(e) => Some(Err(Error::invalid(format!("document {index}: {e}")))),
            }
        })
        .collect()
}
