//! Resource reference bookkeeping
//!
//! As macros expand, they register which of their surface properties (for
//! example `MyFunction.Alias`) resolve to which generated logical id. The
//! final output pass uses this table to rewrite `LogicalId.Property`
//! references into plain references to the generated resources.

use indexmap::IndexMap;

use crate::error::{CoreError, Result};

/// Two-level map of `logical_id -> property -> generated logical id`.
#[derive(Debug, Clone, Default)]
pub struct SupportedResourceReferences {
    refs: IndexMap<String, IndexMap<String, String>>,
}

impl SupportedResourceReferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `logical_id.property` resolves to `value`. Registering
    /// the same property twice is a caller bug.
    pub fn add(&mut self, logical_id: &str, property: &str, value: &str) -> Result<()> {
        if logical_id.is_empty() || property.is_empty() || value.is_empty() {
            return Err(CoreError::contract(
                "resource reference requires non-empty logical id, property, and value",
            ));
        }
        let properties = self.refs.entry(logical_id.to_string()).or_default();
        if properties.contains_key(property) {
            return Err(CoreError::contract(format!(
                "cannot add a second reference value to {logical_id}.{property}"
            )));
        }
        properties.insert(property.to_string(), value.to_string());
        Ok(())
    }

    /// The generated logical id behind `logical_id.property`, if registered.
    pub fn get(&self, logical_id: &str, property: &str) -> Option<&str> {
        self.refs
            .get(logical_id)
            .and_then(|properties| properties.get(property))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut refs = SupportedResourceReferences::new();
        refs.add("MyFn", "Alias", "MyFnAliaslive").unwrap();
        assert_eq!(refs.get("MyFn", "Alias"), Some("MyFnAliaslive"));
        assert_eq!(refs.get("MyFn", "Version"), None);
        assert_eq!(refs.get("Other", "Alias"), None);
    }

    #[test]
    fn test_duplicate_property_is_rejected() {
        let mut refs = SupportedResourceReferences::new();
        refs.add("MyFn", "Alias", "A").unwrap();
        assert!(refs.add("MyFn", "Alias", "B").is_err());
    }
}
