//! Collaborator interfaces supplied by the caller
//!
//! The compiler itself performs no I/O; callers hand it a managed-policy
//! lookup table and a feature toggle, both of which can be backed by
//! whatever the embedding tool uses (static data files, remote config).

use indexmap::IndexMap;

/// Feature gate consulted at expansion decision points.
pub trait FeatureToggle {
    fn is_enabled(&self, feature: &str) -> bool;
}

/// Use a native `DependsOn` for conditionally created permissions instead of
/// the conditional-dependency tag workaround.
pub const NATIVE_CONDITIONAL_DEPENDS_ON: &str = "native-conditional-depends-on";

/// Default toggle: every feature off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFeatureToggle;

impl FeatureToggle for DefaultFeatureToggle {
    fn is_enabled(&self, _feature: &str) -> bool {
        false
    }
}

/// Toggle backed by a fixed set of enabled feature names.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureToggle {
    enabled: Vec<String>,
}

impl StaticFeatureToggle {
    pub fn new<I, S>(enabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
        }
    }
}

impl FeatureToggle for StaticFeatureToggle {
    fn is_enabled(&self, feature: &str) -> bool {
        self.enabled.iter().any(|f| f == feature)
    }
}

/// Caller-supplied map of `partition -> policy name -> ARN`, used to turn
/// friendly managed-policy names in a function's `Policies` list into ARNs.
/// Names missing from the map pass through unchanged (they may already be
/// ARNs); nothing in the compiler depends on the map being complete.
#[derive(Debug, Clone)]
pub struct ManagedPolicyMap {
    partition: String,
    policies: IndexMap<String, IndexMap<String, String>>,
}

impl Default for ManagedPolicyMap {
    fn default() -> Self {
        Self {
            partition: "aws".to_string(),
            policies: IndexMap::new(),
        }
    }
}

impl ManagedPolicyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map that resolves names against the given partition.
    pub fn for_partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            policies: IndexMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        partition: impl Into<String>,
        name: impl Into<String>,
        arn: impl Into<String>,
    ) {
        self.policies
            .entry(partition.into())
            .or_default()
            .insert(name.into(), arn.into());
    }

    /// The ARN behind a friendly policy name in the active partition.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.policies
            .get(&self.partition)
            .and_then(|names| names.get(name))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.policies.values().all(IndexMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_toggle() {
        let toggle = StaticFeatureToggle::new([NATIVE_CONDITIONAL_DEPENDS_ON]);
        assert!(toggle.is_enabled(NATIVE_CONDITIONAL_DEPENDS_ON));
        assert!(!toggle.is_enabled("something-else"));
        assert!(!DefaultFeatureToggle.is_enabled(NATIVE_CONDITIONAL_DEPENDS_ON));
    }

    #[test]
    fn test_managed_policy_map_is_partition_scoped() {
        let mut map = ManagedPolicyMap::new();
        map.insert("aws", "ReadOnlyAccess", "arn:aws:iam::aws:policy/ReadOnlyAccess");
        map.insert("aws-cn", "ReadOnlyAccess", "arn:aws-cn:iam::aws:policy/ReadOnlyAccess");

        assert_eq!(
            map.get("ReadOnlyAccess"),
            Some("arn:aws:iam::aws:policy/ReadOnlyAccess")
        );

        let mut cn = ManagedPolicyMap::for_partition("aws-cn");
        cn.insert("aws-cn", "ReadOnlyAccess", "arn:aws-cn:iam::aws:policy/ReadOnlyAccess");
        assert_eq!(
            cn.get("ReadOnlyAccess"),
            Some("arn:aws-cn:iam::aws:policy/ReadOnlyAccess")
        );
        assert_eq!(cn.get("Missing"), None);
    }
}
