//! The macro expansion protocol
//!
//! Every macro implements the same two-phase contract. Phase one
//! ([`ResourceMacro::resources_to_link`]) runs against the entire sibling
//! resource map so the macro can resolve cross-references up front and fail
//! fast. Phase two ([`ResourceMacro::expand`]) produces the primitive
//! resources, plus any patches to named siblings. Macros never mutate shared
//! state; patches are applied - and de-duplicated - by the orchestrator.

use indexmap::IndexMap;
use serde_json::Value;
use stratoform_core::IntrinsicsResolver;
use stratoform_core::Result;
use stratoform_core::resource::Resource;

use crate::collaborators::{FeatureToggle, ManagedPolicyMap};

/// Everything a macro may consult while expanding. All collaborators are
/// caller-supplied; the context owns no state of its own.
pub struct ExpandCtx<'a> {
    /// Resolves references to template parameters.
    pub intrinsics_resolver: &'a IntrinsicsResolver,
    /// Resolves static mapping lookups.
    pub mappings_resolver: &'a IntrinsicsResolver,
    pub managed_policy_map: &'a ManagedPolicyMap,
    pub feature_toggle: &'a dyn FeatureToggle,
}

/// A deferred modification to a named sibling resource (or to the
/// template's `Conditions` map), applied by the orchestrator after the
/// owning macro expanded successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum SiblingPatch {
    /// Add an entry to the sibling's `DependsOn` list (created if absent).
    MergeDependsOn {
        logical_id: String,
        depends_on: String,
    },
    /// Append a tag to the sibling's `Properties.Tags` list. Used for the
    /// conditional-dependency workaround, where a `Ref` wrapped in `Fn::If`
    /// stands in for a conditional `DependsOn`.
    AppendTag { logical_id: String, tag: Value },
    /// Append an entry to the sibling bucket's notification configuration.
    AppendNotification { logical_id: String, entry: Value },
    /// Insert an operation under `paths` in the sibling API's definition
    /// document. Keyed by path + method; the last write wins.
    InjectRoute {
        logical_id: String,
        path: String,
        method: String,
        operation: Value,
    },
    /// Define a (synthesized) condition in the template's `Conditions` map.
    DefineCondition { name: String, definition: Value },
}

/// The output of one macro expansion: primitive resources in their final
/// emission order, plus sibling patches.
#[derive(Debug, Default)]
pub struct Expansion {
    pub resources: Vec<Resource>,
    pub patches: Vec<SiblingPatch>,
}

impl Expansion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn patch(&mut self, patch: SiblingPatch) {
        self.patches.push(patch);
    }
}

/// A high-level resource that expands into one or more primitive resources
/// at compile time. The macro itself is never emitted.
pub trait ResourceMacro {
    fn logical_id(&self) -> &str;

    /// Phase one: look up siblings referenced by logical id before
    /// expansion. The default links nothing.
    fn resources_to_link(&mut self, resources: &IndexMap<String, Value>) -> Result<()> {
        let _ = resources;
        Ok(())
    }

    /// Phase two: produce the primitive resources this macro expands to.
    fn expand(&mut self, ctx: &ExpandCtx<'_>) -> Result<Expansion>;

    /// Surface properties other resources may reference as
    /// `LogicalId.Property`, with the primitive type each resolves to. The
    /// orchestrator matches them against the expansion output.
    fn referable_properties(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// The new logical id, for macros that move themselves to a derived
    /// (content-hashed) identity during expansion.
    fn renamed_to(&self) -> Option<&str> {
        None
    }
}
