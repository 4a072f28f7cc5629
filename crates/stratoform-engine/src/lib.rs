//! Stratoform Engine - macro expansion for serverless templates
//!
//! This crate turns a serverless application template into a plain
//! CloudFormation template by expanding every macro-typed resource:
//! - `Translator`: the orchestrator driving two-phase macro expansion
//! - `FunctionMacro`: the function pipeline (version/alias/url/role/events)
//! - Event trigger families: pull, push, and scheduler variants
//! - Collaborator seams: `ManagedPolicyMap` and `FeatureToggle`

pub mod arns;
pub mod collaborators;
pub mod events;
pub mod expansion;
pub mod function;
pub mod layer_version;
pub mod policies;
pub mod primitives;
pub mod registry;
pub mod simple_table;
pub mod translator;

pub use collaborators::{
    DefaultFeatureToggle, FeatureToggle, ManagedPolicyMap, NATIVE_CONDITIONAL_DEPENDS_ON,
    StaticFeatureToggle,
};
pub use expansion::{ExpandCtx, Expansion, ResourceMacro, SiblingPatch};
pub use function::FunctionMacro;
pub use registry::MacroRegistry;
pub use translator::Translator;
