//! Stratoform Core - Core types for the serverless template compiler
//!
//! This crate provides the foundational pieces shared by the compiler:
//! - `Template`: the tree document being transformed
//! - `Resource`: typed, validated resource property bags
//! - `IntrinsicsResolver`: partial (template-time-only) reference resolution
//! - `LogicalIdGenerator`: deterministic hash-based identities
//! - `CoreError`: the error taxonomy for authoring errors vs. caller bugs

pub mod conditions;
pub mod error;
pub mod intrinsics;
pub mod logical_id;
pub mod references;
pub mod resource;
pub mod template;

pub use conditions::{ConditionRef, combine_conditions};
pub use error::{CoreError, Result};
pub use intrinsics::{IntrinsicsResolver, resolve_resource_id_refs, resolve_resource_refs};
pub use logical_id::LogicalIdGenerator;
pub use references::SupportedResourceReferences;
pub use resource::{PropertyDef, PropertyKind, Resource, ResourceTypeDef};
pub use template::Template;
