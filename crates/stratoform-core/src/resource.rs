//! Resource serialization, deserialization, and validation
//!
//! A [`Resource`] is one entry of a template's `Resources` map: a `Type`, a
//! validated property bag, and the handful of top-level resource attributes
//! the platform understands. Each concrete resource kind is described by a
//! statically assembled [`ResourceTypeDef`] - the set of declared properties
//! with their validators, and the runtime attributes (forward references
//! like `arn`) the resource exposes to siblings.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::intrinsics::is_intrinsic;

/// Resource attributes accepted at the top level of a resource entry.
pub const SUPPORTED_RESOURCE_ATTRIBUTES: &[&str] = &[
    "Condition",
    "DeletionPolicy",
    "Metadata",
    "UpdatePolicy",
    "UpdateReplacePolicy",
];

/// The subset of attributes a macro copies onto every resource it generates.
pub const PASS_THROUGH_ATTRIBUTES: &[&str] = &["Condition", "DeletionPolicy", "UpdateReplacePolicy"];

static LOGICAL_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid regex"));

/// Validates that a logical id is a non-empty alphanumeric string.
pub fn validate_logical_id(logical_id: &str) -> Result<()> {
    if LOGICAL_ID_PATTERN.is_match(logical_id) {
        return Ok(());
    }
    Err(CoreError::invalid_resource(
        logical_id,
        "Logical ids must be alphanumeric.",
    ))
}

/// Shape validator for a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Any,
    Str,
    Bool,
    Int,
    Map,
    List,
    StrOrMap,
    StrOrList,
    ListOfStr,
    ListOfMap,
    MapOfStr,
}

impl PropertyKind {
    pub fn validate(&self, value: &Value) -> bool {
        match self {
            PropertyKind::Any => true,
            PropertyKind::Str => value.is_string(),
            PropertyKind::Bool => value.is_boolean(),
            PropertyKind::Int => value.is_i64() || value.is_u64(),
            PropertyKind::Map => value.is_object(),
            PropertyKind::List => value.is_array(),
            PropertyKind::StrOrMap => value.is_string() || value.is_object(),
            PropertyKind::StrOrList => value.is_string() || value.is_array(),
            PropertyKind::ListOfStr => matches!(value, Value::Array(items)
                if items.iter().all(Value::is_string)),
            PropertyKind::ListOfMap => matches!(value, Value::Array(items)
                if items.iter().all(Value::is_object)),
            PropertyKind::MapOfStr => matches!(value, Value::Object(map)
                if map.values().all(Value::is_string)),
        }
    }

    /// Phrase used in "Property 'X' should be ..." error messages.
    pub fn expected(&self) -> &'static str {
        match self {
            PropertyKind::Any => "any value",
            PropertyKind::Str => "a string",
            PropertyKind::Bool => "a boolean",
            PropertyKind::Int => "an integer",
            PropertyKind::Map => "a map",
            PropertyKind::List => "a list",
            PropertyKind::StrOrMap => "a string or a map",
            PropertyKind::StrOrList => "a string or a list",
            PropertyKind::ListOfStr => "a list of strings",
            PropertyKind::ListOfMap => "a list of maps",
            PropertyKind::MapOfStr => "a map of strings",
        }
    }
}

/// Validation metadata for one declared property.
///
/// When a property supports intrinsics, a value with the shape of an
/// unresolved reference expression skips shape validation - the downstream
/// platform validates it at deploy time.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDef {
    pub name: &'static str,
    pub required: bool,
    pub kind: PropertyKind,
    pub supports_intrinsics: bool,
}

impl PropertyDef {
    pub const fn required(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            required: true,
            kind,
            supports_intrinsics: true,
        }
    }

    pub const fn optional(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            required: false,
            kind,
            supports_intrinsics: true,
        }
    }

    /// A value the compiler forwards without reading: any shape accepted.
    pub const fn pass_through(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            kind: PropertyKind::Any,
            supports_intrinsics: false,
        }
    }

    pub const fn pass_through_required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            kind: PropertyKind::Any,
            supports_intrinsics: false,
        }
    }
}

/// A function producing the reference expression behind a runtime attribute,
/// given the resource's logical id. The expression has no concrete value at
/// compile time; it resolves only when the downstream platform processes the
/// output template.
pub type RuntimeAttrFn = fn(&str) -> Value;

/// Statically assembled description of one resource type.
#[derive(Debug)]
pub struct ResourceTypeDef {
    pub type_name: &'static str,
    pub properties: &'static [PropertyDef],
    pub runtime_attrs: &'static [(&'static str, RuntimeAttrFn)],
}

impl ResourceTypeDef {
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    fn runtime_attr_fn(&self, name: &str) -> Option<RuntimeAttrFn> {
        self.runtime_attrs
            .iter()
            .find(|(attr, _)| *attr == name)
            .map(|(_, f)| *f)
    }
}

/// One validated resource entity.
///
/// Created by deserializing a template entry ([`Resource::from_map`]) or
/// programmatically by a macro during expansion; serialized back with
/// [`Resource::to_map`]. Round-trips are lossless for any value that passed
/// validation.
#[derive(Debug, Clone)]
pub struct Resource {
    def: &'static ResourceTypeDef,
    logical_id: String,
    relative_id: Option<String>,
    depends_on: Option<Value>,
    properties: IndexMap<String, Value>,
    resource_attributes: IndexMap<String, Value>,
}

impl Resource {
    pub fn new(def: &'static ResourceTypeDef, logical_id: &str) -> Result<Self> {
        validate_logical_id(logical_id)?;
        Ok(Self {
            def,
            logical_id: logical_id.to_string(),
            relative_id: None,
            depends_on: None,
            properties: IndexMap::new(),
            resource_attributes: IndexMap::new(),
        })
    }

    /// Like [`new`](Self::new), immediately applying the given resource
    /// attributes (typically a parent macro's pass-through attributes).
    pub fn with_attributes(
        def: &'static ResourceTypeDef,
        logical_id: &str,
        attributes: &IndexMap<String, Value>,
    ) -> Result<Self> {
        let mut resource = Self::new(def, logical_id)?;
        resource.apply_attributes(attributes)?;
        Ok(resource)
    }

    /// Constructs a resource from one entry of the template's `Resources`
    /// map: `{"Type": ..., "Properties": {...}, <attributes>}`. Every key in
    /// `Properties` must be declared for the type; unknown keys are a
    /// creation-time error, not a silent drop.
    pub fn from_map(
        def: &'static ResourceTypeDef,
        logical_id: &str,
        resource_map: &Value,
    ) -> Result<Self> {
        let mut resource = Self::new(def, logical_id)?;
        resource.populate(resource_map)?;
        Ok(resource)
    }

    /// Variant of [`from_map`](Self::from_map) for sub-resources (event
    /// triggers), recording the id relative to the owning macro.
    pub fn from_map_relative(
        def: &'static ResourceTypeDef,
        logical_id: &str,
        relative_id: &str,
        resource_map: &Value,
    ) -> Result<Self> {
        let mut resource = Self::new(def, logical_id)?;
        resource.relative_id = Some(relative_id.to_string());
        resource.populate(resource_map)?;
        Ok(resource)
    }

    fn populate(&mut self, resource_map: &Value) -> Result<()> {
        let entry = resource_map.as_object().ok_or_else(|| {
            CoreError::invalid_resource(&self.logical_id, "Resource definition must be an object.")
        })?;

        match entry.get("Type") {
            None => {
                return Err(CoreError::invalid_resource(
                    &self.logical_id,
                    "Resource definition is missing the 'Type' key.",
                ));
            }
            Some(Value::String(actual)) if actual == self.def.type_name => {}
            Some(actual) => {
                return Err(CoreError::invalid_resource(
                    &self.logical_id,
                    format!(
                        "Resource has incorrect Type; expected '{}', got '{}'.",
                        self.def.type_name,
                        display_type(actual)
                    ),
                ));
            }
        }

        // Skipping the Properties section means an empty property bag.
        if let Some(properties) = entry.get("Properties") {
            let properties = properties.as_object().ok_or_else(|| {
                CoreError::invalid_resource(
                    &self.logical_id,
                    "Properties of a resource must be an object.",
                )
            })?;
            for (name, value) in properties {
                self.set(name, value.clone())?;
            }
        }

        if let Some(depends_on) = entry.get("DependsOn") {
            self.depends_on = Some(depends_on.clone());
        }

        // Only well-known attributes are read; anything else at the top
        // level is ignored, consistent with the platform's own behavior.
        for attr in SUPPORTED_RESOURCE_ATTRIBUTES {
            if let Some(value) = entry.get(*attr) {
                self.resource_attributes
                    .insert((*attr).to_string(), value.clone());
            }
        }

        self.validate()
    }

    pub fn def(&self) -> &'static ResourceTypeDef {
        self.def
    }

    pub fn type_name(&self) -> &'static str {
        self.def.type_name
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn relative_id(&self) -> Option<&str> {
        self.relative_id.as_deref()
    }

    pub fn depends_on(&self) -> Option<&Value> {
        self.depends_on.as_ref()
    }

    pub fn set_depends_on(&mut self, depends_on: Option<Value>) {
        self.depends_on = depends_on;
    }

    /// Sets a declared property. `Null` clears the property. Setting an
    /// undeclared property is an error.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if self.def.property(name).is_none() {
            return Err(CoreError::invalid_resource(
                &self.logical_id,
                format!(
                    "property {name} not defined for resource of type {}",
                    self.def.type_name
                ),
            ));
        }
        if value.is_null() {
            self.properties.shift_remove(name);
        } else {
            self.properties.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Sets a declared property only when a value is present.
    pub fn set_opt(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        match value {
            Some(value) => self.set(name, value),
            None => Ok(()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.properties.get_mut(name)
    }

    /// Sets a resource attribute. The name must be in the supported
    /// allow-list; anything else indicates a caller bug.
    pub fn set_resource_attribute(&mut self, name: &str, value: Value) -> Result<()> {
        if !SUPPORTED_RESOURCE_ATTRIBUTES.contains(&name) {
            return Err(CoreError::contract(format!(
                "unsupported resource attribute specified: {name}"
            )));
        }
        self.resource_attributes.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get_resource_attribute(&self, name: &str) -> Option<&Value> {
        self.resource_attributes.get(name)
    }

    pub fn resource_attributes(&self) -> &IndexMap<String, Value> {
        &self.resource_attributes
    }

    pub fn apply_attributes(&mut self, attributes: &IndexMap<String, Value>) -> Result<()> {
        for (name, value) in attributes {
            self.set_resource_attribute(name, value.clone())?;
        }
        Ok(())
    }

    /// The subset of this resource's attributes that must be copied onto
    /// every resource generated from it.
    pub fn passthrough_attributes(&self) -> IndexMap<String, Value> {
        let mut attributes = IndexMap::new();
        for attr in PASS_THROUGH_ATTRIBUTES {
            if let Some(value) = self.resource_attributes.get(*attr) {
                attributes.insert((*attr).to_string(), value.clone());
            }
        }
        attributes
    }

    pub fn has_runtime_attr(&self, name: &str) -> bool {
        self.def.runtime_attr_fn(name).is_some()
    }

    /// The reference expression that resolves to this attribute when the
    /// output template is processed downstream.
    pub fn runtime_attr(&self, name: &str) -> Result<Value> {
        match self.def.runtime_attr_fn(name) {
            Some(attr_fn) => Ok(attr_fn(&self.logical_id)),
            None => Err(CoreError::contract(format!(
                "attribute {name} is not supported for resource {}",
                self.def.type_name
            ))),
        }
    }

    /// Validates required properties and property shapes. Values with the
    /// shape of an unresolved intrinsic skip shape validation when the
    /// property supports intrinsics.
    pub fn validate(&self) -> Result<()> {
        for property in self.def.properties {
            let value = self.properties.get(property.name);

            if property.supports_intrinsics && value.is_some_and(is_intrinsic) {
                continue;
            }

            match value {
                None => {
                    if property.required {
                        return Err(CoreError::invalid_resource(
                            &self.logical_id,
                            format!("Missing required property '{}'.", property.name),
                        ));
                    }
                }
                Some(value) => {
                    if !property.kind.validate(value) {
                        return Err(CoreError::invalid_resource(
                            &self.logical_id,
                            format!(
                                "Property '{}' should be {}.",
                                property.name,
                                property.kind.expected()
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Serializes to the template's native shape. Validation runs again
    /// first; it is not cached from construction time.
    pub fn to_map(&self) -> Result<Value> {
        self.validate()?;

        let mut entry = Map::new();
        entry.insert("Type".into(), Value::String(self.def.type_name.into()));

        if let Some(depends_on) = &self.depends_on {
            entry.insert("DependsOn".into(), depends_on.clone());
        }

        for (attr, value) in &self.resource_attributes {
            entry.insert(attr.clone(), value.clone());
        }

        // Emit properties in declaration order for stable output.
        let mut properties = Map::new();
        for property in self.def.properties {
            if let Some(value) = self.properties.get(property.name) {
                properties.insert(property.name.to_string(), value.clone());
            }
        }
        entry.insert("Properties".into(), Value::Object(properties));

        Ok(Value::Object(entry))
    }
}

fn display_type(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
