//! Intrinsic function construction and partial resolution
//!
//! Intrinsics are the `{"Ref": ...}` / `{"Fn::*": ...}`-shaped expressions a
//! template uses to refer to values that only exist once the downstream
//! platform processes the output. The compiler never evaluates them fully;
//! [`IntrinsicsResolver`] rewrites only the references it can prove against a
//! supplied symbol table (template parameters or static mappings) and leaves
//! everything else untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::error::{CoreError, Result};
use crate::references::SupportedResourceReferences;

/// Separator inside `LogicalId.Property` style references.
const RESOURCE_REF_SEPARATOR: char = '.';

/// Matches `${LogicalId}`, `${LogicalId.Property}` and `${AWS::PseudoParam}`
/// occurrences inside an `Fn::Sub` string.
static SUB_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9\.]+|AWS::[A-Z][A-Za-z]*)\}").expect("valid regex"));

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// `{"Ref": logical_id}`
pub fn ref_to(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`
pub fn fn_get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Sub": text}`
pub fn fn_sub(text: &str) -> Value {
    json!({ "Fn::Sub": text })
}

/// `{"Fn::Sub": [text, variables]}`
pub fn fn_sub_with(text: &str, variables: Value) -> Value {
    json!({ "Fn::Sub": [text, variables] })
}

/// The `AWS::NoValue` pseudo reference, used to elide a branch of `Fn::If`.
pub fn no_value() -> Value {
    json!({ "Ref": "AWS::NoValue" })
}

/// Wraps `data` in an `Fn::If` on the given condition. The false branch
/// defaults to `AWS::NoValue` so the whole entry disappears when the
/// condition does not hold.
pub fn make_conditional(condition: &str, data: Value, false_data: Option<Value>) -> Value {
    json!({ "Fn::If": [condition, data, false_data.unwrap_or_else(no_value)] })
}

/// Converts a `Ref` or `Fn::GetAtt` intrinsic into the `${...}` shorthand
/// that `Fn::Sub` understands.
pub fn make_shorthand(intrinsic: &Value) -> Result<String> {
    let map = intrinsic
        .as_object()
        .ok_or_else(|| CoreError::contract("shorthand input must be an intrinsic map"))?;
    if let Some(Value::String(id)) = map.get("Ref") {
        return Ok(format!("${{{id}}}"));
    }
    if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
        let joined: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
        if joined.len() == parts.len() {
            return Ok(format!("${{{}}}", joined.join(".")));
        }
    }
    Err(CoreError::contract(
        "shorthand is only supported for Ref and Fn::GetAtt",
    ))
}

// =============================================================================
// PREDICATES
// =============================================================================

/// True if the value has the shape of an intrinsic function: a map with a
/// single key that is `Ref`, `Condition`, or starts with `Fn::`.
pub fn is_intrinsic(value: &Value) -> bool {
    match value.as_object() {
        Some(map) if map.len() == 1 => {
            let key = map.keys().next().expect("len checked");
            key == "Ref" || key == "Condition" || key.starts_with("Fn::")
        }
        _ => false,
    }
}

/// True for the `{"Ref": "AWS::NoValue"}` pseudo reference.
pub fn is_no_value(value: &Value) -> bool {
    is_intrinsic(value) && value.get("Ref").and_then(Value::as_str) == Some("AWS::NoValue")
}

// =============================================================================
// PARTIAL RESOLVER
// =============================================================================

/// Which intrinsic family a resolver instance rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolverMode {
    /// `Ref` and `Fn::Sub` references to template parameters.
    Parameters,
    /// `Fn::FindInMap` lookups against the template's static mappings.
    Mappings,
}

/// Partial evaluator over an arbitrary nested value.
///
/// Rewrites every reference to a symbol present in the table with that
/// symbol's value. References to resources, pseudo parameters, or unknown
/// symbols pass through unchanged; they are only resolvable by the downstream
/// platform. The resolver never attempts to compute a value that depends on
/// resources created by the same compilation pass.
#[derive(Debug, Clone)]
pub struct IntrinsicsResolver {
    symbols: Map<String, Value>,
    mode: ResolverMode,
}

impl IntrinsicsResolver {
    /// Resolver seeded with template parameter values.
    pub fn new(parameters: Map<String, Value>) -> Self {
        Self {
            symbols: parameters,
            mode: ResolverMode::Parameters,
        }
    }

    /// Resolver seeded with the template's `Mappings` section. Only rewrites
    /// `Fn::FindInMap` whose three arguments resolve to known keys.
    pub fn for_mappings(mappings: Map<String, Value>) -> Self {
        Self {
            symbols: mappings,
            mode: ResolverMode::Mappings,
        }
    }

    /// Recursively rewrites every occurrence of a reference to a symbol in
    /// the table with that symbol's value. Everything else is returned
    /// unchanged.
    pub fn resolve_parameter_refs(&self, value: &Value) -> Result<Value> {
        let resolved = self.resolve_node(value)?;
        match resolved {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    out.insert(key, self.resolve_parameter_refs(&child)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for child in items {
                    out.push(self.resolve_parameter_refs(&child)?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other),
        }
    }

    fn resolve_node(&self, value: &Value) -> Result<Value> {
        if !is_intrinsic(value) {
            return Ok(value.clone());
        }
        let map = value.as_object().expect("intrinsic shape checked");
        let (key, inner) = map.iter().next().expect("intrinsic shape checked");
        match (self.mode, key.as_str()) {
            (ResolverMode::Parameters, "Ref") => Ok(self.resolve_ref(value, inner)),
            (ResolverMode::Parameters, "Fn::Sub") => Ok(self.resolve_sub(value, inner)),
            (ResolverMode::Mappings, "Fn::FindInMap") => self.resolve_find_in_map(value, inner),
            _ => Ok(value.clone()),
        }
    }

    fn resolve_ref(&self, original: &Value, inner: &Value) -> Value {
        match inner.as_str() {
            Some(name) => self
                .symbols
                .get(name)
                .cloned()
                .unwrap_or_else(|| original.clone()),
            None => original.clone(),
        }
    }

    fn resolve_sub(&self, original: &Value, inner: &Value) -> Value {
        let substitute = |text: &str| -> String {
            let mut substituted = text.to_string();
            for capture in SUB_REF_PATTERN.captures_iter(text) {
                let full_ref = capture.get(0).expect("match").as_str();
                let name = capture.get(1).expect("group").as_str();
                if let Some(replacement) = self.symbols.get(name).and_then(stringify_symbol) {
                    substituted = substituted.replacen(full_ref, &replacement, 1);
                }
            }
            substituted
        };

        match inner {
            // {"Fn::Sub": "text"}
            Value::String(text) => json!({ "Fn::Sub": substitute(text) }),
            // {"Fn::Sub": ["text", {variables}]} - only the text participates
            Value::Array(items) if !items.is_empty() => match items[0].as_str() {
                Some(text) => {
                    let mut items = items.clone();
                    items[0] = Value::String(substitute(text));
                    json!({ "Fn::Sub": items })
                }
                None => original.clone(),
            },
            _ => original.clone(),
        }
    }

    fn resolve_find_in_map(&self, original: &Value, inner: &Value) -> Result<Value> {
        let items = match inner.as_array() {
            Some(items) if items.len() == 3 => items,
            _ => {
                return Err(CoreError::invalid_template(format!(
                    "Invalid FindInMap value {inner}. FindInMap expects an array with 3 values."
                )));
            }
        };

        // Arguments may themselves be FindInMap lookups.
        let map_name = self.resolve_parameter_refs(&items[0])?;
        let top_level_key = self.resolve_parameter_refs(&items[1])?;
        let second_level_key = self.resolve_parameter_refs(&items[2])?;

        let (Some(map_name), Some(top_level_key), Some(second_level_key)) = (
            map_name.as_str(),
            top_level_key.as_str(),
            second_level_key.as_str(),
        ) else {
            return Ok(original.clone());
        };

        let resolved = self
            .symbols
            .get(map_name)
            .and_then(|mapping| mapping.get(top_level_key))
            .and_then(|entries| entries.get(second_level_key));

        Ok(resolved.cloned().unwrap_or_else(|| original.clone()))
    }
}

fn stringify_symbol(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// =============================================================================
// OUTPUT-PASS REWRITES
// =============================================================================

/// Rewrites `LogicalId.Property` style references (in `Ref`, `Fn::GetAtt`,
/// and `Fn::Sub`) with the logical id of the generated resource that backs
/// the property, as recorded in `refs`. Unknown references pass through.
pub fn resolve_resource_refs(value: &Value, refs: &SupportedResourceReferences) -> Value {
    rewrite(value, &|map| {
        let (key, inner) = map.iter().next().expect("intrinsic shape checked");
        match key.as_str() {
            "Ref" => {
                let target = inner.as_str()?;
                let (logical_id, property) = split_resource_reference(target)?;
                let resolved = refs.get(logical_id, property)?;
                Some(ref_to(resolved))
            }
            "Fn::GetAtt" => {
                let parts = get_att_parts(inner)?;
                if parts.len() < 2 {
                    return None;
                }
                let resolved = refs.get(&parts[0], &parts[1])?;
                let mut rewritten = vec![resolved.to_string()];
                rewritten.extend(parts[2..].iter().cloned());
                Some(json!({ "Fn::GetAtt": rewritten }))
            }
            "Fn::Sub" => rewrite_sub_refs(inner, &|reference| {
                let (logical_id, rest) = reference.split_once(RESOURCE_REF_SEPARATOR)?;
                let property = rest.split(RESOURCE_REF_SEPARATOR).next()?;
                let resolved = refs.get(logical_id, property)?;
                let original = format!("{logical_id}.{property}");
                Some((original, resolved.to_string()))
            }),
            _ => None,
        }
    })
}

/// Rewrites references to renamed logical ids (a resource whose macro moved
/// it to a hashed id) so the output template points at the generated name.
pub fn resolve_resource_id_refs(
    value: &Value,
    changed_ids: &indexmap::IndexMap<String, String>,
) -> Value {
    rewrite(value, &|map| {
        let (key, inner) = map.iter().next().expect("intrinsic shape checked");
        match key.as_str() {
            "Ref" => {
                let target = inner.as_str()?;
                if target.contains(RESOURCE_REF_SEPARATOR) {
                    return None;
                }
                changed_ids.get(target).map(|new_id| ref_to(new_id))
            }
            "Fn::GetAtt" => {
                let parts = get_att_parts(inner)?;
                if parts.len() < 2 {
                    return None;
                }
                let new_id = changed_ids.get(&parts[0])?;
                let mut rewritten = vec![new_id.clone()];
                rewritten.extend(parts[1..].iter().cloned());
                Some(json!({ "Fn::GetAtt": rewritten }))
            }
            "Fn::Sub" => rewrite_sub_refs(inner, &|reference| {
                let logical_id = reference
                    .split(RESOURCE_REF_SEPARATOR)
                    .next()
                    .expect("split yields at least one part");
                let new_id = changed_ids.get(logical_id)?;
                Some((logical_id.to_string(), new_id.clone()))
            }),
            _ => None,
        }
    })
}

/// Walks the tree, offering every intrinsic-shaped node to `action`. When the
/// action declines (`None`) the node is kept and its children are visited.
fn rewrite(value: &Value, action: &dyn Fn(&Map<String, Value>) -> Option<Value>) -> Value {
    let current = match value.as_object() {
        Some(map) if is_intrinsic(value) => action(map).unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    };
    match current {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                out.insert(key, rewrite(&child, action));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|child| rewrite(child, action)).collect())
        }
        other => other,
    }
}

/// Applies `replacer` to every `${...}` reference inside a sub string.
/// `replacer` returns the `(needle, replacement)` pair to splice into the
/// reference text, preserving any trailing `.Attribute` segments.
fn rewrite_sub_refs(
    inner: &Value,
    replacer: &dyn Fn(&str) -> Option<(String, String)>,
) -> Option<Value> {
    let substitute = |text: &str| -> String {
        let mut substituted = text.to_string();
        for capture in SUB_REF_PATTERN.captures_iter(text) {
            let full_ref = capture.get(0).expect("match").as_str();
            let reference = capture.get(1).expect("group").as_str();
            if let Some((needle, replacement)) = replacer(reference) {
                let rewritten = full_ref.replacen(&needle, &replacement, 1);
                substituted = substituted.replacen(full_ref, &rewritten, 1);
            }
        }
        substituted
    };

    match inner {
        Value::String(text) => Some(json!({ "Fn::Sub": substitute(text) })),
        Value::Array(items) if !items.is_empty() => {
            let text = items[0].as_str()?;
            let mut items = items.clone();
            items[0] = Value::String(substitute(text));
            Some(json!({ "Fn::Sub": items }))
        }
        _ => None,
    }
}

fn split_resource_reference(value: &str) -> Option<(&str, &str)> {
    let (logical_id, property) = value.split_once(RESOURCE_REF_SEPARATOR)?;
    if logical_id.is_empty() || property.is_empty() {
        return None;
    }
    Some((logical_id, property))
}

fn get_att_parts(inner: &Value) -> Option<Vec<String>> {
    let items = inner.as_array()?;
    if items.len() < 2 {
        return None;
    }
    let joined: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
    if joined.len() != items.len() {
        return None;
    }
    // Normalize ["LogicalId.Property", "Arn"] and ["LogicalId", "Property.Arn"]
    // into one dotted path before splitting.
    Some(
        joined
            .join(".")
            .split(RESOURCE_REF_SEPARATOR)
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn parameters() -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("Stage".into(), json!("prod"));
        params.insert("Memory".into(), json!(512));
        params
    }

    #[test]
    fn test_ref_to_known_parameter_resolves() {
        let resolver = IntrinsicsResolver::new(parameters());
        let input = json!({ "Ref": "Stage" });
        assert_eq!(resolver.resolve_parameter_refs(&input).unwrap(), json!("prod"));
    }

    #[test]
    fn test_ref_to_unknown_symbol_passes_through() {
        let resolver = IntrinsicsResolver::new(parameters());
        let input = json!({ "Ref": "SomeResource" });
        assert_eq!(resolver.resolve_parameter_refs(&input).unwrap(), input);
    }

    #[test]
    fn test_get_att_is_never_touched() {
        let resolver = IntrinsicsResolver::new(parameters());
        let input = json!({ "Fn::GetAtt": ["Stage", "Arn"] });
        assert_eq!(resolver.resolve_parameter_refs(&input).unwrap(), input);
    }

    #[test]
    fn test_nested_refs_resolve() {
        let resolver = IntrinsicsResolver::new(parameters());
        let input = json!({
            "Code": { "S3Key": { "Ref": "Stage" } },
            "List": [{ "Ref": "Memory" }]
        });
        let resolved = resolver.resolve_parameter_refs(&input).unwrap();
        assert_eq!(resolved["Code"]["S3Key"], json!("prod"));
        assert_eq!(resolved["List"][0], json!(512));
    }

    #[test]
    fn test_sub_substitutes_known_and_keeps_unknown() {
        let resolver = IntrinsicsResolver::new(parameters());
        let input = json!({ "Fn::Sub": "key-${Stage}-${AWS::Region}" });
        assert_eq!(
            resolver.resolve_parameter_refs(&input).unwrap(),
            json!({ "Fn::Sub": "key-prod-${AWS::Region}" })
        );
    }

    #[test]
    fn test_sub_with_variables_only_rewrites_text() {
        let resolver = IntrinsicsResolver::new(parameters());
        let input = json!({ "Fn::Sub": ["${Stage}/${Custom}", { "Custom": "x" }] });
        assert_eq!(
            resolver.resolve_parameter_refs(&input).unwrap(),
            json!({ "Fn::Sub": ["prod/${Custom}", { "Custom": "x" }] })
        );
    }

    #[test]
    fn test_find_in_map_resolves_against_mappings() {
        let mut mappings = Map::new();
        mappings.insert(
            "RegionMap".into(),
            json!({ "us-east-1": { "Ami": "ami-123" } }),
        );
        let resolver = IntrinsicsResolver::for_mappings(mappings);
        let input = json!({ "Fn::FindInMap": ["RegionMap", "us-east-1", "Ami"] });
        assert_eq!(resolver.resolve_parameter_refs(&input).unwrap(), json!("ami-123"));
    }

    #[test]
    fn test_find_in_map_with_wrong_arity_is_an_error() {
        let resolver = IntrinsicsResolver::for_mappings(Map::new());
        let input = json!({ "Fn::FindInMap": ["OnlyTwo", "Keys"] });
        assert!(resolver.resolve_parameter_refs(&input).is_err());
    }

    #[test]
    fn test_find_in_map_unknown_keys_pass_through() {
        let resolver = IntrinsicsResolver::for_mappings(Map::new());
        let input = json!({ "Fn::FindInMap": ["Nope", "a", "b"] });
        assert_eq!(resolver.resolve_parameter_refs(&input).unwrap(), input);
    }

    #[test]
    fn test_resolve_resource_refs_rewrites_ref_and_get_att() {
        let mut refs = SupportedResourceReferences::new();
        refs.add("MyFn", "Alias", "MyFnAliaslive").unwrap();

        let input = json!({
            "A": { "Ref": "MyFn.Alias" },
            "B": { "Fn::GetAtt": ["MyFn.Alias", "Arn"] },
            "C": { "Fn::Sub": "${MyFn.Alias.Arn}" },
            "D": { "Ref": "MyFn.Version" }
        });
        let resolved = resolve_resource_refs(&input, &refs);
        assert_eq!(resolved["A"], json!({ "Ref": "MyFnAliaslive" }));
        assert_eq!(resolved["B"], json!({ "Fn::GetAtt": ["MyFnAliaslive", "Arn"] }));
        assert_eq!(resolved["C"], json!({ "Fn::Sub": "${MyFnAliaslive.Arn}" }));
        // Unknown property is untouched
        assert_eq!(resolved["D"], json!({ "Ref": "MyFn.Version" }));
    }

    #[test]
    fn test_resolve_resource_id_refs_rewrites_renamed_ids() {
        let mut changed = IndexMap::new();
        changed.insert("MyLayer".to_string(), "MyLayerabc123def4".to_string());

        let input = json!({
            "Layers": [{ "Ref": "MyLayer" }],
            "Att": { "Fn::GetAtt": ["MyLayer", "Arn"] },
            "Sub": { "Fn::Sub": "${MyLayer}-suffix" },
            "Other": { "Ref": "Untouched" }
        });
        let resolved = resolve_resource_id_refs(&input, &changed);
        assert_eq!(resolved["Layers"][0], json!({ "Ref": "MyLayerabc123def4" }));
        assert_eq!(resolved["Att"], json!({ "Fn::GetAtt": ["MyLayerabc123def4", "Arn"] }));
        assert_eq!(resolved["Sub"], json!({ "Fn::Sub": "${MyLayerabc123def4}-suffix" }));
        assert_eq!(resolved["Other"], json!({ "Ref": "Untouched" }));
    }

    #[test]
    fn test_is_intrinsic() {
        assert!(is_intrinsic(&json!({ "Ref": "x" })));
        assert!(is_intrinsic(&json!({ "Fn::GetAtt": ["a", "b"] })));
        assert!(is_intrinsic(&json!({ "Condition": "c" })));
        assert!(!is_intrinsic(&json!({ "Ref": "x", "Other": 1 })));
        assert!(!is_intrinsic(&json!("Ref")));
    }

    #[test]
    fn test_make_shorthand() {
        assert_eq!(make_shorthand(&ref_to("Foo")).unwrap(), "${Foo}");
        assert_eq!(make_shorthand(&fn_get_att("Bar", "Arn")).unwrap(), "${Bar.Arn}");
        assert!(make_shorthand(&json!({ "Fn::Join": [] })).is_err());
    }
}
