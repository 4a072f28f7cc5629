//! Combined-condition synthesis
//!
//! When a generated value must hold only if *several* existing conditions
//! hold (the macro's own `Condition` and the condition of a sibling it
//! patches), the compiler synthesizes a named `Fn::And` condition. Names are
//! derived from a hash of the participating condition names, so the same
//! combination always synthesizes the same condition and duplicates collapse
//! when merged into the template.

use serde_json::{Value, json};

use crate::logical_id::LogicalIdGenerator;

const COMBINED_CONDITION_PREFIX: &str = "AndCondition";

/// Outcome of combining a set of condition names.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionRef {
    /// A single condition needs no synthesis; use it directly.
    Existing(String),
    /// A new condition must be added to the template's `Conditions` map.
    Synthesized { name: String, definition: Value },
}

impl ConditionRef {
    pub fn name(&self) -> &str {
        match self {
            ConditionRef::Existing(name) => name,
            ConditionRef::Synthesized { name, .. } => name,
        }
    }
}

/// Combines condition names into one condition that holds when all of them
/// hold. Returns `None` for an empty input. Duplicate names collapse; the
/// result is insensitive to input order.
pub fn combine_conditions(names: &[&str]) -> Option<ConditionRef> {
    let mut unique: Vec<&str> = names.to_vec();
    unique.sort_unstable();
    unique.dedup();

    match unique.as_slice() {
        [] => None,
        [single] => Some(ConditionRef::Existing((*single).to_string())),
        combined => {
            let name = LogicalIdGenerator::with_data(COMBINED_CONDITION_PREFIX, &json!(combined))
                .generate();
            Some(ConditionRef::Synthesized {
                name,
                definition: make_and_condition(combined),
            })
        }
    }
}

/// `{"Fn::And": [{"Condition": a}, {"Condition": b}, ...]}`
pub fn make_and_condition(names: &[&str]) -> Value {
    let refs: Vec<Value> = names.iter().map(|name| json!({ "Condition": name })).collect();
    json!({ "Fn::And": refs })
}
