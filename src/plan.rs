//! Schema-driven change planning.
//!
//! [`plan_resource`] computes the planned state and the per-attribute changes
//! the host shows before applying. It works purely on the schema, so every
//! resource shares it.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::schema::{AttributeType, Block, BlockNestingMode, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Plan the transition from `prior` to `proposed`.
///
/// - `prior` is `None`: create. Defaults are filled in and every non-null
///   attribute or block is reported as added.
/// - `proposed` is null: delete. Every non-null prior attribute is reported
///   as removed.
/// - otherwise: update. Computed attributes missing from the proposal keep
///   their prior value, and a change to a `force_new` attribute requires
///   replacement.
pub fn plan_resource(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    match prior {
        _ if proposed.is_null() => plan_delete(prior),
        None => plan_create(&schema.block, proposed),
        Some(prior) => plan_update(&schema.block, prior, proposed),
    }
}

fn plan_create(block: &Block, proposed: &Value) -> PlanResult {
    let planned = with_defaults(block, proposed);
    let changes = object_entries(&planned)
        .map(|(name, value)| AttributeChange::added(name.clone(), value.clone()))
        .collect();
    PlanResult::with_changes(planned, changes, false)
}

fn plan_delete(prior: Option<&Value>) -> PlanResult {
    let changes = prior
        .map(|prior| {
            object_entries(prior)
                .map(|(name, value)| AttributeChange::removed(name.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();
    PlanResult::with_changes(Value::Null, changes, false)
}

fn plan_update(block: &Block, prior: &Value, proposed: &Value) -> PlanResult {
    let mut planned = with_defaults(block, proposed);
    if let Value::Object(map) = &mut planned {
        for (name, attr) in &block.attributes {
            let missing = map.get(name).map_or(true, Value::is_null);
            if attr.flags.computed && missing {
                if let Some(value) = prior.get(name).filter(|v| !v.is_null()) {
                    map.insert(name.clone(), value.clone());
                }
            }
        }
    }

    let mut names: BTreeSet<&String> = block.attributes.keys().collect();
    names.extend(block.blocks.keys());

    let mut changes = Vec::new();
    let mut requires_replace = false;
    for name in names {
        let before = prior.get(name.as_str()).unwrap_or(&Value::Null);
        let after = planned.get(name.as_str()).unwrap_or(&Value::Null);
        if values_equal(before, after, is_unordered(block, name)) {
            continue;
        }

        if block
            .attributes
            .get(name.as_str())
            .is_some_and(|attr| attr.force_new)
        {
            requires_replace = true;
        }
        changes.push(match (before.is_null(), after.is_null()) {
            (true, _) => AttributeChange::added(name.clone(), after.clone()),
            (_, true) => AttributeChange::removed(name.clone(), before.clone()),
            _ => AttributeChange::modified(name.clone(), before.clone(), after.clone()),
        });
    }

    if changes.is_empty() {
        PlanResult::no_change(planned)
    } else {
        PlanResult::with_changes(planned, changes, requires_replace)
    }
}

/// Copy of `value` with schema defaults filled in for unset attributes,
/// including inside nested blocks.
fn with_defaults(block: &Block, value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let mut out: Map<String, Value> = map.clone();

    for (name, attr) in &block.attributes {
        if let Some(default) = &attr.default {
            if out.get(name).map_or(true, Value::is_null) {
                out.insert(name.clone(), default.clone());
            }
        }
    }

    for (name, nested) in &block.blocks {
        let Some(inner) = out.get(name).cloned() else {
            continue;
        };
        let filled = match (nested.nesting_mode, inner) {
            (BlockNestingMode::Single, inner @ Value::Object(_)) => {
                with_defaults(&nested.block, &inner)
            }
            (_, Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| with_defaults(&nested.block, item))
                    .collect(),
            ),
            (_, other) => other,
        };
        out.insert(name.clone(), filled);
    }

    Value::Object(out)
}

/// Non-null entries of an object, sorted by key.
fn object_entries(value: &Value) -> impl Iterator<Item = (&String, &Value)> {
    let mut entries: Vec<_> = value
        .as_object()
        .into_iter()
        .flat_map(|map| map.iter())
        .filter(|(_, value)| !value.is_null())
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter()
}

fn is_unordered(block: &Block, name: &str) -> bool {
    if let Some(attr) = block.attributes.get(name) {
        return matches!(attr.attr_type, AttributeType::Set(_));
    }
    block
        .blocks
        .get(name)
        .is_some_and(|nested| nested.nesting_mode == BlockNestingMode::Set)
}

/// Equality that ignores element order when `unordered` is set.
fn values_equal(a: &Value, b: &Value, unordered: bool) -> bool {
    match (a, b) {
        (Value::Array(a), Value::Array(b)) if unordered => {
            let sorted = |items: &[Value]| {
                let mut keys: Vec<String> = items.iter().map(Value::to_string).collect();
                keys.sort();
                keys
            };
            sorted(a) == sorted(b)
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    fn member_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("group_id", Attribute::required_string().with_force_new())
            .with_attribute(
                "role",
                Attribute::optional_string().with_default(json!("MEMBER")),
            )
            .with_attribute("aliases", Attribute::optional_string_set())
            .with_block(
                "fields",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("field_name", Attribute::required_string())
                        .with_attribute(
                            "indexed",
                            Attribute::optional_bool().with_default(json!(true)),
                        ),
                ),
            )
    }

    #[test]
    fn test_plan_create_fills_defaults() {
        let plan = plan_resource(
            &member_schema(),
            None,
            &json!({"group_id": "grp-1", "id": null, "fields": [{"field_name": "badge"}]}),
        );

        assert_eq!(plan.planned_state["role"], "MEMBER");
        assert_eq!(plan.planned_state["fields"][0]["indexed"], true);
        assert!(!plan.requires_replace);
        let paths: Vec<&str> = plan.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["fields", "group_id", "role"]);
    }

    #[test]
    fn test_plan_update_keeps_computed() {
        let prior = json!({"id": "m-1", "group_id": "grp-1", "role": "MEMBER"});
        let plan = plan_resource(
            &member_schema(),
            Some(&prior),
            &json!({"group_id": "grp-1", "role": "OWNER"}),
        );

        assert_eq!(plan.planned_state["id"], "m-1");
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, "role");
        assert_eq!(plan.changes[0].before, Some(json!("MEMBER")));
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_update_force_new() {
        let prior = json!({"id": "m-1", "group_id": "grp-1", "role": "MEMBER"});
        let plan = plan_resource(
            &member_schema(),
            Some(&prior),
            &json!({"group_id": "grp-2", "role": "MEMBER"}),
        );
        assert!(plan.requires_replace);
    }

    #[test]
    fn test_plan_update_set_order_is_ignored() {
        let prior =
            json!({"id": "m-1", "group_id": "grp-1", "role": "MEMBER", "aliases": ["a", "b"]});
        let plan = plan_resource(
            &member_schema(),
            Some(&prior),
            &json!({"group_id": "grp-1", "aliases": ["b", "a"]}),
        );
        assert!(!plan.has_changes());
        assert_eq!(plan.planned_state["id"], "m-1");
    }

    #[test]
    fn test_plan_delete() {
        let prior = json!({"id": "m-1", "group_id": "grp-1", "role": null});
        let plan = plan_resource(&member_schema(), Some(&prior), &Value::Null);
        assert!(plan.planned_state.is_null());
        let paths: Vec<&str> = plan.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["group_id", "id"]);
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
    }
}
