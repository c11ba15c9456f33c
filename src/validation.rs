//! Checks a JSON configuration against a [`Schema`].
//!
//! Every problem becomes a [`Diagnostic`] whose `attribute` is the dotted
//! path of the offending value (`name.given_name`, `fields.1.field_type`).
//! Computed-only attributes are ignored since the API owns them.
//!
//! ```
//! use googleworkspace_provider::schema::{Attribute, Schema};
//! use googleworkspace_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("email", Attribute::required_string())
//!     .with_attribute(
//!         "role",
//!         Attribute::optional_string().with_allowed_values(["OWNER", "MANAGER", "MEMBER"]),
//!     );
//!
//! assert!(validate(&schema, &json!({"email": "eng@example.com", "role": "MEMBER"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"email": "eng@example.com", "role": "ADMIN"}));
//! assert_eq!(diagnostics[0].attribute.as_deref(), Some("role"));
//! ```

use serde_json::{Map, Value};

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema,
};

/// All problems with `value`, attributes visited in name order. Empty means valid.
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut checker = Checker::default();
    checker.block(&schema.block, value, "");
    checker.diagnostics
}

/// [`validate`] as a `Result`.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether [`validate`] finds nothing.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

#[derive(Default)]
struct Checker {
    diagnostics: Vec<Diagnostic>,
}

impl Checker {
    fn report(&mut self, path: &str, summary: String, detail: Option<String>) {
        let mut diagnostic = Diagnostic::error(summary);
        if let Some(detail) = detail {
            diagnostic = diagnostic.with_detail(detail);
        }
        if !path.is_empty() {
            diagnostic = diagnostic.with_attribute(path);
        }
        self.diagnostics.push(diagnostic);
    }

    fn block(&mut self, block: &Block, value: &Value, path: &str) {
        let object = match value {
            Value::Null => return,
            Value::Object(object) => object,
            other => {
                return self.report(
                    path,
                    "Expected object".into(),
                    Some(format!("Got {}", kind(other))),
                );
            }
        };

        for (name, attr) in sorted(&block.attributes) {
            self.attribute(attr, present(object, name), &child(path, name));
        }
        for (name, nested) in sorted(&block.blocks) {
            self.nested(nested, present(object, name), &child(path, name));
        }
    }

    fn attribute(&mut self, attr: &Attribute, value: Option<&Value>, path: &str) {
        let flags = attr.flags;
        if flags.computed && !flags.optional && !flags.required {
            return;
        }
        let Some(value) = value else {
            if flags.required {
                self.report(
                    path,
                    format!("Missing required attribute '{}'", path),
                    Some("This attribute is required and must be provided".into()),
                );
            }
            return;
        };

        let before = self.diagnostics.len();
        self.typed(&attr.attr_type, value, path);
        if self.diagnostics.len() > before || attr.allowed_values.is_empty() {
            return;
        }
        if let Some(s) = value.as_str() {
            if !attr.allowed_values.iter().any(|allowed| allowed == s) {
                self.report(
                    path,
                    format!("Invalid value for attribute '{}'", path),
                    Some(format!(
                        "Expected one of [{}], got \"{}\"",
                        attr.allowed_values.join(", "),
                        s
                    )),
                );
            }
        }
    }

    fn typed(&mut self, expected: &AttributeType, value: &Value, path: &str) {
        let matches = match (expected, value) {
            (AttributeType::String, Value::String(_))
            | (AttributeType::Bool, Value::Bool(_)) => true,
            (AttributeType::Int64, value) => is_int64(value),
            (AttributeType::List(element), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    self.typed(element, item, &child(path, &i.to_string()));
                }
                true
            }
            (AttributeType::Set(element), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = child(path, &i.to_string());
                    self.typed(element, item, &item_path);
                    if items[..i].contains(item) {
                        self.report(
                            &item_path,
                            format!("Duplicate value in set '{}'", path),
                            Some(format!("{} appears more than once", item)),
                        );
                    }
                }
                true
            }
            (AttributeType::Map(element), Value::Object(entries)) => {
                for (key, entry) in entries {
                    self.typed(element, entry, &child(path, key));
                }
                true
            }
            _ => false,
        };
        if !matches {
            self.report(
                path,
                format!("Invalid type for attribute '{}'", path),
                Some(format!("Expected {}, got {}", expected.type_name(), kind(value))),
            );
        }
    }

    fn nested(&mut self, nested: &NestedBlock, value: Option<&Value>, path: &str) {
        let min = nested.min_items as usize;
        let max = nested.max_items as usize;

        match (nested.nesting_mode, value) {
            (BlockNestingMode::Single, None) if min > 0 => self.report(
                path,
                format!("Missing required block '{}'", path),
                Some("At least one block is required".into()),
            ),
            (_, None) if min > 0 => {
                let summary = format!("Block '{}' requires at least {} item(s)", path, min);
                self.report(path, summary, None)
            }
            (_, None) => {}
            (BlockNestingMode::Single, Some(object)) => self.block(&nested.block, object, path),
            (_, Some(Value::Array(items))) => {
                if items.len() < min {
                    self.report(
                        path,
                        format!(
                            "Block '{}' requires at least {} item(s), got {}",
                            path,
                            min,
                            items.len()
                        ),
                        None,
                    );
                }
                if max > 0 && items.len() > max {
                    self.report(
                        path,
                        format!(
                            "Block '{}' allows at most {} item(s), got {}",
                            path,
                            max,
                            items.len()
                        ),
                        None,
                    );
                }
                for (i, item) in items.iter().enumerate() {
                    self.block(&nested.block, item, &child(path, &i.to_string()));
                }
            }
            (_, Some(other)) => self.report(
                path,
                format!("Expected list for block '{}'", path),
                Some(format!("Got {}", kind(other))),
            ),
        }
    }
}

/// The value under `name`, with explicit null treated as absent.
fn present<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).filter(|v| !v.is_null())
}

fn sorted<T>(entries: &std::collections::HashMap<String, T>) -> Vec<(&String, &T)> {
    let mut entries: Vec<_> = entries.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn child(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whole numbers in i64 range, including `300.0`.
fn is_int64(value: &Value) -> bool {
    let Value::Number(n) = value else {
        return false;
    };
    n.is_i64()
        || n.as_f64()
            .is_some_and(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeFlags;
    use serde_json::json;

    fn member_schema() -> Schema {
        Schema::v0()
            .with_attribute("group_id", Attribute::required_string())
            .with_attribute("email", Attribute::required_string())
            .with_attribute(
                "role",
                Attribute::optional_string().with_allowed_values(["OWNER", "MANAGER", "MEMBER"]),
            )
            .with_attribute("id", Attribute::computed_string())
    }

    fn paths(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect()
    }

    #[test]
    fn test_missing_required_attributes_in_name_order() {
        let diagnostics = validate(&member_schema(), &json!({"role": null}));
        assert_eq!(paths(&diagnostics), ["email", "group_id"]);
        assert_eq!(diagnostics[0].summary, "Missing required attribute 'email'");
    }

    #[test]
    fn test_computed_only_attribute_is_ignored() {
        let input = json!({"group_id": "03ph8a2z", "email": "a@example.com", "id": 7});
        assert!(is_valid(&member_schema(), &input));
    }

    #[test]
    fn test_role_outside_allowed_values() {
        let input = json!({"group_id": "03ph8a2z", "email": "a@example.com", "role": "admin"});
        let diagnostics = validate(&member_schema(), &input);
        assert_eq!(paths(&diagnostics), ["role"]);
        assert!(diagnostics[0].detail.as_deref().unwrap().contains("OWNER, MANAGER, MEMBER"));

        let input = json!({"group_id": "03ph8a2z", "email": "a@example.com", "role": 3});
        let diagnostics = validate(&member_schema(), &input);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.starts_with("Invalid type"));
    }

    #[test]
    fn test_int64_accepts_whole_floats() {
        let schema = Schema::v0().with_attribute("timeout", Attribute::optional_int64());
        assert!(is_valid(&schema, &json!({"timeout": 300})));
        assert!(is_valid(&schema, &json!({"timeout": 300.0})));
        assert!(!is_valid(&schema, &json!({"timeout": 1.5})));
        assert!(!is_valid(&schema, &json!({"timeout": "300"})));
    }

    #[test]
    fn test_duplicate_alias_in_set() {
        let schema = Schema::v0().with_attribute("aliases", Attribute::optional_string_set());
        assert!(is_valid(&schema, &json!({"aliases": ["a@example.com", "b@example.com"]})));

        let diagnostics =
            validate(&schema, &json!({"aliases": ["a@example.com", "a@example.com"]}));
        assert_eq!(paths(&diagnostics), ["aliases.1"]);
    }

    #[test]
    fn test_policy_value_map() {
        let schema = Schema::v0().with_attribute(
            "value",
            Attribute::new(AttributeType::map(AttributeType::String), AttributeFlags::required()),
        );
        assert!(is_valid(&schema, &json!({"value": {"homepageLocation": "https://example.com"}})));

        let diagnostics = validate(&schema, &json!({"value": {"homepageLocation": 1}}));
        assert_eq!(paths(&diagnostics), ["value.homepageLocation"]);
    }

    #[test]
    fn test_user_name_block() {
        let schema = Schema::v0().with_block(
            "name",
            NestedBlock::single(
                Block::new()
                    .with_attribute("given_name", Attribute::required_string())
                    .with_attribute("family_name", Attribute::required_string()),
            )
            .with_min_items(1),
        );

        let diagnostics = validate(&schema, &json!({}));
        assert!(diagnostics[0].summary.starts_with("Missing required block"));

        let diagnostics = validate(&schema, &json!({"name": {"given_name": "Jane"}}));
        assert_eq!(paths(&diagnostics), ["name.family_name"]);
    }

    #[test]
    fn test_custom_schema_fields_block() {
        let schema = Schema::v0().with_block(
            "fields",
            NestedBlock::list(
                Block::new()
                    .with_attribute("field_name", Attribute::required_string())
                    .with_attribute(
                        "field_type",
                        Attribute::required_string().with_allowed_values(["STRING", "INT64"]),
                    ),
            )
            .with_min_items(1)
            .with_max_items(2),
        );

        assert!(is_valid(
            &schema,
            &json!({"fields": [{"field_name": "a", "field_type": "STRING"}]})
        ));
        assert!(!is_valid(&schema, &json!({"fields": []})));
        assert!(!is_valid(&schema, &json!({"fields": {"field_name": "a"}})));

        let diagnostics = validate(
            &schema,
            &json!({"fields": [
                {"field_name": "a", "field_type": "STRING"},
                {"field_name": "b", "field_type": "FLOAT"},
                {"field_name": "c", "field_type": "INT64"}
            ]}),
        );
        assert_eq!(diagnostics.len(), 2);
        assert!(paths(&diagnostics).contains(&"fields.1.field_type"));
    }

    #[test]
    fn test_non_object_root() {
        let diagnostics = validate(&member_schema(), &json!("nope"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].attribute.is_none());
        assert!(validate_result(&member_schema(), &json!("nope")).is_err());
    }
}
