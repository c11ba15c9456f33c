//! Schema vocabulary for the provider block, resources and data sources.
//!
//! The same [`Schema`] value is sent to the host in `GetSchema`, checked by
//! [`crate::validation`] and walked by [`crate::plan`], so an attribute's
//! flags, default and `force_new` marker are declared exactly once, next to
//! the resource that owns it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Int64,
    /// `true` or `false`.
    Bool,
    /// Ordered sequence.
    List(Box<AttributeType>),
    /// Unordered collection; the plan ignores element order.
    Set(Box<AttributeType>),
    /// String-keyed object, e.g. Chrome policy values.
    Map(Box<AttributeType>),
}

impl AttributeType {
    /// `list(element)`.
    pub fn list(element: AttributeType) -> Self {
        Self::List(Box::new(element))
    }

    /// `set(element)`.
    pub fn set(element: AttributeType) -> Self {
        Self::Set(Box::new(element))
    }

    /// `map(element)`.
    pub fn map(element: AttributeType) -> Self {
        Self::Map(Box::new(element))
    }

    /// Name shown in type-mismatch diagnostics, e.g. `set(string)`.
    pub fn type_name(&self) -> String {
        match self {
            Self::String => "string".into(),
            Self::Int64 => "int64".into(),
            Self::Bool => "bool".into(),
            Self::List(element) => format!("list({})", element.type_name()),
            Self::Set(element) => format!("set({})", element.type_name()),
            Self::Map(element) => format!("map({})", element.type_name()),
        }
    }
}

/// Who supplies an attribute: the practitioner, the API, or either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// Must appear in configuration.
    pub required: bool,
    /// May appear in configuration.
    pub optional: bool,
    /// Filled in from the API response.
    pub computed: bool,
    /// Redacted by the host, e.g. passwords and access tokens.
    pub sensitive: bool,
}

impl AttributeFlags {
    const fn of(required: bool, optional: bool, computed: bool) -> Self {
        Self {
            required,
            optional,
            computed,
            sensitive: false,
        }
    }

    /// Required in configuration.
    pub const fn required() -> Self {
        Self::of(true, false, false)
    }

    /// Optional in configuration.
    pub const fn optional() -> Self {
        Self::of(false, true, false)
    }

    /// Read-only, set from the API.
    pub const fn computed() -> Self {
        Self::of(false, false, true)
    }

    /// Optional; the API decides when unset.
    pub const fn optional_computed() -> Self {
        Self::of(false, true, true)
    }

    /// Same flags, redacted.
    pub const fn sensitive(self) -> Self {
        Self {
            sensitive: true,
            ..self
        }
    }
}

/// One attribute of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Usage flags.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Documentation shown by the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A change to this attribute replaces the object instead of updating it.
    #[serde(default)]
    pub force_new: bool,
    /// Value planned on create when configuration leaves the attribute out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Closed set of accepted strings; empty means anything goes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
}

macro_rules! attribute_shorthands {
    ($($name:ident => $ty:expr, $flags:ident;)*) => {
        $(
            #[doc = concat!(
                "Shorthand for `Attribute::new(",
                stringify!($ty),
                ", AttributeFlags::",
                stringify!($flags),
                "())`."
            )]
            pub fn $name() -> Self {
                Self::new($ty, AttributeFlags::$flags())
            }
        )*
    };
}

impl Attribute {
    /// Attribute of the given type with no description, default or restriction.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
            allowed_values: Vec::new(),
        }
    }

    attribute_shorthands! {
        required_string => AttributeType::String, required;
        optional_string => AttributeType::String, optional;
        computed_string => AttributeType::String, computed;
        optional_computed_string => AttributeType::String, optional_computed;
        optional_int64 => AttributeType::Int64, optional;
        computed_int64 => AttributeType::Int64, computed;
        optional_bool => AttributeType::Bool, optional;
        computed_bool => AttributeType::Bool, computed;
        optional_computed_bool => AttributeType::Bool, optional_computed;
        optional_string_set => AttributeType::set(AttributeType::String), optional;
        computed_string_set => AttributeType::set(AttributeType::String), computed;
    }

    /// Attach documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Changing the value replaces the object.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Planned on create when the configuration omits the attribute.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Accept only these strings, e.g. `["OWNER", "MANAGER", "MEMBER"]`.
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Redact the value.
    pub fn sensitive(mut self) -> Self {
        self.flags = self.flags.sensitive();
        self
    }
}

/// How many instances of a nested block may appear and whether order matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// At most one, stored as an object.
    #[default]
    Single,
    /// Ordered array.
    List,
    /// Unordered array.
    Set,
}

/// Attributes and nested blocks, e.g. a user's `name` or a schema's `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Block {
    /// Attributes by name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
    /// Nested blocks by name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub blocks: HashMap<String, NestedBlock>,
    /// Documentation shown by the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Block {
    /// Empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add or replace a nested block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    /// Attach documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A [`Block`] placed inside another, with its cardinality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    /// Contents of each instance.
    #[serde(flatten)]
    pub block: Block,
    /// Cardinality and ordering.
    #[serde(default)]
    pub nesting_mode: BlockNestingMode,
    /// Fewest instances accepted.
    #[serde(default)]
    pub min_items: u32,
    /// Most instances accepted; 0 means no limit.
    #[serde(default)]
    pub max_items: u32,
}

impl NestedBlock {
    fn nested(block: Block, nesting_mode: BlockNestingMode, max_items: u32) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items,
        }
    }

    /// Zero or one instance.
    pub fn single(block: Block) -> Self {
        Self::nested(block, BlockNestingMode::Single, 1)
    }

    /// Any number of instances, order significant.
    pub fn list(block: Block) -> Self {
        Self::nested(block, BlockNestingMode::List, 0)
    }

    /// Any number of instances, order ignored.
    pub fn set(block: Block) -> Self {
        Self::nested(block, BlockNestingMode::Set, 0)
    }

    /// Require at least `min` instances.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Allow at most `max` instances.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }
}

/// Versioned root block of a resource, data source or the provider itself.
///
/// The version is bumped when stored state needs rewriting; see
/// `UpgradeResourceState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schema {
    /// State format version.
    #[serde(default)]
    pub version: u64,
    /// Root block.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// Empty schema at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Empty schema at version 0.
    pub fn v0() -> Self {
        Self::default()
    }

    /// Add a top-level attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block = self.block.with_attribute(name, attr);
        self
    }

    /// Add a top-level nested block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block = self.block.with_block(name, block);
        self
    }

    /// Document the root block.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.block = self.block.with_description(description);
        self
    }
}

/// Everything `GetSchema` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// The `provider` configuration block.
    #[serde(default)]
    pub provider: Schema,
    /// Managed resource types, e.g. `googleworkspace_user`.
    #[serde(default)]
    pub resources: HashMap<String, Schema>,
    /// Read-only lookups, e.g. `googleworkspace_group`.
    #[serde(default)]
    pub data_sources: HashMap<String, Schema>,
}

impl ProviderSchema {
    /// Empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration block.
    pub fn with_provider_config(self, provider: Schema) -> Self {
        Self { provider, ..self }
    }

    /// Register a resource type.
    pub fn with_resource(mut self, type_name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(type_name.into(), schema);
        self
    }

    /// Register a data source type.
    pub fn with_data_source(mut self, type_name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(type_name.into(), schema);
        self
    }
}

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// Fails the operation.
    Error,
    /// Shown to the practitioner, operation continues.
    Warning,
}

/// A problem reported back to the host instead of a gRPC error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: DiagnosticSeverity,
    /// One-line description.
    pub summary: String,
    /// Longer explanation, often the API's own message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Dotted path of the offending attribute, e.g. `name.given_name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn with_severity(severity: DiagnosticSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Error, summary)
    }

    /// Warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Warning, summary)
    }

    /// Attach a detail message.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Point at an attribute path.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether the severity is [`DiagnosticSeverity::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self.severity, DiagnosticSeverity::Error)
    }
}

/// True when at least one diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_type_names() {
        assert_eq!(AttributeType::set(AttributeType::String).type_name(), "set(string)");
        assert_eq!(
            AttributeType::map(AttributeType::list(AttributeType::Int64)).type_name(),
            "map(list(int64))"
        );
    }

    #[test]
    fn test_password_is_required_and_sensitive() {
        let password = Attribute::required_string().sensitive();
        assert_eq!(
            password.flags,
            AttributeFlags {
                required: true,
                sensitive: true,
                ..AttributeFlags::default()
            }
        );
        assert_eq!(Attribute::optional_computed_bool().flags, AttributeFlags::optional_computed());
    }

    #[test]
    fn test_member_role_attribute() {
        let role = Attribute::optional_string()
            .with_allowed_values(["OWNER", "MANAGER", "MEMBER"])
            .with_default(json!("MEMBER"));

        assert!(role.flags.optional);
        assert!(!role.force_new);
        assert_eq!(role.allowed_values.len(), 3);

        let encoded = serde_json::to_value(&role).unwrap();
        assert_eq!(encoded["type"], json!("string"));
        assert_eq!(encoded["default"], json!("MEMBER"));
        assert_eq!(encoded["allowed_values"], json!(["OWNER", "MANAGER", "MEMBER"]));

        let unrestricted = serde_json::to_value(Attribute::computed_string()).unwrap();
        assert!(unrestricted.get("allowed_values").is_none());
        assert!(unrestricted.get("default").is_none());
    }

    #[test]
    fn test_user_like_schema() {
        let schema = Schema::v0()
            .with_attribute("primary_email", Attribute::required_string().with_force_new())
            .with_attribute("etag", Attribute::computed_string())
            .with_block(
                "name",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("given_name", Attribute::required_string())
                        .with_attribute("family_name", Attribute::required_string()),
                )
                .with_min_items(1),
            )
            .with_block("emails", NestedBlock::list(Block::new()).with_max_items(10));

        assert_eq!(schema.version, 0);
        assert!(schema.block.attributes["primary_email"].force_new);

        let name = &schema.block.blocks["name"];
        assert_eq!(name.nesting_mode, BlockNestingMode::Single);
        assert_eq!((name.min_items, name.max_items), (1, 1));

        let emails = &schema.block.blocks["emails"];
        assert_eq!(emails.nesting_mode, BlockNestingMode::List);
        assert_eq!((emails.min_items, emails.max_items), (0, 10));
        assert_eq!(NestedBlock::set(Block::new()).max_items, 0);
    }

    #[test]
    fn test_has_errors_ignores_warnings() {
        let warning = Diagnostic::warning("Alias already verified");
        let error = Diagnostic::error("Conflicting credentials")
            .with_detail("Set either credentials or access_token, not both")
            .with_attribute("access_token");

        assert!(!has_errors(std::slice::from_ref(&warning)));
        assert!(has_errors(&[warning, error.clone()]));
        assert_eq!(error.attribute.as_deref(), Some("access_token"));
    }
}
