//! Entities of a project configuration and the per-call user context.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// User attributes, keyed by attribute name.
pub type Attributes = HashMap<String, AttributeValue>;

/// Value of a user attribute or an event tag.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// Explicit null.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// The user a decision or an event is made for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    /// Unique identifier of the user.
    pub id: String,
    /// Attributes of the user, used for targeting and attached to events.
    #[serde(default)]
    pub attributes: Attributes,
}

impl UserContext {
    /// Create a user context without attributes.
    ///
    /// ```
    /// # use expkit::UserContext;
    /// let user = UserContext::new("user-1").with_attribute("country", "NZ");
    /// assert_eq!(user.id, "user-1");
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        UserContext {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    /// Add an attribute, replacing any previous value under `key`.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Primitive type declared for a feature variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// `true` or `false`.
    Boolean,
    /// 64-bit floating point.
    Double,
    /// 64-bit signed integer.
    Integer,
    /// Arbitrary string.
    String,
}

impl VariableType {
    /// Name used for this type in the datafile.
    pub fn as_str(self) -> &'static str {
        match self {
            VariableType::Boolean => "boolean",
            VariableType::Double => "double",
            VariableType::Integer => "integer",
            VariableType::String => "string",
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(VariableType::Boolean),
            "double" => Ok(VariableType::Double),
            "integer" => Ok(VariableType::Integer),
            "string" => Ok(VariableType::String),
            _ => Err(()),
        }
    }
}

/// A typed, keyed value declared on a [`Feature`].
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Variable id. Variation overrides refer to this id.
    pub id: String,
    /// Variable key, unique within its feature.
    pub key: String,
    /// Declared type. `None` if unset or not understood by this SDK version.
    pub variable_type: Option<VariableType>,
    /// Raw default value, used when no override applies.
    pub default_value: String,
}

/// Override of a single variable's raw value on a [`Variation`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariationVariable {
    /// Id of the overridden [`Variable`].
    pub id: String,
    /// Raw override value.
    pub value: String,
}

/// One arm of an [`Experiment`].
#[derive(Debug, Clone, PartialEq)]
pub struct Variation {
    /// Variation id.
    pub id: String,
    /// Variation key.
    pub key: String,
    /// Whether the parent feature is enabled for users in this variation.
    pub feature_enabled: bool,
    /// Variable overrides, keyed by variable id.
    pub variables: HashMap<String, VariationVariable>,
}

impl Variation {
    /// Return the raw override for `variable_id`, if this variation carries one.
    pub fn variable_override(&self, variable_id: &str) -> Option<&str> {
        self.variables
            .get(variable_id)
            .map(|variable| variable.value.as_str())
    }
}

/// A named split test.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Experiment {
    /// Experiment id.
    pub id: String,
    /// Experiment key.
    pub key: String,
    /// Id of the layer (campaign) the experiment belongs to.
    pub layer_id: String,
    /// Variations, keyed by variation key.
    pub variations: HashMap<String, Variation>,
}

/// Ordered set of delivery rules applied when no feature test assigns the user.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rollout {
    /// Rollout id.
    pub id: String,
    /// Rollout rules, in evaluation order.
    pub experiments: Vec<Experiment>,
}

/// A flag-gated capability with its experiments and variable schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    /// Feature id.
    pub id: String,
    /// Feature key.
    pub key: String,
    /// Experiments testing this feature.
    pub feature_experiments: Vec<Experiment>,
    /// Rollout delivering this feature outside of experiments.
    pub rollout: Option<Rollout>,
    /// Declared variables, keyed by variable key.
    pub variable_map: HashMap<String, Variable>,
}

/// A conversion event that can be tracked.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    /// Event id.
    pub id: String,
    /// Event key.
    pub key: String,
    /// Ids of the experiments this event is a metric for.
    pub experiment_ids: Vec<String>,
}
