//! Strict coercion of raw variable values to primitives.
use crate::{
    decision::FeatureDecision,
    entities::{Variable, VariableType},
    Error, Result,
};

/// A primitive a feature variable can be read as.
///
/// Implemented for `bool`, `f64`, `i64` and `String`, matching the four [`VariableType`]s.
pub trait VariableValue: Sized {
    /// Declared type a variable must have to be read as `Self`.
    const VARIABLE_TYPE: VariableType;

    /// Parse a raw value. Returns `None` unless `raw` is a valid literal for this type.
    fn parse_raw(raw: &str) -> Option<Self>;
}

impl VariableValue for bool {
    const VARIABLE_TYPE: VariableType = VariableType::Boolean;

    fn parse_raw(raw: &str) -> Option<Self> {
        match raw {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

impl VariableValue for f64 {
    const VARIABLE_TYPE: VariableType = VariableType::Double;

    /// Out-of-range literals such as `1e400` are rejected instead of saturating to infinity.
    fn parse_raw(raw: &str) -> Option<Self> {
        let value: f64 = raw.parse().ok()?;
        if value.is_infinite() && !is_infinity_literal(raw) {
            return None;
        }
        Some(value)
    }
}

impl VariableValue for i64 {
    const VARIABLE_TYPE: VariableType = VariableType::Integer;

    fn parse_raw(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl VariableValue for String {
    const VARIABLE_TYPE: VariableType = VariableType::String;

    fn parse_raw(raw: &str) -> Option<Self> {
        Some(raw.to_owned())
    }
}

fn is_infinity_literal(raw: &str) -> bool {
    let unsigned = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity")
}

/// Raw value of `variable` for a user with `decision`.
///
/// The variation's override wins only if the variation enables the feature.
pub(crate) fn select_raw_value<'a>(variable: &'a Variable, decision: &'a FeatureDecision) -> &'a str {
    decision
        .variation
        .as_ref()
        .filter(|variation| variation.feature_enabled)
        .and_then(|variation| variation.variable_override(&variable.id))
        .unwrap_or(variable.default_value.as_str())
}

/// Check the declared type of `variable` against `T` and parse `raw` as `T`.
pub(crate) fn coerce<T: VariableValue>(variable: &Variable, raw: &str) -> Result<T> {
    if variable.variable_type != Some(T::VARIABLE_TYPE) {
        return Err(Error::InvalidVariableType {
            expected: T::VARIABLE_TYPE,
            found: variable.variable_type,
        });
    }
    parse::<T>(variable, raw)
}

fn parse<T: VariableValue>(variable: &Variable, raw: &str) -> Result<T> {
    T::parse_raw(raw).ok_or_else(|| Error::VariableParse {
        key: variable.key.clone(),
        value: raw.to_owned(),
        expected: T::VARIABLE_TYPE,
    })
}

/// Parse `raw` by the variable's own declared type and render it back to a string.
///
/// Variables with an unset type are passed through verbatim.
pub(crate) fn render(variable: &Variable, raw: &str) -> Result<String> {
    match variable.variable_type {
        Some(VariableType::Boolean) => parse::<bool>(variable, raw).map(|v| v.to_string()),
        Some(VariableType::Double) => parse::<f64>(variable, raw).map(|v| v.to_string()),
        Some(VariableType::Integer) => parse::<i64>(variable, raw).map(|v| v.to_string()),
        Some(VariableType::String) => Ok(raw.to_owned()),
        None => {
            log::warn!(target: "expkit",
                       variable_key = variable.key.as_str();
                       "variable {:?} has an unknown type, passing its value through",
                       variable.key);
            Ok(raw.to_owned())
        }
    }
}
