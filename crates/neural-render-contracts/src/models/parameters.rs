use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Parameter names filled by the operation itself, never from user values.
pub const RESERVED_PARAMETERS: [&str; 2] = ["control_image", "mask"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    String,
    Enum,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Enum => "enum",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed parameter value. Enum selections are carried as `Text`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("parameter '{name}' expects {expected}, got '{raw}'")]
    WrongKind {
        name: String,
        expected: ParamKind,
        raw: String,
    },
    #[error("parameter '{name}' value {value} is outside [{min}, {max}]")]
    OutOfBounds {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("parameter '{name}' value '{value}' is not one of: {options}")]
    UnknownOption {
        name: String,
        value: String,
        options: String,
    },
    #[error("parameter '{name}' is declared as enum without options")]
    EmptyOptions { name: String },
    #[error("model '{model}' has no parameter '{name}'")]
    Unknown { model: String, name: String },
    #[error("parameter '{name}' is filled automatically and cannot be set")]
    Reserved { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameter {
    pub name: String,
    pub kind: ParamKind,
    pub default: ParamValue,
    pub description: String,
    pub bounds: Option<(f64, f64)>,
    pub options: Vec<String>,
}

impl ModelParameter {
    fn new(name: &str, kind: ParamKind, default: ParamValue, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default,
            description: description.to_string(),
            bounds: None,
            options: Vec::new(),
        }
    }

    pub fn int(name: &str, default: i64, description: &str) -> Self {
        Self::new(name, ParamKind::Int, ParamValue::Int(default), description)
    }

    pub fn float(name: &str, default: f64, description: &str) -> Self {
        Self::new(name, ParamKind::Float, ParamValue::Float(default), description)
    }

    pub fn boolean(name: &str, default: bool, description: &str) -> Self {
        Self::new(name, ParamKind::Bool, ParamValue::Bool(default), description)
    }

    pub fn text(name: &str, default: &str, description: &str) -> Self {
        Self::new(
            name,
            ParamKind::String,
            ParamValue::Text(default.to_string()),
            description,
        )
    }

    pub fn choice<S: AsRef<str>>(
        name: &str,
        default: &str,
        description: &str,
        options: &[S],
    ) -> Self {
        let mut parameter = Self::new(
            name,
            ParamKind::Enum,
            ParamValue::Text(default.to_string()),
            description,
        );
        parameter.options = options
            .iter()
            .map(|option| option.as_ref().to_string())
            .collect();
        parameter
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some((min, max));
        self
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_PARAMETERS.contains(&self.name.as_str())
    }

    /// An enum whose every option is an integer literal; sent as a number.
    pub fn is_numeric_enum(&self) -> bool {
        self.kind == ParamKind::Enum
            && !self.options.is_empty()
            && self
                .options
                .iter()
                .all(|option| option.trim().parse::<i64>().is_ok())
    }

    /// Checks the declaration itself: enum options present, default admissible.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.kind == ParamKind::Enum && self.options.is_empty() {
            return Err(ParameterError::EmptyOptions {
                name: self.name.clone(),
            });
        }
        self.check(&self.default)
    }

    pub fn check(&self, value: &ParamValue) -> Result<(), ParameterError> {
        match (self.kind, value) {
            (ParamKind::Int, ParamValue::Int(_))
            | (ParamKind::Float, ParamValue::Int(_) | ParamValue::Float(_)) => {
                self.check_bounds(value.as_f64().unwrap_or_default())
            }
            (ParamKind::Bool, ParamValue::Bool(_)) | (ParamKind::String, ParamValue::Text(_)) => {
                Ok(())
            }
            (ParamKind::Enum, ParamValue::Text(text)) => self.check_option(text),
            _ => Err(self.wrong_kind(value.to_string())),
        }
    }

    pub fn parse_value(&self, raw: &str) -> Result<ParamValue, ParameterError> {
        let trimmed = raw.trim();
        let value = match self.kind {
            ParamKind::Int => trimmed
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| self.wrong_kind(raw.to_string()))?,
            ParamKind::Float => trimmed
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(ParamValue::Float)
                .ok_or_else(|| self.wrong_kind(raw.to_string()))?,
            ParamKind::Bool => parse_bool(trimmed)
                .map(ParamValue::Bool)
                .ok_or_else(|| self.wrong_kind(raw.to_string()))?,
            ParamKind::String => ParamValue::Text(raw.to_string()),
            ParamKind::Enum => ParamValue::Text(trimmed.to_string()),
        };
        self.check(&value)?;
        Ok(value)
    }

    pub fn value_from_json(&self, value: &Value) -> Result<ParamValue, ParameterError> {
        let parsed = match (self.kind, value) {
            (_, Value::String(raw)) if self.kind != ParamKind::String => {
                return self.parse_value(raw);
            }
            (ParamKind::Int, Value::Number(number)) => number
                .as_i64()
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|value| value.fract() == 0.0)
                        .map(|value| value as i64)
                })
                .map(ParamValue::Int),
            (ParamKind::Float, Value::Number(number)) => number.as_f64().map(ParamValue::Float),
            (ParamKind::Bool, Value::Bool(flag)) => Some(ParamValue::Bool(*flag)),
            (ParamKind::Bool, Value::Number(number)) => {
                number.as_i64().map(|value| ParamValue::Bool(value != 0))
            }
            (ParamKind::String, Value::String(text)) => Some(ParamValue::Text(text.clone())),
            (ParamKind::Enum, Value::Number(number)) => Some(ParamValue::Text(number.to_string())),
            _ => None,
        };
        let parsed = parsed.ok_or_else(|| self.wrong_kind(value.to_string()))?;
        self.check(&parsed)?;
        Ok(parsed)
    }

    /// JSON form sent to the remote service.
    pub fn wire_value(&self, value: &ParamValue) -> Value {
        match (self.kind, value) {
            (ParamKind::Float, ParamValue::Int(number)) => Value::from(*number as f64),
            (ParamKind::Enum, ParamValue::Text(text)) if self.is_numeric_enum() => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(text.clone())),
            _ => value.to_json(),
        }
    }

    fn check_bounds(&self, value: f64) -> Result<(), ParameterError> {
        let Some((min, max)) = self.bounds else {
            return Ok(());
        };
        if value < min || value > max {
            return Err(ParameterError::OutOfBounds {
                name: self.name.clone(),
                value,
                min,
                max,
            });
        }
        Ok(())
    }

    fn check_option(&self, value: &str) -> Result<(), ParameterError> {
        if self.options.iter().any(|option| option == value) {
            return Ok(());
        }
        Err(ParameterError::UnknownOption {
            name: self.name.clone(),
            value: value.to_string(),
            options: self.options.join(", "),
        })
    }

    fn wrong_kind(&self, raw: String) -> ParameterError {
        ParameterError::WrongKind {
            name: self.name.clone(),
            expected: self.kind,
            raw,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    let lowered = raw.to_ascii_lowercase();
    if matches!(lowered.as_str(), "1" | "true" | "yes" | "on") {
        Some(true)
    } else if matches!(lowered.as_str(), "0" | "false" | "no" | "off") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ModelParameter, ParamKind, ParamValue, ParameterError};

    fn tiling() -> ModelParameter {
        let options = (16..=256)
            .step_by(16)
            .map(|value| value.to_string())
            .collect::<Vec<String>>();
        ModelParameter::choice("tiling_width", "112", "tile width", &options)
    }

    #[test]
    fn parse_value_respects_kind_and_bounds() {
        let steps = ModelParameter::int("steps", 28, "Number of steps").with_bounds(1.0, 50.0);
        assert_eq!(steps.parse_value(" 30 "), Ok(ParamValue::Int(30)));
        assert!(matches!(
            steps.parse_value("51"),
            Err(ParameterError::OutOfBounds { max, .. }) if max == 50.0
        ));
        assert!(matches!(
            steps.parse_value("thirty"),
            Err(ParameterError::WrongKind {
                expected: ParamKind::Int,
                ..
            })
        ));

        let pattern = ModelParameter::boolean("pattern", false, "seamless");
        assert_eq!(pattern.parse_value("on"), Ok(ParamValue::Bool(true)));
        assert_eq!(pattern.parse_value("0"), Ok(ParamValue::Bool(false)));
    }

    #[test]
    fn enum_values_must_be_declared_options() {
        let handfix = ModelParameter::choice(
            "handfix",
            "disabled",
            "fix hands",
            &["disabled", "hands_only", "image_and_hands"],
        );
        assert!(handfix.validate().is_ok());
        assert_eq!(
            handfix.parse_value("hands_only"),
            Ok(ParamValue::Text("hands_only".to_string()))
        );
        let err = handfix.parse_value("feet_only").unwrap_err();
        assert_eq!(
            err.to_string(),
            "parameter 'handfix' value 'feet_only' is not one of: disabled, hands_only, image_and_hands"
        );
    }

    #[test]
    fn enum_without_options_fails_validation() {
        let broken = ModelParameter::choice::<&str>("empty", "x", "no options", &[]);
        assert_eq!(
            broken.validate(),
            Err(ParameterError::EmptyOptions {
                name: "empty".to_string()
            })
        );
    }

    #[test]
    fn numeric_enums_are_sent_as_integers() {
        let width = tiling();
        assert!(width.is_numeric_enum());
        let value = width.value_from_json(&json!(128)).unwrap();
        assert_eq!(value, ParamValue::Text("128".to_string()));
        assert_eq!(width.wire_value(&value), json!(128));

        let scheduler = ModelParameter::choice("scheduler", "Euler", "s", &["Euler", "DDIM"]);
        assert!(!scheduler.is_numeric_enum());
        assert_eq!(
            scheduler.wire_value(&ParamValue::Text("DDIM".to_string())),
            json!("DDIM")
        );
    }

    #[test]
    fn float_parameters_accept_integers_and_send_floats() {
        let scale = ModelParameter::float("scale_factor", 2.0, "scale").with_bounds(1.0, 4.0);
        let value = scale.value_from_json(&json!(3)).unwrap();
        assert_eq!(value, ParamValue::Float(3.0));
        assert_eq!(scale.wire_value(&ParamValue::Int(2)), json!(2.0));
        assert!(scale.value_from_json(&json!(true)).is_err());
    }

    #[test]
    fn string_parameters_keep_raw_text() {
        let prompt = ModelParameter::text("prompt", "", "prompt");
        assert_eq!(
            prompt.parse_value("  a cat "),
            Ok(ParamValue::Text("  a cat ".to_string()))
        );
        assert!(prompt.value_from_json(&json!(5)).is_err());
    }

    #[test]
    fn reserved_names_are_detected() {
        assert!(ModelParameter::text("control_image", "", "c").is_reserved());
        assert!(ModelParameter::text("mask", "", "m").is_reserved());
        assert!(!ModelParameter::text("prompt", "", "p").is_reserved());
    }
}
