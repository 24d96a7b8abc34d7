//! Typed query/path parameter coercion (spec.md §4.3).

use mtc_model::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    UnsignedInteger,
    Double,
    Bool,
}

impl ParamType {
    /// `(type tag, format tag)` reported in `INVALID_PARAMETER_VALUE` errors,
    /// e.g. `interval` is declared `integer`/`int32`.
    pub fn tags(self) -> (&'static str, &'static str) {
        match self {
            ParamType::String => ("string", "string"),
            ParamType::Integer => ("integer", "int32"),
            ParamType::UnsignedInteger => ("unsigned_integer", "uint32"),
            ParamType::Double => ("double", "double"),
            ParamType::Bool => ("bool", "bool"),
        }
    }

    pub fn coerce(self, name: &str, raw: &str) -> Result<ParamValue, AgentError> {
        let err = || {
            let (ty, format) = self.tags();
            AgentError::invalid_parameter_value(name, raw, ty, format)
        };
        match self {
            ParamType::String => Ok(ParamValue::Str(raw.to_owned())),
            ParamType::Integer => raw.parse::<i64>().map(ParamValue::Int).map_err(|_| err()),
            ParamType::UnsignedInteger => raw.parse::<u64>().map(ParamValue::UInt).map_err(|_| err()),
            ParamType::Double => raw.parse::<f64>().map(ParamValue::Double).map_err(|_| err()),
            ParamType::Bool => raw.parse::<bool>().map(ParamValue::Bool).map_err(|_| err()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Double(f64),
    Bool(bool),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Double(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// A declared query parameter: `key={type}` or `key={type:default}`.
#[derive(Debug, Clone)]
pub struct QueryParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub default: Option<String>,
}

impl QueryParamSpec {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}
