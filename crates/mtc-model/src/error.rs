//! The closed error taxonomy served by the REST sink.
//!
//! Every failure the agent can report to a client boils down to one of the
//! variants in [`ErrorCode`]. Handlers build an [`AgentError`] with whatever
//! detail the variant carries and the serializer renders it in the client's
//! negotiated content type; the router never needs to know about any other
//! kind of failure.

use std::fmt;

/// The closed set of wire error codes (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AssetNotFound,
    InternalError,
    InvalidRequest,
    InvalidUri,
    InvalidXPath,
    NoDevice,
    OutOfRange,
    QueryError,
    TooMany,
    Unauthorized,
    Unsupported,
    InvalidParameterValue,
    InvalidQueryParameter,
}

impl ErrorCode {
    /// The `errorCode` attribute value used in both XML and JSON envelopes.
    pub fn wire_name(self) -> &'static str {
        match self {
            ErrorCode::AssetNotFound => "ASSET_NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidUri => "INVALID_URI",
            ErrorCode::InvalidXPath => "INVALID_XPATH",
            ErrorCode::NoDevice => "NO_DEVICE",
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::QueryError => "QUERY_ERROR",
            ErrorCode::TooMany => "TOO_MANY",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::InvalidParameterValue => "INVALID_PARAMETER_VALUE",
            ErrorCode::InvalidQueryParameter => "INVALID_QUERY_PARAMETER",
        }
    }

    /// The per-variant element name used by schema >= 2.6 error documents.
    pub fn element_name(self) -> &'static str {
        match self {
            ErrorCode::AssetNotFound => "AssetNotFound",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::InvalidRequest => "InvalidRequest",
            ErrorCode::InvalidUri => "InvalidURI",
            ErrorCode::InvalidXPath => "InvalidXPath",
            ErrorCode::NoDevice => "NoDevice",
            ErrorCode::OutOfRange => "OutOfRange",
            ErrorCode::QueryError => "QueryError",
            ErrorCode::TooMany => "TooMany",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::Unsupported => "Unsupported",
            ErrorCode::InvalidParameterValue => "InvalidParameterValue",
            ErrorCode::InvalidQueryParameter => "InvalidParameterValue",
        }
    }

    /// The HTTP status this error code maps to (spec.md §7 table).
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::NoDevice => 404,
            ErrorCode::OutOfRange => 400,
            ErrorCode::InvalidParameterValue => 400,
            ErrorCode::InvalidQueryParameter => 400,
            ErrorCode::AssetNotFound => 404,
            ErrorCode::InvalidUri => 404,
            ErrorCode::InvalidXPath => 400,
            ErrorCode::InvalidRequest => 400,
            ErrorCode::InternalError => 500,
            ErrorCode::Unauthorized => 400,
            ErrorCode::QueryError => 400,
            ErrorCode::TooMany => 400,
            ErrorCode::Unsupported => 400,
        }
    }
}

/// Variant-specific payload carried alongside the error message.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetail {
    None,
    /// A query/path parameter failed type coercion.
    InvalidParameterValue {
        parameter: String,
        value: String,
        param_type: String,
        format: String,
    },
    /// A numeric parameter (sequence, count, interval, heartbeat, ...) was outside bounds.
    OutOfRange {
        parameter: String,
        value: i64,
        minimum: i64,
        maximum: i64,
    },
    /// One or more asset ids in the request path were not present in storage.
    AssetNotFound { asset_id: String },
}

/// A single reportable failure, carrying the fixed error-code plus whatever
/// contextual detail its variant needs (spec.md §3 "Error").
#[derive(Debug, Clone, thiserror::Error)]
pub struct AgentError {
    pub code: ErrorCode,
    pub message: Option<String>,
    pub uri: Option<String>,
    pub request: Option<String>,
    pub detail: ErrorDetail,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code.wire_name())?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl AgentError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            uri: None,
            request: None,
            detail: ErrorDetail::None,
        }
    }

    pub fn no_device(device: &str) -> Self {
        Self::new(ErrorCode::NoDevice, format!("Could not find device: {device}"))
    }

    pub fn invalid_uri(path: &str) -> Self {
        Self::new(ErrorCode::InvalidUri, format!("Cannot find handler for: {path}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_xpath(path: &str) -> Self {
        Self::new(
            ErrorCode::InvalidXPath,
            format!("Invalid or unsupported path expression: {path}"),
        )
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn asset_not_found(asset_id: impl Into<String>) -> Self {
        let asset_id = asset_id.into();
        Self {
            code: ErrorCode::AssetNotFound,
            message: Some(format!("Could not find asset: {asset_id}")),
            uri: None,
            request: None,
            detail: ErrorDetail::AssetNotFound { asset_id },
        }
    }

    pub fn invalid_parameter_value(
        parameter: impl Into<String>,
        value: impl Into<String>,
        param_type: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        let parameter = parameter.into();
        let value = value.into();
        let param_type = param_type.into();
        let format = format.into();
        Self {
            code: ErrorCode::InvalidParameterValue,
            message: Some(format!(
                "'{value}' is not a valid value for '{parameter}': must be of type {param_type}"
            )),
            uri: None,
            request: None,
            detail: ErrorDetail::InvalidParameterValue {
                parameter,
                value,
                param_type,
                format,
            },
        }
    }

    pub fn out_of_range(parameter: impl Into<String>, value: i64, minimum: i64, maximum: i64) -> Self {
        let parameter = parameter.into();
        Self {
            code: ErrorCode::OutOfRange,
            message: Some(format!(
                "'{value}' is outside of valid range [{minimum}, {maximum}] for '{parameter}'"
            )),
            uri: None,
            request: None,
            detail: ErrorDetail::OutOfRange {
                parameter,
                value,
                minimum,
                maximum,
            },
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }
}

/// Verify that `value` lies within `[minimum, maximum]`, raising
/// [`ErrorCode::OutOfRange`] otherwise. One shared helper so every numeric
/// bounds check (`at`, `from`, `to`, `count`, `interval`, `heartbeat`) goes
/// through the same rule, matching the original agent's single `checkRange`
/// template.
pub fn check_range(parameter: &str, value: i64, minimum: i64, maximum: i64) -> Result<(), AgentError> {
    if value < minimum || value > maximum {
        Err(AgentError::out_of_range(parameter, value, minimum, maximum))
    } else {
        Ok(())
    }
}
