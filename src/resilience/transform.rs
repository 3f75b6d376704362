//! Client-facing error shaping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ErrorTransformationConfig;
use crate::error::GatewayError;

const SANITIZED_MESSAGE: &str = "Internal server error";
const UNKNOWN_CODE: &str = "UNKNOWN_ERROR";

/// Where an error happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub subgraph_id: Option<String>,
    pub path: Vec<String>,
}

impl ErrorContext {
    pub fn subgraph(id: impl Into<String>) -> Self {
        Self {
            subgraph_id: Some(id.into()),
            path: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }
}

/// Error entry as returned in a response's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedError {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
}

/// Applies an [`ErrorTransformationConfig`] to runtime errors.
#[derive(Debug, Clone, Default)]
pub struct ErrorTransformer {
    config: ErrorTransformationConfig,
}

impl ErrorTransformer {
    pub fn new(config: ErrorTransformationConfig) -> Self {
        Self { config }
    }

    pub fn transform(&self, error: &GatewayError, context: &ErrorContext) -> TransformedError {
        if let Some(custom) = &self.config.custom_transformer {
            return from_custom(custom(error, context), error, context);
        }

        let message = if self.config.sanitize_errors {
            SANITIZED_MESSAGE.to_string()
        } else {
            error.to_string()
        };

        let mut extensions = Map::new();
        extensions.insert("code".into(), Value::from(error.code()));
        if let Some(subgraph) = &context.subgraph_id {
            extensions.insert("subgraphId".into(), Value::from(subgraph.clone()));
        }
        if self.config.include_stack_trace {
            if let Some(detail) = error.detail() {
                extensions.insert("stack".into(), Value::from(detail));
            }
        }

        TransformedError {
            message,
            code: error.code().to_string(),
            path: context.path.clone(),
            extensions,
            timestamp: now_millis(),
        }
    }
}

fn from_custom(value: Value, error: &GatewayError, context: &ErrorContext) -> TransformedError {
    let mut fields = match value {
        Value::Object(map) => map,
        Value::String(message) => {
            let mut map = Map::new();
            map.insert("message".into(), Value::String(message));
            map
        }
        _ => Map::new(),
    };

    let message = match fields.remove("message") {
        Some(Value::String(m)) => m,
        _ => error.to_string(),
    };
    let code = match fields.remove("code") {
        Some(Value::String(c)) => c,
        _ => UNKNOWN_CODE.to_string(),
    };

    TransformedError {
        message,
        code,
        path: context.path.clone(),
        extensions: fields,
        timestamp: now_millis(),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn upstream() -> GatewayError {
        GatewayError::Upstream("db password rejected".into())
    }

    #[test]
    fn test_standard_shape() {
        let transformer = ErrorTransformer::default();
        let ctx = ErrorContext::subgraph("users").with_path(vec!["me".into(), "name".into()]);
        let out = transformer.transform(&upstream(), &ctx);

        assert!(out.message.contains("db password rejected"));
        assert_eq!(out.code, "UPSTREAM_ERROR");
        assert_eq!(out.path, vec!["me", "name"]);
        assert_eq!(out.extensions["subgraphId"], json!("users"));
        assert!(!out.extensions.contains_key("stack"));
        assert!(out.timestamp > 0);
    }

    #[test]
    fn test_sanitize_keeps_code_and_path() {
        let transformer = ErrorTransformer::new(ErrorTransformationConfig {
            sanitize_errors: true,
            include_stack_trace: true,
            custom_transformer: None,
        });
        let ctx = ErrorContext::subgraph("users").with_path(vec!["me".into()]);
        let out = transformer.transform(&upstream(), &ctx);

        assert_eq!(out.message, "Internal server error");
        assert_eq!(out.code, "UPSTREAM_ERROR");
        assert_eq!(out.path, vec!["me"]);
        assert_eq!(out.extensions["stack"], json!("db password rejected"));
    }

    #[test]
    fn test_custom_transformer_replaces_shape() {
        let transformer = ErrorTransformer::new(ErrorTransformationConfig {
            sanitize_errors: true,
            include_stack_trace: false,
            custom_transformer: Some(Arc::new(|err: &GatewayError, _ctx: &ErrorContext| {
                json!({ "message": format!("custom: {}", err.code()), "retryable": true })
            })),
        });
        let out = transformer.transform(&upstream(), &ErrorContext::default());

        assert_eq!(out.message, "custom: UPSTREAM_ERROR");
        assert_eq!(out.code, "UNKNOWN_ERROR");
        assert_eq!(out.extensions["retryable"], json!(true));
    }
}
