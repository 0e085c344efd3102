//! Server configuration and its validator.
//!
//! A raw entry from a settings file is a loosely typed JSON object. It is
//! accepted only if it matches exactly one of two shapes: a subprocess
//! (`command`) or a streaming-HTTP endpoint (`url`). The shape is inferred
//! from which field is present when `type` is omitted.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Argument fragment marking a locally built server whose output should be
/// watched for rebuilds.
const BUILD_ENTRY_MARKER: &str = "build/index.js";

const MIXED_FIELDS: &str = "Cannot mix 'stdio' and 'sse' fields. For 'stdio' use 'command', 'args', and 'env'. For 'sse' use 'url' and 'headers'";
const MISSING_FIELDS: &str =
    "Server configuration must include either 'command' (for stdio) or 'url' (for sse)";
const INVALID_TYPE: &str = "Server type must be either 'stdio' or 'sse'";
const STDIO_FIELDS: &str = "For 'stdio' type servers, you must provide a 'command' field and can optionally include 'args' and 'env'";
const SSE_FIELDS: &str =
    "For 'sse' type servers, you must provide a 'url' field and can optionally include 'headers'";

/// A single field-level violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Dotted path to the offending field (`env.API_KEY`, `args.0`).
    pub path: String,
    pub message: String,
}

impl FieldIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Reasons a raw server entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("{}", MIXED_FIELDS)]
    MixedFields,

    #[error("{}", MISSING_FIELDS)]
    MissingFields,

    #[error("{}", INVALID_TYPE)]
    InvalidType,

    #[error("{}", STDIO_FIELDS)]
    StdioFieldsMissing,

    #[error("{}", SSE_FIELDS)]
    SseFieldsMissing,

    /// Shape was recognized but one or more fields are invalid.
    #[error("{message}")]
    Schema {
        message: String,
        issues: Vec<FieldIssue>,
    },
}

impl ConfigValidationError {
    fn schema(server_name: Option<&str>, issues: Vec<FieldIssue>) -> Self {
        let joined = issues
            .iter()
            .map(|issue| format!("{}: {}", issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("; ");
        let message = match server_name {
            Some(name) => format!("Invalid configuration for server \"{name}\": {joined}"),
            None => format!("Invalid server configuration: {joined}"),
        };
        Self::Schema { message, issues }
    }
}

/// Subprocess transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Streaming-HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SseConfig {
    pub url: Url,
    pub headers: BTreeMap<String, String>,
}

impl SseConfig {
    /// Credentialed reconnection is enabled when an `Authorization` header
    /// is configured.
    pub fn with_credentials(&self) -> bool {
        self.headers.contains_key("Authorization")
    }
}

/// The two transport shapes, tagged by `type` when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Sse(SseConfig),
}

/// A validated server configuration with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,
    pub disabled: bool,
    pub timeout: u64,
    pub always_allow: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub watch_paths: Vec<PathBuf>,
}

impl ServerConfig {
    pub const fn kind(&self) -> &'static str {
        match self.transport {
            TransportConfig::Stdio(_) => "stdio",
            TransportConfig::Sse(_) => "sse",
        }
    }

    /// Files whose modification should restart this server.
    ///
    /// Only subprocess servers are watched: their explicit `watchPaths`, plus
    /// any argument pointing at a `build/index.js` entry point.
    pub fn watch_targets(&self) -> Vec<PathBuf> {
        let TransportConfig::Stdio(stdio) = &self.transport else {
            return Vec::new();
        };
        let mut targets = self.watch_paths.clone();
        targets.extend(
            stdio
                .args
                .iter()
                .filter(|arg| arg.contains(BUILD_ENTRY_MARKER))
                .map(PathBuf::from),
        );
        targets
    }

    /// JSON text of this config, as published in server records.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Clone, Copy)]
enum Shape {
    Stdio,
    Sse,
}

/// Validate a raw server entry and normalize it into a [`ServerConfig`].
///
/// `server_name` only affects the prefix of schema error messages.
pub fn validate_server_config(
    raw: &Value,
    server_name: Option<&str>,
) -> Result<ServerConfig, ConfigValidationError> {
    let Some(obj) = raw.as_object() else {
        return Err(ConfigValidationError::schema(
            server_name,
            vec![FieldIssue::new(
                "",
                format!("Expected object, received {}", json_type_name(raw)),
            )],
        ));
    };

    let has_command = obj.contains_key("command");
    let has_url = obj.contains_key("url");

    if has_command && has_url {
        return Err(ConfigValidationError::MixedFields);
    }

    let shape = match obj.get("type") {
        None if has_command => Shape::Stdio,
        None if has_url => Shape::Sse,
        None => return Err(ConfigValidationError::MissingFields),
        Some(Value::String(t)) if t == "stdio" => Shape::Stdio,
        Some(Value::String(t)) if t == "sse" => Shape::Sse,
        Some(_) => return Err(ConfigValidationError::InvalidType),
    };

    match shape {
        Shape::Stdio if !has_command => return Err(ConfigValidationError::StdioFieldsMissing),
        Shape::Sse if !has_url => return Err(ConfigValidationError::SseFieldsMissing),
        _ => {}
    }

    let mut issues = Vec::new();

    let disabled = match obj.get("disabled") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            issues.push(expected("disabled", "boolean", other));
            false
        }
    };
    let timeout = parse_timeout(obj, &mut issues);
    let always_allow = string_list(obj, "alwaysAllow", &mut issues);
    let watch_paths = string_list(obj, "watchPaths", &mut issues)
        .into_iter()
        .map(PathBuf::from)
        .collect();

    let transport = match shape {
        Shape::Stdio => parse_stdio(obj, &mut issues).map(TransportConfig::Stdio),
        Shape::Sse => parse_sse(obj, &mut issues).map(TransportConfig::Sse),
    };

    match transport {
        Some(transport) if issues.is_empty() => Ok(ServerConfig {
            transport,
            disabled,
            timeout,
            always_allow,
            watch_paths,
        }),
        _ => Err(ConfigValidationError::schema(server_name, issues)),
    }
}

fn parse_stdio(obj: &Map<String, Value>, issues: &mut Vec<FieldIssue>) -> Option<StdioConfig> {
    let command = match obj.get("command") {
        Some(Value::String(c)) if c.is_empty() => {
            issues.push(FieldIssue::new("command", "Command cannot be empty"));
            None
        }
        Some(Value::String(c)) => Some(c.clone()),
        Some(other) => {
            issues.push(expected("command", "string", other));
            None
        }
        None => None,
    };
    let args = string_list(obj, "args", issues);
    let env = string_map(obj, "env", issues);

    command.map(|command| StdioConfig { command, args, env })
}

fn parse_sse(obj: &Map<String, Value>, issues: &mut Vec<FieldIssue>) -> Option<SseConfig> {
    let url = match obj.get("url") {
        Some(Value::String(u)) => match Url::parse(u) {
            Ok(url) => Some(url),
            Err(_) => {
                issues.push(FieldIssue::new("url", "URL must be a valid URL format"));
                None
            }
        },
        Some(other) => {
            issues.push(expected("url", "string", other));
            None
        }
        None => None,
    };
    let headers = string_map(obj, "headers", issues);

    url.map(|url| SseConfig { url, headers })
}

fn parse_timeout(obj: &Map<String, Value>, issues: &mut Vec<FieldIssue>) -> u64 {
    let Some(value) = obj.get("timeout") else {
        return DEFAULT_TIMEOUT_SECS;
    };
    let Some(number) = value.as_f64() else {
        issues.push(expected("timeout", "number", value));
        return DEFAULT_TIMEOUT_SECS;
    };

    if number < MIN_TIMEOUT_SECS as f64 {
        issues.push(FieldIssue::new(
            "timeout",
            format!("Number must be greater than or equal to {MIN_TIMEOUT_SECS}"),
        ));
        DEFAULT_TIMEOUT_SECS
    } else if number > MAX_TIMEOUT_SECS as f64 {
        issues.push(FieldIssue::new(
            "timeout",
            format!("Number must be less than or equal to {MAX_TIMEOUT_SECS}"),
        ));
        DEFAULT_TIMEOUT_SECS
    } else if number.fract() != 0.0 {
        issues.push(FieldIssue::new("timeout", "Expected integer, received float"));
        DEFAULT_TIMEOUT_SECS
    } else {
        value.as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

fn string_list(obj: &Map<String, Value>, key: &str, issues: &mut Vec<FieldIssue>) -> Vec<String> {
    match obj.get(key) {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::String(s) => Some(s.clone()),
                other => {
                    issues.push(expected(format!("{key}.{i}"), "string", other));
                    None
                }
            })
            .collect(),
        Some(other) => {
            issues.push(expected(key, "array", other));
            Vec::new()
        }
    }
}

fn string_map(
    obj: &Map<String, Value>,
    key: &str,
    issues: &mut Vec<FieldIssue>,
) -> BTreeMap<String, String> {
    match obj.get(key) {
        None => BTreeMap::new(),
        Some(Value::Object(entries)) => entries
            .iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k.clone(), s.clone())),
                other => {
                    issues.push(expected(format!("{key}.{k}"), "string", other));
                    None
                }
            })
            .collect(),
        Some(other) => {
            issues.push(expected(key, "object", other));
            BTreeMap::new()
        }
    }
}

fn expected(path: impl Into<String>, wanted: &str, got: &Value) -> FieldIssue {
    FieldIssue::new(
        path,
        format!("Expected {wanted}, received {}", json_type_name(got)),
    )
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infers_stdio() {
        let config = validate_server_config(&json!({"command": "echo", "args": ["hi"]}), None).unwrap();
        assert_eq!(config.kind(), "stdio");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_SECS);
        assert!(config.always_allow.is_empty());
        assert!(!config.disabled);
        match config.transport {
            TransportConfig::Stdio(stdio) => {
                assert_eq!(stdio.command, "echo");
                assert_eq!(stdio.args, vec!["hi".to_string()]);
            }
            TransportConfig::Sse(_) => panic!("expected stdio"),
        }
    }

    #[test]
    fn test_infers_sse() {
        let config = validate_server_config(
            &json!({"url": "http://localhost:3001/sse", "headers": {"Authorization": "Bearer t"}}),
            Some("remote"),
        )
        .unwrap();
        assert_eq!(config.kind(), "sse");
        let TransportConfig::Sse(sse) = &config.transport else {
            panic!("expected sse");
        };
        assert!(sse.with_credentials());
        assert_eq!(sse.url.as_str(), "http://localhost:3001/sse");
    }

    #[test]
    fn test_mixed_fields_rejected() {
        let err = validate_server_config(&json!({"command": "a", "url": "http://x"}), None).unwrap_err();
        assert_eq!(err, ConfigValidationError::MixedFields);
        assert!(err.to_string().starts_with("Cannot mix 'stdio' and 'sse' fields"));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = validate_server_config(&json!({"timeout": 10}), None).unwrap_err();
        assert_eq!(err, ConfigValidationError::MissingFields);
    }

    #[test]
    fn test_mixed_checked_before_type() {
        let err = validate_server_config(
            &json!({"type": "bogus", "command": "a", "url": "http://x"}),
            None,
        )
        .unwrap_err();
        assert_eq!(err, ConfigValidationError::MixedFields);
    }

    #[test]
    fn test_explicit_type_must_be_known() {
        let err = validate_server_config(&json!({"type": "websocket", "url": "ws://x"}), None)
            .unwrap_err();
        assert_eq!(err, ConfigValidationError::InvalidType);
    }

    #[test]
    fn test_explicit_type_must_match_fields() {
        let err = validate_server_config(&json!({"type": "sse", "command": "node"}), None)
            .unwrap_err();
        assert_eq!(err, ConfigValidationError::SseFieldsMissing);

        let err = validate_server_config(&json!({"type": "stdio", "url": "http://x"}), None)
            .unwrap_err();
        assert_eq!(err, ConfigValidationError::StdioFieldsMissing);
    }

    #[test]
    fn test_timeout_bounds() {
        let err = validate_server_config(&json!({"command": "a", "timeout": 9999}), Some("x"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration for server \"x\": timeout: Number must be less than or equal to 3600"
        );

        let err = validate_server_config(&json!({"command": "a", "timeout": 0}), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid server configuration: timeout: Number must be greater than or equal to 1"
        );

        let ok = validate_server_config(&json!({"command": "a", "timeout": 3600}), None).unwrap();
        assert_eq!(ok.timeout, 3600);
    }

    #[test]
    fn test_collects_all_issues() {
        let err = validate_server_config(
            &json!({"command": "", "args": ["ok", 3], "env": {"A": 1}, "disabled": "yes"}),
            Some("broken"),
        )
        .unwrap_err();

        let ConfigValidationError::Schema { issues, message } = err else {
            panic!("expected schema error");
        };
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["disabled", "command", "args.1", "env.A"]);
        assert!(message.contains("command: Command cannot be empty"));
        assert!(message.contains("; "));
    }

    #[test]
    fn test_invalid_url() {
        let err = validate_server_config(&json!({"url": "not a url"}), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid server configuration: url: URL must be a valid URL format"
        );
    }

    #[test]
    fn test_non_object_rejected() {
        let err = validate_server_config(&json!(["command"]), None).unwrap_err();
        assert!(matches!(err, ConfigValidationError::Schema { .. }));
    }

    #[test]
    fn test_serialized_config_carries_type() {
        let config = validate_server_config(&json!({"command": "node", "alwaysAllow": ["read"]}), None)
            .unwrap();
        let value: Value = serde_json::from_str(&config.to_json_string()).unwrap();
        assert_eq!(value["type"], "stdio");
        assert_eq!(value["command"], "node");
        assert_eq!(value["timeout"], 60);
        assert_eq!(value["alwaysAllow"], json!(["read"]));
    }

    #[test]
    fn test_watch_targets() {
        let config = validate_server_config(
            &json!({
                "command": "node",
                "args": ["/home/me/server/build/index.js", "--flag"],
                "watchPaths": ["/home/me/server/config.json"]
            }),
            None,
        )
        .unwrap();
        assert_eq!(
            config.watch_targets(),
            vec![
                PathBuf::from("/home/me/server/config.json"),
                PathBuf::from("/home/me/server/build/index.js"),
            ]
        );

        let remote = validate_server_config(
            &json!({"url": "http://localhost/sse", "watchPaths": ["/tmp/x"]}),
            None,
        )
        .unwrap();
        assert!(remote.watch_targets().is_empty());
    }
}
