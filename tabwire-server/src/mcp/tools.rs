//! Tool definitions and argument validation
//!
//! Defines the four tools exposed to the MCP host and the typed argument
//! structs behind them. Validation coerces loosely-typed inputs first, then
//! clamps numeric ranges; unrecognized enum strings fall back to their
//! defaults; malformed URLs are rejected outright.

use serde_json::{json, Value};
use url::Url;

use tabwire_utils::{BridgeError, Result};

/// Default page for `open_url` when none is given
pub const DEFAULT_OPEN_URL: &str = "http://localhost:5173/";

/// One tool exposed through the MCP protocol
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Get all tool definitions for the tabwire MCP server
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "list_tabs".into(),
            description: "List open browser tabs with their ids, titles and URLs".into(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        Tool {
            name: "open_url".into(),
            description: "Focus an existing tab matching a URL, or open it in a new tab".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Target URL (default: http://localhost:5173/)"
                    },
                    "match": {
                        "type": "string",
                        "enum": ["prefix", "exact"],
                        "description": "How existing tabs are matched against the URL (default: prefix)"
                    },
                    "reuseIfExists": {
                        "type": "boolean",
                        "default": true,
                        "description": "Focus a matching tab instead of opening a new one"
                    },
                    "openIfMissing": {
                        "type": "boolean",
                        "default": true,
                        "description": "Open a new tab when no tab matches"
                    },
                    "focusWindow": { "type": "boolean", "default": true },
                    "activateTab": { "type": "boolean", "default": true },
                    "waitForComplete": {
                        "type": "boolean",
                        "default": true,
                        "description": "Wait until the tab finishes loading"
                    },
                    "timeoutMs": {
                        "type": "integer",
                        "default": 15000,
                        "minimum": 1000,
                        "maximum": 120000
                    }
                }
            }),
        },
        Tool {
            name: "screenshot".into(),
            description: "Capture the visible viewport of a tab as PNG or JPEG".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" },
                    "match": { "type": "string", "enum": ["prefix", "exact"] },
                    "openIfMissing": { "type": "boolean", "default": true },
                    "focusWindow": { "type": "boolean", "default": true },
                    "activateTab": { "type": "boolean", "default": true },
                    "waitForComplete": { "type": "boolean", "default": true },
                    "timeoutMs": {
                        "type": "integer",
                        "default": 15000,
                        "minimum": 1000,
                        "maximum": 120000
                    },
                    "extraWaitMs": {
                        "type": "integer",
                        "default": 250,
                        "minimum": 0,
                        "maximum": 10000,
                        "description": "Settle time after load before capturing"
                    },
                    "format": { "type": "string", "enum": ["png", "jpeg"], "default": "png" },
                    "jpegQuality": {
                        "type": "integer",
                        "default": 80,
                        "minimum": 0,
                        "maximum": 100
                    },
                    "returnMode": {
                        "type": "string",
                        "enum": ["artifact", "image"],
                        "default": "artifact",
                        "description": "Write a file and return its path, or return the image inline"
                    },
                    "artifactDir": {
                        "type": "string",
                        "description": "Directory for artifact files (default: platform cache)"
                    }
                }
            }),
        },
        Tool {
            name: "artifact_cleanup".into(),
            description: "Delete old screenshot artifacts and report what was removed".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "maxAgeHours": {
                        "type": "integer",
                        "default": 24,
                        "minimum": 1,
                        "maximum": 87600
                    },
                    "artifactDir": { "type": "string" }
                }
            }),
        },
    ]
}

/// Tab matching strategy for `open_url` / `screenshot`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Prefix,
    Exact,
}

impl MatchMode {
    fn parse(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("exact") => Self::Exact,
            _ => Self::Prefix,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prefix => "prefix",
            Self::Exact => "exact",
        }
    }
}

/// Capture encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    fn parse(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("jpeg") => Self::Jpeg,
            _ => Self::Png,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// Where the screenshot payload ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnMode {
    Artifact,
    Image,
}

impl ReturnMode {
    fn parse(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("image") => Self::Image,
            _ => Self::Artifact,
        }
    }
}

/// Validated `open_url` arguments
#[derive(Debug, Clone)]
pub struct OpenUrlArgs {
    pub url: String,
    pub match_mode: MatchMode,
    pub reuse_if_exists: bool,
    pub open_if_missing: bool,
    pub focus_window: bool,
    pub activate_tab: bool,
    pub wait_for_complete: bool,
    pub timeout_ms: u64,
}

impl OpenUrlArgs {
    pub fn parse(args: &Value) -> Result<Self> {
        Ok(Self {
            url: parse_http_url(args.get("url"))?,
            match_mode: MatchMode::parse(args.get("match")),
            reuse_if_exists: coerce_bool(args.get("reuseIfExists"), true),
            open_if_missing: coerce_bool(args.get("openIfMissing"), true),
            focus_window: coerce_bool(args.get("focusWindow"), true),
            activate_tab: coerce_bool(args.get("activateTab"), true),
            wait_for_complete: coerce_bool(args.get("waitForComplete"), true),
            timeout_ms: clamp(coerce_u64(args.get("timeoutMs"), 15_000), 1_000, 120_000),
        })
    }

    /// Wire params for the `openUrl` command
    pub fn to_params(&self) -> Value {
        json!({
            "url": self.url,
            "match": self.match_mode.as_str(),
            "reuseIfExists": self.reuse_if_exists,
            "openIfMissing": self.open_if_missing,
            "focusWindow": self.focus_window,
            "activateTab": self.activate_tab,
            "waitForComplete": self.wait_for_complete,
            "timeoutMs": self.timeout_ms,
        })
    }
}

/// Validated `screenshot` arguments
#[derive(Debug, Clone)]
pub struct ScreenshotArgs {
    pub url: String,
    pub match_mode: MatchMode,
    pub open_if_missing: bool,
    pub focus_window: bool,
    pub activate_tab: bool,
    pub wait_for_complete: bool,
    pub timeout_ms: u64,
    pub extra_wait_ms: u64,
    pub format: ImageFormat,
    pub jpeg_quality: u64,
    pub return_mode: ReturnMode,
    pub artifact_dir: Option<String>,
}

impl ScreenshotArgs {
    pub fn parse(args: &Value) -> Result<Self> {
        Ok(Self {
            url: parse_http_url(args.get("url"))?,
            match_mode: MatchMode::parse(args.get("match")),
            open_if_missing: coerce_bool(args.get("openIfMissing"), true),
            focus_window: coerce_bool(args.get("focusWindow"), true),
            activate_tab: coerce_bool(args.get("activateTab"), true),
            wait_for_complete: coerce_bool(args.get("waitForComplete"), true),
            timeout_ms: clamp(coerce_u64(args.get("timeoutMs"), 15_000), 1_000, 120_000),
            extra_wait_ms: clamp(coerce_u64(args.get("extraWaitMs"), 250), 0, 10_000),
            format: ImageFormat::parse(args.get("format")),
            jpeg_quality: clamp(coerce_u64(args.get("jpegQuality"), 80), 0, 100),
            return_mode: ReturnMode::parse(args.get("returnMode")),
            artifact_dir: args
                .get("artifactDir")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Wire params for the `screenshot` command; artifact handling stays on
    /// this side of the bridge
    pub fn to_params(&self) -> Value {
        json!({
            "url": self.url,
            "match": self.match_mode.as_str(),
            "openIfMissing": self.open_if_missing,
            "focusWindow": self.focus_window,
            "activateTab": self.activate_tab,
            "waitForComplete": self.wait_for_complete,
            "timeoutMs": self.timeout_ms,
            "extraWaitMs": self.extra_wait_ms,
            "format": self.format.as_str(),
            "jpegQuality": self.jpeg_quality,
        })
    }
}

/// Validated `artifact_cleanup` arguments
#[derive(Debug, Clone)]
pub struct CleanupArgs {
    pub max_age_hours: u64,
    pub artifact_dir: Option<String>,
}

impl CleanupArgs {
    pub fn parse(args: &Value) -> Self {
        Self {
            max_age_hours: clamp(coerce_u64(args.get("maxAgeHours"), 24), 1, 87_600),
            artifact_dir: args
                .get("artifactDir")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

fn parse_http_url(value: Option<&Value>) -> Result<String> {
    let raw = match value {
        None | Some(Value::Null) => DEFAULT_OPEN_URL,
        Some(Value::String(s)) => s.trim(),
        Some(other) => {
            return Err(BridgeError::invalid_url(format!(
                "expected a URL string, got {}",
                other
            )))
        }
    };
    let raw = if raw.is_empty() { DEFAULT_OPEN_URL } else { raw };

    let url = Url::parse(raw).map_err(|e| BridgeError::invalid_url(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        other => Err(BridgeError::invalid_url(format!(
            "{}: unsupported scheme {}",
            raw, other
        ))),
    }
}

fn coerce_u64(value: Option<&Value>, default: u64) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn coerce_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        _ => default,
    }
}

fn clamp(value: u64, min: u64, max: u64) -> u64 {
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Definition Tests ====================

    #[test]
    fn test_expected_tools_present() {
        let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["list_tabs", "open_url", "screenshot", "artifact_cleanup"]
        );
    }

    #[test]
    fn test_all_tools_have_object_schemas() {
        for tool in tool_definitions() {
            assert_eq!(tool.input_schema["type"], "object", "tool {}", tool.name);
            assert!(!tool.description.is_empty());
        }
    }

    // ==================== open_url Tests ====================

    #[test]
    fn test_open_url_defaults() {
        let args = OpenUrlArgs::parse(&json!({})).unwrap();
        assert_eq!(args.url, DEFAULT_OPEN_URL);
        assert_eq!(args.match_mode, MatchMode::Prefix);
        assert!(args.reuse_if_exists);
        assert!(args.open_if_missing);
        assert!(args.focus_window);
        assert!(args.activate_tab);
        assert!(args.wait_for_complete);
        assert_eq!(args.timeout_ms, 15_000);
    }

    #[test]
    fn test_open_url_rejects_malformed_url() {
        assert!(OpenUrlArgs::parse(&json!({"url": "not a url"})).is_err());
        assert!(OpenUrlArgs::parse(&json!({"url": "ftp://host/file"})).is_err());
        assert!(OpenUrlArgs::parse(&json!({"url": 42})).is_err());
    }

    #[test]
    fn test_open_url_timeout_clamped() {
        let low = OpenUrlArgs::parse(&json!({"timeoutMs": 10})).unwrap();
        assert_eq!(low.timeout_ms, 1_000);
        let high = OpenUrlArgs::parse(&json!({"timeoutMs": 900000})).unwrap();
        assert_eq!(high.timeout_ms, 120_000);
        let mid = OpenUrlArgs::parse(&json!({"timeoutMs": 30000})).unwrap();
        assert_eq!(mid.timeout_ms, 30_000);
    }

    #[test]
    fn test_clamp_is_idempotent_and_monotone() {
        for raw in [0u64, 500, 1_000, 60_000, 120_000, 1_000_000] {
            let once = clamp(raw, 1_000, 120_000);
            assert_eq!(clamp(once, 1_000, 120_000), once);
        }
        let mut previous = 0;
        for raw in [0u64, 999, 1_000, 50_000, 120_000, 200_000] {
            let clamped = clamp(raw, 1_000, 120_000);
            assert!(clamped >= previous);
            previous = clamped;
        }
    }

    #[test]
    fn test_open_url_coerces_string_numbers_and_bools() {
        let args = OpenUrlArgs::parse(&json!({
            "timeoutMs": "20000",
            "reuseIfExists": "false",
        }))
        .unwrap();
        assert_eq!(args.timeout_ms, 20_000);
        assert!(!args.reuse_if_exists);
    }

    #[test]
    fn test_open_url_invalid_enum_falls_back() {
        let args = OpenUrlArgs::parse(&json!({"match": "fuzzy"})).unwrap();
        assert_eq!(args.match_mode, MatchMode::Prefix);
        let args = OpenUrlArgs::parse(&json!({"match": "exact"})).unwrap();
        assert_eq!(args.match_mode, MatchMode::Exact);
    }

    #[test]
    fn test_open_url_wire_params_are_camel_case() {
        let args = OpenUrlArgs::parse(&json!({"url": "http://example.test/x"})).unwrap();
        let params = args.to_params();
        assert_eq!(params["url"], "http://example.test/x");
        assert_eq!(params["match"], "prefix");
        assert_eq!(params["reuseIfExists"], true);
        assert_eq!(params["timeoutMs"], 15_000);
    }

    // ==================== screenshot Tests ====================

    #[test]
    fn test_screenshot_defaults() {
        let args = ScreenshotArgs::parse(&json!({})).unwrap();
        assert_eq!(args.extra_wait_ms, 250);
        assert_eq!(args.format, ImageFormat::Png);
        assert_eq!(args.jpeg_quality, 80);
        assert_eq!(args.return_mode, ReturnMode::Artifact);
        assert!(args.artifact_dir.is_none());
    }

    #[test]
    fn test_screenshot_clamps() {
        let args = ScreenshotArgs::parse(&json!({
            "extraWaitMs": 99999,
            "jpegQuality": 101,
        }))
        .unwrap();
        assert_eq!(args.extra_wait_ms, 10_000);
        assert_eq!(args.jpeg_quality, 100);
    }

    #[test]
    fn test_screenshot_enum_fallbacks() {
        let args = ScreenshotArgs::parse(&json!({
            "format": "webp",
            "returnMode": "stream",
        }))
        .unwrap();
        assert_eq!(args.format, ImageFormat::Png);
        assert_eq!(args.return_mode, ReturnMode::Artifact);

        let args = ScreenshotArgs::parse(&json!({
            "format": "jpeg",
            "returnMode": "image",
        }))
        .unwrap();
        assert_eq!(args.format, ImageFormat::Jpeg);
        assert_eq!(args.return_mode, ReturnMode::Image);
    }

    #[test]
    fn test_screenshot_wire_params_omit_artifact_fields() {
        let args = ScreenshotArgs::parse(&json!({"returnMode": "artifact"})).unwrap();
        let params = args.to_params();
        assert!(params.get("returnMode").is_none());
        assert!(params.get("artifactDir").is_none());
        assert_eq!(params["format"], "png");
    }

    // ==================== artifact_cleanup Tests ====================

    #[test]
    fn test_cleanup_defaults_and_clamps() {
        let args = CleanupArgs::parse(&json!({}));
        assert_eq!(args.max_age_hours, 24);

        let args = CleanupArgs::parse(&json!({"maxAgeHours": 0}));
        assert_eq!(args.max_age_hours, 1);

        let args = CleanupArgs::parse(&json!({"maxAgeHours": 1000000}));
        assert_eq!(args.max_age_hours, 87_600);
    }

    // ==================== Coercion Tests ====================

    #[test]
    fn test_coerce_u64_variants() {
        assert_eq!(coerce_u64(Some(&json!(7)), 1), 7);
        assert_eq!(coerce_u64(Some(&json!(7.9)), 1), 7);
        assert_eq!(coerce_u64(Some(&json!("42")), 1), 42);
        assert_eq!(coerce_u64(Some(&json!("nope")), 1), 1);
        assert_eq!(coerce_u64(Some(&json!(-5)), 1), 1);
        assert_eq!(coerce_u64(None, 1), 1);
    }

    #[test]
    fn test_coerce_bool_variants() {
        assert!(coerce_bool(Some(&json!(true)), false));
        assert!(!coerce_bool(Some(&json!(false)), true));
        assert!(coerce_bool(Some(&json!("true")), false));
        assert!(!coerce_bool(Some(&json!("false")), true));
        assert!(coerce_bool(Some(&json!("yes")), true));
        assert!(coerce_bool(None, true));
    }
}
