//! The configuration tree produced by [`parse`](crate::parse).
//!
//! A [`Payload`] holds one [`Config`] per source file (the root file
//! first, then every file pulled in through `include` directives, in
//! discovery order). Each config is a list of [`Directive`] nodes.
//!
//! # Tree structure
//!
//! ```text
//! Payload
//!  ├─ status, errors
//!  └─ configs: Vec<Config>
//!       ├─ file, status, errors
//!       └─ parsed: Vec<Directive>
//!            ├─ name, line, args
//!            ├─ block     (Some(...) for block directives, recursive)
//!            ├─ includes  (Some(...) for resolved include directives)
//!            └─ comment   (Some(...) for "#" comment nodes)
//! ```
//!
//! The three optional fields are deliberately `Option<...>` rather than
//! empty sentinels: an empty-but-present `block` is an empty pair of
//! braces, while an absent one means the directive was terminated by a
//! semicolon. The same goes for `includes` (an include whose target did
//! not resolve keeps an empty list) and `comment`.
//!
//! All types serialize to the interchange JSON layout: `Directive`
//! serializes its name under the `"directive"` key and omits the
//! optional fields when absent; error lines serialize as `null` when
//! unknown.

use serde::{Deserialize, Serialize};

/// The result of parsing a configuration file and its include closure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// `"ok"`, or `"failed"` when any config failed.
    pub status: String,
    /// Every error found, across all files, in discovery order.
    pub errors: Vec<PayloadError>,
    /// One entry per parsed file; the root file is first.
    #[serde(rename = "config")]
    pub configs: Vec<Config>,
}

/// An error recorded on the payload, pointing at the file it came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadError {
    pub file: String,
    pub line: Option<usize>,
    #[serde(rename = "error")]
    pub message: String,
    /// Value returned by the `error_callback` option, if one was set.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub callback: Option<serde_json::Value>,
}

/// One parsed source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// The path as it was observed (root path as given, include paths
    /// as resolved).
    pub file: String,
    /// `"ok"`, or `"failed"` when errors were recorded on this file.
    pub status: String,
    pub errors: Vec<ConfigError>,
    /// The top-level directives of this file.
    pub parsed: Vec<Directive>,
}

/// An error recorded on a single config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigError {
    pub line: Option<usize>,
    #[serde(rename = "error")]
    pub message: String,
}

/// One node of the configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    /// The directive name, or `"#"` for a preserved comment.
    #[serde(rename = "directive")]
    pub name: String,
    /// 1-based source line the directive began on.
    pub line: usize,
    /// Arguments in source order, quotes resolved.
    pub args: Vec<String>,
    /// For resolved `include` directives: indices into
    /// [`Payload::configs`] for every file the argument matched.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub includes: Option<Vec<usize>>,
    /// Child directives for block directives. `Some(vec![])` is an
    /// empty `{}` block, distinct from `None`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub block: Option<Vec<Directive>>,
    /// For `"#"` nodes: the comment text after the `#`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub comment: Option<String>,
}

impl Directive {
    /// True when this directive has a brace-delimited body.
    pub fn is_block(&self) -> bool {
        self.block.is_some()
    }

    /// True when this is a resolved `include` directive.
    pub fn is_include(&self) -> bool {
        self.includes.is_some()
    }

    /// True when this node is a preserved comment.
    pub fn is_comment(&self) -> bool {
        self.comment.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_directive_serializes_optional_fields_only_when_present() {
        let simple = Directive {
            name: "listen".to_string(),
            line: 2,
            args: vec!["80".to_string()],
            ..Directive::default()
        };
        assert_eq!(
            serde_json::to_value(&simple).unwrap(),
            json!({"directive": "listen", "line": 2, "args": ["80"]})
        );

        let empty_block = Directive {
            name: "events".to_string(),
            line: 1,
            block: Some(Vec::new()),
            ..Directive::default()
        };
        assert_eq!(
            serde_json::to_value(&empty_block).unwrap(),
            json!({"directive": "events", "line": 1, "args": [], "block": []})
        );
    }

    #[test]
    fn test_config_error_line_serializes_as_null() {
        let err = ConfigError {
            line: None,
            message: "bad".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"line": null, "error": "bad"})
        );
    }

    #[test]
    fn test_directive_predicates() {
        let include = Directive {
            name: "include".to_string(),
            line: 1,
            args: vec!["conf.d/*.conf".to_string()],
            includes: Some(vec![1, 2]),
            ..Directive::default()
        };
        assert!(include.is_include());
        assert!(!include.is_block());
        assert!(!include.is_comment());

        let comment = Directive {
            name: "#".to_string(),
            line: 1,
            comment: Some(" note".to_string()),
            ..Directive::default()
        };
        assert!(comment.is_comment());
    }

    #[test]
    fn test_payload_roundtrips_through_json() {
        let payload = Payload {
            status: "ok".to_string(),
            errors: Vec::new(),
            configs: vec![Config {
                file: "nginx.conf".to_string(),
                status: "ok".to_string(),
                errors: Vec::new(),
                parsed: vec![Directive {
                    name: "user".to_string(),
                    line: 1,
                    args: vec!["nginx".to_string()],
                    ..Directive::default()
                }],
            }],
        };
        let text = serde_json::to_string(&payload).unwrap();
        let back: Payload = serde_json::from_str(&text).unwrap();
        assert_eq!(back, payload);
    }
}
