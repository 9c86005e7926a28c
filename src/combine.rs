//! Include flattening: collapse a multi-file payload into one config.

use crate::ast::{Config, Directive, Payload};
use crate::error::{Error, ParseError};

impl Payload {
    /// Collapses this payload into a single config by splicing every
    /// resolved `include` directive's target files in place, in order.
    ///
    /// The result's one config carries the root file's path, a status
    /// of `"failed"` if any source config failed, and the
    /// concatenation of all source errors. An `includes` index that
    /// does not point into [`Payload::configs`] is a fatal error.
    pub fn combined(self) -> Result<Payload, Error> {
        combine_configs(self)
    }
}

pub(crate) fn combine_configs(old: Payload) -> Result<Payload, Error> {
    let Some(root) = old.configs.first() else {
        return Ok(old);
    };

    let status = if old.status.is_empty() {
        "ok".to_string()
    } else {
        old.status.clone()
    };

    let mut combined = Config {
        file: root.file.clone(),
        status: "ok".to_string(),
        errors: Vec::new(),
        parsed: Vec::new(),
    };
    for config in &old.configs {
        combined.errors.extend(config.errors.iter().cloned());
        if config.status == "failed" {
            combined.status = "failed".to_string();
        }
    }

    combined.parsed = perform_includes(&old, &root.file, &root.parsed)?;

    Ok(Payload {
        status,
        errors: old.errors.clone(),
        configs: vec![combined],
    })
}

/// Copies `block`, splicing in the top-level directives of every config
/// an `include` node references, recursively. `fromfile` is the file
/// the block came from, used for error attribution.
fn perform_includes(
    old: &Payload,
    fromfile: &str,
    block: &[Directive],
) -> Result<Vec<Directive>, Error> {
    let mut out = Vec::new();

    for dir in block {
        let mut dir = dir.clone();
        if let Some(children) = &dir.block {
            dir.block = Some(perform_includes(old, fromfile, children)?);
        }

        let Some(indices) = dir.includes.take() else {
            out.push(dir);
            continue;
        };

        for idx in indices {
            let config = old.configs.get(idx).ok_or_else(|| {
                ParseError::new(
                    format!("include config with index: {}", idx),
                    Some(fromfile.to_string()),
                    Some(dir.line),
                )
            })?;
            out.extend(perform_includes(old, &config.file, &config.parsed)?);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(name: &str, line: usize, args: &[&str]) -> Directive {
        Directive {
            name: name.to_string(),
            line,
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Directive::default()
        }
    }

    #[test]
    fn test_combine_splices_includes() {
        let payload = Payload {
            status: String::new(),
            errors: Vec::new(),
            configs: vec![
                Config {
                    file: "example1.conf".to_string(),
                    parsed: vec![Directive {
                        includes: Some(vec![1]),
                        ..directive("include", 1, &["example2.conf"])
                    }],
                    ..Config::default()
                },
                Config {
                    file: "example2.conf".to_string(),
                    parsed: vec![
                        Directive {
                            block: Some(Vec::new()),
                            ..directive("events", 1, &[])
                        },
                        Directive {
                            block: Some(Vec::new()),
                            ..directive("http", 2, &[])
                        },
                    ],
                    ..Config::default()
                },
            ],
        };

        let combined = payload.combined().unwrap();
        assert_eq!(combined.status, "ok");
        assert_eq!(combined.configs.len(), 1);

        let config = &combined.configs[0];
        assert_eq!(config.file, "example1.conf");
        let names: Vec<&str> = config.parsed.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["events", "http"]);
        assert!(config.parsed.iter().all(|d| !d.is_include()));
    }

    #[test]
    fn test_combine_out_of_range_index_is_fatal() {
        let payload = Payload {
            configs: vec![Config {
                file: "nginx.conf".to_string(),
                parsed: vec![Directive {
                    includes: Some(vec![7]),
                    ..directive("include", 3, &["missing.conf"])
                }],
                ..Config::default()
            }],
            ..Payload::default()
        };

        let err = payload.combined().unwrap_err();
        assert_eq!(
            err.to_string(),
            "include config with index: 7 in nginx.conf:3"
        );
    }

    #[test]
    fn test_combine_empty_payload_is_identity() {
        let payload = Payload {
            status: "ok".to_string(),
            ..Payload::default()
        };
        let combined = payload.combined().unwrap();
        assert!(combined.configs.is_empty());
    }

    #[test]
    fn test_combine_propagates_failed_status() {
        let payload = Payload {
            status: "failed".to_string(),
            errors: Vec::new(),
            configs: vec![
                Config {
                    file: "a.conf".to_string(),
                    status: "ok".to_string(),
                    ..Config::default()
                },
                Config {
                    file: "b.conf".to_string(),
                    status: "failed".to_string(),
                    errors: vec![crate::ast::ConfigError {
                        line: Some(2),
                        message: "bad".to_string(),
                    }],
                    ..Config::default()
                },
            ],
        };

        let combined = payload.combined().unwrap();
        assert_eq!(combined.status, "failed");
        assert_eq!(combined.configs[0].status, "failed");
        assert_eq!(combined.configs[0].errors.len(), 1);
    }
}
