//! Table-driven validation of directive placement and arity.
//!
//! Each catalogue entry (see [`crate::directives`]) is a bitmask
//! combining argument-count flags, a block flag, a flag-argument flag,
//! and one bit per context the directive is allowed in. The constant
//! names follow the nginx sources, where these masks originate.

use crate::ast::Directive;
use crate::error::ParseError;
use crate::ParseOptions;

// argument style bits
pub(crate) const NGX_CONF_NOARGS: u32 = 0x0000_0001; // 0 args
pub(crate) const NGX_CONF_TAKE1: u32 = 0x0000_0002; // 1 arg
pub(crate) const NGX_CONF_TAKE2: u32 = 0x0000_0004; // 2 args
pub(crate) const NGX_CONF_TAKE3: u32 = 0x0000_0008; // 3 args
pub(crate) const NGX_CONF_TAKE4: u32 = 0x0000_0010; // 4 args
pub(crate) const NGX_CONF_TAKE5: u32 = 0x0000_0020; // 5 args
pub(crate) const NGX_CONF_TAKE6: u32 = 0x0000_0040; // 6 args
pub(crate) const NGX_CONF_BLOCK: u32 = 0x0000_0100; // followed by a block
pub(crate) const NGX_CONF_FLAG: u32 = 0x0000_0200; // "on" or "off"
pub(crate) const NGX_CONF_ANY: u32 = 0x0000_0400; // >= 0 args
pub(crate) const NGX_CONF_1MORE: u32 = 0x0000_0800; // >= 1 args
pub(crate) const NGX_CONF_2MORE: u32 = 0x0000_1000; // >= 2 args

// argument style aliases
pub(crate) const NGX_CONF_TAKE12: u32 = NGX_CONF_TAKE1 | NGX_CONF_TAKE2;
pub(crate) const NGX_CONF_TAKE23: u32 = NGX_CONF_TAKE2 | NGX_CONF_TAKE3;
pub(crate) const NGX_CONF_TAKE34: u32 = NGX_CONF_TAKE3 | NGX_CONF_TAKE4;
pub(crate) const NGX_CONF_TAKE123: u32 = NGX_CONF_TAKE12 | NGX_CONF_TAKE3;
pub(crate) const NGX_CONF_TAKE1234: u32 = NGX_CONF_TAKE123 | NGX_CONF_TAKE4;

// context bits
pub(crate) const NGX_DIRECT_CONF: u32 = 0x0001_0000; // main file
pub(crate) const NGX_MAIN_CONF: u32 = 0x0004_0000; // main context
pub(crate) const NGX_EVENT_CONF: u32 = 0x0008_0000; // events
pub(crate) const NGX_MAIL_MAIN_CONF: u32 = 0x0010_0000; // mail
pub(crate) const NGX_MAIL_SRV_CONF: u32 = 0x0020_0000; // mail > server
pub(crate) const NGX_STREAM_MAIN_CONF: u32 = 0x0040_0000; // stream
pub(crate) const NGX_STREAM_SRV_CONF: u32 = 0x0080_0000; // stream > server
pub(crate) const NGX_STREAM_UPS_CONF: u32 = 0x0100_0000; // stream > upstream
pub(crate) const NGX_HTTP_MAIN_CONF: u32 = 0x0200_0000; // http
pub(crate) const NGX_HTTP_SRV_CONF: u32 = 0x0400_0000; // http > server
pub(crate) const NGX_HTTP_LOC_CONF: u32 = 0x0800_0000; // http > location
pub(crate) const NGX_HTTP_UPS_CONF: u32 = 0x1000_0000; // http > upstream
pub(crate) const NGX_HTTP_SIF_CONF: u32 = 0x2000_0000; // http > server > if
pub(crate) const NGX_HTTP_LIF_CONF: u32 = 0x4000_0000; // http > location > if
pub(crate) const NGX_HTTP_LMT_CONF: u32 = 0x8000_0000; // http > location > limit_except

/// Any of the regular contexts (excludes the `if` and `limit_except`
/// sub-contexts).
pub(crate) const NGX_ANY_CONF: u32 = NGX_MAIN_CONF
    | NGX_EVENT_CONF
    | NGX_MAIL_MAIN_CONF
    | NGX_MAIL_SRV_CONF
    | NGX_STREAM_MAIN_CONF
    | NGX_STREAM_SRV_CONF
    | NGX_STREAM_UPS_CONF
    | NGX_HTTP_MAIN_CONF
    | NGX_HTTP_SRV_CONF
    | NGX_HTTP_LOC_CONF
    | NGX_HTTP_UPS_CONF;

/// The context bit for a block-context path, or `None` for contexts the
/// catalogue does not model (third-party block directives).
fn context_mask(ctx: &[String]) -> Option<u32> {
    let key = ctx.join(">");
    match key.as_str() {
        "" => Some(NGX_MAIN_CONF),
        "events" => Some(NGX_EVENT_CONF),
        "mail" => Some(NGX_MAIL_MAIN_CONF),
        "mail>server" => Some(NGX_MAIL_SRV_CONF),
        "stream" => Some(NGX_STREAM_MAIN_CONF),
        "stream>server" => Some(NGX_STREAM_SRV_CONF),
        "stream>upstream" => Some(NGX_STREAM_UPS_CONF),
        "http" => Some(NGX_HTTP_MAIN_CONF),
        "http>server" => Some(NGX_HTTP_SRV_CONF),
        "http>location" => Some(NGX_HTTP_LOC_CONF),
        "http>upstream" => Some(NGX_HTTP_UPS_CONF),
        "http>server>if" => Some(NGX_HTTP_SIF_CONF),
        "http>location>if" => Some(NGX_HTTP_LIF_CONF),
        "http>location>limit_except" => Some(NGX_HTTP_LMT_CONF),
        _ => None,
    }
}

/// The context a block directive's children are parsed under.
///
/// `location` blocks anywhere under `http` normalise to exactly
/// `["http", "location"]`; nested locations do not deepen the
/// context. Every other block directive appends its own name.
pub(crate) fn enter_block_ctx(name: &str, ctx: &[String]) -> Vec<String> {
    if !ctx.is_empty() && ctx[0] == "http" && name == "location" {
        return vec!["http".to_string(), "location".to_string()];
    }
    let mut inner = ctx.to_vec();
    inner.push(name.to_string());
    inner
}

fn valid_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("on") || value.eq_ignore_ascii_case("off")
}

/// Checks a directive against the catalogue.
///
/// `term` is the literal terminator the parser saw: `";"`, `"{"`, or
/// `"}"`. Unknown directives and unknown contexts pass silently (to
/// support third-party modules) unless `error_on_unknown_directives`
/// is set.
pub(crate) fn analyze(
    fname: &str,
    stmt: &Directive,
    term: &str,
    ctx: &[String],
    options: &ParseOptions,
) -> Result<(), ParseError> {
    let masks = crate::directives::directive_masks(&stmt.name);
    let curr_ctx = context_mask(ctx);

    if options.error_on_unknown_directives && masks.is_none() {
        return Err(ParseError::new(
            format!(r#"unknown directive "{}""#, stmt.name),
            Some(fname.to_string()),
            Some(stmt.line),
        ));
    }

    // if we don't know where this directive is allowed and how many
    // arguments it can take then don't bother analyzing it
    let (Some(masks), Some(curr_ctx)) = (masks, curr_ctx) else {
        return Ok(());
    };

    let ctx_masks: Vec<u32> = if options.skip_directive_context_check {
        masks.to_vec()
    } else {
        let matching: Vec<u32> = masks
            .iter()
            .copied()
            .filter(|mask| mask & curr_ctx != 0)
            .collect();
        if matching.is_empty() {
            return Err(ParseError::new(
                format!(r#""{}" directive is not allowed here"#, stmt.name),
                Some(fname.to_string()),
                Some(stmt.line),
            ));
        }
        matching
    };

    if options.skip_directive_args_check {
        return Ok(());
    }

    // keep the last candidate message; the first mask is usually the
    // usage the author meant
    let mut what = String::new();
    for mask in ctx_masks {
        if mask & NGX_CONF_BLOCK != 0 && term != "{" {
            what = format!(r#"directive "{}" has no opening "{{""#, stmt.name);
            continue;
        }
        if mask & NGX_CONF_BLOCK == 0 && term != ";" {
            what = format!(r#"directive "{}" is not terminated by ";""#, stmt.name);
            continue;
        }

        let n = stmt.args.len();
        if (n <= 7 && (mask >> n) & 1 != 0)
            || (mask & NGX_CONF_FLAG != 0 && n == 1 && valid_flag(&stmt.args[0]))
            || (mask & NGX_CONF_ANY != 0)
            || (mask & NGX_CONF_1MORE != 0 && n >= 1)
            || (mask & NGX_CONF_2MORE != 0 && n >= 2)
        {
            return Ok(());
        } else if mask & NGX_CONF_FLAG != 0 && n == 1 && !valid_flag(&stmt.args[0]) {
            what = format!(
                r#"invalid value "{}" in "{}" directive, it must be "on" or "off""#,
                stmt.args[0], stmt.name
            );
        } else {
            what = format!(
                r#"invalid number of arguments in "{}" directive. found {}"#,
                stmt.name, n
            );
        }
    }

    Err(ParseError::new(
        what,
        Some(fname.to_string()),
        Some(stmt.line),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(name: &str, args: &[&str]) -> Directive {
        Directive {
            name: name.to_string(),
            line: 5,
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Directive::default()
        }
    }

    fn ctx(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    const FNAME: &str = "/path/to/nginx.conf";

    #[test]
    fn test_state_directive_contexts() {
        let directive = stmt("state", &["/path/to/state/file.conf"]);
        let options = ParseOptions::default();

        // allowed in upstream contexts, and unknown contexts pass
        for good in [
            ctx(&["http", "upstream"]),
            ctx(&["stream", "upstream"]),
            ctx(&["some_third_party_context"]),
        ] {
            assert!(analyze(FNAME, &directive, ";", &good, &options).is_ok());
        }

        // rejected in every other known context
        for bad in [
            ctx(&[]),
            ctx(&["events"]),
            ctx(&["mail"]),
            ctx(&["mail", "server"]),
            ctx(&["stream"]),
            ctx(&["stream", "server"]),
            ctx(&["http"]),
            ctx(&["http", "server"]),
            ctx(&["http", "location"]),
            ctx(&["http", "server", "if"]),
            ctx(&["http", "location", "if"]),
            ctx(&["http", "location", "limit_except"]),
        ] {
            let err = analyze(FNAME, &directive, ";", &bad, &options).unwrap_err();
            assert!(
                err.message().ends_with("directive is not allowed here"),
                "unexpected message: {}",
                err.message()
            );
        }
    }

    #[test]
    fn test_flag_directive_args() {
        let options = ParseOptions::default();
        let events = ctx(&["events"]);

        for good in ["on", "off", "On", "Off", "ON", "OFF"] {
            let directive = stmt("accept_mutex", &[good]);
            assert!(analyze(FNAME, &directive, ";", &events, &options).is_ok());
        }

        for bad in ["1", "0", "true", "okay", ""] {
            let directive = stmt("accept_mutex", &[bad]);
            let err = analyze(FNAME, &directive, ";", &events, &options).unwrap_err();
            assert!(
                err.message().ends_with(r#"it must be "on" or "off""#),
                "unexpected message: {}",
                err.message()
            );
        }
    }

    #[test]
    fn test_unknown_directive_is_permitted_by_default() {
        let directive = stmt("third_party_thing", &["x"]);
        let options = ParseOptions::default();
        assert!(analyze(FNAME, &directive, ";", &ctx(&["http"]), &options).is_ok());
    }

    #[test]
    fn test_unknown_directive_errors_when_strict() {
        let directive = stmt("proxy_passs", &["http://x"]);
        let options = ParseOptions {
            error_on_unknown_directives: true,
            ..ParseOptions::default()
        };
        let err = analyze(FNAME, &directive, ";", &ctx(&["http"]), &options).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(r#"unknown directive "proxy_passs" in {}:5"#, FNAME)
        );
    }

    #[test]
    fn test_block_terminator_mismatches() {
        let options = ParseOptions::default();

        let err = analyze(FNAME, &stmt("events", &[]), ";", &ctx(&[]), &options).unwrap_err();
        assert_eq!(err.message(), r#"directive "events" has no opening "{""#);

        let err = analyze(
            FNAME,
            &stmt("listen", &["80"]),
            "{",
            &ctx(&["http", "server"]),
            &options,
        )
        .unwrap_err();
        assert_eq!(
            err.message(),
            r#"directive "listen" is not terminated by ";""#
        );
    }

    #[test]
    fn test_arity_error_reports_count() {
        let options = ParseOptions::default();
        let err = analyze(
            FNAME,
            &stmt("worker_connections", &["1024", "2048"]),
            ";",
            &ctx(&["events"]),
            &options,
        )
        .unwrap_err();
        assert_eq!(
            err.message(),
            r#"invalid number of arguments in "worker_connections" directive. found 2"#
        );
    }

    #[test]
    fn test_multi_context_directive() {
        // server is a block under http and a simple directive under upstream
        let options = ParseOptions::default();
        assert!(analyze(FNAME, &stmt("server", &[]), "{", &ctx(&["http"]), &options).is_ok());
        assert!(analyze(
            FNAME,
            &stmt("server", &["127.0.0.1:8080"]),
            ";",
            &ctx(&["http", "upstream"]),
            &options
        )
        .is_ok());
    }

    #[test]
    fn test_skip_checks() {
        let skip_ctx = ParseOptions {
            skip_directive_context_check: true,
            ..ParseOptions::default()
        };
        assert!(analyze(FNAME, &stmt("listen", &["80"]), ";", &ctx(&[]), &skip_ctx).is_ok());

        let skip_args = ParseOptions {
            skip_directive_args_check: true,
            ..ParseOptions::default()
        };
        assert!(analyze(
            FNAME,
            &stmt("worker_connections", &["1", "2", "3"]),
            ";",
            &ctx(&["events"]),
            &skip_args
        )
        .is_ok());
    }

    #[test]
    fn test_enter_block_ctx_normalises_location() {
        let inner = enter_block_ctx("location", &ctx(&["http", "location"]));
        assert_eq!(inner, ctx(&["http", "location"]));

        let inner = enter_block_ctx("if", &ctx(&["http", "location"]));
        assert_eq!(inner, ctx(&["http", "location", "if"]));

        let inner = enter_block_ctx("server", &ctx(&["http"]));
        assert_eq!(inner, ctx(&["http", "server"]));
    }
}
