//! nginx configuration parser, validator, and builder
//!
//! This crate turns an nginx configuration file, plus everything it
//! pulls in through `include` directives, into a structured tree, and
//! turns such trees back into canonical nginx syntax. Syntax and
//! placement errors do not abort the parse: they are recorded per file
//! in the returned [`Payload`], so broken configs can still be
//! inspected.
//!
//! # Quick Start
//!
//! ```no_run
//! use nginx_conf::{parse, ParseOptions};
//!
//! let payload = parse("/etc/nginx/nginx.conf", &ParseOptions::default())?;
//!
//! for config in &payload.configs {
//!     println!("{}: {} top-level directives", config.file, config.parsed.len());
//! }
//! # Ok::<(), nginx_conf::Error>(())
//! ```
//!
//! Parsing from memory goes through the [`open`](ParseOptions::open)
//! hook, which replaces filesystem access entirely:
//!
//! ```
//! use std::io::Read;
//! use std::path::Path;
//! use nginx_conf::{parse, FileOpener, ParseOptions};
//!
//! struct OneFile(&'static str);
//!
//! impl FileOpener for OneFile {
//!     fn open(&self, _path: &Path) -> std::io::Result<Box<dyn Read>> {
//!         Ok(Box::new(self.0.as_bytes()))
//!     }
//! }
//!
//! let options = ParseOptions {
//!     open: Some(Box::new(OneFile("events { worker_connections 1024; }"))),
//!     ..ParseOptions::default()
//! };
//! let payload = parse("nginx.conf", &options).unwrap();
//! assert_eq!(payload.status, "ok");
//! assert_eq!(payload.configs[0].parsed[0].name, "events");
//! ```
//!
//! # Modules
//!
//! - [`ast`]: tree types, [`Payload`], [`Config`], [`Directive`]
//! - [`error`]: [`ParseError`] (recoverable, recorded as data) and
//!   [`Error`] (fatal)
//! - [`lexer`]: the tokenizer, usable on its own via [`lexer::lex`]
//! - [`build`]: the inverse direction, [`build()`] and [`build_files`]
//!
//! Validation is table-driven: each directive is checked for allowed
//! context and argument count against definitions taken from the nginx
//! sources, unless the corresponding `skip_*` options are set. Unknown
//! directives pass by default so third-party modules parse cleanly.

pub mod ast;
pub mod build;
mod combine;
pub mod error;
pub mod lexer;

mod analyze;
mod directives;

pub use ast::{Config, ConfigError, Directive, Payload, PayloadError};
pub use build::{build, build_files, BuildOptions};
pub use error::{Error, ParseError};

use lexer::Token;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Opens configuration files on behalf of the parser.
///
/// The default implementation reads from the host filesystem; tests
/// and embedders can substitute a virtual one. Closures of the right
/// shape implement the trait directly.
pub trait FileOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>>;
}

impl<F> FileOpener for F
where
    F: Fn(&Path) -> io::Result<Box<dyn Read>>,
{
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        self(path)
    }
}

/// Options controlling [`parse`].
#[derive(Default)]
pub struct ParseOptions {
    /// Abort on the first `ParseError` instead of recording it.
    pub stop_parsing_on_error: bool,

    /// Directives to silently discard, including any child block.
    pub ignore_directives: Vec<String>,

    /// Run [`Payload::combined`] on the result before returning.
    pub combine_configs: bool,

    /// Do not follow `include` directives; their `includes` field is
    /// left absent.
    pub single_file: bool,

    /// Preserve `#` comments as `"#"` directives in the tree.
    pub parse_comments: bool,

    /// Record a `ParseError` for directives the catalogue does not
    /// know. The unknown directive is dropped from the tree.
    pub error_on_unknown_directives: bool,

    /// Accept known directives in any context.
    pub skip_directive_context_check: bool,

    /// Skip argument count and flag-value checks.
    pub skip_directive_args_check: bool,

    /// Called for each recorded error; the return value lands in
    /// [`PayloadError::callback`].
    #[allow(clippy::type_complexity)]
    pub error_callback: Option<Box<dyn Fn(&ParseError) -> serde_json::Value>>,

    /// Alternative file access, replacing the host filesystem.
    pub open: Option<Box<dyn FileOpener>>,
}

/// Parses the configuration file at `path` and its include closure.
///
/// I/O failures on config files and glob failures are fatal; syntax
/// and validation errors are recorded in the payload (see
/// [`Payload::status`]) unless
/// [`stop_parsing_on_error`](ParseOptions::stop_parsing_on_error) is
/// set.
pub fn parse(path: impl AsRef<Path>, options: &ParseOptions) -> Result<Payload, Error> {
    let path = path.as_ref();
    let config_dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();

    let mut parser = Parser {
        config_dir,
        options,
        includes: VecDeque::new(),
        included: HashMap::new(),
        payload: Payload {
            status: "ok".to_string(),
            errors: Vec::new(),
            configs: Vec::new(),
        },
    };
    parser.includes.push_back(FileCtx {
        path: path.to_path_buf(),
        ctx: Vec::new(),
    });
    parser.included.insert(path.display().to_string(), 0);

    while let Some(incl) = parser.includes.pop_front() {
        let source = parser.read_source(&incl.path)?;

        let mut config = Config {
            file: incl.path.display().to_string(),
            status: "ok".to_string(),
            errors: Vec::new(),
            parsed: Vec::new(),
        };

        let mut tokens = lexer::lex(&source);
        match parser.parse_block(&mut config, &mut tokens, &incl.ctx, false) {
            Ok(parsed) => config.parsed = parsed,
            Err(Error::Parse(err)) if !options.stop_parsing_on_error => {
                // a file-level error discards that file's partial tree
                // but does not stop sibling files from being parsed
                let err = err.in_file(&config.file);
                parser.handle_error(&mut config, &err);
            }
            Err(err) => return Err(err),
        }

        parser.payload.configs.push(config);
    }

    if options.combine_configs {
        return parser.payload.combined();
    }

    Ok(parser.payload)
}

/// A file queued for parsing together with the block context of the
/// `include` directive that referenced it.
struct FileCtx {
    path: PathBuf,
    ctx: Vec<String>,
}

struct Parser<'a> {
    /// Directory of the root file; relative includes resolve here.
    config_dir: PathBuf,
    options: &'a ParseOptions,
    /// FIFO of files discovered but not yet parsed.
    includes: VecDeque<FileCtx>,
    /// Path → config index; keeps files from being parsed twice.
    included: HashMap<String, usize>,
    payload: Payload,
}

impl Parser<'_> {
    fn open_file(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        match &self.options.open {
            Some(opener) => opener.open(path),
            None => Ok(Box::new(fs::File::open(path)?)),
        }
    }

    fn read_source(&self, path: &Path) -> io::Result<String> {
        let mut reader = self.open_file(path)?;
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        Ok(source)
    }

    /// Records a recoverable error on both the config and the payload,
    /// marking both as failed.
    fn handle_error(&mut self, config: &mut Config, err: &ParseError) {
        let line = err.line();
        let message = err.to_string();

        config.status = "failed".to_string();
        config.errors.push(ConfigError {
            line,
            message: message.clone(),
        });

        let callback = self.options.error_callback.as_ref().map(|cb| cb(err));
        self.payload.status = "failed".to_string();
        self.payload.errors.push(PayloadError {
            file: config.file.clone(),
            line,
            message,
            callback,
        });
    }

    /// Parses statements until the enclosing block closes or the token
    /// stream ends, returning the sibling list.
    ///
    /// In consume mode, tokens are discarded (recursing through nested
    /// braces) until the block closes; used for error recovery and for
    /// `*_by_lua_block` bodies, which are not nginx syntax.
    fn parse_block<I>(
        &mut self,
        parsing: &mut Config,
        tokens: &mut I,
        ctx: &[String],
        consume: bool,
    ) -> Result<Vec<Directive>, Error>
    where
        I: Iterator<Item = Result<Token, ParseError>>,
    {
        let mut parsed = Vec::new();

        while let Some(item) = tokens.next() {
            let token = item?;

            // the enclosing block is closing
            if token.value == "}" && !token.quoted {
                break;
            }

            if consume {
                if token.value == "{" && !token.quoted {
                    self.parse_block(parsing, tokens, &[], true)?;
                }
                continue;
            }

            let mut stmt = Directive {
                name: token.value,
                line: token.line,
                args: Vec::new(),
                includes: None,
                block: None,
                comment: None,
            };

            if stmt.name.starts_with('#') && !token.quoted {
                if self.options.parse_comments {
                    let comment = stmt.name[1..].to_string();
                    stmt.name = "#".to_string();
                    stmt.comment = Some(comment);
                    parsed.push(stmt);
                }
                continue;
            }

            // everything up to the terminator is an argument, except
            // comments, which are reattached after the directive
            let mut comments_in_args = Vec::new();
            let mut term = self.next_token(tokens, parsing, stmt.line)?;
            while term.quoted || (term.value != "{" && term.value != ";" && term.value != "}") {
                if term.value.starts_with('#') && !term.quoted {
                    comments_in_args.push(term.value[1..].to_string());
                } else {
                    stmt.args.push(term.value);
                }
                term = self.next_token(tokens, parsing, stmt.line)?;
            }

            if self.options.ignore_directives.contains(&stmt.name) {
                if term.value == "{" && !term.quoted {
                    self.parse_block(parsing, tokens, &[], true)?;
                }
                continue;
            }

            if stmt.name == "if" {
                prepare_if_args(&mut stmt);
            }

            if let Err(err) = analyze::analyze(&parsing.file, &stmt, &term.value, ctx, self.options)
            {
                if self.options.stop_parsing_on_error {
                    return Err(err.into());
                }
                self.handle_error(parsing, &err);
                // a block where none belongs still has to be consumed;
                // a bare } instead closes the enclosing block
                if err.message().ends_with(r#" is not terminated by ";""#) {
                    if term.value != "}" && !term.quoted {
                        self.parse_block(parsing, tokens, &[], true)?;
                    } else {
                        break;
                    }
                }
                continue;
            }

            if !self.options.single_file && stmt.name == "include" {
                self.resolve_include(parsing, &mut stmt, ctx)?;
            }

            if term.value == "{" && !term.quoted {
                let inner = analyze::enter_block_ctx(&stmt.name, ctx);
                if stmt.name.ends_with("_by_lua_block") {
                    // lua bodies are not nginx syntax
                    self.parse_block(parsing, tokens, &inner, true)?;
                } else {
                    stmt.block = Some(self.parse_block(parsing, tokens, &inner, false)?);
                }
            }

            let stmt_line = stmt.line;
            parsed.push(stmt);

            for comment in comments_in_args {
                parsed.push(Directive {
                    name: "#".to_string(),
                    line: stmt_line,
                    args: Vec::new(),
                    includes: None,
                    block: None,
                    comment: Some(comment),
                });
            }
        }

        Ok(parsed)
    }

    /// Pulls the next token mid-statement; running out of input here
    /// means the statement was never terminated.
    fn next_token<I>(&self, tokens: &mut I, parsing: &Config, line: usize) -> Result<Token, Error>
    where
        I: Iterator<Item = Result<Token, ParseError>>,
    {
        match tokens.next() {
            Some(item) => Ok(item?),
            None => Err(ParseError::new(
                r#"unexpected end of file, expecting ";" or "}""#,
                Some(parsing.file.clone()),
                Some(line),
            )
            .into()),
        }
    }

    /// Resolves an `include` argument to config indices, queueing
    /// newly discovered files.
    ///
    /// Arguments with glob metacharacters are expanded and sorted;
    /// literal paths are probed eagerly so a missing target is
    /// reported at this directive's line.
    fn resolve_include(
        &mut self,
        parsing: &mut Config,
        stmt: &mut Directive,
        ctx: &[String],
    ) -> Result<(), Error> {
        let pattern_arg = stmt.args.first().cloned().unwrap_or_default();
        let mut pattern = PathBuf::from(&pattern_arg);
        if pattern.is_relative() {
            pattern = self.config_dir.join(pattern);
        }

        stmt.includes = Some(Vec::new());

        let mut fnames: Vec<PathBuf> = Vec::new();
        let pattern_text = pattern.display().to_string();
        if has_magic(&pattern_text) {
            for entry in glob::glob(&pattern_text)? {
                fnames.push(entry?);
            }
            fnames.sort();
        } else {
            // nginx itself checks that an explicitly included file can
            // be opened; probing here lands the error on this line
            match self.open_file(&pattern) {
                Ok(_handle) => fnames.push(pattern),
                Err(err) => {
                    let err = ParseError::new(
                        format!("open {}: {}", pattern.display(), err),
                        Some(parsing.file.clone()),
                        Some(stmt.line),
                    );
                    if self.options.stop_parsing_on_error {
                        return Err(err.into());
                    }
                    self.handle_error(parsing, &err);
                }
            }
        }

        for fname in fnames {
            let key = fname.display().to_string();
            let index = match self.included.get(&key) {
                Some(&index) => index,
                None => {
                    let index = self.included.len();
                    self.included.insert(key, index);
                    self.includes.push_back(FileCtx {
                        path: fname,
                        ctx: ctx.to_vec(),
                    });
                    index
                }
            };
            if let Some(includes) = stmt.includes.as_mut() {
                includes.push(index);
            }
        }

        Ok(())
    }
}

/// Whether an include argument is a glob pattern.
fn has_magic(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Strips the parentheses an `if` directive's condition arrives in.
///
/// `if ($scheme = http)` lexes as `["($scheme", "=", "http)"]`; the
/// tree stores the condition without the parentheses and the builder
/// puts them back.
fn prepare_if_args(stmt: &mut Directive) {
    let (Some(first), Some(last)) = (stmt.args.first(), stmt.args.last()) else {
        return;
    };
    if !first.starts_with('(') || !last.ends_with(')') {
        return;
    }

    let end = stmt.args.len() - 1;
    let stripped = stmt.args[0][1..].trim_start().to_string();
    stmt.args[0] = stripped;
    let last_len = stmt.args[end].len();
    let stripped = stmt.args[end][..last_len - 1].trim_end().to_string();
    stmt.args[end] = stripped;

    if stmt.args[0].is_empty() {
        stmt.args.remove(0);
    }
    if stmt.args.last().is_some_and(|arg| arg.is_empty()) {
        stmt.args.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opener(source: &'static str) -> Option<Box<dyn FileOpener>> {
        Some(Box::new(move |_path: &Path| -> io::Result<Box<dyn Read>> {
            Ok(Box::new(source.as_bytes()))
        }))
    }

    fn parse_source(source: &'static str, mut options: ParseOptions) -> Payload {
        options.open = opener(source);
        parse("nginx.conf", &options).unwrap()
    }

    #[test]
    fn test_simple_config() {
        let payload = parse_source(
            "events { worker_connections 1024; }\nuser nginx;\n",
            ParseOptions::default(),
        );
        assert_eq!(payload.status, "ok");
        assert_eq!(payload.configs.len(), 1);

        let parsed = &payload.configs[0].parsed;
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "events");
        assert_eq!(
            parsed[0].block.as_ref().unwrap()[0].name,
            "worker_connections"
        );
        assert_eq!(parsed[1].name, "user");
        assert_eq!(parsed[1].args, ["nginx"]);
    }

    #[test]
    fn test_empty_block_is_present() {
        let payload = parse_source("events {}\n", ParseOptions::default());
        let events = &payload.configs[0].parsed[0];
        assert_eq!(events.block, Some(Vec::new()));
    }

    #[test]
    fn test_if_args_are_stripped() {
        let payload = parse_source(
            "http { server { location / { if ($scheme = http) { return 200 \"foo\"; } } } }",
            ParseOptions::default(),
        );
        assert_eq!(payload.status, "ok");

        let http = &payload.configs[0].parsed[0];
        let server = &http.block.as_ref().unwrap()[0];
        let location = &server.block.as_ref().unwrap()[0];
        let if_dir = &location.block.as_ref().unwrap()[0];
        assert_eq!(if_dir.name, "if");
        assert_eq!(if_dir.args, ["$scheme", "=", "http"]);
    }

    #[test]
    fn test_comments_dropped_by_default() {
        let payload = parse_source("# hello\nuser nginx;\n", ParseOptions::default());
        assert_eq!(payload.configs[0].parsed.len(), 1);

        let payload = parse_source(
            "# hello\nuser nginx;\n",
            ParseOptions {
                parse_comments: true,
                ..ParseOptions::default()
            },
        );
        let parsed = &payload.configs[0].parsed;
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "#");
        assert_eq!(parsed[0].comment.as_deref(), Some(" hello"));
    }

    #[test]
    fn test_ignored_directive_block_is_consumed() {
        let payload = parse_source(
            "events { worker_connections 1024; }\nuser nginx;\n",
            ParseOptions {
                ignore_directives: vec!["events".to_string()],
                ..ParseOptions::default()
            },
        );
        let parsed = &payload.configs[0].parsed;
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "user");
    }

    #[test]
    fn test_lua_block_is_consumed() {
        let payload = parse_source(
            "http { server { location / { content_by_lua_block { ngx.say({[\"x\"] = 1}) } } } }",
            ParseOptions::default(),
        );
        assert_eq!(payload.status, "ok");

        let http = &payload.configs[0].parsed[0];
        let server = &http.block.as_ref().unwrap()[0];
        let location = &server.block.as_ref().unwrap()[0];
        let lua = &location.block.as_ref().unwrap()[0];
        assert_eq!(lua.name, "content_by_lua_block");
        // the body is discarded, not parsed as nginx syntax
        assert!(lua.block.is_none());
    }

    #[test]
    fn test_unbalanced_brace_fails_config() {
        let payload = parse_source("http {\n  server {\n}\n", ParseOptions::default());
        assert_eq!(payload.status, "failed");
        assert_eq!(payload.configs[0].status, "failed");
        assert!(payload.configs[0].parsed.is_empty());
        assert_eq!(
            payload.configs[0].errors[0].message,
            r#"unexpected end of file, expecting "}" in nginx.conf:3"#
        );
    }

    #[test]
    fn test_stop_parsing_on_error() {
        let options = ParseOptions {
            stop_parsing_on_error: true,
            error_on_unknown_directives: true,
            open: opener("lissten 80;\n"),
            ..ParseOptions::default()
        };
        let err = parse("nginx.conf", &options).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(
            err.to_string(),
            r#"unknown directive "lissten" in nginx.conf:1"#
        );
    }

    #[test]
    fn test_error_callback_attaches_value() {
        let options = ParseOptions {
            error_on_unknown_directives: true,
            error_callback: Some(Box::new(|err| {
                serde_json::json!({ "msg": err.message() })
            })),
            open: opener("lissten 80;\n"),
            ..ParseOptions::default()
        };
        let payload = parse("nginx.conf", &options).unwrap();
        assert_eq!(payload.status, "failed");
        assert_eq!(
            payload.errors[0].callback,
            Some(serde_json::json!({ "msg": r#"unknown directive "lissten""# }))
        );
    }

    #[test]
    fn test_missing_terminator_at_eof() {
        let payload = parse_source("user nginx\n", ParseOptions::default());
        assert_eq!(payload.status, "failed");
        assert_eq!(
            payload.configs[0].errors[0].message,
            r#"unexpected end of file, expecting ";" or "}" in nginx.conf:1"#
        );
    }

    #[test]
    fn test_prepare_if_args_edge_cases() {
        let mut stmt = Directive {
            name: "if".to_string(),
            args: vec!["($scheme".to_string(), "=".to_string(), "http)".to_string()],
            ..Directive::default()
        };
        prepare_if_args(&mut stmt);
        assert_eq!(stmt.args, ["$scheme", "=", "http"]);

        // lone parenthesised argument collapses entirely
        let mut stmt = Directive {
            name: "if".to_string(),
            args: vec!["($x)".to_string()],
            ..Directive::default()
        };
        prepare_if_args(&mut stmt);
        assert_eq!(stmt.args, ["$x"]);

        // parentheses that are separate tokens drop the empty strings
        let mut stmt = Directive {
            name: "if".to_string(),
            args: vec!["(".to_string(), "$x".to_string(), ")".to_string()],
            ..Directive::default()
        };
        prepare_if_args(&mut stmt);
        assert_eq!(stmt.args, ["$x"]);

        // unparenthesised args are left alone
        let mut stmt = Directive {
            name: "if".to_string(),
            args: vec!["$x".to_string()],
            ..Directive::default()
        };
        prepare_if_args(&mut stmt);
        assert_eq!(stmt.args, ["$x"]);
    }

    #[test]
    fn test_has_magic() {
        assert!(has_magic("conf.d/*.conf"));
        assert!(has_magic("conf.d/server?.conf"));
        assert!(has_magic("conf.d/server[12].conf"));
        assert!(!has_magic("conf.d/server.conf"));
    }
}
