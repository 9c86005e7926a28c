//! Canonical text emission for parsed configurations.
//!
//! [`build`] is the inverse of [`parse`](crate::parse): it renders a
//! [`Config`] tree back to nginx syntax with normalised indentation and
//! minimal quoting. [`build_files`] mirrors a whole payload onto disk.
//!
//! Quoting is driven by [`needs_quotes`]: a value is wrapped in double
//! quotes only when re-lexing the bare form would produce something
//! different. The scanner applies the same escape pairing and `${…}`
//! expansion rules as the lexer, so arguments round-trip unchanged.

use crate::ast::{Config, Directive, Payload};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Options accepted by [`build`] and [`build_files`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Spaces per nesting level. Ignored when `tabs` is set.
    pub indent: usize,
    /// Indent with one tab per level instead of spaces.
    pub tabs: bool,
    /// Prepend a comment header crediting the generator.
    pub header: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            indent: 4,
            tabs: false,
            header: false,
        }
    }
}

const HEADER: &str = "\
# This config was built from a parsed payload by nginx-conf.
# It is a rendering of the parsed tree, not a byte-for-byte
# copy of the original files.

";

/// Renders `config` as nginx configuration text.
pub fn build<W: Write>(writer: &mut W, config: &Config, options: &BuildOptions) -> io::Result<()> {
    writer.write_all(build_string(config, options).as_bytes())
}

fn build_string(config: &Config, options: &BuildOptions) -> String {
    let padding = if options.tabs {
        "\t".to_string()
    } else {
        " ".repeat(options.indent)
    };

    let mut body = String::new();
    build_block(&mut body, &config.parsed, 0, 0, &padding);

    if options.header {
        let mut out = String::with_capacity(HEADER.len() + body.len());
        out.push_str(HEADER);
        out.push_str(&body);
        out
    } else {
        body
    }
}

fn build_block(
    output: &mut String,
    block: &[Directive],
    depth: usize,
    mut last_line: usize,
    padding: &str,
) {
    let margin = padding.repeat(depth);

    for stmt in block {
        let directive = enquote(&stmt.name);
        let line = stmt.line;

        // a comment on the same source line as the previous directive
        // is appended to that directive's output line
        if directive == "#" && line == last_line {
            output.push_str(" #");
            output.push_str(stmt.comment.as_deref().unwrap_or(""));
            continue;
        }

        let mut built = String::new();
        if directive == "#" {
            built.push('#');
            built.push_str(stmt.comment.as_deref().unwrap_or(""));
        } else {
            let args: Vec<String> = stmt.args.iter().map(|arg| enquote(arg)).collect();

            if directive == "if" {
                built.push_str("if (");
                built.push_str(&args.join(" "));
                built.push(')');
            } else if !args.is_empty() {
                built.push_str(&directive);
                built.push(' ');
                built.push_str(&args.join(" "));
            } else {
                built.push_str(&directive);
            }

            match &stmt.block {
                None => built.push(';'),
                Some(children) => {
                    built.push_str(" {");
                    build_block(&mut built, children, depth + 1, line, padding);
                    built.push('\n');
                    built.push_str(&margin);
                    built.push('}');
                }
            }
        }

        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&margin);
        output.push_str(&built);
        last_line = line;
    }
}

/// Writes every config in `payload` under `dirname`, creating parent
/// directories as needed.
///
/// Relative config paths are resolved against `dirname`; absolute ones
/// are written where they point. Output is trimmed of trailing
/// whitespace and terminated with a single newline.
pub fn build_files(
    payload: &Payload,
    dirname: impl AsRef<Path>,
    options: &BuildOptions,
) -> io::Result<()> {
    let dirname = dirname.as_ref();

    for config in &payload.configs {
        let mut path = PathBuf::from(&config.file);
        if path.is_relative() {
            path = dirname.join(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let text = build_string(config, options);
        let mut output = text.trim_end().to_string();
        output.push('\n');
        fs::write(&path, output)?;
    }

    Ok(())
}

/// Splits a value into the atoms the lexer would see: escape pairs
/// (`\x`) and the expansion opener `${` are two-character atoms, a `$`
/// not followed by `{` is its own atom, everything else is single
/// characters.
fn escape_atoms(value: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = value.char_indices().collect();
    let mut atoms = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (start, ch) = chars[i];
        if ch == '\\' && i + 1 < chars.len() {
            let (next_start, next) = chars[i + 1];
            atoms.push(&value[start..next_start + next.len_utf8()]);
            i += 2;
            continue;
        }
        if ch == '$' && i + 1 < chars.len() && chars[i + 1].1 == '{' {
            atoms.push(&value[start..chars[i + 1].0 + 1]);
            i += 2;
            continue;
        }
        atoms.push(&value[start..start + ch.len_utf8()]);
        i += 1;
    }
    atoms
}

fn atom_is_space(atom: &str) -> bool {
    atom.trim().is_empty()
}

/// Whether re-lexing `value` bare would produce something other than
/// `value` itself, so that [`enquote`] has to wrap it.
pub(crate) fn needs_quotes(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }

    let atoms = escape_atoms(value);
    let mut iter = atoms.iter().copied();

    // values can't start with whitespace, punctuation, a quote, or the
    // expansion opener
    let first = iter.next().expect("non-empty value has atoms");
    if atom_is_space(first) || matches!(first, "{" | "}" | ";" | "\"" | "'" | "${") {
        return true;
    }

    let mut expanding = false;
    let mut last = first;
    for atom in iter {
        last = atom;
        if atom_is_space(atom) || matches!(atom, "{" | ";" | "\"" | "'") {
            return true;
        } else if (expanding && atom == "${") || (!expanding && atom == "}") {
            // unbalanced expansion syntax only survives when quoted
            return true;
        } else if (expanding && atom == "}") || (!expanding && atom == "${") {
            expanding = !expanding;
        }
    }

    expanding || last == "\\" || last == "$"
}

/// Returns `value` unchanged when it can be emitted bare, or wrapped in
/// double quotes with control characters escaped.
///
/// This is the quoting the builder applies to every directive name and
/// argument; two argument values are interchangeable in a config
/// exactly when their enquoted forms are equal.
pub fn enquote(value: &str) -> String {
    if !needs_quotes(value) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            // a lexer escape pair collapses back to its bare character
            '\\' => out.push('\\'),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ if (ch as u32) < 0x20 || ch == '\x7f' => {
                out.push_str(&format!("\\x{:02x}", ch as u32));
            }
            _ if ch.is_control() => {
                let code = ch as u32;
                if code < 0x10000 {
                    out.push_str(&format!("\\u{:04x}", code));
                } else {
                    out.push_str(&format!("\\U{:08x}", code));
                }
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
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

    fn block(mut directive: Directive, children: Vec<Directive>) -> Directive {
        directive.block = Some(children);
        directive
    }

    fn comment(line: usize, text: &str) -> Directive {
        Directive {
            name: "#".to_string(),
            line,
            comment: Some(text.to_string()),
            ..Directive::default()
        }
    }

    fn build_to_string(parsed: Vec<Directive>, options: &BuildOptions) -> String {
        let config = Config {
            parsed,
            ..Config::default()
        };
        let mut buf = Vec::new();
        build(&mut buf, &config, options).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_nested_and_multiple_args() {
        let parsed = vec![
            block(directive("events", 0, &[]), vec![directive(
                "worker_connections",
                0,
                &["1024"],
            )]),
            block(directive("http", 0, &[]), vec![block(
                directive("server", 0, &[]),
                vec![
                    directive("listen", 0, &["127.0.0.1:8080"]),
                    directive("server_name", 0, &["default_server"]),
                    block(directive("location", 0, &["/"]), vec![directive(
                        "return",
                        0,
                        &["200", "foo bar baz"],
                    )]),
                ],
            )]),
        ];

        let expected = [
            "events {",
            "    worker_connections 1024;",
            "}",
            "http {",
            "    server {",
            "        listen 127.0.0.1:8080;",
            "        server_name default_server;",
            "        location / {",
            "            return 200 \"foo bar baz\";",
            "        }",
            "    }",
            "}",
        ]
        .join("\n");

        assert_eq!(build_to_string(parsed, &BuildOptions::default()), expected);
    }

    #[test]
    fn test_with_comments() {
        let parsed = vec![
            block(directive("events", 1, &[]), vec![directive(
                "worker_connections",
                2,
                &["1024"],
            )]),
            comment(4, "comment"),
            block(directive("http", 5, &[]), vec![block(
                directive("server", 6, &[]),
                vec![
                    directive("listen", 7, &["127.0.0.1:8080"]),
                    comment(7, "listen"),
                    directive("server_name", 8, &["default_server"]),
                    block(directive("location", 9, &["/"]), vec![
                        comment(9, "# this is brace"),
                        comment(10, " location /"),
                        comment(11, " is here"),
                        directive("return", 12, &["200", "foo bar baz"]),
                    ]),
                ],
            )]),
        ];

        let expected = [
            "events {",
            "    worker_connections 1024;",
            "}",
            "#comment",
            "http {",
            "    server {",
            "        listen 127.0.0.1:8080; #listen",
            "        server_name default_server;",
            "        location / { ## this is brace",
            "            # location /",
            "            # is here",
            "            return 200 \"foo bar baz\";",
            "        }",
            "    }",
            "}",
        ]
        .join("\n");

        assert_eq!(build_to_string(parsed, &BuildOptions::default()), expected);
    }

    #[test]
    fn test_starts_with_comments() {
        let parsed = vec![comment(1, " foo"), directive("user", 5, &["root"])];
        assert_eq!(
            build_to_string(parsed, &BuildOptions::default()),
            "# foo\nuser root;"
        );
    }

    #[test]
    fn test_with_quoted_unicode() {
        let parsed = vec![directive("env", 1, &["русский текст"])];
        assert_eq!(
            build_to_string(parsed, &BuildOptions::default()),
            r#"env "русский текст";"#
        );
    }

    #[test]
    fn test_multiple_comments_on_one_line() {
        let parsed = vec![
            comment(1, "comment1"),
            directive("user", 2, &["root"]),
            comment(2, "comment2"),
            comment(2, "comment3"),
        ];
        assert_eq!(
            build_to_string(parsed, &BuildOptions::default()),
            "#comment1\nuser root; #comment2 #comment3"
        );
    }

    #[test]
    fn test_if_is_parenthesised() {
        let parsed = vec![block(
            directive("if", 1, &["$scheme", "=", "http"]),
            vec![directive("return", 2, &["200", "foo bar"])],
        )];
        let expected = ["if ($scheme = http) {", "    return 200 \"foo bar\";", "}"].join("\n");
        assert_eq!(build_to_string(parsed, &BuildOptions::default()), expected);
    }

    #[test]
    fn test_tabs_indent() {
        let parsed = vec![block(directive("events", 0, &[]), vec![directive(
            "worker_connections",
            0,
            &["1024"],
        )])];
        let options = BuildOptions {
            tabs: true,
            ..BuildOptions::default()
        };
        assert_eq!(
            build_to_string(parsed, &options),
            "events {\n\tworker_connections 1024;\n}"
        );
    }

    #[test]
    fn test_header() {
        let parsed = vec![directive("user", 1, &["nginx"])];
        let options = BuildOptions {
            header: true,
            ..BuildOptions::default()
        };
        let built = build_to_string(parsed, &options);
        assert!(built.starts_with("# This config was built"));
        assert!(built.ends_with("\nuser nginx;"));
        // three comment lines plus a blank one
        assert_eq!(built.matches('\n').count(), 4);
    }

    #[test]
    fn test_empty_block_renders_braces() {
        let parsed = vec![block(directive("events", 1, &[]), Vec::new())];
        assert_eq!(
            build_to_string(parsed, &BuildOptions::default()),
            "events {\n}"
        );
    }

    #[test]
    fn test_needs_quotes() {
        // bare values survive
        for value in [
            "foo",
            "http://example.com/",
            "200",
            "/var/log/nginx/access.log",
            "$remote_addr",
            "${host}${uri}",
            r"\#not-a-comment",
            r"back\ slashed",
            "semi\\;colon",
        ] {
            assert!(!needs_quotes(value), "{value:?} should not need quotes");
        }

        // anything the lexer would treat specially must be wrapped
        for value in [
            "",
            "foo bar",
            "{",
            "}",
            ";",
            "\"",
            "'",
            "${host}x${", // reopened expansion
            "}closed",
            "${never_closed",
            "ends-with-dollar$",
            "ends-with-backslash\\",
            " leading-space",
        ] {
            assert!(needs_quotes(value), "{value:?} should need quotes");
        }
    }

    #[test]
    fn test_enquote_minimality() {
        assert_eq!(enquote("foo"), "foo");
        assert_eq!(enquote("foo bar"), r#""foo bar""#);
        assert_eq!(enquote(""), r#""""#);
        assert_eq!(enquote("say \"hi\""), r#""say \"hi\"""#);
        assert_eq!(enquote("tab\there"), "\"tab\\there\"");
        assert_eq!(enquote("русский текст"), r#""русский текст""#);
    }

    #[test]
    fn test_build_files_trims_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Payload {
            configs: vec![Config {
                file: "nginx.conf".to_string(),
                parsed: vec![directive("user", 1, &["測試"])],
                ..Config::default()
            }],
            ..Payload::default()
        };

        build_files(&payload, dir.path(), &BuildOptions::default()).unwrap();

        let written = fs::read_to_string(dir.path().join("nginx.conf")).unwrap();
        assert_eq!(written, "user 測試;\n");
    }

    #[test]
    fn test_build_files_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Payload {
            configs: vec![Config {
                file: "conf.d/server.conf".to_string(),
                parsed: vec![directive("listen", 1, &["80"])],
                ..Config::default()
            }],
            ..Payload::default()
        };

        build_files(&payload, dir.path(), &BuildOptions::default()).unwrap();

        let written = fs::read_to_string(dir.path().join("conf.d/server.conf")).unwrap();
        assert_eq!(written, "listen 80;\n");
    }
}
