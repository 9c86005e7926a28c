//! Streaming tokenizer for nginx configuration syntax.
//!
//! [`lex`] turns source text into a lazy stream of [`Token`]s. The
//! stream is pull-based: nothing past the last requested token is
//! examined, so the parser drives all work. Brace balancing is layered
//! on top of tokenization: an unbalanced `}` (or a missing one at end
//! of input) surfaces as an `Err` item that terminates the stream.
//!
//! Tokenization happens over a stream of *atoms*: single characters,
//! except that a backslash is bonded with the character after it into a
//! two-character unit. This is what makes `\"` inert inside and outside
//! of quoted strings, and it is shared with the quoting scanner in the
//! builder so that values round-trip.

use crate::error::ParseError;
use std::collections::VecDeque;
use std::str::Chars;

/// A single token of nginx configuration syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The token text. Quoted strings have their quotes stripped and
    /// quote escapes resolved; everything else is verbatim.
    pub value: String,
    /// 1-based line the token started on.
    pub line: usize,
    /// True when the token came from a `"…"` or `'…'` literal.
    pub quoted: bool,
}

impl Token {
    fn new(value: impl Into<String>, line: usize, quoted: bool) -> Self {
        Self {
            value: value.into(),
            line,
            quoted,
        }
    }
}

/// Tokenizes `source`, yielding tokens until the stream ends or a brace
/// imbalance is found.
///
/// The error item, when present, is always the last item of the stream.
///
/// ```
/// use nginx_conf::lexer::lex;
///
/// let values: Vec<String> = lex("listen 80;")
///     .map(|t| t.unwrap().value)
///     .collect();
/// assert_eq!(values, ["listen", "80", ";"]);
/// ```
pub fn lex(source: &str) -> impl Iterator<Item = Result<Token, ParseError>> + '_ {
    BalanceBraces::new(Lexer::new(source))
}

/// A character atom: one character, or a backslash-escaped pair.
#[derive(Debug, Clone, Copy)]
struct Atom {
    ch: char,
    escaped: bool,
    line: usize,
}

impl Atom {
    /// Matches a bare (unescaped) character.
    fn is(&self, ch: char) -> bool {
        !self.escaped && self.ch == ch
    }

    fn is_space(&self) -> bool {
        !self.escaped && self.ch.is_whitespace()
    }

    /// True for both `\n` and an escaped newline; either ends a line.
    fn ends_line(&self) -> bool {
        self.ch == '\n'
    }

    fn push_onto(&self, buf: &mut String) {
        if self.escaped {
            buf.push('\\');
        }
        buf.push(self.ch);
    }
}

/// Decodes source text into [`Atom`]s with line tracking.
///
/// Carriage returns are dropped, both bare and between a backslash and
/// the character it escapes, so CRLF input lexes like LF input.
struct CharSource<'a> {
    chars: Chars<'a>,
    line: usize,
}

impl<'a> CharSource<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars(),
            line: 1,
        }
    }
}

impl Iterator for CharSource<'_> {
    type Item = Atom;

    fn next(&mut self) -> Option<Atom> {
        loop {
            let ch = self.chars.next()?;
            if ch == '\r' {
                continue;
            }
            if ch == '\\' {
                let mut next = self.chars.next();
                if next == Some('\r') {
                    next = self.chars.next();
                }
                let Some(escaped) = next else {
                    // trailing backslash at end of input
                    return Some(Atom {
                        ch: '\\',
                        escaped: false,
                        line: self.line,
                    });
                };
                if escaped == '\n' {
                    self.line += 1;
                }
                return Some(Atom {
                    ch: escaped,
                    escaped: true,
                    line: self.line,
                });
            }
            if ch == '\n' {
                self.line += 1;
            }
            return Some(Atom {
                ch,
                escaped: false,
                line: self.line,
            });
        }
    }
}

/// The raw tokenizer, without brace balancing.
///
/// A hand-written state machine with three kinds of atoms: barewords,
/// quoted strings, and the punctuators `{`, `}`, `;`. Comments run from
/// an unquoted `#` at token start to the end of the line and are
/// emitted as single tokens including the `#`.
pub struct Lexer<'a> {
    source: CharSource<'a>,
    queue: VecDeque<Token>,
    token: String,
    token_line: usize,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source: CharSource::new(source),
            queue: VecDeque::new(),
            token: String::new(),
            token_line: 1,
            done: false,
        }
    }

    fn flush(&mut self) {
        if !self.token.is_empty() {
            let value = std::mem::take(&mut self.token);
            self.queue
                .push_back(Token::new(value, self.token_line, false));
        }
    }

    /// Consumes atoms until at least one token is queued or input ends.
    fn step(&mut self) {
        let Some(mut cl) = self.source.next() else {
            self.flush();
            self.done = true;
            return;
        };

        // whitespace separates tokens
        if cl.is_space() {
            self.flush();
            loop {
                match self.source.next() {
                    Some(next) if next.is_space() => continue,
                    Some(next) => {
                        cl = next;
                        break;
                    }
                    None => {
                        self.done = true;
                        return;
                    }
                }
            }
        }

        // a # at token start opens a comment running to end of line
        if self.token.is_empty() && cl.is('#') {
            let line_at_start = cl.line;
            let mut text = String::new();
            let mut cur = cl;
            loop {
                if cur.ends_line() {
                    break;
                }
                cur.push_onto(&mut text);
                match self.source.next() {
                    Some(next) => cur = next,
                    None => break,
                }
            }
            self.queue.push_back(Token::new(text, line_at_start, false));
            return;
        }

        if self.token.is_empty() {
            self.token_line = cl.line;
        }

        // parameter expansion: keep e.g. `${var[@]}` a single token
        if !self.token.is_empty() && self.token.ends_with('$') && cl.is('{') {
            loop {
                if self.token.ends_with('}') || cl.is_space() {
                    break;
                }
                cl.push_onto(&mut self.token);
                match self.source.next() {
                    Some(next) => cl = next,
                    None => {
                        self.flush();
                        self.done = true;
                        return;
                    }
                }
            }
            if cl.is_space() {
                self.flush();
                return;
            }
        }

        // quoted strings; a quote inside an in-progress bareword is an
        // ordinary character
        if cl.is('"') || cl.is('\'') {
            if !self.token.is_empty() {
                cl.push_onto(&mut self.token);
                return;
            }
            let quote = cl.ch;
            let mut value = String::new();
            loop {
                match self.source.next() {
                    Some(atom) if atom.is(quote) => break,
                    Some(atom) if atom.escaped && atom.ch == quote => value.push(quote),
                    Some(atom) => atom.push_onto(&mut value),
                    None => break,
                }
            }
            self.queue
                .push_back(Token::new(value, self.token_line, true));
            return;
        }

        // punctuators are whole tokens by themselves
        if cl.is('{') || cl.is('}') || cl.is(';') {
            self.flush();
            self.queue
                .push_back(Token::new(cl.ch.to_string(), cl.line, false));
            return;
        }

        cl.push_onto(&mut self.token);
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if let Some(token) = self.queue.pop_front() {
                return Some(token);
            }
            if self.done {
                return None;
            }
            self.step();
        }
    }
}

/// Wraps a token stream with a brace-depth check.
///
/// Depth counts unquoted `{`/`}`. Going negative, or ending the input
/// at positive depth, produces an error item and ends the stream.
struct BalanceBraces<I> {
    tokens: I,
    depth: i64,
    line: usize,
    done: bool,
}

impl<I> BalanceBraces<I> {
    fn new(tokens: I) -> Self {
        Self {
            tokens,
            depth: 0,
            line: 0,
            done: false,
        }
    }
}

impl<I: Iterator<Item = Token>> Iterator for BalanceBraces<I> {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.tokens.next() {
            Some(token) => {
                self.line = token.line;
                if !token.quoted {
                    match token.value.as_str() {
                        "}" => {
                            self.depth -= 1;
                            if self.depth < 0 {
                                self.done = true;
                                return Some(Err(ParseError::new(
                                    r#"unexpected "}""#,
                                    None,
                                    Some(self.line),
                                )));
                            }
                        }
                        "{" => self.depth += 1,
                        _ => {}
                    }
                }
                Some(Ok(token))
            }
            None => {
                self.done = true;
                if self.depth > 0 {
                    Some(Err(ParseError::new(
                        r#"unexpected end of file, expecting "}""#,
                        None,
                        Some(self.line),
                    )))
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(source: &str) -> Vec<(String, usize, bool)> {
        lex(source)
            .map(|t| {
                let t = t.expect("unexpected lex error");
                (t.value, t.line, t.quoted)
            })
            .collect()
    }

    fn values(source: &str) -> Vec<String> {
        tokenize(source).into_iter().map(|(v, _, _)| v).collect()
    }

    #[test]
    fn test_simple_directive() {
        assert_eq!(values("listen 80;"), ["listen", "80", ";"]);
    }

    #[test]
    fn test_block() {
        assert_eq!(
            values("events { worker_connections 1024; }"),
            ["events", "{", "worker_connections", "1024", ";", "}"]
        );
    }

    #[test]
    fn test_quoted_strings() {
        let tokens = tokenize(r#"return 200 "foo bar baz";"#);
        assert_eq!(tokens[2], ("foo bar baz".to_string(), 1, true));

        let tokens = tokenize("set $var 'single quoted';");
        assert_eq!(tokens[2], ("single quoted".to_string(), 1, true));
    }

    #[test]
    fn test_escaped_quote_in_string() {
        // \" contributes just the quote; other escapes stay verbatim
        let tokens = tokenize(r#"log_format main "say \"hi\" \t done";"#);
        assert_eq!(tokens[2].0, r#"say "hi" \t done"#);
    }

    #[test]
    fn test_quote_inside_bareword_is_ordinary() {
        assert_eq!(values("a'b c;"), ["a'b", "c", ";"]);
    }

    #[test]
    fn test_comment_runs_to_end_of_line() {
        let tokens = tokenize("listen 80; # the comment; { }\ngzip on;");
        assert_eq!(tokens[3].0, "# the comment; { }");
        assert!(!tokens[3].2);
        assert_eq!(tokens[4].0, "gzip");
        assert_eq!(tokens[4].1, 2);
    }

    #[test]
    fn test_hash_inside_token_is_not_a_comment() {
        assert_eq!(values("proxy_pass http://host#frag;"), [
            "proxy_pass",
            "http://host#frag",
            ";"
        ]);
    }

    #[test]
    fn test_escaped_hash_starts_no_comment() {
        assert_eq!(
            values(r"log_format \#arg 1;"),
            ["log_format", r"\#arg", "1", ";"]
        );
    }

    #[test]
    fn test_parameter_expansion_stays_one_token() {
        assert_eq!(values("env PATH=${PATH[@]};"), ["env", "PATH=${PATH[@]}", ";"]);
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("events {\n    worker_connections 1024;\n}\n");
        let lines: Vec<usize> = tokens.iter().map(|(_, l, _)| *l).collect();
        assert_eq!(lines, [1, 1, 2, 2, 2, 3]);
    }

    #[test]
    fn test_crlf_is_elided() {
        assert_eq!(
            tokenize("listen 80;\r\ngzip on;"),
            tokenize("listen 80;\ngzip on;")
        );
    }

    #[test]
    fn test_quoted_braces_do_not_count() {
        assert_eq!(
            values(r#"location / { return 200 "}"; }"#),
            ["location", "/", "{", "return", "200", "}", ";", "}"]
        );
    }

    #[test]
    fn test_unexpected_close_brace() {
        let items: Vec<_> = lex("listen 80; }").collect();
        let err = items.last().unwrap().as_ref().unwrap_err();
        assert_eq!(err.message(), r#"unexpected "}""#);
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn test_missing_close_brace_at_eof() {
        let items: Vec<_> = lex("http {\n    listen 80;\n").collect();
        let err = items.last().unwrap().as_ref().unwrap_err();
        assert_eq!(err.message(), r#"unexpected end of file, expecting "}""#);
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_error_ends_stream() {
        let mut items = lex("} listen 80;");
        assert!(items.next().unwrap().is_err());
        assert!(items.next().is_none());
    }

    #[test]
    fn test_unicode_values() {
        let tokens = tokenize(r#"env "русский текст";"#);
        assert_eq!(tokens[1].0, "русский текст");
        assert!(tokens[1].2);
    }
}
