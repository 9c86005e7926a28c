//! Round-trip stability tests: building a parsed config and parsing
//! the result must converge after one iteration.
//!
//! Trees are compared structurally, with argument values normalised
//! through `enquote` so that equivalent quoting styles compare equal.

use nginx_conf::build::enquote;
use nginx_conf::{build, parse, BuildOptions, Config, Directive, ParseOptions, Payload};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_test_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn equal_directives(d1: &Directive, d2: &Directive) -> bool {
    if d1.name != d2.name
        || d1.args.len() != d2.args.len()
        || d1.includes.is_some() != d2.includes.is_some()
        || d1.block.is_some() != d2.block.is_some()
        || d1.comment != d2.comment
        || d1.includes != d2.includes
    {
        return false;
    }
    if !d1
        .args
        .iter()
        .zip(&d2.args)
        .all(|(a1, a2)| enquote(a1) == enquote(a2))
    {
        return false;
    }
    match (&d1.block, &d2.block) {
        (Some(b1), Some(b2)) => equal_blocks(b1, b2),
        _ => true,
    }
}

fn equal_blocks(b1: &[Directive], b2: &[Directive]) -> bool {
    b1.len() == b2.len() && b1.iter().zip(b2).all(|(d1, d2)| equal_directives(d1, d2))
}

fn equal_configs(c1: &Config, c2: &Config) -> bool {
    c1.status == c2.status
        && c1.errors.len() == c2.errors.len()
        && c1
            .errors
            .iter()
            .zip(&c2.errors)
            .all(|(e1, e2)| e1.line == e2.line)
        && equal_blocks(&c1.parsed, &c2.parsed)
}

fn assert_payloads_equal(p1: &Payload, p2: &Payload, name: &str) {
    let equal = p1.status == p2.status
        && p1.errors.len() == p2.errors.len()
        && p1.configs.len() == p2.configs.len()
        && p1
            .configs
            .iter()
            .zip(&p2.configs)
            .all(|(c1, c2)| equal_configs(c1, c2));
    assert!(
        equal,
        "{}: payloads differ\nfirst: {}\nsecond: {}",
        name,
        serde_json::to_string(p1).unwrap(),
        serde_json::to_string(p2).unwrap(),
    );
}

fn build_to_file(config: &Config, path: &Path) {
    let mut buf = Vec::new();
    build(&mut buf, config, &BuildOptions::default()).unwrap();
    fs::write(path, &buf).unwrap();
}

/// Parse, rebuild, reparse, twice over. The first and second rebuilt trees
/// must match, and the original must match the first rebuild.
fn check_roundtrip(name: &str, content: &str, options: &ParseOptions) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let root = create_test_file(dir, "nginx.conf", content);

    let original = parse(&root, options).unwrap();
    assert_eq!(
        original.status, "ok",
        "{}: fixture should parse cleanly: {:?}",
        name, original.errors
    );

    let build1 = dir.join("build1.conf");
    build_to_file(&original.configs[0], &build1);
    let first = parse(&build1, options).unwrap();
    assert_payloads_equal(&original, &first, name);

    let build2 = dir.join("build2.conf");
    build_to_file(&first.configs[0], &build2);
    let second = parse(&build2, options).unwrap();
    assert_payloads_equal(&first, &second, name);
}

#[test]
fn test_roundtrip_simple() {
    check_roundtrip(
        "simple",
        "events {\n    worker_connections 1024;\n}\n\nhttp {\n    server {\n        listen 127.0.0.1:8080;\n        server_name default_server;\n        location / {\n            return 200 \"foo bar baz\";\n        }\n    }\n}\n",
        &ParseOptions::default(),
    );
}

#[test]
fn test_roundtrip_messy() {
    let content = r#"user nobody;
events {"worker_connections" 2048;}

http {#forteen
    # this is a comment
    access_log off;default_type "text/plain"; error_log off;
    server {
        listen 8083;
        return 200 "Ser\" ' ' ver\\ \ $server_addr:\$server_port\n\nTime: $time_local\n\n";
    }
    server {listen 8080;
        root /usr/share/nginx/html;
        location ~ "/hello/world;" {return 301 /status.html;}
        location /foo{}location /bar{}
        location /\{\;\}\ ab {}# hello
        if ($request_method = POST   ) {}
        location /status.html {
            try_files /abc/${uri} /abc/${uri}.html =404;
        }
        location "/sta;\n                    tus" {return 302 /status.html;}
    }
}
"#;
    check_roundtrip("messy", content, &ParseOptions::default());
}

#[test]
fn test_roundtrip_with_comments() {
    let options = ParseOptions {
        parse_comments: true,
        ..ParseOptions::default()
    };
    check_roundtrip(
        "with-comments",
        "events {\n    worker_connections 1024;\n}\n#comment\nhttp {\n    server {\n        listen 127.0.0.1:8080; #listen\n        server_name default_server;\n        location / { ## this is brace\n            # location /\n            return 200 \"foo bar baz\";\n        }\n    }\n}\n",
        &options,
    );
}

#[test]
fn test_roundtrip_empty_value_map() {
    check_roundtrip(
        "empty-value-map",
        "http {\n    map $http_upgrade $connection_upgrade {\n        default upgrade;\n        '' close;\n    }\n}\n",
        &ParseOptions::default(),
    );
}

#[test]
fn test_roundtrip_russian_text() {
    check_roundtrip(
        "russian-text",
        "env \"русский текст\";\nuser nobody;\n",
        &ParseOptions::default(),
    );
}

#[test]
fn test_roundtrip_quoted_right_brace() {
    check_roundtrip(
        "quoted-right-brace",
        "events {}\nhttp {\n    server {\n        location / {\n            return 200 \"}\";\n        }\n    }\n}\n",
        &ParseOptions::default(),
    );
}

#[test]
fn test_roundtrip_directive_with_space() {
    check_roundtrip(
        "directive-with-space",
        "events {}\nhttp {\n    map $http_user_agent $mobile {\n        default 0;\n        \"~Opera Mini\" 1;\n    }\n}\n",
        &ParseOptions::default(),
    );
}

#[test]
fn test_build_canonical_output() {
    let tmp = TempDir::new().unwrap();
    let root = create_test_file(
        tmp.path(),
        "nginx.conf",
        "events { worker_connections 1024; }\nhttp { server { listen 127.0.0.1:8080; server_name default_server; location / { return 200 \"foo bar baz\"; } } }\n",
    );

    let payload = parse(&root, &ParseOptions::default()).unwrap();
    assert_eq!(payload.status, "ok");

    let mut buf = Vec::new();
    build(&mut buf, &payload.configs[0], &BuildOptions::default()).unwrap();

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
    assert_eq!(String::from_utf8(buf).unwrap(), expected);
}

#[test]
fn test_roundtrip_unicode_preserved() {
    let tmp = TempDir::new().unwrap();
    let root = create_test_file(tmp.path(), "nginx.conf", "env \"русский текст\";\n");

    let payload = parse(&root, &ParseOptions::default()).unwrap();
    let mut buf = Vec::new();
    build(&mut buf, &payload.configs[0], &BuildOptions::default()).unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "env \"русский текст\";"
    );
}

#[test]
fn test_build_files_writes_payload_layout() {
    // parse a two-file tree, then mirror it into a fresh directory
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let root = create_test_file(dir, "nginx.conf", "http {\n    include conf.d/server.conf;\n}\n");
    create_test_file(dir, "conf.d/server.conf", "server {\n    listen 80;\n}\n");

    let payload = parse(&root, &ParseOptions::default()).unwrap();
    assert_eq!(payload.status, "ok");

    // make every config path relative so the copy lands under out/
    let mut relative = payload.clone();
    for config in &mut relative.configs {
        let path = PathBuf::from(&config.file);
        let stripped = path.strip_prefix(dir).unwrap();
        config.file = stripped.display().to_string();
    }

    let out = dir.join("out");
    nginx_conf::build_files(&relative, &out, &BuildOptions::default()).unwrap();

    assert_eq!(
        fs::read_to_string(out.join("nginx.conf")).unwrap(),
        "http {\n    include conf.d/server.conf;\n}\n"
    );
    assert_eq!(
        fs::read_to_string(out.join("conf.d/server.conf")).unwrap(),
        "server {\n    listen 80;\n}\n"
    );
}
