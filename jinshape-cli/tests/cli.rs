use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::tempdir;

fn jinshape_binary() -> &'static str {
    env!("CARGO_BIN_EXE_jinshape-cli")
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(jinshape_binary())
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run jinshape")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "expected success, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

#[test]
fn prints_the_inferred_structure_as_json() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("page.html"),
        "<h1>{{ user.name }}</h1>{% for tag in tags %}{{ tag }}{% endfor %}",
    )
    .expect("write template");

    let value = stdout_json(&run(tmp.path(), &["page.html"]));
    assert_eq!(value["type"], "dictionary");
    assert_eq!(value["fields"]["user"]["type"], "dictionary");
    assert_eq!(value["fields"]["user"]["fields"]["name"]["type"], "scalar");
    assert_eq!(value["fields"]["user"]["required"], true);
    assert_eq!(value["fields"]["tags"]["type"], "list");
    assert_eq!(value["fields"]["tags"]["linenos"], serde_json::json!([1]));
}

#[test]
fn prints_a_json_schema() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("page.html"),
        "{{ title|default('Home') }} {{ user.name|upper }}",
    )
    .expect("write template");

    let schema = stdout_json(&run(tmp.path(), &["page.html", "--format", "schema"]));
    assert_eq!(schema["$schema"], "http://json-schema.org/draft-04/schema#");
    assert_eq!(schema["required"], serde_json::json!(["user"]));
    assert_eq!(schema["properties"]["title"]["default"], "Home");
    assert_eq!(
        schema["properties"]["user"]["properties"]["name"]["type"],
        "string"
    );
}

#[test]
fn prints_a_debug_dump() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("page.html"), "{{ x }}").expect("write template");

    let output = run(tmp.path(), &["page.html", "--format", "debug"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("    x: Scalar(label=x, required=true"),
        "unexpected dump: {stdout}"
    );
}

#[test]
fn flags_override_the_config_file() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("page.html"), "{{ xs[1] }}").expect("write template");
    fs::write(
        tmp.path().join("jinshape.yaml"),
        "integer_index_policy: tuple\n",
    )
    .expect("write config");

    let value = stdout_json(&run(tmp.path(), &["page.html", "--config", "jinshape.yaml"]));
    assert_eq!(value["fields"]["xs"]["type"], "tuple");

    let value = stdout_json(&run(
        tmp.path(),
        &[
            "page.html",
            "--config",
            "jinshape.yaml",
            "--integer-index",
            "dictionary",
        ],
    ));
    assert_eq!(value["fields"]["xs"]["type"], "dictionary");
}

#[test]
fn reads_json_config_files() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("page.html"), "{% if flag %}on{% endif %}").expect("write template");
    fs::write(
        tmp.path().join("jinshape.json"),
        r#"{"boolean_conditions": true}"#,
    )
    .expect("write config");

    let value = stdout_json(&run(tmp.path(), &["page.html", "--config", "jinshape.json"]));
    assert_eq!(value["fields"]["flag"]["type"], "boolean");
}

#[test]
fn rejects_unknown_config_keys_and_formats() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("page.html"), "{{ x }}").expect("write template");
    fs::write(tmp.path().join("bad.yaml"), "unknown_option: 1\n").expect("write config");
    fs::write(tmp.path().join("bad.toml"), "").expect("write config");

    let output = run(tmp.path(), &["page.html", "--config", "bad.yaml"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("config.parse('bad.yaml') failed:"),
        "unexpected stderr: {stderr}"
    );

    let output = run(tmp.path(), &["page.html", "--config", "bad.toml"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("unsupported config format 'toml'"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn rejects_unknown_index_policies() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("page.html"), "{{ x }}").expect("write template");

    let output = run(tmp.path(), &["page.html", "--integer-index", "set"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("unknown index policy 'set'"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn resolves_includes_from_the_template_directory() {
    let tmp = tempdir().expect("tempdir");
    let partials = tmp.path().join("site").join("parts");
    fs::create_dir_all(&partials).expect("create template dir");
    fs::write(partials.join("nav.html"), "{% for link in links %}{{ link.url }}{% endfor %}")
        .expect("write partial");
    fs::write(tmp.path().join("page.html"), "{% include 'nav.html' %}{{ body }}")
        .expect("write template");

    let value = stdout_json(&run(
        tmp.path(),
        &[
            "page.html",
            "--package-name",
            "site",
            "--template-dir",
            "parts",
        ],
    ));
    assert_eq!(value["fields"]["links"]["item"]["fields"]["url"]["type"], "scalar");
    assert_eq!(value["fields"]["body"]["type"], "scalar");

    let output = run(tmp.path(), &["page.html"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("loader.load('nav.html') failed: template not found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn keep_constants_reports_assignments() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("page.html"),
        "{% set greeting = 'hi' %}{{ greeting }} {{ name }}",
    )
    .expect("write template");

    let value = stdout_json(&run(tmp.path(), &["page.html"]));
    assert!(value["fields"].get("greeting").is_none());

    let value = stdout_json(&run(tmp.path(), &["page.html", "--keep-constants"]));
    assert_eq!(value["fields"]["greeting"]["constant"], true);
    assert_eq!(value["fields"]["greeting"]["value"], "hi");
}

#[test]
fn conflicts_are_shown_against_the_source() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("page.html"), "{{ x }}\n<p>{{ x.y }}</p>\n").expect("write template");

    let output = run(tmp.path(), &["page.html"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("variable \"x\" (used as scalar on lines 1) conflicts with"),
        "unexpected stderr: {stderr}"
    );
    assert!(stderr.contains("--> page.html:2:"), "missing location: {stderr}");
    assert!(stderr.contains("<p>{{ x.y }}</p>"), "missing source line: {stderr}");
    assert!(
        stderr.contains("cli.infer('page.html') failed"),
        "missing summary: {stderr}"
    );
}

#[test]
fn syntax_errors_are_underlined() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("page.html"), "ok\n  {% frobnicate %}\n").expect("write template");

    let output = run(tmp.path(), &["page.html"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("unknown tag 'frobnicate'"),
        "unexpected stderr: {stderr}"
    );
    assert!(stderr.contains("{% frobnicate %}"), "missing source line: {stderr}");
    assert!(stderr.contains('^'), "missing caret: {stderr}");
}

#[test]
fn missing_template_file_is_reported() {
    let tmp = tempdir().expect("tempdir");
    let output = run(tmp.path(), &["absent.html"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("cli.read('absent.html') failed:"),
        "unexpected stderr: {stderr}"
    );
}
