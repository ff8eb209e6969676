// CLI integration tests for the anytable binary.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_anytable");
    Command::new(exe)
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn path_arg(path: &Path) -> String {
    path.to_str().expect("utf8 path").to_string()
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn parse_json_lines(output: &[u8]) -> Vec<Value> {
    std::str::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(parse_json)
        .collect()
}

fn run_with_stdin(args: &[&str], input: &str) -> Output {
    let mut child = cmd()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait")
}

fn stderr_error(output: &Output) -> Value {
    let text = std::str::from_utf8(&output.stderr).expect("utf8");
    let line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json error line");
    parse_json(line)["error"].clone()
}

#[test]
fn spec_prints_canonical_form() {
    let output = cmd()
        .args([
            "spec",
            r#"{:type fixed-width :location "breeds.txt" :headers ["breed" "category" "size"] :widths [12 5 6]}"#,
        ])
        .output()
        .expect("spec");
    assert!(output.status.success());
    let value = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(value["kind"], "fixed-width");
    assert_eq!(value["location"], "breeds.txt");
    assert_eq!(value["headers"], json!(["breed", "category", "size"]));
    assert_eq!(value["widths"], json!([12, 5, 6]));
    assert!(value.get("type").is_none());
}

#[test]
fn headers_are_inferred_or_declared() {
    let output = cmd()
        .args(["headers", &path_arg(&fixture("breeds.tab"))])
        .output()
        .expect("headers");
    assert!(output.status.success());
    let value = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(value, json!(["breed", "category", "size"]));

    let spec = format!(
        r#"{{"kind":"fixed-width","location":"{}","headers":["a","b","c"],"widths":[12,5,6]}}"#,
        path_arg(&fixture("breeds.txt"))
    );
    let output = cmd().args(["headers", &spec]).output().expect("headers");
    assert!(output.status.success());
    let value = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(value, json!(["a", "b", "c"]));
}

#[test]
fn cat_streams_rows_and_records() {
    let location = path_arg(&fixture("breeds.tab"));
    let output = cmd().args(["cat", &location]).output().expect("cat");
    assert!(output.status.success());
    let rows = parse_json_lines(&output.stdout);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], json!(["Beagle", "Hound", "Medium"]));
    assert_eq!(rows[2], json!(["Chihuahua", "", "Small"]));

    let output = cmd()
        .args(["cat", &location, "--records", "--limit", "2"])
        .output()
        .expect("cat records");
    assert!(output.status.success());
    let records = parse_json_lines(&output.stdout);
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["breed"], "Basset Hound");
    assert_eq!(records[1]["size"], "Large");
}

#[test]
fn write_then_cat_round_trips() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("out.txt");
    let spec = format!(
        r#"{{:kind fixed-width :location "{}" :headers ["breed" "category" "size"] :widths [12 5 6]}}"#,
        path_arg(&path)
    );

    let input = "{\"breed\":\"Beagle\",\"category\":\"Hound\",\"size\":\"Medium\"}\n\n{\"breed\":\"Pug\",\"size\":\"Small\"}\n";
    let output = run_with_stdin(&["write", &spec, "--records"], input);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(summary["written"], 2);
    assert_eq!(
        std::fs::read_to_string(&path).expect("read"),
        "Beagle      HoundMedium\nPug              Small \n"
    );

    let output = cmd().args(["cat", &spec]).output().expect("cat");
    assert!(output.status.success());
    let rows = parse_json_lines(&output.stdout);
    assert_eq!(rows, [json!(["Beagle", "Hound", "Medium"]), json!(["Pug", "", "Small"])]);
}

#[test]
fn write_rejects_bad_input_with_row_context() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("bad.tab");
    let spec = format!(
        r#"{{:kind delimited :location "{}" :headers ["a" "b"]}}"#,
        path_arg(&path)
    );
    let output = run_with_stdin(&["write", &spec], "[\"1\",\"2\"]\n[\"3\"]\n");
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(10));
    let err = stderr_error(&output);
    assert_eq!(err["kind"], "SchemaMismatch");
    assert_eq!(err["row"], 1);
}

#[test]
fn copy_converts_between_formats() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("breeds.txt");
    let to = format!(
        r#"{{:kind fixed-width :location "{}" :widths [12 5 6]}}"#,
        path_arg(&path)
    );
    let output = cmd()
        .args(["copy", &path_arg(&fixture("breeds.tab")), &to, "--records"])
        .output()
        .expect("copy");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(summary["copied"], 3);
    assert_eq!(
        std::fs::read_to_string(&path).expect("read"),
        std::fs::read_to_string(fixture("breeds.txt")).expect("fixture")
    );
}

#[test]
fn delete_removes_the_table() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("gone.tab");
    std::fs::copy(fixture("breeds.tab"), &path).expect("copy fixture");
    let output = cmd().args(["delete", &path_arg(&path)]).output().expect("delete");
    assert!(output.status.success());
    assert!(!path.exists());

    let output = cmd().args(["delete", &path_arg(&path)]).output().expect("delete again");
    assert_eq!(output.status.code(), Some(3));
    let err = stderr_error(&output);
    assert_eq!(err["kind"], "NotFound");
    assert!(err["hint"].as_str().is_some());
}

#[test]
fn formats_lists_builtins() {
    let output = cmd().args(["formats"]).output().expect("formats");
    assert!(output.status.success());
    let value = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(value["formats"], json!(["delimited", "fixed-width"]));
}

#[test]
fn errors_map_to_exit_codes() {
    let output = cmd().args(["spec", "{:kind delimited"]).output().expect("spec");
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(stderr_error(&output)["kind"], "InvalidSpec");

    let output = cmd()
        .args(["cat", "{:kind parquet :location \"x.parquet\"}"])
        .output()
        .expect("cat");
    assert_eq!(output.status.code(), Some(7));
    assert_eq!(stderr_error(&output)["kind"], "UnknownFormat");

    let output = cmd()
        .args(["cat", "{:kind delimited :location \"/no/such/dir/t.tab\"}", "--records"])
        .output()
        .expect("cat");
    assert_eq!(output.status.code(), Some(3));

    let output = cmd().args(["cat"]).output().expect("usage");
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stderr_error(&output)["kind"], "Usage");
}

#[test]
fn completion_prints_a_script() {
    let output = cmd().args(["completion", "bash"]).output().expect("completion");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("anytable"));
}
