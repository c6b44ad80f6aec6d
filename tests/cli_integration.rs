// End-to-end smoke tests driving the castite binary.
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use serde_json::Value;

fn cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_castite"))
}

const SCHEMA: &str = r#"{
    "types": {
        "demo.Node": {"struct": {"bindings": [
            {"name": "name", "type": "str", "required": true},
            {"name": "children", "type": "vec[demo.Node]"}
        ]}},
        "demo.Color": {"enum": {"variants": ["red", "green"]}}
    }
}"#;

const AOT_SCHEMA: &str = r#"{
    "config": {"mode": "ahead-of-time"},
    "types": {
        "demo.Node": {"struct": {"bindings": [
            {"name": "name", "type": "str", "required": true},
            {"name": "children", "type": "vec[demo.Node]"}
        ]}},
        "demo.Color": {"enum": {"variants": ["red", "green"]}}
    }
}"#;

fn write_schema(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write schema");
    path
}

fn decode(schema: &Path, type_expr: &str, input: &str, artifacts: Option<&Path>) -> std::process::Output {
    let mut command = cmd();
    command
        .arg("decode")
        .arg("--schema")
        .arg(schema)
        .arg("--type")
        .arg(type_expr);
    if let Some(dir) = artifacts {
        command.arg("--artifacts").arg(dir);
    }
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .as_mut()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait")
}

#[test]
fn plan_command_prints_the_strategy() {
    let temp = tempfile::tempdir().expect("tempdir");
    let schema = write_schema(temp.path(), "schema.json", SCHEMA);

    let output = cmd()
        .args(["plan", "--schema"])
        .arg(&schema)
        .arg("demo.Node")
        .output()
        .expect("run plan");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("utf8");
    let plan: Value = serde_json::from_str(&stdout).expect("plan json");
    assert_eq!(plan["strategy"], "strict_object");
}

#[test]
fn decode_command_round_trips_stdin() {
    let temp = tempfile::tempdir().expect("tempdir");
    let schema = write_schema(temp.path(), "schema.json", SCHEMA);

    let doc = r#"{"name":"a","children":[{"name":"b","children":[]}]}"#;
    let output = decode(&schema, "demo.Node", doc, None);
    assert!(output.status.success());

    let decoded: Value =
        serde_json::from_slice(&output.stdout).expect("stdout json");
    let expected: Value = serde_json::from_str(doc).expect("baseline");
    assert_eq!(decoded, expected);
}

#[test]
fn decode_errors_are_json_with_stable_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let schema = write_schema(temp.path(), "schema.json", SCHEMA);

    let output = decode(&schema, "demo.Node", r#"{"children":[]}"#, None);
    assert_eq!(output.status.code(), Some(6));

    let envelope: Value = serde_json::from_slice(&output.stderr).expect("stderr json");
    assert_eq!(envelope["error"]["kind"], "Decode");
    assert!(
        envelope["error"]["message"]
            .as_str()
            .expect("message")
            .contains("name")
    );
}

#[test]
fn export_then_serve_ahead_of_time() {
    let temp = tempfile::tempdir().expect("tempdir");
    let schema = write_schema(temp.path(), "schema.json", SCHEMA);
    let aot_schema = write_schema(temp.path(), "aot.json", AOT_SCHEMA);
    let artifacts = temp.path().join("artifacts");

    let output = cmd()
        .args(["export", "--schema"])
        .arg(&schema)
        .arg("--out")
        .arg(&artifacts)
        .arg("demo.Node")
        .output()
        .expect("run export");
    assert!(output.status.success());
    let summary: Value = serde_json::from_slice(&output.stdout).expect("summary");
    assert!(
        summary["exported"]
            .as_array()
            .expect("exported")
            .iter()
            .any(|k| k == "demo.Node")
    );
    assert!(artifacts.join("demo/Node.json").is_file());

    let doc = r#"{"name":"a","children":[]}"#;
    let served = decode(&aot_schema, "demo.Node", doc, Some(&artifacts));
    assert!(served.status.success(), "stderr: {}", String::from_utf8_lossy(&served.stderr));

    // demo.Color was never exported: an ahead-of-time miss, exit code 4.
    let missed = decode(&aot_schema, "demo.Color", r#""red""#, Some(&artifacts));
    assert_eq!(missed.status.code(), Some(4));
    let envelope: Value = serde_json::from_slice(&missed.stderr).expect("stderr json");
    assert_eq!(envelope["error"]["kind"], "Unresolved");
}
