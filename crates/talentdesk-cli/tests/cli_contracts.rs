#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use serde_json::{json, Value};
use ulid::Ulid;

fn td_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_td") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/td");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "talentdesk-cli", "--bin", "td"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build td binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn td_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(td_binary_path());
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run td command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn assert_schema(schema: &Value, value: &Value) {
    let compiled = match JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(err) => panic!("failed to compile contract schema: {err}"),
    };
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!("contract schema validation failed:\n{}", errors.join("\n"));
    }
}

fn temp_db(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("talentdesk-contract-{label}-{}.sqlite3", Ulid::new()))
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(td_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in [
        "resources",
        "schema",
        "seed",
        "list",
        "stats",
        "show",
        "create",
        "update",
        "delete",
    ] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn seed_report_contract_and_skip_semantics() {
    let db_path = temp_db("seed");

    let first = td_output(&db_path, &["seed", "--json"]);
    assert!(
        first.status.success(),
        "seed failed: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    let payload = stdout_json(&first);
    assert_eq!(
        payload["contract_version"],
        Value::String("seed_report.v1".to_string())
    );
    let seeded = match payload["seeded"].as_object() {
        Some(map) => map,
        None => panic!("seeded must be an object, got {}", payload["seeded"]),
    };
    assert_eq!(seeded.len(), 8);
    assert_eq!(payload["seeded"]["leave_requests"], json!(5));

    let second = td_output(&db_path, &["seed", "--json"]);
    assert!(second.status.success());
    let payload = stdout_json(&second);
    let skipped = match payload["skipped"].as_array() {
        Some(items) => items,
        None => panic!("skipped must be an array, got {}", payload["skipped"]),
    };
    assert_eq!(skipped.len(), 8);

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn record_list_payload_matches_contract_schema() {
    let db_path = temp_db("list");
    assert!(td_output(&db_path, &["seed"]).status.success());

    let output = td_output(
        &db_path,
        &[
            "list",
            "--resource",
            "leave_requests",
            "--equal",
            "department=Engineering",
            "--search",
            "john",
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "list failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let payload = stdout_json(&output);

    let contract = json!({
        "type": "object",
        "required": [
            "contract_version", "resource", "total", "matched",
            "page", "page_size", "records"
        ],
        "properties": {
            "contract_version": {"const": "record_list.v1"},
            "resource": {"type": "string"},
            "total": {"type": "integer", "minimum": 0},
            "matched": {"type": "integer", "minimum": 0},
            "page": {"type": "integer", "minimum": 0},
            "page_size": {"type": "integer", "minimum": 0},
            "records": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "created_at", "updated_at", "fields"],
                    "properties": {
                        "id": {"type": "string"},
                        "created_at": {"type": "string"},
                        "updated_at": {"type": "string"},
                        "fields": {"type": "object"}
                    }
                }
            }
        }
    });
    assert_schema(&contract, &payload);

    assert_eq!(payload["total"], json!(5));
    assert_eq!(payload["matched"], json!(1));
    assert_eq!(
        payload["records"][0]["fields"]["employee"],
        json!("John Doe")
    );

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn record_groups_payload_is_versioned() {
    let db_path = temp_db("groups");
    assert!(td_output(&db_path, &["seed"]).status.success());

    let output = td_output(
        &db_path,
        &[
            "list",
            "--resource",
            "leave_requests",
            "--group-by",
            "department",
            "--json",
        ],
    );
    assert!(output.status.success());
    let payload = stdout_json(&output);
    assert_eq!(
        payload["contract_version"],
        Value::String("record_groups.v1".to_string())
    );
    assert_eq!(payload["group_field"], json!("department"));

    let groups = match payload["groups"].as_array() {
        Some(items) => items,
        None => panic!("groups must be an array, got {}", payload["groups"]),
    };
    // Fixture order: Engineering first, and it holds two of the five records.
    assert_eq!(groups[0]["key"], json!("Engineering"));
    assert_eq!(groups[0]["count"], json!(2));

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn record_stats_payload_reports_preset_metrics() {
    let db_path = temp_db("stats");
    assert!(td_output(&db_path, &["seed"]).status.success());

    let output = td_output(&db_path, &["stats", "--resource", "leave_requests", "--json"]);
    assert!(output.status.success());
    let payload = stdout_json(&output);
    assert_eq!(
        payload["contract_version"],
        Value::String("record_stats.v1".to_string())
    );
    assert_eq!(payload["total"], json!(5));
    assert_eq!(payload["considered"], json!(5));

    let metrics = match payload["metrics"].as_array() {
        Some(items) => items,
        None => panic!("metrics must be an array, got {}", payload["metrics"]),
    };
    let metric = |name: &str| -> f64 {
        metrics
            .iter()
            .find(|item| item["name"] == json!(name))
            .and_then(|item| item["value"].as_f64())
            .unwrap_or_else(|| panic!("missing metric {name}"))
    };
    assert!((metric("total") - 5.0).abs() < f64::EPSILON);
    assert!((metric("approved_rate") - 40.0).abs() < f64::EPSILON);
    assert!((metric("days_total") - 21.0).abs() < f64::EPSILON);
    assert!((metric("days_avg") - 4.2).abs() < f64::EPSILON);

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn error_shape_for_unknown_resource_is_stable() {
    let db_path = temp_db("unknown");

    let output = td_output(&db_path, &["list", "--resource", "payroll"]);
    assert!(
        !output.status.success(),
        "expected non-zero exit for unknown resource"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("unknown resource 'payroll'"),
        "expected stable error shape, got stderr={stderr}"
    );

    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn create_rejects_invalid_documents_with_field_issues() {
    let db_path = temp_db("create");
    assert!(td_output(&db_path, &["seed"]).status.success());

    let output = td_output(
        &db_path,
        &[
            "create",
            "--resource",
            "leave_requests",
            "--set",
            "employee=Ana Ruiz",
            "--set",
            "leave_type=sabbatical",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("validation failed"),
        "expected validation error, got stderr={stderr}"
    );
    assert!(stderr.contains("leave_type"), "stderr={stderr}");

    let _ = std::fs::remove_file(&db_path);
}
