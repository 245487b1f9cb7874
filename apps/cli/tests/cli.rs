//! End-to-end tests of the `strata` binary.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

fn strata(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("strata").unwrap();
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("STRATA_LOG")
        .env_remove("STRATA_CONFIG")
        .env_remove("STRATA_STRATEGY")
        .env_remove("STRATA_MAX_CONCURRENCY");
    cmd
}

fn demo_graph(dir: &Path) -> Value {
    let output = strata(dir).arg("demo").assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

fn write_graph(dir: &Path, name: &str, graph: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(graph).unwrap()).unwrap();
    path
}

fn stdout_json(cmd: &mut Command, code: i32) -> Value {
    let output = cmd.assert().code(code).get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

// ---------------------------------------------------------------------------
// validate / plan
// ---------------------------------------------------------------------------

#[test]
fn demo_graph_is_valid() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(dir.path(), "demo.json", &demo_graph(dir.path()));

    strata(dir.path())
        .arg("validate")
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("demo-diamond: valid (4 nodes, 4 connections)"));
}

#[test]
fn cyclic_graph_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut graph = demo_graph(dir.path());
    let left = graph["nodes"][1]["id"].clone();
    let sink = graph["nodes"][3]["id"].clone();
    graph["connections"].as_array_mut().unwrap().push(json!({
        "from_node": sink,
        "from_port": "out",
        "to_node": left,
        "to_port": "in",
    }));
    let path = write_graph(dir.path(), "cycle.json", &graph);

    strata(dir.path())
        .arg("validate")
        .arg(&path)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("cycle detected"));

    strata(dir.path())
        .arg("plan")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot plan workflow"));
}

#[test]
fn plugin_contracts_are_checked_without_graph_specs() {
    let dir = TempDir::new().unwrap();
    let mut graph = demo_graph(dir.path());
    graph["nodes"][1]["parameter_specs"] = json!([]);
    graph["nodes"][1]["parameters"]["ms"] = json!("slow");
    let path = write_graph(dir.path(), "contract.json", &graph);

    strata(dir.path())
        .arg("validate")
        .arg(&path)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("invalid parameter `ms`"));

    strata(dir.path())
        .arg("run")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("workflow rejected"));
}

#[test]
fn plan_prints_stages() {
    let dir = TempDir::new().unwrap();
    let graph = demo_graph(dir.path());
    let path = write_graph(dir.path(), "demo.json", &graph);

    let plan = stdout_json(strata(dir.path()).arg("plan").arg(&path), 0);
    let stages = plan["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 3);
    assert_eq!(stages[0], json!([graph["nodes"][0]["id"]]));
    assert_eq!(stages[1].as_array().unwrap().len(), 2);
    assert_eq!(plan["entry_nodes"], json!([graph["nodes"][0]["id"]]));
}

#[test]
fn missing_graph_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    strata(dir.path())
        .args(["validate", "nope.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to read"));
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[test]
fn demo_run_completes() {
    let dir = TempDir::new().unwrap();
    let graph = demo_graph(dir.path());
    let path = write_graph(dir.path(), "demo.json", &graph);

    let report = stdout_json(strata(dir.path()).arg("run").arg(&path), 0);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["strategy"], "fifo");

    let sink = &graph["nodes"][3]["id"];
    let merged = report["packets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| &p["lineage"]["producer"] == sink)
        .unwrap();
    let hello = json!({"greeting": "hello"});
    assert_eq!(merged["payload"]["value"], json!([hello, hello]));
}

#[test]
fn events_stream_to_stderr() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(dir.path(), "demo.json", &demo_graph(dir.path()));

    let assert = strata(dir.path()).args(["run", "--events"]).arg(&path).assert().success();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    let events: Vec<Value> = stderr
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    assert_eq!(events.first().unwrap()["event"], "run_started");
    assert_eq!(events.last().unwrap()["event"], "run_finished");
}

#[test]
fn failing_node_exits_with_failure_code() {
    let dir = TempDir::new().unwrap();
    let mut graph = demo_graph(dir.path());
    graph["nodes"][2]["type_tag"] = json!("fail");
    let path = write_graph(dir.path(), "fail.json", &graph);

    let report = stdout_json(strata(dir.path()).arg("run").arg(&path), 2);
    assert_ne!(report["status"], "completed");
    assert!(!report["snapshot"]["errors"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Configuration layering
// ---------------------------------------------------------------------------

#[test]
fn config_file_then_env_then_flags() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(dir.path(), "demo.json", &demo_graph(dir.path()));
    std::fs::write(
        dir.path().join("strata.toml"),
        "strategy = \"priority\"\nmax_concurrency = 1\n",
    )
    .unwrap();

    let report = stdout_json(strata(dir.path()).arg("run").arg(&path), 0);
    assert_eq!(report["strategy"], "priority");
    assert_eq!(report["peak_running"], 1);

    let report = stdout_json(
        strata(dir.path())
            .env("STRATA_STRATEGY", "round_robin")
            .arg("run")
            .arg(&path),
        0,
    );
    assert_eq!(report["strategy"], "round_robin");

    let report = stdout_json(
        strata(dir.path())
            .env("STRATA_STRATEGY", "round_robin")
            .args(["run", "--strategy", "deadline-aware", "--concurrency", "2"])
            .arg(&path),
        0,
    );
    assert_eq!(report["strategy"], "deadline_aware");
    assert_eq!(report["peak_running"], 2);
}

#[test]
fn explicit_config_must_exist() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(dir.path(), "demo.json", &demo_graph(dir.path()));

    strata(dir.path())
        .args(["--config", "missing.toml", "run"])
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("config file missing.toml not found"));
}

#[test]
fn invalid_config_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(dir.path(), "demo.json", &demo_graph(dir.path()));

    strata(dir.path())
        .args(["run", "--concurrency", "0"])
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid run config"));
}

#[test]
fn unknown_strategy_flag_is_rejected() {
    let dir = TempDir::new().unwrap();
    strata(dir.path())
        .args(["run", "--strategy", "random", "graph.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown strategy `random`"));
}

#[test]
fn plugins_are_listed() {
    let dir = TempDir::new().unwrap();
    strata(dir.path())
        .arg("plugins")
        .assert()
        .success()
        .stdout(predicate::str::contains("constant"))
        .stdout(predicate::str::contains("merge"))
        .stdout(predicate::str::contains("fail"));
}
