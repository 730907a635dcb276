#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn crm(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("crm").unwrap();
    cmd.current_dir(dir.path())
        .env("CRM_CONFIG", dir.path().join("crm.yaml"))
        .env_remove("RUST_LOG");
    cmd
}

const GRAPH: &str = r#"
transition_id: 12
source: pe-input-40
synapses:
  - id: 0
    actions:
      - id: 1
        type: rsc_op
        task: stop
        key: db_stop_0
        target: n1
        target_uuid: "1"
  - id: 1
    actions:
      - id: 2
        type: pseudo_event
        task: stopped
    inputs: [1]
  - id: 2
    actions:
      - id: 3
        type: rsc_op
        task: start
        key: db_start_0
        target: n2
        target_uuid: "2"
        params:
          CRM_meta_timeout: "20000"
    inputs: [2]
  - id: 3
    actions:
      - id: 4
        type: rsc_op
        task: monitor
        key: web_monitor_10000
        target: n3
        target_uuid: "3"
"#;

const SNAPSHOT: &str = r#"
name: cib
attributes:
  epoch: "7"
  admin_epoch: "0"
  num_updates: "3"
children:
  - name: configuration
    children:
      - name: resources
        children:
          - name: primitive
            attributes:
              id: db
              class: ocf
"#;

fn write(dir: &TempDir, name: &str, content: &str) {
    std::fs::write(dir.path().join(name), content).unwrap();
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// crm show
// ---------------------------------------------------------------------------

#[test]
fn show_lists_actions() {
    let dir = TempDir::new().unwrap();
    write(&dir, "graph.yaml", GRAPH);

    crm(&dir)
        .args(["show", "graph.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Transition 12 (pe-input-40)"))
        .stdout(predicate::str::contains("db_stop_0"))
        .stdout(predicate::str::contains("web_monitor_10000"))
        .stdout(predicate::str::contains("pseudo_event"));
}

#[test]
fn show_json_includes_inputs_and_timeouts() {
    let dir = TempDir::new().unwrap();
    write(&dir, "graph.yaml", GRAPH);

    let output = crm(&dir)
        .args(["show", "graph.yaml", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["transition"], 12);
    assert_eq!(json["synapses"].as_array().unwrap().len(), 4);
    assert_eq!(json["synapses"][2]["inputs"][0], 2);
    assert_eq!(json["synapses"][2]["actions"][0]["timeout_ms"], 20000);
}

#[test]
fn show_rejects_dangling_inputs() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "bad.yaml",
        "transition_id: 1\nsynapses:\n  - id: 4\n    actions: [{ id: 1, type: pseudo_event }]\n    inputs: [9]\n",
    );

    crm(&dir)
        .args(["show", "bad.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown input action 9"));
}

#[test]
fn show_missing_graph_fails() {
    let dir = TempDir::new().unwrap();
    crm(&dir)
        .args(["show", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load graph"));
}

// ---------------------------------------------------------------------------
// crm simulate
// ---------------------------------------------------------------------------

#[test]
fn simulate_clean_graph_completes() {
    let dir = TempDir::new().unwrap();
    write(&dir, "graph.yaml", GRAPH);

    crm(&dir)
        .args(["simulate", "graph.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Transition 12: Complete"))
        .stdout(predicate::str::contains("next: Success"));
}

#[test]
fn simulate_injected_failure_blocks_dependants() {
    let dir = TempDir::new().unwrap();
    write(&dir, "graph.yaml", GRAPH);

    let output = crm(&dir)
        .args(["simulate", "graph.yaml", "--fail", "db_stop_0", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["abort_priority"], 1_000_000);
    assert_eq!(json["notification"]["reason"], "Event failed");
    assert_eq!(json["notification"]["event"]["event"], "recompute");
    assert_eq!(json["blocked"], serde_json::json!([1, 2]));
    assert_eq!(json["executed"][0]["outcome"], "failed");
}

#[test]
fn simulate_dispatch_failure_stops() {
    let dir = TempDir::new().unwrap();
    write(&dir, "graph.yaml", GRAPH);

    let output = crm(&dir)
        .args(["simulate", "graph.yaml", "--fail-dispatch", "4", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["result"], "stopped");
}

#[test]
fn simulate_loads_config_file() {
    let dir = TempDir::new().unwrap();
    write(&dir, "graph.json", r#"{"transition_id": 3, "synapses": []}"#);
    crm(&dir)
        .args(["config", "init", "--node", "n1"])
        .assert()
        .success();

    crm(&dir)
        .args(["simulate", "graph.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Transition 3: Complete"));
}

// ---------------------------------------------------------------------------
// crm digest / verify
// ---------------------------------------------------------------------------

#[test]
fn digest_prints_lowercase_hex() {
    let dir = TempDir::new().unwrap();
    write(&dir, "cib.yaml", SNAPSHOT);

    let output = crm(&dir).args(["digest", "cib.yaml"]).output().unwrap();
    assert!(output.status.success());
    let digest = String::from_utf8(output.stdout).unwrap();
    let digest = digest.trim();
    assert_eq!(digest.len(), 64);
    assert!(digest
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
}

#[test]
fn digest_algorithm_follows_feature_set() {
    let dir = TempDir::new().unwrap();
    write(&dir, "cib.yaml", SNAPSHOT);

    let old = crm(&dir)
        .args(["digest", "cib.yaml", "--feature-set", "3.0.4", "--json"])
        .output()
        .unwrap();
    let new = crm(&dir)
        .args(["digest", "cib.yaml", "--feature-set", "3.0.14", "--json"])
        .output()
        .unwrap();
    let old = stdout_json(&old);
    let new = stdout_json(&new);
    assert_eq!(old["algorithm"], "v1");
    assert_eq!(new["algorithm"], "v2");
    assert_ne!(old["digest"], new["digest"]);
}

#[test]
fn signed_snapshot_verifies_until_changed() {
    let dir = TempDir::new().unwrap();
    write(&dir, "cib.yaml", SNAPSHOT);

    crm(&dir)
        .args(["digest", "cib.yaml", "--sign"])
        .assert()
        .success();
    assert!(dir.path().join("cib.yaml.sig").exists());

    crm(&dir)
        .args(["verify", "cib.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Digest matches."));

    write(&dir, "cib.yaml", &SNAPSHOT.replace("\"7\"", "\"8\""));
    crm(&dir)
        .args(["verify", "cib.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("digest mismatch"));
}

#[test]
fn sign_ignores_configured_feature_set() {
    let dir = TempDir::new().unwrap();
    write(&dir, "cib.yaml", SNAPSHOT);
    write(&dir, "crm.yaml", "node: n1\ndigest:\n  feature_set: \"3.0.14\"\n");

    let output = crm(&dir)
        .args(["digest", "cib.yaml", "--sign", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["algorithm"], "v1");

    crm(&dir)
        .args(["verify", "cib.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Digest matches."));
}

#[test]
fn sign_rejects_other_algorithms() {
    let dir = TempDir::new().unwrap();
    write(&dir, "cib.yaml", SNAPSHOT);

    let combos: [&[&str]; 5] = [
        &["--feature-set", "3.0.14"],
        &["--feature-set", "3.0.4"],
        &["--sort"],
        &["--filter"],
        &["--algorithm", "v2"],
    ];
    for flags in combos {
        crm(&dir)
            .args(["digest", "cib.yaml", "--sign"])
            .args(flags)
            .assert()
            .failure()
            .stderr(predicate::str::contains("--sign writes the on-disk digest"));
        assert!(!dir.path().join("cib.yaml.sig").exists(), "{flags:?}");
    }

    crm(&dir)
        .args(["digest", "cib.yaml", "--sign", "--algorithm", "v1"])
        .assert()
        .success();
    crm(&dir).args(["verify", "cib.yaml"]).assert().success();
}

#[test]
fn verify_compares_digest_verbatim() {
    let dir = TempDir::new().unwrap();
    write(&dir, "cib.yaml", SNAPSHOT);

    let output = crm(&dir).args(["digest", "cib.yaml"]).output().unwrap();
    let digest = String::from_utf8(output.stdout).unwrap();

    crm(&dir)
        .args(["verify", "cib.yaml", "--digest", &digest.trim().to_ascii_uppercase()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("digest mismatch"));
}

#[test]
fn verify_with_explicit_digest() {
    let dir = TempDir::new().unwrap();
    write(&dir, "cib.yaml", SNAPSHOT);

    let output = crm(&dir).args(["digest", "cib.yaml"]).output().unwrap();
    let digest = String::from_utf8(output.stdout).unwrap();

    let output = crm(&dir)
        .args(["verify", "cib.yaml", "--digest", digest.trim(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["valid"], true);
}

#[test]
fn verify_without_signature_fails() {
    let dir = TempDir::new().unwrap();
    write(&dir, "cib.yaml", SNAPSHOT);

    crm(&dir)
        .args(["verify", "cib.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cib.yaml.sig"));
}

// ---------------------------------------------------------------------------
// crm config
// ---------------------------------------------------------------------------

#[test]
fn config_init_check_show() {
    let dir = TempDir::new().unwrap();

    crm(&dir)
        .args(["config", "init", "--node", "node1"])
        .assert()
        .success();
    assert!(dir.path().join("crm.yaml").exists());

    crm(&dir)
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));

    let output = crm(&dir)
        .args(["config", "show", "--json"])
        .output()
        .unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["node"], "node1");
    assert_eq!(json["throttle"]["default_job_limit"], 4);
}

#[test]
fn config_init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    crm(&dir)
        .args(["config", "init", "--node", "n1"])
        .assert()
        .success();

    crm(&dir)
        .args(["config", "init", "--node", "n2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    crm(&dir)
        .args(["config", "init", "--node", "n2", "--force"])
        .assert()
        .success();
}

#[test]
fn config_check_reports_errors() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "crm.yaml",
        "node: n1\nthrottle:\n  default_job_limit: 0\n",
    );

    crm(&dir)
        .args(["config", "check"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_check_without_file_fails() {
    let dir = TempDir::new().unwrap();
    crm(&dir)
        .args(["config", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}
