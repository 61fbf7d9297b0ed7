use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn quadlog(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_quadlog"))
        .current_dir(root)
        .env_remove("QUADLOG_DIR")
        .arg("--root")
        .arg(root)
        .arg("--no-sync")
        .args(args)
        .output()
        .expect("run quadlog")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn assert_success(out: &Output) {
    assert!(
        out.status.success(),
        "quadlog failed\nstdout: {}\nstderr: {}",
        stdout(out),
        String::from_utf8_lossy(&out.stderr)
    );
}

const ALICE: &str = "<http://example.org/alice> <http://xmlns.com/foaf/0.1/name> \"Alice\" .\n";
const BOB: &str =
    "<http://example.org/bob> <http://xmlns.com/foaf/0.1/name> \"Bob\" <http://example.org/g> .\n";

#[test]
fn create_list_exists_delete() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    assert_success(&quadlog(root, &["create", "people"]));
    assert_success(&quadlog(root, &["create", "places"]));

    let out = quadlog(root, &["list"]);
    assert_success(&out);
    assert_eq!(stdout(&out).lines().collect::<Vec<_>>(), vec!["people", "places"]);

    let out = quadlog(root, &["exists", "people"]);
    assert_eq!(stdout(&out).trim(), "true");

    // creating twice is an error
    assert!(!quadlog(root, &["create", "people"]).status.success());

    assert_success(&quadlog(root, &["delete", "people"]));
    let out = quadlog(root, &["exists", "people"]);
    assert_eq!(stdout(&out).trim(), "false");
}

#[test]
fn transact_query_and_history() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("alice.nq"), ALICE).unwrap();
    fs::write(root.join("bob.nq"), BOB).unwrap();
    assert_success(&quadlog(root, &["create", "people"]));

    let out = quadlog(root, &["transact", "people", "--insert", "alice.nq", "--label", "first"]);
    assert_success(&out);
    assert!(stdout(&out).contains("Job 1 (Transaction) completed"));
    assert_success(&quadlog(root, &["transact", "people", "--insert", "bob.nq"]));

    let out = quadlog(
        root,
        &["query", "people", "SELECT ?name WHERE { ?s <http://xmlns.com/foaf/0.1/name> ?name }"],
    );
    assert_success(&out);
    let text = stdout(&out);
    assert!(text.contains("\"Alice\""));
    assert!(!text.contains("\"Bob\""));

    let out = quadlog(
        root,
        &[
            "query",
            "people",
            "SELECT ?name WHERE { ?s <http://xmlns.com/foaf/0.1/name> ?name }",
            "--commit",
            "1",
        ],
    );
    assert_success(&out);
    assert!(stdout(&out).contains("\"Alice\""));

    let out = quadlog(root, &["--json", "commits", "people"]);
    assert_success(&out);
    let points: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let ids: Vec<u64> = points
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["commit_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 1, 0]);

    let out = quadlog(root, &["--json", "jobs", "people"]);
    assert_success(&out);
    let jobs: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    // jobs do not outlive the process that ran them
    assert!(jobs.as_array().unwrap().is_empty());
}

#[test]
fn failed_precondition_exits_with_error() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("alice.nq"), ALICE).unwrap();
    fs::write(root.join("bob.nq"), BOB).unwrap();
    assert_success(&quadlog(root, &["create", "people"]));

    let out = quadlog(
        root,
        &["--json", "transact", "people", "--preconditions", "bob.nq", "--insert", "alice.nq"],
    );
    assert!(!out.status.success());
    let info: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(info["JobCompletedWithErrors"], serde_json::Value::Bool(true));
    assert_eq!(info["ExceptionInfo"]["kind"], "PreconditionFailed");

    let out = quadlog(root, &["--json", "info", "people"]);
    let info: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(info["commit_id"], 0);
}

#[test]
fn import_export_snapshot_and_stats() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(
        root.join("people.ttl"),
        "@prefix ex: <http://example.org/> .\nex:alice ex:knows ex:bob .\nex:bob ex:knows ex:carol .\n",
    )
    .unwrap();
    assert_success(&quadlog(root, &["create", "people"]));
    assert_success(&quadlog(
        root,
        &["import", "people", "people.ttl", "--default-graph", "http://example.org/g"],
    ));
    assert_success(&quadlog(root, &["export", "people", "out.nq"]));
    let exported = fs::read_to_string(root.join("out.nq")).unwrap();
    assert_eq!(exported.lines().count(), 2);
    assert!(exported.contains("<http://example.org/g>"));

    assert_success(&quadlog(root, &["snapshot", "people", "copy", "--mode", "rewrite"]));
    let out = quadlog(root, &["--json", "info", "copy"]);
    let info: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(info["quad_count"], 2);
    assert_eq!(info["commit_points"], 1);

    assert!(!quadlog(root, &["snapshot", "people", "bad", "--mode", "sideways"])
        .status
        .success());

    let out = quadlog(root, &["--json", "stats", "people", "--update"]);
    assert_success(&out);
    let stats: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(stats["total_triple_count"], 2);
    assert_eq!(stats["predicate_triple_counts"]["http://example.org/knows"], 2);

    assert_success(&quadlog(root, &["consolidate", "people"]));
    let out = quadlog(root, &["--json", "commits", "people"]);
    let points: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(points.as_array().unwrap().len(), 1);
}

#[test]
fn invalid_arguments_are_rejected() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    assert!(!quadlog(root, &["create", "bad\\name"]).status.success());
    assert!(!quadlog(root, &["commits", "missing"]).status.success());
    assert!(!quadlog(root, &["transact", "missing"]).status.success());
    assert!(quadlog_cli::run_from_args(["quadlog", "no-such-command"]).is_err());
}
