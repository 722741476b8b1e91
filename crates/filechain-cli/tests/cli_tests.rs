use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const PASSWORD: &str = "Secr3t!923";

fn filechain(data_dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("filechain").unwrap();
    cmd.arg("--data-dir")
        .arg(data_dir)
        .env("FILECHAIN_PASSWORD", PASSWORD)
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn verify_fresh_store() {
    let dir = tempdir().unwrap();
    let output = filechain(dir.path()).arg("verify").output().unwrap();
    assert!(output.status.success());
    let status = stdout_json(&output);
    assert_eq!(status["chain_valid"], true);
    assert_eq!(status["blocks"], 1);
    assert_eq!(status["difficulty"], 2);
    assert!(dir.path().join("ledger.json").exists());
}

#[test]
fn store_list_retrieve_roundtrip() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    let input = dir.path().join("report.txt");
    fs::write(&input, b"hello").unwrap();

    let output = filechain(&data)
        .arg("store")
        .arg(&input)
        .arg("--description")
        .arg("quarterly")
        .output()
        .unwrap();
    assert!(output.status.success());
    let file_id = stdout_json(&output)["file_id"]
        .as_str()
        .unwrap()
        .to_string();

    let listed = stdout_json(&filechain(&data).arg("list").output().unwrap());
    assert_eq!(listed[0]["file_id"], file_id.as_str());
    assert_eq!(listed[0]["description"], "quarterly");

    let out_dir = dir.path().join("out");
    let output = filechain(&data)
        .arg("retrieve")
        .arg(&file_id)
        .arg("--output-dir")
        .arg(&out_dir)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["integrity_ok"], true);
    assert_eq!(fs::read(out_dir.join("report.txt")).unwrap(), b"hello");

    let history = stdout_json(&filechain(&data).arg("history").arg(&file_id).output().unwrap());
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["block_index"], 1);

    filechain(&data).arg("audit").assert().success();
}

#[test]
fn retrieve_unknown_id_fails() {
    let dir = tempdir().unwrap();
    filechain(dir.path())
        .arg("retrieve")
        .arg("does-not-exist")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn delete_keeps_ledger_history() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    let input = dir.path().join("tmp.bin");
    fs::write(&input, [1u8, 2, 3]).unwrap();
    let output = filechain(&data).arg("store").arg(&input).output().unwrap();
    let file_id = stdout_json(&output)["file_id"]
        .as_str()
        .unwrap()
        .to_string();

    filechain(&data)
        .arg("delete")
        .arg(&file_id)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"deleted\": true"));
    filechain(&data).arg("delete").arg(&file_id).assert().code(1);

    let history = stdout_json(&filechain(&data).arg("history").arg(&file_id).output().unwrap());
    assert_eq!(history.as_array().unwrap().len(), 1);
    let status = stdout_json(&filechain(&data).arg("verify").output().unwrap());
    assert_eq!(status["blocks"], 2);
}

#[test]
fn tampered_ledger_is_refused() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    let input = dir.path().join("a.txt");
    fs::write(&input, b"abc").unwrap();
    filechain(&data).arg("store").arg(&input).assert().success();

    let ledger_path = data.join("ledger.json");
    let mut ledger: serde_json::Value =
        serde_json::from_slice(&fs::read(&ledger_path).unwrap()).unwrap();
    ledger["chain"][1]["file_hash"] = serde_json::json!("00".repeat(32));
    fs::write(&ledger_path, serde_json::to_vec_pretty(&ledger).unwrap()).unwrap();

    filechain(&data)
        .arg("verify")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ledger corrupt"));
}
