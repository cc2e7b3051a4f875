use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;

use datapub_core::{config, HostedGitProviderKind, PublishConfig};
use tempfile::TempDir;

fn datapub_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("datapub"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove(config::ENV_GITHUB_LOGIN)
        .env_remove(config::ENV_GITHUB_TOKEN)
        .env_remove(config::ENV_GITHUB_ORG)
        .env("RUST_LOG", "warn");
    cmd
}

fn with_credentials(cmd: &mut Command) -> &mut Command {
    cmd.env(config::ENV_GITHUB_LOGIN, "bot")
        .env(config::ENV_GITHUB_TOKEN, "token")
        .env(config::ENV_GITHUB_ORG, "OpenNeuroDatasets")
}

/// `datapub init`, switch hosted git to the local provider, and snapshot ds1@v1.
fn prepared_home() -> (TempDir, PublishConfig) {
    let home = TempDir::new().expect("home");
    datapub_cmd(home.path()).arg("init").assert().success();

    let mut config = config::load_at(home.path()).expect("load");
    config.hosted_git.provider = HostedGitProviderKind::Local;
    config::save_at(home.path(), &config).expect("save");

    let dataset = config.store_root.join("ds1");
    fs::create_dir_all(dataset.join("sub-01")).expect("dataset dir");
    fs::write(dataset.join("dataset_description.json"), r#"{"Name":"ds1"}"#).expect("write");
    fs::write(dataset.join("sub-01/scan.nii"), [1u8, 2, 3]).expect("write");
    datapub_cmd(home.path())
        .args(["snapshot", "ds1", "v1"])
        .assert()
        .success()
        .stdout(contains("Snapshot v1 of 'ds1' (2 files)"));

    (home, config)
}

#[test]
fn init_writes_config_and_buckets_once() {
    let home = TempDir::new().expect("home");
    datapub_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("config.yaml"));

    let root = home.path().join(".datapub");
    assert!(root.join("config.yaml").is_file());
    assert!(root.join("buckets/datapub-private").is_dir());
    assert!(root.join("buckets/datapub-public").is_dir());

    datapub_cmd(home.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(contains("--force"));
    datapub_cmd(home.path()).args(["init", "--force"]).assert().success();
}

#[test]
fn private_publish_exports_to_private_bucket() {
    let (home, config) = prepared_home();

    datapub_cmd(home.path())
        .args(["publish", "ds1", "v1"])
        .assert()
        .success()
        .stdout(contains("s3-PRIVATE").and(contains("github").not()));

    let bucket = config.object_storage.root.join("datapub-private/ds1");
    assert_eq!(fs::read(bucket.join("sub-01/scan.nii")).expect("exported"), vec![1u8, 2, 3]);
}

#[test]
fn public_publish_reaches_both_targets_and_registers_siblings() {
    let (home, config) = prepared_home();

    with_credentials(&mut datapub_cmd(home.path()))
        .args(["publish", "ds1", "v1", "--realm", "public"])
        .assert()
        .success()
        .stdout(contains("s3-PUBLIC").and(contains("github")));

    assert!(config
        .hosted_git
        .local_root
        .join("OpenNeuroDatasets/ds1.git/snapshots/v1.json")
        .is_file());

    let output = datapub_cmd(home.path())
        .args(["siblings", "ds1", "--json"])
        .output()
        .expect("siblings");
    assert!(output.status.success());
    let siblings: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let names: Vec<_> = siblings
        .as_array()
        .expect("array")
        .iter()
        .map(|s| s["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["s3-PUBLIC", "github"]);

    // Re-running reuses the registered siblings.
    with_credentials(&mut datapub_cmd(home.path()))
        .args(["publish", "ds1", "v1", "--realm", "PUBLIC"])
        .assert()
        .success()
        .stdout(contains("0 written"));
}

#[test]
fn public_publish_without_credentials_is_a_configuration_error() {
    let (home, _config) = prepared_home();

    datapub_cmd(home.path())
        .args(["publish", "ds1", "v1", "--realm", "PUBLIC"])
        .assert()
        .failure()
        .stderr(contains(config::ENV_GITHUB_LOGIN));
}

#[test]
fn failed_target_does_not_stop_the_next_but_fails_the_command() {
    let (home, config) = prepared_home();
    fs::remove_dir_all(config.object_storage.root.join("datapub-public")).expect("drop bucket");

    with_credentials(&mut datapub_cmd(home.path()))
        .args(["publish", "ds1", "v1", "--realm", "PUBLIC"])
        .assert()
        .failure()
        .stdout(contains("✗").and(contains("✓")))
        .stderr(contains("s3-PUBLIC"));
}

#[test]
fn invalid_realm_is_rejected() {
    let (home, _config) = prepared_home();
    datapub_cmd(home.path())
        .args(["publish", "ds1", "v1", "--realm", "INTERNAL"])
        .assert()
        .failure()
        .stderr(contains("invalid realm 'INTERNAL'"));
}

#[test]
fn unsafe_dataset_ids_and_tags_are_rejected() {
    let (home, config) = prepared_home();
    datapub_cmd(home.path())
        .args(["publish", "../x", "v1"])
        .assert()
        .failure()
        .stderr(contains("invalid dataset id '../x'"));
    datapub_cmd(home.path())
        .args(["snapshot", "ds1", "release/1.0"])
        .assert()
        .failure()
        .stderr(contains("invalid snapshot tag 'release/1.0'"));
    assert!(!config.store_root.join("ds1/.datapub/snapshots/release").exists());
}

#[test]
fn siblings_table_is_empty_before_publishing() {
    let (home, _config) = prepared_home();
    datapub_cmd(home.path())
        .args(["siblings", "ds1"])
        .assert()
        .success()
        .stdout(contains("No siblings registered"));
}

#[test]
fn daemon_commands_without_daemon() {
    let home = TempDir::new().expect("home");
    datapub_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
    datapub_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
    datapub_cmd(home.path())
        .args(["publish", "ds1", "v1", "--queue"])
        .assert()
        .failure()
        .stderr(contains("not running"));
}
