use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

fn vmctl() -> assert_cmd::Command {
    cargo_bin_cmd!("vmctl").into()
}

const CONFIG: &str = r#"
defaults:
  user:
    name: ops
    identity_file: ~/.ssh/id_ed25519
nodes:
  pve1:
    host: 10.0.0.11
    vms:
      web: 101
    lxcs:
      dns: 201
  pve2:
    host: 10.0.0.12
    vms:
      build: 101
"#;

fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let config_path = dir.path().join("vmctl.yaml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    write!(f, "{contents}").unwrap();
    config_path
}

#[test]
fn help_works() {
    vmctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Proxmox"));
}

#[test]
fn missing_config_exits_with_config_error() {
    vmctl()
        .args(["--config", "/nonexistent/vmctl.yaml", "vm", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no config file found"));
}

#[test]
fn inventory_lists_configured_guests() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, CONFIG);

    vmctl()
        .args(["--config", config_path.to_str().unwrap(), "vm", "list"])
        .assert()
        .success()
        .stdout(
            "NAME\tVMID\tNODE\tTYPE\nbuild\t101\tpve2\tVM\ndns\t201\tpve1\tLXC\nweb\t101\tpve1\tVM\n",
        );
}

#[test]
fn duplicate_guest_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        r#"
defaults:
  user:
    name: ops
    identity_file: ~/.ssh/id_ed25519
nodes:
  pve1:
    host: 10.0.0.11
    vms:
      web: 101
  pve2:
    host: 10.0.0.12
    lxcs:
      web: 300
"#,
    );

    vmctl()
        .args(["--config", config_path.to_str().unwrap(), "vm", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("duplicated"));
}

#[test]
fn unknown_guest_exits_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, CONFIG);

    vmctl()
        .args(["--config", config_path.to_str().unwrap(), "start", "nope"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown guest"));
}

#[test]
fn colliding_id_is_ambiguous() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, CONFIG);

    vmctl()
        .args(["--config", config_path.to_str().unwrap(), "status", "101"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not unique"));
}

#[test]
fn node_action_without_yes_needs_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, CONFIG);

    vmctl()
        .args(["--config", config_path.to_str().unwrap(), "node", "reboot", "pve1"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("requires confirmation"));
}

#[test]
fn node_action_on_unknown_node() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, CONFIG);

    vmctl()
        .args(["--config", config_path.to_str().unwrap(), "node", "shutdown", "pve9", "--yes"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown node"));
}

#[test]
fn list_with_unknown_node_filter() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, CONFIG);

    vmctl()
        .args(["--config", config_path.to_str().unwrap(), "list", "--node", "pve9"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown node"));
}
