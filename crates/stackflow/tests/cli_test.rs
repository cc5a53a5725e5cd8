#![allow(deprecated)] // cargo_bin

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("One template, many stacks"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("outputs"));
}

#[test]
fn test_cli_version() {
    let project = TestProject::empty();
    project
        .stack()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stackflow"));
}

#[test]
fn test_up_help() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.args(["up", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[STACK]"))
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--parallel"));
}

#[test]
fn test_missing_project_file() {
    let project = TestProject::empty();
    project
        .stack()
        .env("XDG_CONFIG_HOME", project.path())
        .args(["plan", "doublee"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Project file not found"));
}

#[test]
fn test_validate_every_stack() {
    let project = TestProject::demo();
    project
        .stack()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("doublee"))
        .stdout(predicate::str::contains("melodie"))
        .stdout(predicate::str::contains("Configuration is valid"));
    assert!(!project.account_file().exists());
}

#[test]
fn test_validate_reports_cycle() {
    let project = TestProject::empty();
    project.write(
        "stack.kdl",
        r#"
project "loopy"
stack "dev" {
    region "ap-south-1"
}
"#,
    );
    project.write(
        "template.kdl",
        r#"
resource "aws:ecs/cluster" "cluster" {
    name "{{ name_prefix }}-cluster"
    depends-on "logs"
}
resource "aws:cloudwatch/logGroup" "logs" {
    name "/ecs/{{ name_prefix }}"
    depends-on "cluster"
}
"#,
    );

    project
        .stack()
        .arg("validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Cyclic dependency"))
        .stderr(predicate::str::contains("1 of 1 stack(s) are invalid"));

    // Up refuses before touching the account
    project
        .stack()
        .args(["up", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cyclic dependency"));
    assert!(!project.account_file().exists());
}

#[test]
fn test_stack_is_required_with_several_stacks() {
    let project = TestProject::demo();
    project
        .stack()
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Available stacks: doublee, melodie"));

    project
        .stack()
        .args(["plan", "staging"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Stack 'staging' not found"));
}

#[test]
fn test_stack_flag_conflicts_with_positional() {
    let project = TestProject::demo();
    project
        .stack()
        .args(["plan", "doublee", "-s", "melodie"])
        .assert()
        .failure();
}

#[test]
fn test_plan_makes_no_changes() {
    let project = TestProject::demo();
    project
        .stack()
        .args(["plan", "doublee"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Planned actions"))
        .stdout(predicate::str::contains("+ vpc"))
        .stdout(predicate::str::contains("0 to delete"));
    assert!(!project.account_file().exists());
    assert!(!project.state_file("shonry27-doublee").exists());
}

#[test]
fn test_up_stops_at_plan_without_yes() {
    let project = TestProject::demo();
    project
        .stack()
        .args(["up", "doublee"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));
    assert!(!project.account_file().exists());
}

#[test]
fn test_up_then_converged() {
    let project = TestProject::demo();
    project
        .stack()
        .args(["up", "doublee", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Converged"))
        .stdout(predicate::str::contains("shonry27-doublee-ecs-cluster"));
    assert!(project.state_file("shonry27-doublee").exists());

    project
        .stack()
        .args(["plan", "doublee"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));

    let output = project
        .stack()
        .args(["outputs", "doublee", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let outputs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outputs["clusterName"], "shonry27-doublee-ecs-cluster");
    assert_eq!(outputs["accountId"], "865742897250");
}

#[test]
fn test_stack_from_environment() {
    let project = TestProject::demo();
    project
        .stack()
        .env("STACKFLOW_STACK", "melodie")
        .args(["up", "--yes", "--parallel", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stack: melodie"))
        .stdout(predicate::str::contains("parallelism 2"));
    assert!(project.state_file("shonry27-melodie").exists());
    assert!(!project.state_file("shonry27-doublee").exists());
}

#[test]
fn test_zero_parallelism_rejected() {
    let project = TestProject::demo();
    project
        .stack()
        .args(["up", "doublee", "--yes", "--parallel", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--parallel must be at least 1"));
}

#[test]
fn test_state_and_stacks_listing() {
    let project = TestProject::demo();
    project
        .stack()
        .arg("stacks")
        .assert()
        .success()
        .stdout(predicate::str::contains("doublee"))
        .stdout(predicate::str::contains("not deployed"));

    project.stack().args(["up", "doublee", "--yes"]).assert().success();

    project
        .stack()
        .args(["state", "doublee"])
        .assert()
        .success()
        .stdout(predicate::str::contains("State key: shonry27-doublee"))
        .stdout(predicate::str::contains("ecsCluster"))
        .stdout(predicate::str::contains("depends on: vpc"));

    project
        .stack()
        .args(["state", "melodie"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No recorded objects"));
}

#[test]
fn test_refresh_reports_drift() {
    let project = TestProject::demo();
    project.stack().args(["up", "doublee", "--yes"]).assert().success();

    project
        .stack()
        .args(["refresh", "doublee"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No drift detected"));

    // Console edit: turn DNS support off on the network
    let path = project.account_file();
    let mut account: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let objects = account["objects"].as_object_mut().unwrap();
    let vpc = objects
        .values_mut()
        .find(|o| o["resource_type"] == "aws:ec2/vpc")
        .unwrap();
    vpc["inputs"]["enable-dns-support"] = serde_json::json!(false);
    std::fs::write(&path, serde_json::to_string_pretty(&account).unwrap()).unwrap();

    project
        .stack()
        .args(["refresh", "doublee"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vpc drifted"));

    project
        .stack()
        .args(["plan", "doublee"])
        .assert()
        .success()
        .stdout(predicate::str::contains("~ vpc"))
        .stdout(predicate::str::contains("changed: enable-dns-support"));
}

#[test]
fn test_destroy() {
    let project = TestProject::demo();
    project.stack().args(["up", "doublee", "--yes"]).assert().success();
    project.stack().args(["up", "melodie", "--yes"]).assert().success();

    // Listing only without confirmation
    project
        .stack()
        .args(["destroy", "doublee"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Objects to delete"))
        .stdout(predicate::str::contains("--yes"));

    project
        .stack()
        .args(["destroy", "doublee", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Destroyed"));

    project
        .stack()
        .args(["destroy", "doublee", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to destroy"));

    // The other stack is untouched
    project
        .stack()
        .args(["plan", "melodie"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
}

#[test]
fn test_config_path_from_environment() {
    let project = TestProject::demo();
    let elsewhere = TestProject::empty();
    elsewhere
        .stack()
        .env("STACKFLOW_CONFIG_PATH", project.path().join("stack.kdl"))
        .arg("stacks")
        .assert()
        .success()
        .stdout(predicate::str::contains("shonry27"))
        .stdout(predicate::str::contains("melodie"));
}
