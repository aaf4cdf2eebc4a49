use assert_cmd::Command;
use assert_cmd::cargo;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

const UNIVERSE: &str = r#"{
    "bundles": [
        { "name": "core", "version": "1.0",
          "exports": [{ "name": "com.acme.core", "version": "1.4" }],
          "imports": [{ "name": "org.osgi.framework", "range": "1.3" }] },
        { "name": "service", "version": "2.1",
          "exports": [{ "name": "com.acme.service", "version": "2.1" }],
          "imports": [{ "name": "com.acme.core", "range": "[1.0,2.0)" }] },
        { "name": "app", "version": "0.9",
          "imports": [{ "name": "com.acme.service" }] },
        { "name": "legacy", "version": "0.1",
          "imports": [{ "name": "com.acme.core", "range": "[2.0,3.0)" }] }
    ]
}"#;

const CONFIG: &str = r#"{
    "system_bundle": 0,
    "system_packages": [{ "name": "org.osgi.framework", "version": "1.3" }]
}"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn setup() -> (TempDir, PathBuf, PathBuf) {
    let dir = tempdir().unwrap();
    let universe = write(dir.path(), "universe.json", UNIVERSE);
    let config = write(dir.path(), "config.json", CONFIG);
    (dir, universe, config)
}

fn bundlewire(config: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("bundlewire"));
    cmd.env_remove("BUNDLEWIRE_CONFIG").arg("--config").arg(config);
    cmd
}

#[test]
fn test_resolve_prints_states_and_missing_packages() {
    let (_dir, universe, config) = setup();

    bundlewire(&config)
        .arg("resolve")
        .arg(&universe)
        .assert()
        .success()
        .stdout(predicate::str::contains("core 1.0.0 RESOLVED"))
        .stdout(predicate::str::contains("service 2.1.0 RESOLVED"))
        .stdout(predicate::str::contains("app 0.9.0 RESOLVED"))
        .stdout(predicate::str::contains("legacy 0.1.0 INSTALLED"))
        .stdout(predicate::str::contains(
            "    missing package com.acme.core version in [2.0.0,3.0.0)",
        ));
}

#[test]
fn test_resolve_single_bundle_pulls_in_dependencies() {
    let (_dir, universe, config) = setup();

    bundlewire(&config)
        .arg("resolve")
        .arg(&universe)
        .arg("--bundle")
        .arg("service")
        .assert()
        .success()
        .stdout(predicate::str::contains("core 1.0.0 RESOLVED"))
        .stdout(predicate::str::contains("service 2.1.0 RESOLVED"))
        .stdout(predicate::str::contains("app 0.9.0 INSTALLED"));
}

#[test]
fn test_resolve_without_system_packages_fails_chain() {
    let dir = tempdir().unwrap();
    let universe = write(dir.path(), "universe.json", UNIVERSE);
    let config = write(dir.path(), "config.json", "{}");

    bundlewire(&config)
        .arg("resolve")
        .arg(&universe)
        .assert()
        .success()
        .stdout(predicate::str::contains("core 1.0.0 INSTALLED"))
        .stdout(predicate::str::contains(
            "    missing package org.osgi.framework version >= 1.3.0",
        ))
        .stdout(predicate::str::contains("app 0.9.0 INSTALLED"));
}

#[test]
fn test_packages_lists_providers() {
    let (_dir, universe, config) = setup();

    bundlewire(&config)
        .arg("packages")
        .arg(&universe)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "com.acme.core 1.4.0 provided by core",
        ))
        .stdout(predicate::str::contains("    imported by service"))
        .stdout(predicate::str::contains(
            "org.osgi.framework 1.3.0 provided by system.bundle",
        ))
        .stdout(predicate::str::contains(
            "system packages: org.osgi.framework;1.3.0",
        ));
}

#[test]
fn test_affected_lists_transitive_importers() {
    let (_dir, universe, config) = setup();

    bundlewire(&config)
        .arg("affected")
        .arg(&universe)
        .arg("--uninstall")
        .arg("core")
        .assert()
        .success()
        .stdout("app\ncore\nservice\n");
}

#[test]
fn test_affected_with_repeated_bundle_name() {
    let (_dir, universe, config) = setup();

    bundlewire(&config)
        .arg("affected")
        .arg(&universe)
        .arg("--uninstall")
        .arg("core")
        .arg("core")
        .assert()
        .success()
        .stdout("app\ncore\nservice\n");
}

#[test]
fn test_affected_with_unused_bundle() {
    let (_dir, universe, config) = setup();

    bundlewire(&config)
        .arg("affected")
        .arg(&universe)
        .arg("--uninstall")
        .arg("app")
        .assert()
        .success()
        .stdout("No bundles affected.\n");
}

#[test]
fn test_config_from_environment() {
    let (_dir, universe, config) = setup();

    Command::new(cargo::cargo_bin!("bundlewire"))
        .env("BUNDLEWIRE_CONFIG", &config)
        .arg("packages")
        .arg(&universe)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "system packages: org.osgi.framework;1.3.0",
        ));
}

#[test]
fn test_missing_universe_file() {
    let (dir, _universe, config) = setup();

    bundlewire(&config)
        .arg("resolve")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read universe file"));
}

#[test]
fn test_unknown_bundle_name() {
    let (_dir, universe, config) = setup();

    bundlewire(&config)
        .arg("resolve")
        .arg(&universe)
        .arg("--bundle")
        .arg("ghost")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No bundle named ghost"));
}
