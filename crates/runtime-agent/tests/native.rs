// Runs a real native action package: the `sum-action` fixture is compiled to
// a cdylib, packaged as `index.<dylib ext>` and loaded through the agent.
#![cfg(unix)]

mod common;

use std::env::consts::{DLL_EXTENSION, DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde_json::json;

use runtime_agent::{ActionRunner, LocalBlobStore, StatusReporter};

use common::*;

fn fixture_manifest() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("sum-action")
        .join("Cargo.toml")
}

/// Build the fixture with `version` stamped in and return the library bytes.
fn build_sum_action(version: u32) -> Vec<u8> {
    let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(format!("sum-action-v{version}"));
    let status = Command::new(env!("CARGO"))
        .arg("build")
        .arg("--quiet")
        .arg("--manifest-path")
        .arg(fixture_manifest())
        .arg("--target-dir")
        .arg(&target_dir)
        .env("SUM_ACTION_VERSION", version.to_string())
        .status()
        .unwrap();
    assert!(status.success(), "building the sum-action fixture failed");

    let library = target_dir
        .join("debug")
        .join(format!("{DLL_PREFIX}sum_action{DLL_SUFFIX}"));
    fs::read(library).unwrap()
}

fn native_package(library: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
    writer
        .start_file(format!("index.{DLL_EXTENSION}"), options)
        .unwrap();
    writer.write_all(library).unwrap();
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn reused_runner_loads_each_native_build() {
    let first_build = build_sum_action(1);
    let second_build = build_sum_action(2);
    assert_ne!(first_build, second_build);

    let fixture = Fixture::new();
    let runner = ActionRunner::new(
        fixture.settings("sum-native.zip"),
        Arc::new(LocalBlobStore::new(fixture.store_root())),
        StatusReporter::disabled(),
    );
    let parameters = snapshot(&[("CA_PARAM_A", "2"), ("CA_PARAM_B", "3")]);

    fixture.put("sum-native.zip", &native_package(&first_build));
    let first = runner.run(&fixture.scratch(), &parameters).await;
    let first_keys = runner.loader().cached_keys();

    fixture.put("sum-native.zip", &native_package(&second_build));
    let second = runner.run(&fixture.scratch(), &parameters).await;
    let second_keys = runner.loader().cached_keys();

    assert_eq!(first.output(), Some(&json!({ "sum": 5, "version": 1 })));
    assert_eq!(second.output(), Some(&json!({ "sum": 5, "version": 2 })));
    assert_eq!(second.exit_code(), 0);
    assert_eq!(second_keys.len(), 1);
    assert!(second_keys[0].token > first_keys[0].token);
}

#[tokio::test]
async fn native_action_errors_fail_the_run() {
    let library = build_sum_action(1);
    let fixture = Fixture::new();
    fixture.put("sum-native.zip", &native_package(&library));

    let report = ActionRunner::new(
        fixture.settings("sum-native.zip"),
        Arc::new(LocalBlobStore::new(fixture.store_root())),
        StatusReporter::disabled(),
    )
    .run(&fixture.scratch(), &snapshot(&[("CA_PARAM_A", "2")]))
    .await;

    assert_eq!(report.exit_code(), 1);
    let error = report.error().unwrap();
    assert_eq!(error.kind(), "InvocationError");
    assert!(error.report_message().contains("missing B"), "{}", error.report_message());
}
