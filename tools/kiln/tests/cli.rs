//! Drives the `kiln` binary against throwaway projects.
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const MANIFEST: &str = r#"
[[rule]]
output = "build/hello.txt"
inputs = ["src/hello.txt"]
command = ["cp", "{input}", "{output}"]

[[package]]
id = "zlib"
version = "1.3"
source = { kind = "local", path = "third_party/zlib" }
build = [["touch", "{prefix}/libz.a"]]
"#;

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("kiln.toml"), MANIFEST).unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::create_dir_all(dir.path().join("third_party/zlib")).unwrap();
    fs::write(dir.path().join("src/hello.txt"), "hello").unwrap();
    dir
}

fn kiln(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn build_is_incremental() {
    let dir = project();

    let first = kiln(dir.path(), &["-q", "build"]);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(stdout(&first).contains("1 package(s) and 1 output(s) rebuilt"));
    assert_eq!(fs::read_to_string(dir.path().join("build/hello.txt")).unwrap(), "hello");
    assert!(dir.path().join("vendor/zlib/install/libz.a").exists());

    let second = kiln(dir.path(), &["-q", "build"]);
    assert!(second.status.success());
    assert!(stdout(&second).contains("0 package(s) and 0 output(s) rebuilt, 1 up to date"));

    fs::write(dir.path().join("src/hello.txt"), "bye").unwrap();
    let third = kiln(dir.path(), &["-q", "build"]);
    assert!(stdout(&third).contains("0 package(s) and 1 output(s) rebuilt"));
    assert_eq!(fs::read_to_string(dir.path().join("build/hello.txt")).unwrap(), "bye");
}

#[test]
fn status_lists_stale_outputs_and_package_state() {
    let dir = project();

    let before = stdout(&kiln(dir.path(), &["status"]));
    assert!(before.contains("stale: build/hello.txt"));
    assert!(before.contains("dirty"));
    assert!(!dir.path().join("build/hello.txt").exists());

    assert!(kiln(dir.path(), &["-q", "build"]).status.success());
    let after = stdout(&kiln(dir.path(), &["status"]));
    assert!(after.contains("committed (configured, built)"));
    assert!(after.contains("All 1 output(s) up to date."));
}

#[test]
fn clean_removes_build_dir_and_packages() {
    let dir = project();
    assert!(kiln(dir.path(), &["-q", "build"]).status.success());

    let clean = kiln(dir.path(), &["-q", "clean", "--packages"]);
    assert!(clean.status.success());
    assert!(!dir.path().join("build").exists());
    assert!(!dir.path().join("vendor/zlib/install").exists());
    assert!(!dir.path().join("vendor/zlib/revision").exists());
}

#[test]
fn runs_from_a_subdirectory() {
    let dir = project();
    let output = kiln(&dir.path().join("src"), &["-q", "build"]);
    assert!(output.status.success());
    assert!(dir.path().join("build/hello.txt").exists());
}

#[test]
fn failing_rule_fails_the_build() {
    let dir = project();
    fs::write(
        dir.path().join("kiln.toml"),
        "[[rule]]\noutput = \"build/x\"\ninputs = [\"src/*.txt\"]\ncommand = [\"false\"]\n",
    )
    .unwrap();

    let output = kiln(dir.path(), &["-q", "build"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to create build/x"));
}

#[test]
fn invalid_manifest_is_reported() {
    let dir = project();
    fs::write(
        dir.path().join("kiln.toml"),
        "[[package]]\nid = \"gcc\"\nversion = \"1\"\ndependencies = [\"binutils\"]\n\
         source = { kind = \"local\", path = \"gcc\" }\n",
    )
    .unwrap();

    let output = kiln(dir.path(), &["deps"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown package 'binutils'"));
}
