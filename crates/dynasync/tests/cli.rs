//! End-to-end tests driving the dynasync binary
//!
//! Each test gets its own DYNASYNC_HOME and remote root so runs never share
//! state.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::{tempdir, TempDir};

struct Env {
    home: PathBuf,
    remote: PathBuf,
    _dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        let remote = dir.path().join("remote");
        fs::create_dir_all(&home).unwrap();
        Self {
            home,
            remote,
            _dir: dir,
        }
    }

    fn workdir(&self, name: &str) -> PathBuf {
        let path = self._dir.path().join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn run(&self, cwd: &Path, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_dynasync"))
            .current_dir(cwd)
            .env("DYNASYNC_HOME", &self.home)
            .env("DYNASYNC_AUTHOR", "tester")
            .env("RUST_LOG", "off")
            .arg("--remote-root")
            .arg(&self.remote)
            .args(args)
            .output()
            .unwrap()
    }

    fn ok(&self, cwd: &Path, args: &[&str]) -> String {
        let out = self.run(cwd, args);
        assert!(
            out.status.success(),
            "dynasync {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8(out.stdout).unwrap()
    }

    fn json(&self, cwd: &Path, args: &[&str]) -> Value {
        let mut full = vec!["--json"];
        full.extend_from_slice(args);
        serde_json::from_str(&self.ok(cwd, &full)).unwrap()
    }
}

#[test]
fn test_hello_world_round_trip() {
    let env = Env::new();
    let a = env.workdir("a");

    env.ok(&a, &["init", "demo"]);
    fs::write(a.join("x.txt"), "hello\n").unwrap();
    env.ok(&a, &["commit", "x.txt", "-m", "first"]);
    fs::write(a.join("x.txt"), "hello world\n").unwrap();
    env.ok(&a, &["commit", "x.txt", "-m", "second"]);

    let b = env.workdir("b");
    env.ok(&b, &["clone", "demo"]);
    assert_eq!(fs::read_to_string(b.join("demo/x.txt")).unwrap(), "hello world\n");
}

#[test]
fn test_get_applies_commits_from_another_checkout() {
    let env = Env::new();
    let a = env.workdir("a");
    env.ok(&a, &["init", "shared"]);
    fs::write(a.join("notes.md"), "one\n").unwrap();
    env.ok(&a, &["commit", "notes.md", "-m", "one"]);

    let parent = env.workdir("parent");
    env.ok(&parent, &["clone", "shared", "--into", "copy"]);
    let b = parent.join("copy");

    fs::write(a.join("notes.md"), "one\ntwo\n").unwrap();
    env.ok(&a, &["commit", "notes.md", "-m", "two"]);

    let data = env.json(&b, &["get"]);
    assert_eq!(data["ok"], true);
    assert_eq!(data["data"]["operation"], "get");
    assert_eq!(data["data"]["files"][0]["file"], "notes.md");
    assert_eq!(data["data"]["files"][0]["outcome"]["status"], "applied");
    assert_eq!(data["data"]["files"][0]["outcome"]["commits"], 1);
    assert_eq!(fs::read_to_string(b.join("notes.md")).unwrap(), "one\ntwo\n");

    // A second get has nothing left to do
    let again = env.json(&b, &["get"]);
    assert_eq!(again["data"]["files"].as_array().unwrap().len(), 0);
}

#[test]
fn test_commands_outside_a_repository_exit_not_found() {
    let env = Env::new();
    let empty = env.workdir("empty");

    let out = env.run(&empty, &["get"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("dynasync init"));

    let out = env.run(&empty, &["--json", "status"]);
    assert_eq!(out.status.code(), Some(3));
    let err: Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(err["ok"], false);
    assert_eq!(err["error"]["code"], "not_found");
}

#[test]
fn test_clone_of_unknown_repo_fails() {
    let env = Env::new();
    let dir = env.workdir("c");
    let out = env.run(&dir, &["clone", "nope"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(!dir.join("nope").exists());
}

#[test]
fn test_missing_file_is_a_partial_failure() {
    let env = Env::new();
    let a = env.workdir("a");
    env.ok(&a, &["init", "partial"]);
    fs::write(a.join("present.txt"), "here\n").unwrap();

    let out = env.run(&a, &["--json", "commit", "present.txt", "absent.txt", "-m", "both"]);
    assert_eq!(out.status.code(), Some(1));

    let data: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(data["data"]["succeeded"], 1);
    assert_eq!(data["data"]["failed"], 1);
    let err: Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(err["error"]["code"], "partial_failure");
}

#[test]
fn test_path_outside_checkout_is_rejected() {
    let env = Env::new();
    let a = env.workdir("a");
    env.ok(&a, &["init", "paths"]);

    let out = env.run(&a, &["commit", "../escape.txt", "-m", "no"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_commit_while_behind_exits_with_conflict() {
    let env = Env::new();
    let a = env.workdir("a");
    env.ok(&a, &["init", "race"]);
    fs::write(a.join("f.txt"), "base\n").unwrap();
    env.ok(&a, &["commit", "f.txt", "-m", "base"]);

    let parent = env.workdir("p");
    env.ok(&parent, &["clone", "race"]);
    let b = parent.join("race");

    fs::write(a.join("f.txt"), "from a\n").unwrap();
    env.ok(&a, &["commit", "f.txt", "-m", "a"]);

    fs::write(b.join("f.txt"), "from b\n").unwrap();
    let out = env.run(&b, &["commit", "f.txt", "-m", "b"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("behind"));
}

#[test]
fn test_status_and_log_report_history() {
    let env = Env::new();
    let a = env.workdir("a");
    env.ok(&a, &["init", "hist"]);
    fs::write(a.join("doc.txt"), "v1\n").unwrap();
    env.ok(&a, &["commit", "doc.txt", "-m", "add doc"]);
    env.ok(&a, &["tag", "release one"]);
    fs::write(a.join("doc.txt"), "v2\n").unwrap();

    let status = env.json(&a, &["status"]);
    assert_eq!(status["data"]["files"][0]["file"], "doc.txt");
    assert_eq!(status["data"]["files"][0]["state"], "modified");
    assert_eq!(status["data"]["pending"], 0);

    let log = env.json(&a, &["log"]);
    let commits = log["data"]["commits"].as_array().unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0]["message"], "add doc");
    assert_eq!(commits[0]["author"], "tester");
    assert_eq!(commits[0]["additions"], 1);
    assert_eq!(log["data"]["tags"][0]["message"], "release one");

    let human = env.ok(&a, &["log", "doc.txt"]);
    assert!(human.contains("add doc"));
}

#[test]
fn test_init_rejects_a_different_name() {
    let env = Env::new();
    let a = env.workdir("a");
    env.ok(&a, &["init", "first"]);
    env.ok(&a, &["init"]);

    let out = env.run(&a, &["init", "second"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_quiet_suppresses_human_output() {
    let env = Env::new();
    let a = env.workdir("a");
    let out = env.ok(&a, &["--quiet", "init", "hush"]);
    assert!(out.is_empty());
}
