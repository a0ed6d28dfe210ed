//! End-to-end runs of the hoard binary against a local-filesystem bucket

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

struct Fixture {
    repo: TempDir,
    bucket: TempDir,
}

impl Fixture {
    /// Fresh git repository plus an empty bucket directory
    fn new() -> Self {
        let repo = tempdir().unwrap();
        git2::Repository::init(repo.path()).unwrap();
        let bucket = tempdir().unwrap();
        Self { repo, bucket }
    }

    /// Repository with `hoard init` already run
    fn initialized() -> Self {
        let fixture = Self::new();
        fixture.hoard().args(["init", &fixture.bucket_url()]).assert().success();
        fixture
    }

    fn bucket_url(&self) -> String {
        format!("file://{}", self.bucket.path().display())
    }

    fn root(&self) -> &Path {
        self.repo.path()
    }

    fn hoard(&self) -> Command {
        self.hoard_in(self.root())
    }

    fn hoard_in(&self, dir: &Path) -> Command {
        let mut cmd = Command::cargo_bin("hoard").unwrap();
        cmd.current_dir(dir).env_remove("HOARD_LOG");
        cmd
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap()
    }

    fn manifest(&self) -> String {
        self.read(".hoard.toml")
    }

    /// Every object stored in the bucket
    fn blobs(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }
        let mut out = Vec::new();
        walk(self.bucket.path(), &mut out);
        out
    }
}

#[test]
fn test_init_writes_manifest() {
    let fixture = Fixture::new();
    fixture
        .hoard()
        .args(["init", &fixture.bucket_url(), "team/assets"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized hoard manifest"));

    let manifest = fixture.manifest();
    assert!(manifest.contains("team/assets"));
    assert!(manifest.contains("sha256"));
}

#[test]
fn test_track_ls_checkout() {
    let fixture = Fixture::initialized();
    fixture.write("models/a.bin", "model weights a");
    fixture.write("models/b.bin", "model weights b");

    fixture
        .hoard()
        .args(["track", "models"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracked 2 file(s)"));
    assert!(fixture.manifest().contains("models/a.bin"));
    assert_eq!(fixture.blobs().len(), 2);

    fixture
        .hoard()
        .args(["ls", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("models/a.bin").and(predicate::str::contains("models/b.bin")));

    fs::remove_file(fixture.root().join("models/a.bin")).unwrap();
    fixture
        .hoard()
        .args(["ls", "--long", "models/a.bin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("missing"));

    fixture
        .hoard()
        .args(["checkout", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("downloaded").and(predicate::str::contains("up_to_date")));
    assert_eq!(fixture.read("models/a.bin"), "model weights a");
}

#[test]
fn test_identical_content_uploads_once() {
    let fixture = Fixture::initialized();
    fixture.write("one.bin", "same bytes");
    fixture.write("two.bin", "same bytes");

    fixture
        .hoard()
        .args(["track", "one.bin", "two.bin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deduplicated"));
    assert_eq!(fixture.blobs().len(), 1);
}

#[test]
fn test_track_from_subdirectory() {
    let fixture = Fixture::initialized();
    fixture.write("sub/data.bin", "nested");

    fixture
        .hoard_in(&fixture.root().join("sub"))
        .args(["track", "data.bin"])
        .assert()
        .success();
    assert!(fixture.manifest().contains("sub/data.bin"));

    // Default ls scope is the current directory, displayed relative to it
    fixture
        .hoard_in(&fixture.root().join("sub"))
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::diff("data.bin\n"));
}

#[test]
fn test_remove_with_purge_deletes_blob() {
    let fixture = Fixture::initialized();
    fixture.write("a.bin", "aaa");
    fixture.write("b.bin", "bbb");
    fixture.hoard().args(["track", "a.bin", "b.bin"]).assert().success();
    assert_eq!(fixture.blobs().len(), 2);

    fixture
        .hoard()
        .args(["remove", "--purge", "a.bin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("purged"));

    assert!(!fixture.manifest().contains("a.bin"));
    assert_eq!(fixture.blobs().len(), 1);
    // Working-tree files are left alone
    assert_eq!(fixture.read("a.bin"), "aaa");
}

#[test]
fn test_cleanup_deletes_orphans() {
    let fixture = Fixture::initialized();
    fixture.write("a.bin", "aaa");
    fixture.write("b.bin", "bbb");
    fixture.hoard().args(["track", "a.bin", "b.bin"]).assert().success();
    fixture.hoard().args(["remove", "b.bin"]).assert().success();
    assert_eq!(fixture.blobs().len(), 2);

    // Declining leaves everything in place
    fixture
        .hoard()
        .arg("cleanup")
        .write_stdin("no\n")
        .assert()
        .code(8);
    assert_eq!(fixture.blobs().len(), 2);

    fixture
        .hoard()
        .args(["cleanup", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 orphaned, 1 deleted"));
    assert_eq!(fixture.blobs().len(), 1);

    fixture.hoard().args(["checkout", "--all"]).assert().success();
}

#[test]
fn test_json_envelope() {
    let fixture = Fixture::initialized();
    fixture.write("a.bin", "aaa");
    fixture.hoard().args(["track", "a.bin"]).assert().success();

    let output = fixture.hoard().args(["--json", "ls", "--all"]).output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["ok"], true);
    assert_eq!(json["data"][0]["path"], "a.bin");
    assert_eq!(json["data"][0]["size"], 3);
    assert_eq!(json["data"][0]["state"], "current");
}

#[test]
fn test_uninitialized_repository() {
    let fixture = Fixture::new();
    fixture.write("a.bin", "aaa");

    fixture
        .hoard()
        .args(["track", "a.bin"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("hoard init"));

    let output = fixture.hoard().args(["--json", "ls"]).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
    let json: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "uninitialized_repository");
}

#[test]
fn test_acceleration_requires_signing() {
    let fixture = Fixture::new();
    fixture
        .hoard()
        .args(["--accelerate", "--no-sign-request", "init", "my-bucket"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("acceleration"));
    assert!(!fixture.root().join(".hoard.toml").exists());
}

#[test]
fn test_missing_path_is_an_error() {
    let fixture = Fixture::initialized();
    fixture
        .hoard()
        .args(["track", "nope.bin"])
        .assert()
        .code(3);
    fixture.hoard().arg("checkout").assert().code(2);
}
