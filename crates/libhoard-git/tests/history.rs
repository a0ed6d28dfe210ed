//! Manifest history collection over real git repositories

use git2::{Commit, Oid, Repository, Signature};
use libhoard_core::gc::SnapshotSource;
use libhoard_core::{Algorithm, Manifest, ManifestEntry, ManifestFormat, RemoteSettings};
use libhoard_git::{GitError, ManifestHistory};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const MANIFEST: &str = ".hoard.toml";

fn manifest_of(entries: &[(&str, char)]) -> String {
    let mut m = Manifest::new(RemoteSettings::new("bucket", None));
    for (path, c) in entries {
        let digest: String = std::iter::repeat(*c).take(64).collect();
        m.upsert(ManifestEntry::new(*path, Algorithm::Sha256, digest, 1));
    }
    ManifestFormat::Toml.render(&m).unwrap()
}

fn init() -> (TempDir, Repository) {
    let dir = tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    (dir, repo)
}

fn commit_file(repo: &Repository, rel: &str, content: &str, message: &str) -> Oid {
    let root = repo.workdir().unwrap();
    fs::write(root.join(rel), content).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(rel)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap()
}

/// Commit `content` as the manifest on `branch`, without touching the index
fn commit_on_branch(repo: &Repository, branch: &str, content: &str) -> Oid {
    let parent = repo.head().unwrap().peel_to_commit().unwrap();
    let blob = repo.blob(content.as_bytes()).unwrap();
    let mut builder = repo.treebuilder(Some(&parent.tree().unwrap())).unwrap();
    builder.insert(MANIFEST, blob, 0o100644).unwrap();
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();
    let sig = Signature::now("test", "test@example.com").unwrap();
    repo.commit(
        Some(&format!("refs/heads/{}", branch)),
        &sig,
        &sig,
        "side change",
        &tree,
        &[&parent],
    )
    .unwrap()
}

fn digests(manifests: &[Manifest]) -> HashSet<String> {
    manifests
        .iter()
        .flat_map(|m| m.files.values().map(|e| e.digest.chars().next().unwrap().to_string()))
        .collect()
}

#[test]
fn test_collects_versions_from_all_refs() {
    let (dir, repo) = init();
    commit_file(&repo, "README.md", "no manifest yet", "initial");
    commit_file(&repo, MANIFEST, &manifest_of(&[("a.bin", 'a')]), "track a");
    commit_file(&repo, MANIFEST, &manifest_of(&[("b.bin", 'b')]), "replace with b");
    commit_on_branch(&repo, "side", &manifest_of(&[("c.bin", 'c')]));
    commit_file(&repo, "README.md", "unrelated change", "docs");

    let history = ManifestHistory::new(dir.path(), MANIFEST);
    let manifests = history.load().unwrap();

    // Three distinct versions; the docs commit reuses the b blob
    assert_eq!(manifests.len(), 3);
    assert_eq!(digests(&manifests), HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()]));
}

#[test]
fn test_staged_manifest_is_included() {
    let (dir, repo) = init();
    commit_file(&repo, MANIFEST, &manifest_of(&[("a.bin", 'a')]), "track a");

    fs::write(dir.path().join(MANIFEST), manifest_of(&[("d.bin", 'd')])).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(MANIFEST)).unwrap();
    index.write().unwrap();

    let manifests = ManifestHistory::new(dir.path(), MANIFEST).snapshots().unwrap();
    assert_eq!(digests(&manifests), HashSet::from(["a".to_string(), "d".to_string()]));
}

#[test]
fn test_empty_repository_has_no_versions() {
    let (dir, _repo) = init();
    let manifests = ManifestHistory::new(dir.path(), MANIFEST).load().unwrap();
    assert!(manifests.is_empty());
}

#[test]
fn test_unparseable_version_is_an_error() {
    let (dir, repo) = init();
    commit_file(&repo, MANIFEST, "this is [not toml", "broken");
    commit_file(&repo, MANIFEST, &manifest_of(&[("a.bin", 'a')]), "fixed");

    let err = ManifestHistory::new(dir.path(), MANIFEST).load().unwrap_err();
    assert!(matches!(err, GitError::Snapshot { .. }));

    let err = ManifestHistory::new(dir.path(), MANIFEST).snapshots().unwrap_err();
    assert_eq!(err.error_code(), "corrupt");
}

#[test]
fn test_shallow_clone_refused() {
    let (dir, repo) = init();
    let head = commit_file(&repo, MANIFEST, &manifest_of(&[("a.bin", 'a')]), "track a");
    fs::write(dir.path().join(".git/shallow"), format!("{}\n", head)).unwrap();

    let history = ManifestHistory::new(dir.path(), MANIFEST);
    assert!(matches!(history.load(), Err(GitError::Shallow)));
    assert_eq!(history.snapshots().unwrap_err().error_code(), "aborted");
}

#[test]
fn test_json_manifest_history() {
    let (dir, repo) = init();
    let mut m = Manifest::new(RemoteSettings::new("bucket", None));
    m.upsert(ManifestEntry::new("e.bin", Algorithm::Md5, "e".repeat(32), 1));
    commit_file(&repo, ".hoard.json", &ManifestFormat::Json.render(&m).unwrap(), "json manifest");

    let manifests = ManifestHistory::new(dir.path(), ".hoard.json").load().unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].get("e.bin").unwrap().algorithm, Algorithm::Md5);
}
