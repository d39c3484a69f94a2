//! Fixtures shared by unit tests: local git repositories and tree readers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Whether a usable `git` binary is on PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn require_git() -> bool {
    if git_available() {
        true
    } else {
        eprintln!("skipping git test (git not found on PATH)");
        false
    }
}

fn git(repo: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args([
            "-c",
            "user.name=redeploy-test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create a repository at `path` whose `branch` holds `files`.
pub fn init_repo(path: &Path, branch: &str, files: &[(&str, &str)]) -> PathBuf {
    fs::create_dir_all(path).expect("create repo dir");
    git(path, &["init", "-q"]);
    git(path, &["checkout", "-q", "-b", branch]);
    commit_files(path, files);
    path.to_path_buf()
}

/// Write `files` and commit them on the current branch.
pub fn commit_files(repo: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let file = repo.join(rel);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&file, content).expect("write file");
    }
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-q", "-m", "update"]);
}

/// Create `branch` from the current HEAD with extra `files`.
pub fn add_branch(repo: &Path, branch: &str, files: &[(&str, &str)]) {
    git(repo, &["checkout", "-q", "-b", branch]);
    commit_files(repo, files);
}

/// Relative path → bytes for every regular file and symlink target under `root`.
pub fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .expect("read dir")
            .map(|e| e.expect("dir entry").path())
            .collect();
        entries.sort();
        for path in entries {
            let meta = fs::symlink_metadata(&path).expect("metadata");
            let rel = path.strip_prefix(root).expect("under root").to_path_buf();
            if meta.file_type().is_symlink() {
                let target = fs::read_link(&path).expect("read link");
                out.insert(rel, target.to_string_lossy().as_bytes().to_vec());
            } else if meta.is_dir() {
                walk(root, &path, out);
            } else {
                out.insert(rel, fs::read(&path).expect("read file"));
            }
        }
    }
    let mut out = BTreeMap::new();
    if root.exists() {
        walk(root, root, &mut out);
    }
    out
}

/// Write `files` (relative path, content) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let file = root.join(rel);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&file, content).expect("write file");
    }
}
