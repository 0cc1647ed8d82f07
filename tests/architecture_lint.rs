//! Architecture enforcement tests.
//!
//! The `git` module is the single doorway to the store: no other module
//! may import `git2`. The core model must not depend on the store or the
//! manager, so it stays usable without a repository.

use std::fs;
use std::path::{Path, PathBuf};

fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).expect("read source dir") {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

fn src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("src")
}

/// Files under `dir` whose text contains any of `needles`.
fn offenders(dir: &Path, needles: &[&str]) -> Vec<String> {
    rust_files(dir)
        .into_iter()
        .filter(|path| {
            let text = fs::read_to_string(path).expect("read source file");
            needles.iter().any(|n| text.contains(n))
        })
        .map(|path| path.display().to_string())
        .collect()
}

#[test]
fn git2_only_inside_git_module() {
    let git_dir = src().join("git");
    let violations: Vec<_> = offenders(&src(), &["git2::", "use git2"])
        .into_iter()
        .filter(|path| !Path::new(path).starts_with(&git_dir))
        .collect();

    assert!(
        violations.is_empty(),
        "git2 used outside src/git:\n{}",
        violations.join("\n")
    );
}

#[test]
fn core_does_not_depend_on_store() {
    let violations = offenders(&src().join("core"), &["crate::git", "crate::manager"]);
    assert!(
        violations.is_empty(),
        "core depends on outer layers:\n{}",
        violations.join("\n")
    );
}

#[test]
fn git_does_not_depend_on_manager() {
    let violations = offenders(&src().join("git"), &["crate::manager"]);
    assert!(
        violations.is_empty(),
        "git depends on the manager:\n{}",
        violations.join("\n")
    );
}
