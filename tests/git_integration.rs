//! Integration tests for the manager against real Git repositories.
//!
//! Each test creates a bare "remote" admin repository with the git CLI in
//! a temp directory and drives it through `ConfigManager`.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use gitacl::core::config::Config;
use gitacl::core::model::ModelError;
use gitacl::core::settings::{Settings, SettingsFile};
use gitacl::core::types::{Grantee, Permission};
use gitacl::manager::{ConfigManager, ManagerError};

// =============================================================================
// Test Helpers
// =============================================================================

/// A bare admin repository plus scratch space for working copies.
struct TestRemote {
    dir: TempDir,
}

impl TestRemote {
    /// Empty bare repository.
    fn empty() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(dir.path().join("remote.git")).expect("create remote dir");
        run_git(
            &dir.path().join("remote.git"),
            &["init", "--bare", "-b", "master"],
        );
        Self { dir }
    }

    /// Bare repository seeded with a gitolite-style admin layout.
    fn seeded(conf: &str, keys: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let seed = dir.path().join("seed");
        std::fs::create_dir_all(seed.join("conf")).expect("create conf dir");
        std::fs::create_dir_all(seed.join("keydir")).expect("create keydir");
        std::fs::write(seed.join("conf/gitolite.conf"), conf).expect("write conf");
        for (name, key) in keys {
            let path = seed.join("keydir").join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create key subdirectory");
            }
            std::fs::write(path, key).expect("write key");
        }

        run_git(&seed, &["init", "-b", "master"]);
        run_git(&seed, &["config", "user.email", "test@example.com"]);
        run_git(&seed, &["config", "user.name", "Test User"]);
        run_git(&seed, &["add", "."]);
        run_git(&seed, &["commit", "-m", "Initial admin config"]);
        run_git(dir.path(), &["clone", "--bare", "seed", "remote.git"]);

        Self { dir }
    }

    fn location(&self) -> String {
        self.dir.path().join("remote.git").display().to_string()
    }

    fn workdir(&self, name: &str) -> PathBuf {
        self.dir.path().join("work").join(name)
    }

    /// A manager with its own private working copy.
    fn manager(&self, name: &str) -> ConfigManager {
        let settings = Settings::default().with_workdir(self.workdir(name));
        ConfigManager::with_settings(&self.location(), settings).expect("open manager")
    }

    /// Read a file from the remote's master branch with the git CLI.
    fn show(&self, path: &str) -> String {
        let output = Command::new("git")
            .args(["show", &format!("master:{path}")])
            .current_dir(self.dir.path().join("remote.git"))
            .output()
            .expect("git show");
        String::from_utf8(output.stdout).expect("utf8")
    }

    /// Number of commits on the remote's master branch.
    fn commit_count(&self) -> usize {
        let output = Command::new("git")
            .args(["rev-list", "--count", "master"])
            .current_dir(self.dir.path().join("remote.git"))
            .output()
            .expect("git rev-list");
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0)
    }

    /// Commit message of the remote's master head.
    fn head_message(&self) -> String {
        let output = Command::new("git")
            .args(["log", "-1", "--format=%B", "master"])
            .current_dir(self.dir.path().join("remote.git"))
            .output()
            .expect("git log");
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn create_then_remove_repository() {
    let remote = TestRemote::empty();
    let manager = remote.manager("a");

    let mut config = manager.get().unwrap();
    assert_eq!(config.base_revision(), None);
    config.create_repository("test-repo").unwrap();
    manager.apply(&config).unwrap();

    let mut config = manager.get().unwrap();
    assert!(config.repository("test-repo").is_some());
    config.remove_repository("test-repo").unwrap();
    manager.apply(&config).unwrap();

    let config = manager.get().unwrap();
    assert!(config.repository("test-repo").is_none());
    assert_eq!(remote.commit_count(), 2);
}

#[test]
fn group_membership_round_trips() {
    let remote = TestRemote::empty();
    let manager = remote.manager("b");

    let mut config = manager.get().unwrap();
    config.create_user("alice").unwrap();
    config.create_group("@test-group").unwrap();
    config.add_user_to_group("@test-group", "alice").unwrap();
    manager.apply(&config).unwrap();

    let reread = manager.get().unwrap();
    let group = reread.group("@test-group").unwrap();
    let members: Vec<_> = group.users().iter().map(|u| u.as_str()).collect();
    assert_eq!(members, vec!["alice"]);
    assert!(group.groups().is_empty());
    assert_eq!(remote.show("conf/gitolite.conf"), "@test-group = alice\n");
}

#[test]
fn existing_layout_is_read_and_rewritten_canonically() {
    let remote = TestRemote::seeded(
        "# managed by hand until now\n\
         @admins = alice\n\
         repo gitolite-admin\n\
         \tRW+ = @admins\n\
         repo testing\n\
         \tRW+ = @all\n",
        &[
            ("alice.pub", "ssh-ed25519 AAAA alice\n"),
            ("bob@laptop.pub", "ssh-ed25519 BBBB bob\n"),
        ],
    );
    let manager = remote.manager("c");

    let mut config = manager.get().unwrap();
    assert!(config.group("@admins").unwrap().contains_user("alice"));
    assert_eq!(config.user("bob").unwrap().key("laptop"), Some("ssh-ed25519 BBBB bob"));
    assert_eq!(
        config
            .repository("testing")
            .unwrap()
            .permission_of(&Grantee::parse("@all").unwrap()),
        Some(Permission::All)
    );

    config.set_permission("testing", "bob", Permission::ReadOnly).unwrap();
    manager.apply(&config).unwrap();

    assert_eq!(
        remote.show("conf/gitolite.conf"),
        "@admins = alice\n\
         \n\
         repo gitolite-admin\n    RW+ = @admins\n\
         \n\
         repo testing\n    RW+ = @all\n    R = bob\n"
    );
    assert_eq!(remote.show("keydir/bob@laptop.pub"), "ssh-ed25519 BBBB bob\n");
    assert!(remote.head_message().contains("grant R on testing to bob"));
}

#[test]
fn unchanged_config_does_not_commit() {
    let remote = TestRemote::seeded("repo r\n    RW+ = alice\n", &[]);
    let manager = remote.manager("d");

    let config = manager.get().unwrap();
    let revision = manager.apply(&config).unwrap();
    assert_eq!(Some(&revision), config.base_revision());
    assert_eq!(remote.commit_count(), 1);
}

#[test]
fn removed_user_loses_key_file() {
    let remote = TestRemote::seeded(
        "repo r\n    RW+ = alice\n",
        &[("alice.pub", "ssh-ed25519 AAAA alice\n")],
    );
    let manager = remote.manager("e");

    let mut config = manager.get().unwrap();
    config.remove_user("alice").unwrap();
    manager.apply(&config).unwrap();

    assert_eq!(remote.show("keydir/alice.pub"), "");
    assert_eq!(remote.show("conf/gitolite.conf"), "repo r\n");
}

#[test]
fn keys_in_subdirectories_survive_unrelated_edits() {
    let remote = TestRemote::seeded(
        "repo r\n    R = alice\n",
        &[
            ("laptop/alice.pub", "ssh-ed25519 LAPTOP alice\n"),
            ("desktop/alice.pub", "ssh-ed25519 DESKTOP alice\n"),
        ],
    );
    let manager = remote.manager("subdirs");

    let mut config = manager.get().unwrap();
    let alice = config.user("alice").unwrap();
    assert_eq!(alice.key("laptop/"), Some("ssh-ed25519 LAPTOP alice"));
    assert_eq!(alice.key("desktop/"), Some("ssh-ed25519 DESKTOP alice"));

    config.create_repository("other").unwrap();
    manager.apply(&config).unwrap();

    assert_eq!(remote.commit_count(), 2);
    assert_eq!(remote.show("keydir/laptop/alice.pub"), "ssh-ed25519 LAPTOP alice\n");
    assert_eq!(remote.show("keydir/desktop/alice.pub"), "ssh-ed25519 DESKTOP alice\n");
    assert_eq!(remote.show("keydir/alice.pub"), "");
}

// =============================================================================
// Concurrency
// =============================================================================

/// Apply `background` asynchronously through one manager while
/// `foreground` is applied through another; expect exactly one winner.
fn race_applies(
    remote: &TestRemote,
    ours: &ConfigManager,
    theirs: &ConfigManager,
    background: Config,
    foreground: Config,
) {
    let handle = ours.apply_async(background);
    let foreground = theirs.apply(&foreground);
    let results = [handle.wait(), foreground];

    let mut winner = None;
    let mut conflicts = 0;
    for result in results {
        match result {
            Ok(revision) => {
                assert!(winner.is_none(), "both applies succeeded");
                winner = Some(revision);
            }
            Err(ManagerError::Modification { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(conflicts, 1);
    let winner = winner.expect("one apply succeeds");

    let head = Command::new("git")
        .args(["rev-parse", "master"])
        .current_dir(remote.dir.path().join("remote.git"))
        .output()
        .expect("git rev-parse");
    assert_eq!(String::from_utf8_lossy(&head.stdout).trim(), winner.as_str());
}

#[test]
fn async_and_sync_creates_of_same_repository() {
    let remote = TestRemote::empty();
    let ours = remote.manager("race-ours");
    let theirs = remote.manager("race-theirs");

    let mut background = ours.get().unwrap();
    let mut foreground = theirs.get().unwrap();
    background.create_repository("shared").unwrap();
    foreground.create_repository("shared").unwrap();
    foreground.create_user("bob").unwrap();
    foreground.set_permission("shared", "bob", Permission::ReadOnly).unwrap();

    race_applies(&remote, &ours, &theirs, background, foreground);
    assert_eq!(remote.commit_count(), 1);
}

#[test]
fn async_and_sync_removals_of_same_entities() {
    let remote = TestRemote::seeded(
        "@devs = alice\n\nrepo r\n    RW+ = @devs\n    R = bob\n",
        &[("alice.pub", "ssh-ed25519 AAAA alice\n")],
    );
    let ours = remote.manager("remove-ours");
    let theirs = remote.manager("remove-theirs");

    let removals: [fn(&mut Config) -> Result<(), ModelError>; 3] = [
        |c| c.remove_user("bob").map(|_| ()),
        |c| c.remove_group("@devs").map(|_| ()),
        |c| c.remove_repository("r").map(|_| ()),
    ];
    for (round, remove) in removals.into_iter().enumerate() {
        let mut background = ours.get().unwrap();
        let mut foreground = theirs.get().unwrap();
        remove(&mut background).unwrap();
        remove(&mut foreground).unwrap();

        race_applies(&remote, &ours, &theirs, background, foreground);
        assert_eq!(remote.commit_count(), round + 2);
    }

    let config = ours.get().unwrap();
    assert!(config.user("bob").is_none());
    assert!(config.group("@devs").is_none());
    assert!(config.repository("r").is_none());
}

#[test]
fn concurrent_creates_from_empty_store() {
    let remote = TestRemote::empty();
    let first = remote.manager("first");
    let second = remote.manager("second");

    let mut ours = first.get().unwrap();
    let mut theirs = second.get().unwrap();
    ours.create_repository("one").unwrap();
    theirs.create_repository("two").unwrap();

    first.apply(&ours).unwrap();
    match second.apply(&theirs) {
        Err(ManagerError::Modification { expected, actual }) => {
            assert_eq!(expected, None);
            assert!(actual.is_some());
        }
        other => panic!("expected modification error, got {other:?}"),
    }

    let config = second.get().unwrap();
    assert!(config.repository("one").is_some());
    assert!(config.repository("two").is_none());
}

#[test]
fn remote_ahead_of_snapshot() {
    let remote = TestRemote::seeded("repo r\n    R = alice\n", &[]);
    let ours = remote.manager("ours");
    let theirs = remote.manager("theirs");

    let mut stale = ours.get().unwrap();

    let mut fresh = theirs.get().unwrap();
    fresh.create_repository("theirs").unwrap();
    let moved = theirs.apply(&fresh).unwrap();

    stale.create_repository("ours").unwrap();
    match ours.apply(&stale) {
        Err(ManagerError::Modification { actual, .. }) => assert_eq!(actual, Some(moved)),
        other => panic!("expected modification error, got {other:?}"),
    }
    assert_eq!(remote.commit_count(), 2);

    // Re-reading and re-applying succeeds.
    let mut retry = ours.get().unwrap();
    retry.create_repository("ours").unwrap();
    ours.apply(&retry).unwrap();
    assert_eq!(remote.commit_count(), 3);
}

#[test]
fn async_apply_against_real_remote() {
    let remote = TestRemote::empty();
    let manager = remote.manager("async");

    let mut config = manager.get().unwrap();
    config.create_repository("bg").unwrap();
    let revision = manager.apply_async(config).wait().unwrap();

    assert_eq!(manager.get().unwrap().base_revision(), Some(&revision));
}

// =============================================================================
// Setup
// =============================================================================

#[test]
fn unreachable_location() {
    let temp = TempDir::new().unwrap();
    let settings = Settings::default().with_workdir(temp.path().join("work"));
    let missing = temp.path().join("missing.git");

    let result = ConfigManager::with_settings(&missing.display().to_string(), settings);
    assert!(matches!(result, Err(ManagerError::Connection { .. })));
}

#[test]
fn custom_branch_and_layout() {
    let remote = TestRemote::empty();
    let settings = Settings::from_file(SettingsFile {
        branch: Some("acl".into()),
        conf_path: Some("gitolite.conf".into()),
        keydir: Some("keys".into()),
        workdir: Some(remote.workdir("custom")),
        ..Default::default()
    })
    .unwrap();
    let manager = ConfigManager::with_settings(&remote.location(), settings).unwrap();

    let mut config = manager.get().unwrap();
    config.create_user("carol").unwrap();
    config.set_key("carol", "", "ssh-ed25519 CCCC carol").unwrap();
    config.create_repository("r").unwrap();
    config.set_permission("r", "carol", Permission::ReadWrite).unwrap();
    manager.apply(&config).unwrap();

    let output = Command::new("git")
        .args(["show", "acl:keys/carol.pub"])
        .current_dir(remote.dir.path().join("remote.git"))
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout), "ssh-ed25519 CCCC carol\n");

    let output = Command::new("git")
        .args(["show", "acl:gitolite.conf"])
        .current_dir(remote.dir.path().join("remote.git"))
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout), "repo r\n    RW = carol\n");
}

#[test]
fn reopening_existing_workdir() {
    let remote = TestRemote::seeded("repo r\n    R = alice\n", &[]);
    let first = remote.manager("shared").get().unwrap();

    // The first manager was dropped; its working copy can be reused.
    let second = remote.manager("shared").get().unwrap();
    assert_eq!(first.base_revision(), second.base_revision());
}
