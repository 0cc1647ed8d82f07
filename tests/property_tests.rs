//! Property-based tests for the config model and codec.
//!
//! Configs are built from random operation sequences through the public
//! API, so every generated config satisfies the model invariants by
//! construction (or the test fails).

use proptest::prelude::*;

use gitacl::core::codec;
use gitacl::core::config::Config;
use gitacl::core::types::{Grantee, Permission};

const USERS: &[&str] = &["alice", "bob", "carol", "dave", "eve@example.org"];
const GROUPS: &[&str] = &["@admins", "@devs", "@ops", "@qa", "@all"];
const REPOS: &[&str] = &["gitolite-admin", "testing", "tools/ci", "web"];
const KEYS: &[&str] = &["gitweb.owner", "hooks.mailinglist", "core.sharedRepository"];
const VALUES: &[&str] = &["alice", "a-b", "dev list", "0660", "a$b", "x|y"];

/// One mutation against a config.
#[derive(Debug, Clone)]
enum Op {
    CreateGroup(usize),
    CreateRepo(usize),
    AddUser(usize, usize),
    AddGroup(usize, usize),
    RemoveMember(usize, usize),
    Grant(usize, usize, Permission),
    Revoke(usize, usize),
    SetConfig(usize, usize, usize),
    RemoveGroup(usize),
    RemoveUser(usize),
}

fn permission() -> impl Strategy<Value = Permission> {
    prop::sample::select(Permission::LEVELS.to_vec())
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..GROUPS.len()).prop_map(Op::CreateGroup),
        (0..REPOS.len()).prop_map(Op::CreateRepo),
        (0..GROUPS.len(), 0..USERS.len()).prop_map(|(g, u)| Op::AddUser(g, u)),
        (0..GROUPS.len(), 0..GROUPS.len()).prop_map(|(p, c)| Op::AddGroup(p, c)),
        (0..GROUPS.len(), 0..USERS.len()).prop_map(|(g, u)| Op::RemoveMember(g, u)),
        (0..REPOS.len(), 0..USERS.len() + GROUPS.len(), permission())
            .prop_map(|(r, g, p)| Op::Grant(r, g, p)),
        (0..REPOS.len(), 0..USERS.len() + GROUPS.len()).prop_map(|(r, g)| Op::Revoke(r, g)),
        (0..REPOS.len(), 0..KEYS.len(), 0..VALUES.len())
            .prop_map(|(r, k, v)| Op::SetConfig(r, k, v)),
        (0..GROUPS.len()).prop_map(Op::RemoveGroup),
        (0..USERS.len()).prop_map(Op::RemoveUser),
    ]
}

fn grantee(index: usize) -> &'static str {
    if index < USERS.len() {
        USERS[index]
    } else {
        GROUPS[index - USERS.len()]
    }
}

/// Apply an op, ignoring rejections.
fn apply(config: &mut Config, op: &Op) -> bool {
    let result = match *op {
        Op::CreateGroup(g) => config.create_group(GROUPS[g]).map(|_| ()),
        Op::CreateRepo(r) => config.create_repository(REPOS[r]).map(|_| ()),
        Op::AddUser(g, u) => config.add_user_to_group(GROUPS[g], USERS[u]),
        Op::AddGroup(p, c) => config.add_group_to_group(GROUPS[p], GROUPS[c]),
        Op::RemoveMember(g, u) => {
            let member = Grantee::parse(USERS[u]).unwrap();
            config.remove_member(GROUPS[g], member)
        }
        Op::Grant(r, g, p) => config.set_permission(REPOS[r], grantee(g), p),
        Op::Revoke(r, g) => config.revoke_permission(REPOS[r], grantee(g)),
        Op::SetConfig(r, k, v) => config.set_config_key(REPOS[r], KEYS[k], VALUES[v]),
        Op::RemoveGroup(g) => config.remove_group(GROUPS[g]).map(|_| ()),
        Op::RemoveUser(u) => config.remove_user(USERS[u]).map(|_| ()),
    };
    result.is_ok()
}

/// A config built from random ops. Every user carries a key so that it
/// has a representation in the on-disk layout.
fn config() -> impl Strategy<Value = Config> {
    prop::collection::vec(op(), 0..60).prop_map(|ops| {
        let mut config = Config::new();
        for user in USERS {
            config.create_user(user).unwrap();
            config
                .set_key(user, "", &format!("ssh-ed25519 AAAA {user}"))
                .unwrap();
        }
        for op in &ops {
            apply(&mut config, op);
        }
        config
    })
}

proptest! {
    /// Parsing rendered output yields an equal config.
    #[test]
    fn render_parse_round_trip(config in config()) {
        let files = codec::render(&config);
        let parsed = codec::parse(&files).unwrap();
        prop_assert_eq!(&parsed, &config);
        prop_assert!(parsed.recorder().is_empty());
    }

    /// Rendering is deterministic and stable across a round trip.
    #[test]
    fn render_is_idempotent(config in config()) {
        let first = codec::render(&config);
        let second = codec::render(&codec::parse(&first).unwrap());
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.fingerprint(), codec::render(&config).fingerprint());
    }

    /// A grantee holds at most one level per repository.
    #[test]
    fn permission_exclusivity(config in config()) {
        for repo in config.repositories() {
            let mut seen = std::collections::BTreeSet::new();
            for grantees in repo.permissions().values() {
                prop_assert!(!grantees.is_empty());
                for grantee in grantees {
                    prop_assert!(seen.insert(grantee.clone()), "{} appears twice", grantee);
                    prop_assert!(config.owns(grantee));
                }
            }
        }
    }

    /// No group reaches itself, directly or transitively.
    #[test]
    fn group_graph_is_acyclic(config in config()) {
        for group in config.groups() {
            let name = group.id().as_str();
            for child in group.groups() {
                prop_assert_ne!(child.as_str(), name);
                prop_assert!(!config.contains_group(child.as_str(), name).unwrap());
            }
            prop_assert!(!config.transitive_members(name)
                .unwrap()
                .contains(&Grantee::parse(name).unwrap()));
        }
    }

    /// The reserved group survives every op sequence, empty.
    #[test]
    fn reserved_group_is_permanent(config in config()) {
        let all = config.group("@all").unwrap();
        prop_assert!(all.is_empty());
    }

    /// A rejected op leaves the config and its journal untouched; an
    /// accepted op records exactly one change.
    #[test]
    fn ops_are_atomic(config in config(), op in op()) {
        let mut after = config.clone();
        let accepted = apply(&mut after, &op);
        if accepted {
            prop_assert_eq!(after.recorder().len(), config.recorder().len() + 1);
        } else {
            prop_assert_eq!(&after, &config);
            prop_assert_eq!(after.recorder().len(), config.recorder().len());
        }
    }
}
