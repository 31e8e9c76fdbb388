//! Apache htpasswd compatibility tests
//!
//! These tests verify that digests travel both ways between this crate and
//! the Apache htpasswd tool. They only run when /usr/bin/htpasswd is
//! available on the system.

use std::fs::File;
use std::path::Path;
use std::process::Command;

use htmanager::CredentialStore;
use tempfile::TempDir;

fn has_apache_htpasswd() -> bool {
    Path::new("/usr/bin/htpasswd").exists()
}

/// Runs Apache htpasswd, returning whether it exited successfully.
fn run_apache_htpasswd(args: &[&str]) -> bool {
    Command::new("/usr/bin/htpasswd")
        .args(args)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[test]
fn test_apache_md5_read() {
    if !has_apache_htpasswd() {
        return;
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("example");
    let file = path.to_str().unwrap();

    assert!(run_apache_htpasswd(&["-cmb", file, "alice", "testpass123"]));
    assert!(run_apache_htpasswd(&["-mb", file, "bob", "testpass456"]));

    let store = CredentialStore::open(&path, ["admin"]).unwrap();
    assert_eq!(store.usernames(), ["alice", "bob"]);
    assert!(store.account("alice").unwrap().digest().starts_with("$apr1$"));
    assert!(store.verify_user("alice", "testpass123").unwrap());
    assert!(store.verify_user("bob", "testpass456").unwrap());
    assert!(!store.verify_user("alice", "wrongpass").unwrap());
}

#[test]
fn test_apache_verifies_our_digests() {
    if !has_apache_htpasswd() {
        return;
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("example");
    File::create(&path).unwrap();
    let file = path.to_str().unwrap();

    let mut store = CredentialStore::open(&path, ["admin"]).unwrap();
    store.add_user("alice", "testpass123", "testpass123").unwrap();
    store.add_user("bob", "testpass456", "testpass456").unwrap();
    store.update_password("bob", "changed", "changed").unwrap();

    assert!(run_apache_htpasswd(&["-vb", file, "alice", "testpass123"]));
    assert!(!run_apache_htpasswd(&["-vb", file, "alice", "wrongpass"]));
    assert!(run_apache_htpasswd(&["-vb", file, "bob", "changed"]));
    assert!(!run_apache_htpasswd(&["-vb", file, "bob", "testpass456"]));
}

#[test]
fn test_apache_sees_our_deletions() {
    if !has_apache_htpasswd() {
        return;
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("example");
    let file = path.to_str().unwrap();
    assert!(run_apache_htpasswd(&["-cmb", file, "alice", "testpass123"]));
    assert!(run_apache_htpasswd(&["-mb", file, "bob", "testpass456"]));

    let mut store = CredentialStore::open(&path, ["admin"]).unwrap();
    store.delete_user("alice").unwrap();

    assert!(!run_apache_htpasswd(&["-vb", file, "alice", "testpass123"]));
    assert!(run_apache_htpasswd(&["-vb", file, "bob", "testpass456"]));
}
