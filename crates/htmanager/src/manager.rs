//! Who may do what with a repository's password file.
//!
//! [`AccessManager`] sits between a front-end (a web form, the CLI) and the
//! [`CredentialStore`]: it takes the already authenticated user and a
//! [`Request`], checks the request against the administrator list and
//! forwards it to the store.

use std::fmt;
use std::path::Path;

use snafu::{Snafu, ensure};
use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::settings::Settings;
use crate::store::{self, CredentialStore};

/// Errors returned by [`AccessManager`].
#[derive(Debug, Snafu)]
pub enum Error {
    /// No repository name was given.
    #[snafu(display("No repository selected"))]
    EmptyRepository,

    /// The acting user isn't allowed to perform the request.
    #[snafu(display("Insufficient permissions for user '{actor}'"))]
    PermissionDenied { actor: String },

    /// The store rejected the operation.
    #[snafu(transparent)]
    Store { source: store::Error },
}

impl Error {
    /// Category of the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyRepository => ErrorKind::InvalidArgument,
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::Store { source } => source.kind(),
        }
    }
}

/// A change requested by the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Change a password; `username` defaults to the acting user.
    ChangePassword {
        username: Option<&'a str>,
        password: &'a str,
        confirmation: &'a str,
    },
    /// Create an account. Administrators only.
    AddUser {
        username: &'a str,
        password: &'a str,
        confirmation: &'a str,
    },
    /// Remove an account. Administrators only.
    DeleteUser { username: &'a str },
}

/// What a successful request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The user's digest was replaced.
    PasswordUpdated { username: String },
    /// A line was appended for the user.
    UserAdded { username: String },
    /// The user's line was removed.
    UserDeleted { username: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::PasswordUpdated { .. } => f.write_str("Password successfully updated."),
            Outcome::UserAdded { .. } => f.write_str("User successfully added."),
            Outcome::UserDeleted { .. } => f.write_str("User successfully deleted."),
        }
    }
}

/// Repository overview as shown to the acting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    /// Repository name.
    pub repository: String,
    /// Sorted administrator names.
    pub admins: Vec<String>,
    /// Sorted usernames from the password file.
    pub users: Vec<String>,
    /// The user the overview was built for.
    pub actor: String,
    /// Whether `actor` is an administrator.
    pub actor_is_admin: bool,
}

/// A repository's password file plus the rules for changing it.
#[derive(Debug)]
pub struct AccessManager {
    repository: String,
    store: CredentialStore,
}

impl AccessManager {
    /// Wraps an opened store.
    pub fn new(repository: impl Into<String>, store: CredentialStore) -> Result<Self, Error> {
        let repository = repository.into();
        ensure!(!repository.is_empty(), EmptyRepositorySnafu);
        Ok(Self { repository, store })
    }

    /// Opens `<passwd_dir>/<passwd_file>`, where the file name defaults to
    /// the repository name.
    pub fn open<I, S>(
        repository: &str,
        admins: I,
        passwd_dir: impl AsRef<Path>,
        passwd_file: Option<&str>,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ensure!(!repository.is_empty(), EmptyRepositorySnafu);
        let file = passwd_file.filter(|f| !f.is_empty()).unwrap_or(repository);
        let store = CredentialStore::open(passwd_dir.as_ref().join(file), admins)?;
        Self::new(repository, store)
    }

    /// Opens the repository described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        ensure!(!settings.repository.is_empty(), EmptyRepositorySnafu);
        let store = CredentialStore::open(settings.passwd_path(), settings.admins.iter().cloned())?
            .with_lock_timeout(settings.lock_timeout());
        Self::new(settings.repository.clone(), store)
    }

    /// Repository name.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The underlying store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Whether `user` is an administrator.
    pub fn is_admin(&self, user: &str) -> bool {
        self.store.is_admin(user)
    }

    /// Overview of the repository for `actor`.
    pub fn info(&self, actor: &str) -> Info {
        Info {
            repository: self.repository.clone(),
            admins: self.store.admin_names().to_vec(),
            users: self.store.usernames().into_iter().map(String::from).collect(),
            actor: actor.to_string(),
            actor_is_admin: self.is_admin(actor),
        }
    }

    /// Checks `request` against `actor`'s permissions and applies it.
    ///
    /// `actor` is trusted as given; authenticating it is the front-end's
    /// job.
    pub fn process(&mut self, actor: &str, request: Request<'_>) -> Result<Outcome, Error> {
        let is_admin = self.is_admin(actor);
        let outcome = match request {
            Request::ChangePassword {
                username,
                password,
                confirmation,
            } => {
                let target = username.unwrap_or(actor);
                self.authorize(actor, is_admin || target == actor)?;
                self.store.update_password(target, password, confirmation)?;
                Outcome::PasswordUpdated {
                    username: target.to_string(),
                }
            }
            Request::AddUser {
                username,
                password,
                confirmation,
            } => {
                self.authorize(actor, is_admin)?;
                self.store.add_user(username, password, confirmation)?;
                Outcome::UserAdded {
                    username: username.to_string(),
                }
            }
            Request::DeleteUser { username } => {
                self.authorize(actor, is_admin)?;
                self.store.delete_user(username)?;
                Outcome::UserDeleted {
                    username: username.to_string(),
                }
            }
        };
        info!(repository = %self.repository, actor, ?outcome, "request processed");
        Ok(outcome)
    }

    fn authorize(&self, actor: &str, allowed: bool) -> Result<(), Error> {
        if !allowed {
            warn!(repository = %self.repository, actor, "request denied");
        }
        ensure!(allowed, PermissionDeniedSnafu { actor });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn manager() -> (TempDir, AccessManager) {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("example"),
            "admin1:$apr1$ab12cd34$A7e5VoN5k.EWKFE.eC0lz.\nuser:$apr1$ab12cd34$A7e5VoN5k.EWKFE.eC0lz.\n",
        )
        .unwrap();
        let manager = AccessManager::open("example", ["admin2", "admin1"], dir.path(), None).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_open_requires_repository() {
        let dir = tempdir().unwrap();
        let err = AccessManager::open("", ["admin"], dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::EmptyRepository));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let err = AccessManager::open("example", ["admin"], dir.path(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_open_custom_file_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("users"), "").unwrap();
        let manager = AccessManager::open("example", ["admin"], dir.path(), Some("users")).unwrap();
        assert_eq!(manager.store().path(), dir.path().join("users"));
    }

    #[test]
    fn test_info() {
        let (_dir, manager) = manager();
        let info = manager.info("user");
        assert_eq!(info.repository, "example");
        assert_eq!(info.admins, ["admin1", "admin2"]);
        assert_eq!(info.users, ["admin1", "user"]);
        assert_eq!(info.actor, "user");
        assert!(!info.actor_is_admin);
        assert!(manager.info("admin2").actor_is_admin);
    }

    #[test]
    fn test_user_changes_own_password() {
        let (_dir, mut manager) = manager();
        let outcome = manager
            .process(
                "user",
                Request::ChangePassword {
                    username: None,
                    password: "new",
                    confirmation: "new",
                },
            )
            .unwrap();
        assert_eq!(outcome.to_string(), "Password successfully updated.");
        assert!(manager.store().verify_user("user", "new").unwrap());

        // Naming oneself explicitly is fine too.
        manager
            .process(
                "user",
                Request::ChangePassword {
                    username: Some("user"),
                    password: "newer",
                    confirmation: "newer",
                },
            )
            .unwrap();
        assert!(manager.store().verify_user("user", "newer").unwrap());
    }

    #[test]
    fn test_user_cannot_touch_others() {
        let (_dir, mut manager) = manager();
        let requests = [
            Request::ChangePassword {
                username: Some("admin1"),
                password: "x",
                confirmation: "x",
            },
            Request::AddUser {
                username: "eve",
                password: "x",
                confirmation: "x",
            },
            Request::DeleteUser { username: "admin1" },
        ];
        for request in requests {
            let err = manager.process("user", request).unwrap_err();
            assert!(matches!(err, Error::PermissionDenied { .. }), "{request:?}");
            assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        }
        assert_eq!(manager.store().usernames(), ["admin1", "user"]);
        assert!(manager.store().verify_user("admin1", "secret").unwrap());
    }

    #[test]
    fn test_admin_manages_users() {
        let (_dir, mut manager) = manager();

        let outcome = manager
            .process(
                "admin2",
                Request::AddUser {
                    username: "bob",
                    password: "p",
                    confirmation: "p",
                },
            )
            .unwrap();
        assert_eq!(outcome.to_string(), "User successfully added.");

        manager
            .process(
                "admin2",
                Request::ChangePassword {
                    username: Some("user"),
                    password: "reset",
                    confirmation: "reset",
                },
            )
            .unwrap();
        assert!(manager.store().verify_user("user", "reset").unwrap());

        let outcome = manager
            .process("admin2", Request::DeleteUser { username: "bob" })
            .unwrap();
        assert_eq!(outcome, Outcome::UserDeleted { username: "bob".into() });
        assert_eq!(outcome.to_string(), "User successfully deleted.");
        assert_eq!(manager.store().usernames(), ["admin1", "user"]);
    }

    #[test]
    fn test_store_errors_keep_their_kind() {
        let (_dir, mut manager) = manager();
        let err = manager
            .process(
                "admin1",
                Request::AddUser {
                    username: "user",
                    password: "p",
                    confirmation: "p",
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "User 'user' already exists");

        let err = manager
            .process(
                "admin1",
                Request::ChangePassword {
                    username: None,
                    password: "a",
                    confirmation: "b",
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_from_settings() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("example"), "").unwrap();
        let settings = Settings {
            repository: "example".into(),
            admins: vec!["admin".into()],
            passwd_dir: dir.path().to_path_buf(),
            passwd_file: None,
            lock_timeout_ms: 100,
        };
        let manager = AccessManager::from_settings(&settings).unwrap();
        assert_eq!(manager.repository(), "example");
        assert!(manager.store().is_empty());
        assert!(manager.is_admin("admin"));
    }
}
