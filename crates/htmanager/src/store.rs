//! The htpasswd-style credential file and the operations on it.

mod lock;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::apr1_md5;
use crate::error::ErrorKind;
use lock::FileLock;

/// How long a mutation waits for another writer by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during credential file operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The credential file doesn't exist.
    #[snafu(display("The password file '{}' does not exist", path.display()))]
    FileNotFound { path: PathBuf },

    /// No administrators were configured.
    #[snafu(display("At least one administrator must be configured"))]
    NoAdministrators,

    /// A username, password or confirmation was empty.
    #[snafu(display("All arguments must be given"))]
    MissingArguments,

    /// The username can't be stored in the file.
    #[snafu(display("Username '{}' contains ':' or a line break", username.escape_debug()))]
    UsernameInvalidCharacter { username: String },

    /// Password and confirmation differ.
    #[snafu(display("The new password does not match its confirmation"))]
    PasswordMismatch,

    /// User already exists.
    #[snafu(display("User '{username}' already exists"))]
    UserAlreadyExists { username: String },

    /// User isn't in the store.
    #[snafu(display("User '{username}' does not exist"))]
    UserNotFound { username: String },

    /// The user was listed but no line of the file matched during a rewrite.
    #[snafu(display("User '{username}' not found in the password file"))]
    UserVanished { username: String },

    /// Failed to read the credential file.
    #[snafu(display("Failed to read password file '{}'", path.display()))]
    FileRead {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write the credential file.
    #[snafu(display("Failed to write password file '{}'", path.display()))]
    FileWrite {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to open or lock the lock file.
    #[snafu(display("Failed to lock '{}'", path.display()))]
    LockOpen {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Another writer held the lock for too long.
    #[snafu(display(
        "Password file '{}' is busy, gave up after {timeout:?}",
        path.display()
    ))]
    LockTimeout { path: PathBuf, timeout: Duration },

    /// Failed to hash the password.
    #[snafu(display("Failed to hash password"))]
    Hash { source: apr1_md5::Error },
}

impl Error {
    /// Category of the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoAdministrators
            | Error::MissingArguments
            | Error::UsernameInvalidCharacter { .. } => ErrorKind::InvalidArgument,
            Error::PasswordMismatch => ErrorKind::Validation,
            Error::UserAlreadyExists { .. } => ErrorKind::Conflict,
            Error::FileNotFound { .. } | Error::UserNotFound { .. } => ErrorKind::NotFound,
            Error::UserVanished { .. } => ErrorKind::Logic,
            Error::LockTimeout { .. } => ErrorKind::Concurrency,
            Error::FileRead { .. } | Error::FileWrite { .. } | Error::LockOpen { .. } => {
                ErrorKind::Io
            }
            Error::Hash { source } => source.kind(),
        }
    }
}

/// One `username:digest` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    username: String,
    digest: String,
}

impl Account {
    /// Parses a line without its terminator.
    ///
    /// A line without `:` is taken whole as the username, with an empty
    /// digest.
    fn parse(line: &str) -> Self {
        let (username, digest) = line.split_once(':').unwrap_or((line, ""));
        Self {
            username: username.to_string(),
            digest: digest.to_string(),
        }
    }

    /// The username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The stored digest, verbatim.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// A raw file line without its terminator, or `None` for blank lines.
///
/// Both loading and the rewrite scan go through here, so they agree on
/// what a record is.
fn record_line(raw: &str) -> Option<&str> {
    let line = raw.trim_end_matches(['\n', '\r']);
    (!line.trim().is_empty()).then_some(line)
}

/// Username of a raw file line, or `None` for blank lines.
fn record_username(raw: &str) -> Option<&str> {
    record_line(raw).map(|line| line.split_once(':').map_or(line, |(username, _)| username))
}

fn read_file(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).context(FileReadSnafu { path })
}

fn parse_accounts(content: &str) -> Vec<Account> {
    let mut accounts: Vec<Account> = content
        .split_inclusive('\n')
        .filter_map(record_line)
        .map(Account::parse)
        .collect();
    accounts.sort_by(|a, b| a.username.cmp(&b.username));
    accounts
}

/// Replaces `path` with `content` via a temporary file in the same directory.
///
/// Readers see either the old or the new file, never a partial one.
fn replace_file(path: &Path, content: &str) -> Result<(), Error> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path)
        .context(FileReadSnafu { path })?
        .permissions();

    let mut tmp = NamedTempFile::new_in(dir).context(FileWriteSnafu { path })?;
    tmp.write_all(content.as_bytes())
        .context(FileWriteSnafu { path })?;
    tmp.as_file()
        .set_permissions(permissions)
        .context(FileWriteSnafu { path })?;
    tmp.as_file().sync_all().context(FileWriteSnafu { path })?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .context(FileWriteSnafu { path })?;
    Ok(())
}

fn check_arguments(username: &str, password: &str, confirmation: &str) -> Result<(), Error> {
    ensure!(
        !username.is_empty() && !password.is_empty() && !confirmation.is_empty(),
        MissingArgumentsSnafu
    );
    ensure!(password == confirmation, PasswordMismatchSnafu);
    Ok(())
}

/// The credential file of one repository, plus its administrators.
///
/// The store doesn't authorize anything: callers decide who may call which
/// mutation (see [`AccessManager`](crate::AccessManager)).
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    accounts: Vec<Account>,
    admin_names: Vec<String>,
    lock_timeout: Duration,
}

impl CredentialStore {
    /// Opens an existing credential file.
    ///
    /// Fails if the file doesn't exist or `admin_names` is empty.
    pub fn open<I, S>(path: impl AsRef<Path>, admin_names: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path = path.as_ref();
        ensure!(path.is_file(), FileNotFoundSnafu { path });

        let mut admin_names: Vec<String> = admin_names.into_iter().map(Into::into).collect();
        admin_names.sort();
        admin_names.dedup();
        ensure!(!admin_names.is_empty(), NoAdministratorsSnafu);

        let mut store = Self {
            path: path.to_path_buf(),
            accounts: Vec::new(),
            admin_names,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };
        store.reload()?;
        Ok(store)
    }

    /// Sets how long mutations wait for the file lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Re-reads the accounts from disk.
    pub fn reload(&mut self) -> Result<(), Error> {
        let content = read_file(&self.path)?;
        self.accounts = parse_accounts(&content);
        debug!(path = %self.path.display(), accounts = self.accounts.len(), "loaded password file");
        Ok(())
    }

    fn lock(&self) -> Result<FileLock, Error> {
        FileLock::acquire(&self.path, self.lock_timeout)
    }

    /// Adds a new user by appending one line to the file.
    pub fn add_user(
        &mut self,
        username: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<(), Error> {
        check_arguments(username, password, confirmation)?;
        ensure!(
            !username.contains([':', '\r', '\n']),
            UsernameInvalidCharacterSnafu { username }
        );
        ensure!(!self.contains(username), UserAlreadyExistsSnafu { username });

        let digest = apr1_md5::hash(password).context(HashSnafu)?;
        {
            let _lock = self.lock()?;
            let content = read_file(&self.path)?;
            ensure!(
                !content
                    .split_inclusive('\n')
                    .any(|raw| record_username(raw) == Some(username)),
                UserAlreadyExistsSnafu { username }
            );

            let mut record = String::new();
            if !content.is_empty() && !content.ends_with('\n') {
                record.push('\n');
            }
            record.push_str(username);
            record.push(':');
            record.push_str(&digest);
            record.push('\n');

            let path = self.path.as_path();
            let mut file = OpenOptions::new()
                .append(true)
                .open(path)
                .context(FileWriteSnafu { path })?;
            file.write_all(record.as_bytes())
                .context(FileWriteSnafu { path })?;
            file.sync_all().context(FileWriteSnafu { path })?;
        }
        info!(path = %self.path.display(), username, "user added");

        self.reload()
    }

    /// Replaces the digest of an existing user.
    pub fn update_password(
        &mut self,
        username: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<(), Error> {
        check_arguments(username, password, confirmation)?;
        ensure!(self.contains(username), UserNotFoundSnafu { username });

        let digest = apr1_md5::hash(password).context(HashSnafu)?;
        self.rewrite(username, Some(&format!("{username}:{digest}\n")))?;
        info!(path = %self.path.display(), username, "password updated");

        self.reload()
    }

    /// Removes a user's line from the file.
    pub fn delete_user(&mut self, username: &str) -> Result<(), Error> {
        ensure!(!username.is_empty(), MissingArgumentsSnafu);
        ensure!(self.contains(username), UserNotFoundSnafu { username });

        self.rewrite(username, None)?;
        info!(path = %self.path.display(), username, "user deleted");

        self.reload()
    }

    /// Rewrites the file under the lock, replacing the first line of
    /// `username` with `replacement`, or dropping it when `None`.
    ///
    /// Every other line is kept byte for byte.
    fn rewrite(&self, username: &str, replacement: Option<&str>) -> Result<(), Error> {
        let _lock = self.lock()?;
        let content = read_file(&self.path)?;

        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let Some(target) = lines
            .iter()
            .position(|raw| record_username(raw) == Some(username))
        else {
            warn!(path = %self.path.display(), username, "user vanished from password file");
            return UserVanishedSnafu { username }.fail();
        };

        let mut updated = String::with_capacity(content.len() + 64);
        for (index, raw) in lines.iter().enumerate() {
            if index != target {
                updated.push_str(raw);
            } else if let Some(replacement) = replacement {
                updated.push_str(replacement);
            }
        }

        replace_file(&self.path, &updated)
    }

    /// Checks a user's password against their stored digest.
    pub fn verify_user(&self, username: &str, password: &str) -> Result<bool, Error> {
        let account = self
            .account(username)
            .context(UserNotFoundSnafu { username })?;
        Ok(apr1_md5::verify(password, &account.digest))
    }

    /// All accounts, sorted by username.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Sorted usernames.
    pub fn usernames(&self) -> Vec<&str> {
        self.accounts.iter().map(Account::username).collect()
    }

    /// Sorted administrator names.
    pub fn admin_names(&self) -> &[String] {
        &self.admin_names
    }

    /// Whether `username` is one of the administrators.
    pub fn is_admin(&self, username: &str) -> bool {
        self.admin_names.binary_search_by(|a| a.as_str().cmp(username)).is_ok()
    }

    /// Looks up an account.
    pub fn account(&self, username: &str) -> Option<&Account> {
        self.accounts
            .binary_search_by(|a| a.username.as_str().cmp(username))
            .ok()
            .map(|index| &self.accounts[index])
    }

    /// Whether the user exists.
    pub fn contains(&self, username: &str) -> bool {
        self.account(username).is_some()
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the file holds no accounts.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
