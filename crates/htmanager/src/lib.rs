#![warn(missing_docs)]

//! Administration of an Apache htpasswd file shared by one repository.
//!
//! A fixed set of administrators may add, delete and reset other accounts;
//! every other user may only change their own password. Passwords are
//! stored as APR1-MD5 digests (`$apr1$salt$hash`), the format Apache's
//! `htpasswd -m` writes.
//!
//! Every change to the file happens under an exclusive lock on
//! `<file>.lock`, and rewrites replace the file atomically, so concurrent
//! administrators never lose each other's updates.
//!
//! # Example
//!
//! ```no_run
//! use htmanager::{AccessManager, Request};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = AccessManager::open("example", ["admin1", "admin2"], "/etc/htmanager", None)?;
//!
//! // The front-end authenticated "admin1" already.
//! let outcome = manager.process(
//!     "admin1",
//!     Request::AddUser {
//!         username: "alice",
//!         password: "password123",
//!         confirmation: "password123",
//!     },
//! )?;
//! println!("{outcome}");
//!
//! for user in manager.info("admin1").users {
//!     println!("{user}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod apr1_md5;
mod error;
mod manager;
mod settings;
mod store;

pub use apr1_md5::Error as Apr1Md5Error;
pub use error::ErrorKind;
pub use manager::{AccessManager, Error as ManagerError, Info, Outcome, Request};
pub use settings::{DEFAULT_PASSWD_DIR, Settings};
pub use store::{Account, CredentialStore, DEFAULT_LOCK_TIMEOUT, Error as StoreError};
