use clap::Parser;
use htmanager::{AccessManager, Info, ManagerError, Request, Settings};
use snafu::ResultExt;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// Manage the htpasswd file of a repository.
///
/// Administrators listed in the configuration may add, delete and reset
/// accounts; everybody else may change their own password.
#[derive(Parser)]
#[command(name = "htmanager")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, global = true, env = "HTMANAGER_CONFIG")]
    config: Option<PathBuf>,

    /// The authenticated user on whose behalf the command runs
    #[arg(long, short, global = true, env = "REMOTE_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show the administrators and users of the repository
    Info,

    /// Change a password (your own unless you are an administrator)
    Passwd {
        /// User whose password to change; defaults to --user
        username: Option<String>,
        /// Read password and confirmation from stdin, one per line
        #[arg(long)]
        stdin: bool,
    },

    /// Add a new user (administrators only)
    Add {
        /// Username to add
        username: String,
        /// Read password and confirmation from stdin, one per line
        #[arg(long)]
        stdin: bool,
    },

    /// Delete a user (administrators only)
    Delete {
        /// Username to delete
        username: String,
    },

    /// Check a user's password
    ///
    /// Needs no --user: it only reads the file, like `htpasswd -v`, and
    /// anyone who can run this binary can read the password file anyway.
    Verify {
        /// Username to check
        username: String,
        /// Read the password from stdin
        #[arg(long)]
        stdin: bool,
    },
}

type Result<T> = ::std::result::Result<T, snafu::Whatever>;

struct NewPassword {
    password: Zeroizing<String>,
    confirmation: Zeroizing<String>,
}

/// First line is the password, the second the confirmation. A single line
/// serves as both.
fn read_new_password_from_stdin() -> Result<NewPassword> {
    let mut input = Zeroizing::new(String::new());
    io::stdin()
        .read_to_string(&mut input)
        .whatever_context("Can't read password from stdin")?;

    let mut lines = input.lines();
    let password = Zeroizing::new(lines.next().unwrap_or_default().to_string());
    let confirmation = match lines.next() {
        Some(line) => Zeroizing::new(line.to_string()),
        None => password.clone(),
    };
    Ok(NewPassword {
        password,
        confirmation,
    })
}

fn prompt_new_password() -> Result<NewPassword> {
    let password = rpassword::prompt_password("New password: ")
        .whatever_context("Can't prompt for new password")
        .map(Zeroizing::new)?;
    let confirmation = rpassword::prompt_password("Re-type new password: ")
        .whatever_context("Can't prompt for password re-type")
        .map(Zeroizing::new)?;
    Ok(NewPassword {
        password,
        confirmation,
    })
}

fn new_password(from_stdin: bool) -> Result<NewPassword> {
    if from_stdin {
        read_new_password_from_stdin()
    } else {
        prompt_new_password()
    }
}

fn read_password(from_stdin: bool) -> Result<Zeroizing<String>> {
    if from_stdin {
        let mut password = String::new();
        io::stdin()
            .read_to_string(&mut password)
            .whatever_context("Can't read password from stdin")?;
        Ok(Zeroizing::new(password.trim_end_matches(['\n', '\r']).to_string()))
    } else {
        rpassword::prompt_password("Enter password: ")
            .whatever_context("Can't prompt for password")
            .map(Zeroizing::new)
    }
}

fn acting_user(user: Option<&str>) -> Result<&str> {
    match user {
        Some(user) if !user.is_empty() => Ok(user),
        _ => snafu::whatever!("No authenticated user, pass --user or set REMOTE_USER"),
    }
}

fn describe(e: &ManagerError) -> String {
    format!("Fail ({})", e.kind())
}

fn print_info(info: &Info) {
    println!("{} repository", info.repository);
    println!("Repository master(s): {}", info.admins.join(", "));
    let users: Vec<String> = info
        .users
        .iter()
        .map(|user| {
            if *user == info.actor {
                format!("*{user}*")
            } else {
                user.clone()
            }
        })
        .collect();
    println!("Repository user(s): {}", users.join(", "));
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let settings =
        Settings::load(cli.config.as_deref()).whatever_context("Can't load configuration")?;
    let mut manager =
        AccessManager::from_settings(&settings).with_whatever_context(|e| describe(e))?;
    tracing::debug!(
        repository = manager.repository(),
        path = %manager.store().path().display(),
        "repository opened"
    );

    let actor = || acting_user(cli.user.as_deref());

    match &cli.command {
        Commands::Info => {
            print_info(&manager.info(cli.user.as_deref().unwrap_or_default()));
            Ok(())
        }

        Commands::Passwd { username, stdin } => {
            let actor = actor()?;
            let new = new_password(*stdin)?;
            let outcome = manager
                .process(
                    actor,
                    Request::ChangePassword {
                        username: username.as_deref(),
                        password: &new.password,
                        confirmation: &new.confirmation,
                    },
                )
                .with_whatever_context(|e| describe(e))?;
            println!("{outcome}");
            Ok(())
        }

        Commands::Add { username, stdin } => {
            let actor = actor()?;
            let new = new_password(*stdin)?;
            let outcome = manager
                .process(
                    actor,
                    Request::AddUser {
                        username,
                        password: &new.password,
                        confirmation: &new.confirmation,
                    },
                )
                .with_whatever_context(|e| describe(e))?;
            println!("{outcome}");
            Ok(())
        }

        Commands::Delete { username } => {
            let actor = actor()?;
            let outcome = manager
                .process(actor, Request::DeleteUser { username })
                .with_whatever_context(|e| describe(e))?;
            println!("{outcome}");
            Ok(())
        }

        Commands::Verify { username, stdin } => {
            let password = read_password(*stdin)?;
            match manager.store().verify_user(username, &password) {
                Ok(true) => {
                    println!("user {username}: password correct");
                    Ok(())
                }
                Ok(false) => {
                    snafu::whatever!("user {}: password incorrect", username)
                }
                Err(e) => {
                    snafu::whatever!("user {}: {}", username, e)
                }
            }
        }
    }
}

#[snafu::report]
fn main() -> Result<()> {
    run()
}
