use std::fmt;

/// Broad category of a failure, for callers that present errors to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required value was empty or malformed.
    InvalidArgument,
    /// The password and its confirmation differ.
    Validation,
    /// The user already exists.
    Conflict,
    /// The credential file or the user doesn't exist.
    NotFound,
    /// The file changed under us between the existence check and the rewrite.
    Logic,
    /// The file lock couldn't be acquired in time.
    Concurrency,
    /// The acting user isn't allowed to perform the request.
    PermissionDenied,
    /// Reading or writing the credential file failed.
    Io,
    /// The OS random source failed.
    Random,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not found",
            ErrorKind::Logic => "logic",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Io => "io",
            ErrorKind::Random => "random",
        };
        f.write_str(name)
    }
}
