//! Apache APR1-MD5 password digests.
//!
//! The format is `$apr1$<salt>$<hash>`, where the salt is at most 8
//! characters and the hash is the 16-byte result of 1000 MD5 rounds
//! encoded into 22 characters of the crypt alphabet.
//!
//! The algorithm follows `apr_md5_encode()` from Apache APR
//! (`crypto/apr_md5.c`), which is the FreeBSD MD5 crypt() with the magic
//! string changed to `$apr1$`. Digests produced here are accepted by Apache
//! httpd, nginx and `htpasswd -m`.
//!
//! MD5 is broken as a general purpose hash. APR1 is kept for
//! interoperability with existing credential files.

use md5::{Digest, Md5};
use snafu::Snafu;

use crate::error::ErrorKind;

/// Alphabet of APR's `to64()`.
const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Characters new salts are drawn from.
const SALT_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// APR1-MD5 digest prefix.
pub const APR1_PREFIX: &str = "$apr1$";

/// Salt length in characters.
pub const APR1_SALT_LEN: usize = 8;

/// Length of the encoded hash part.
pub const APR1_HASH_LEN: usize = 22;

const APR1_ROUNDS: u32 = 1000;

/// Byte triples of the final digest, in output order.
const GROUPS: [[usize; 3]; 5] = [[0, 6, 12], [1, 7, 13], [2, 8, 14], [3, 9, 15], [4, 10, 5]];

/// Errors of the APR1 hasher.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The OS random source could not produce a salt.
    #[snafu(display("Can't generate a salt: {message}"))]
    Random { message: String },
}

impl Error {
    /// Category of the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Random { .. } => ErrorKind::Random,
        }
    }
}

/// Appends `n` characters of `v`, least significant 6 bits first.
fn to64(out: &mut String, mut v: u32, n: usize) {
    for _ in 0..n {
        out.push(ITOA64[(v & 0x3f) as usize] as char);
        v >>= 6;
    }
}

fn encode_digest(digest: &[u8; 16]) -> String {
    let mut out = String::with_capacity(APR1_HASH_LEN);
    for [a, b, c] in GROUPS {
        let v = u32::from(digest[a]) << 16 | u32::from(digest[b]) << 8 | u32::from(digest[c]);
        to64(&mut out, v, 4);
    }
    to64(&mut out, u32::from(digest[11]), 2);
    out
}

/// Generates a fresh 8-character salt from `[a-z0-9]`.
pub fn generate_salt() -> Result<String, Error> {
    // 252 is the largest multiple of 36 that fits in a byte, so rejecting
    // anything above keeps the distribution uniform.
    const LIMIT: u8 = 252;

    let mut salt = String::with_capacity(APR1_SALT_LEN);
    let mut pool = [0u8; 16];
    while salt.len() < APR1_SALT_LEN {
        getrandom::fill(&mut pool).map_err(|e| Error::Random {
            message: e.to_string(),
        })?;
        for byte in pool.iter().copied().filter(|&b| b < LIMIT) {
            if salt.len() == APR1_SALT_LEN {
                break;
            }
            salt.push(SALT_ALPHABET[usize::from(byte % 36)] as char);
        }
    }
    Ok(salt)
}

/// Cuts the salt down to its first 8 bytes, backing off to a char boundary.
fn clip_salt(salt: &str) -> &str {
    let mut end = salt.len().min(APR1_SALT_LEN);
    while !salt.is_char_boundary(end) {
        end -= 1;
    }
    &salt[..end]
}

/// Computes the APR1 digest of `password` with the given salt.
///
/// Deterministic: the same password and salt always give the same digest.
/// Salts longer than 8 bytes are truncated, as APR does.
pub fn hash_with_salt(password: &str, salt: &str) -> String {
    let pw = password.as_bytes();
    let salt = clip_salt(salt);

    let alternate: [u8; 16] = Md5::new()
        .chain_update(pw)
        .chain_update(salt)
        .chain_update(pw)
        .finalize()
        .into();

    let mut ctx = Md5::new();
    ctx.update(pw);
    ctx.update(APR1_PREFIX);
    ctx.update(salt);

    let mut remaining = pw.len();
    while remaining > 0 {
        let n = remaining.min(alternate.len());
        ctx.update(&alternate[..n]);
        remaining -= n;
    }

    let mut i = pw.len();
    while i > 0 {
        if i & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&pw[..1]);
        }
        i >>= 1;
    }

    let mut digest: [u8; 16] = ctx.finalize().into();

    for round in 0..APR1_ROUNDS {
        let odd = round & 1 == 1;
        let mut ctx = Md5::new();
        if odd {
            ctx.update(pw);
        } else {
            ctx.update(digest);
        }
        if round % 3 != 0 {
            ctx.update(salt);
        }
        if round % 7 != 0 {
            ctx.update(pw);
        }
        if odd {
            ctx.update(digest);
        } else {
            ctx.update(pw);
        }
        digest = ctx.finalize().into();
    }

    format!("{APR1_PREFIX}{salt}${}", encode_digest(&digest))
}

/// Hashes `password` with a freshly generated salt.
///
/// Two calls with the same password give different digests.
pub fn hash(password: &str) -> Result<String, Error> {
    let salt = generate_salt()?;
    Ok(hash_with_salt(password, &salt))
}

/// Splits `$apr1$<salt>$<hash>` and returns the salt.
///
/// `None` when the digest doesn't have that shape.
fn embedded_salt(stored: &str) -> Option<&str> {
    let rest = stored.strip_prefix(APR1_PREFIX)?;
    let (salt, hash) = rest.split_once('$')?;
    let well_formed = !salt.is_empty()
        && salt.len() <= APR1_SALT_LEN
        && salt.is_ascii()
        && !hash.is_empty()
        && !hash.contains('$');
    well_formed.then_some(salt)
}

/// Checks `password` against a stored APR1 digest.
///
/// Malformed digests never match.
pub fn verify(password: &str, stored: &str) -> bool {
    let Some(salt) = embedded_salt(stored) else {
        return false;
    };
    let computed = hash_with_salt(password, salt);

    // Length is not secret; the content comparison doesn't short-circuit.
    computed.len() == stored.len()
        && computed
            .bytes()
            .zip(stored.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
