//! # Ident module
//!
//! This module provide helpers to derive resource identifiers and credentials.
//! Every derived value is a pure function of its inputs, so that the broker
//! is able to recompute them without storing anything.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{distributions::Alphanumeric, seq::SliceRandom, Rng};
use sha2::{Digest, Sha256};

// -----------------------------------------------------------------------------
// Constants

pub const MASTER_USERNAME_LENGTH: usize = 16;
pub const MASTER_PASSWORD_LENGTH: usize = 32;
pub const BINDING_USERNAME_LENGTH: usize = 16;
pub const BINDING_PASSWORD_LENGTH: usize = 32;

const ALPHABETIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

// -----------------------------------------------------------------------------
// identifiers

/// returns the rds identifier of the instance (or cluster), it only contains
/// letters, digits and hyphens
pub fn db_identifier(prefix: &str, instance_id: &str) -> String {
    format!("{}-{}", prefix.replace('_', "-"), instance_id.replace('_', "-"))
}

/// returns the name of the default database of the instance
pub fn db_name(prefix: &str, instance_id: &str) -> String {
    format!("{}_{}", prefix.replace('-', "_"), instance_id.replace('-', "_"))
}

// -----------------------------------------------------------------------------
// credentials

/// returns a random alphanumeric string whose first character is a letter,
/// as required for database user names
pub fn master_username() -> String {
    let mut rng = rand::thread_rng();
    let first = ALPHABETIC.choose(&mut rng).copied().unwrap_or(b'u') as char;

    std::iter::once(first)
        .chain(random(MASTER_USERNAME_LENGTH - 1).chars())
        .collect()
}

/// returns the master password of the instance, derived from the optional
/// seed and the instance identifier
pub fn master_password(seed: Option<&str>, instance_id: &str) -> String {
    let input = format!("{}{}", seed.unwrap_or_default(), instance_id);

    hash(&input, MASTER_PASSWORD_LENGTH)
}

/// returns the database user name of the binding, it depends on the binding
/// identifier only
pub fn binding_username(binding_id: &str) -> String {
    let name = format!("u{}", hash(binding_id, BINDING_USERNAME_LENGTH));

    name.chars()
        .take(BINDING_USERNAME_LENGTH)
        .collect::<String>()
        .replace('-', "_")
}

pub fn binding_password() -> String {
    random(BINDING_PASSWORD_LENGTH)
}

// -----------------------------------------------------------------------------
// helpers

fn random(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn hash(input: &str, length: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());

    URL_SAFE_NO_PAD.encode(digest).chars().take(length).collect()
}
