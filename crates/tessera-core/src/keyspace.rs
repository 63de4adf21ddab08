//! Key namespaces.
//!
//! - `==name`: frozen, the first writer (by timestamp) owns the key forever.
//! - `:<address>.<rest>`: address-bound, only `<address>` may write.
//! - anything else: plain, newest write wins.

use crate::crypto::Address;

/// Prefix of frozen (first-writer-wins) keys.
pub const FROZEN_PREFIX: &str = "==";

/// Prefix of address-bound keys.
pub const ADDRESS_PREFIX: &str = ":";

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 1024;

/// The namespace a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpace<'a> {
    /// `==name`
    Frozen { name: &'a str },
    /// `:<address>.<rest>`; `rest` is empty when the key has no `.`.
    AddressBound { address: &'a str, rest: &'a str },
    /// Everything else.
    Plain,
}

impl<'a> KeySpace<'a> {
    /// Classify a key by its prefix.
    pub fn of(key: &'a str) -> Self {
        if let Some(name) = key.strip_prefix(FROZEN_PREFIX) {
            return KeySpace::Frozen { name };
        }
        if let Some(body) = key.strip_prefix(ADDRESS_PREFIX) {
            let (address, rest) = body.split_once('.').unwrap_or((body, ""));
            return KeySpace::AddressBound { address, rest };
        }
        KeySpace::Plain
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, KeySpace::Frozen { .. })
    }
}

/// Separates a CRDT key from the writer in a change-log storage slot.
pub const LOG_SEPARATOR: char = '\u{1f}';

/// Storage slot holding `address`'s latest change log for the CRDT `key`.
pub fn crdt_log_key(key: &str, address: &Address) -> String {
    format!("{}{}", crdt_log_prefix(key), address.to_hex())
}

/// Prefix shared by every writer's change-log slot for `key`.
pub fn crdt_log_prefix(key: &str) -> String {
    format!("{key}{LOG_SEPARATOR}")
}

/// Build a frozen key for `name`.
pub fn frozen_key(name: &str) -> String {
    format!("{FROZEN_PREFIX}{name}")
}

/// Build an address-bound key owned by `address`.
pub fn address_key(address: &Address, rest: &str) -> String {
    format!("{ADDRESS_PREFIX}{}.{rest}", address.to_hex())
}
