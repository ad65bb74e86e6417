//! Reserved frame addresses.
//!
//! Each address selects one logical channel on the link. Frames for any
//! other address are dropped by the link worker.

/// Device log text.
pub const LOG: u8 = 1;

/// Remote procedure calls and their responses.
pub const RPC: u8 = b'R';

/// Returns a human-readable name for an address.
pub fn address_name(address: u8) -> &'static str {
    match address {
        LOG => "LOG",
        RPC => "RPC",
        _ => "UNKNOWN",
    }
}

/// Returns true if the address has a built-in channel.
pub fn is_reserved(address: u8) -> bool {
    matches!(address, LOG | RPC)
}
