//! `HashSHA256` integrity header
//!
//! The header carries the lowercase hex HMAC-SHA-256 of a body under the
//! shared secret. Both sides compute it over the uncompressed bytes.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Name of the integrity header
pub const HEADER: &str = "HashSHA256";

/// Hex HMAC-SHA-256 of `body` under `key`
pub fn sign(body: &[u8], key: &str) -> String {
    hex::encode(mac(body, key).finalize().into_bytes())
}

/// Check a received hex digest against `body`
///
/// The comparison is constant-time; malformed hex never verifies.
pub fn verify(body: &[u8], key: &str, digest: &str) -> bool {
    match hex::decode(digest.trim()) {
        Ok(expected) => mac(body, key).verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

fn mac(body: &[u8], key: &str) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"));
    mac.update(body);
    mac
}
