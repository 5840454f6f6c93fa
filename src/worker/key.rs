//! Correlation key generation.

use super::protocol::QueryKey;

/// Mint a fresh correlation key.
///
/// Keys are random v4 UUIDs, so collisions within one client's lifetime are
/// negligible.
pub fn next_query_key() -> QueryKey {
    uuid::Uuid::new_v4().to_string()
}
