//! bcrypt password hashes in the modular crypt format (`$2b$<cost>$...`).

use bcrypt::BcryptResult;

/// Work factor for new hashes. Existing hashes keep the cost they carry.
pub const HASH_COST: u32 = 10;

pub fn hash_password(plain: &str) -> BcryptResult<String> {
    bcrypt::hash(plain, HASH_COST)
}

/// Checks `plain` against a stored hash. Malformed hashes never verify.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    match bcrypt::verify(plain, stored) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}
