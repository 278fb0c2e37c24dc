/// Invitation tokens
///
/// A token is 32 random bytes rendered as 64 lowercase hex characters. The
/// plaintext goes to the invitee (through the excluded mail layer); the store
/// only ever sees its SHA-256 hex digest.
///
/// # Example
///
/// ```
/// use studytrack_shared::invitations::token::{generate_invite_token, hash_invite_token};
///
/// let (token, hash) = generate_invite_token();
/// assert_eq!(token.len(), 64);
/// assert_eq!(hash_invite_token(&token), hash);
/// ```

use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// Length of a plaintext token
pub const INVITE_TOKEN_LENGTH: usize = TOKEN_BYTES * 2;

/// Returns `(token, token_hash)`
pub fn generate_invite_token() -> (String, String) {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    let token = hex::encode(bytes);
    let hash = hash_invite_token(&token);
    (token, hash)
}

/// SHA-256 of the token, hex encoded
pub fn hash_invite_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Cheap shape check before any store lookup
pub fn validate_token_format(token: &str) -> bool {
    token.len() == INVITE_TOKEN_LENGTH && token.chars().all(|c| c.is_ascii_hexdigit())
}
