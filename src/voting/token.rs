use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::error::SessionError;

/// Bytes of entropy in a generated voter token.
pub const VOTER_TOKEN_BYTES: usize = 16;

/// Generate an opaque, URL-safe voter token from the OS random source.
pub fn generate_voter_token() -> Result<String, SessionError> {
    random_token(VOTER_TOKEN_BYTES)
}

pub fn random_token(len: usize) -> Result<String, SessionError> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| SessionError::VoterToken(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}
