//! CSRF state nonces.
//!
//! The `state` parameter sent to the provider is `{user_id}:{nonce}`; the
//! nonce is stored under `state:{nonce}` until the callback consumes it.

/// Prefix of store keys holding pending authorizations.
pub const STATE_KEY_PREFIX: &str = "state:";

/// 32 random bytes, hex encoded.
pub fn generate_nonce() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn compose_state(user_id: &str, nonce: &str) -> String {
    format!("{user_id}:{nonce}")
}

/// Split `{user_id}:{nonce}` at the last colon, so user ids may contain colons.
pub fn split_state(state: &str) -> Option<(&str, &str)> {
    let (user_id, nonce) = state.rsplit_once(':')?;
    if user_id.is_empty() || nonce.is_empty() {
        return None;
    }
    Some((user_id, nonce))
}

pub fn state_key(nonce: &str) -> String {
    format!("{STATE_KEY_PREFIX}{nonce}")
}

pub fn is_state_key(key: &str) -> bool {
    key.starts_with(STATE_KEY_PREFIX)
}
