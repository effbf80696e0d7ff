use std::borrow::Cow;

use quickchat_config::LoggingConfig;
use sha2::{Digest, Sha256};

/// Salted, truncated SHA-256 of an identifier, for logs that must not carry
/// the identifier itself. Eight hex characters.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(id.as_bytes())
        .finalize();

    format!(
        "{:08x}",
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    )
}

/// The identity as it may appear in logs under the current logging policy
pub fn loggable_identity<'a>(identity: &'a str, logging: &LoggingConfig) -> Cow<'a, str> {
    if logging.enable_user_identifiers {
        Cow::Borrowed(identity)
    } else {
        Cow::Owned(log_safe_id(identity, &logging.hash_salt))
    }
}
