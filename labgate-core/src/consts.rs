/// Length of the token plaintext: 32 random bytes as lowercase hex.
pub const TOKEN_PLAINTEXT_LEN: usize = 64;

/// Message returned for any token that is no longer usable, regardless of
/// whether it expired, was revoked or failed the session-binding check.
pub const SESSION_EXPIRED_MESSAGE: &str = "session expired";

pub const REVOKE_REASON_LOGOUT: &str = "logout";
pub const REVOKE_REASON_PASSWORD_CHANGE: &str = "password_change";
pub const REVOKE_REASON_UA_MISMATCH: &str = "ua_mismatch";
pub const REVOKE_REASON_IP_MISMATCH: &str = "ip_mismatch";
