use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::{ListenEndpoint, Secret};

#[inline]
pub(crate) fn _default_database_url() -> Secret<String> {
    Secret::new("sqlite:data/db".to_owned())
}

#[inline]
pub(crate) fn _default_http_listen() -> ListenEndpoint {
    #[allow(clippy::unwrap_used)]
    ListenEndpoint("0.0.0.0:8880".to_socket_addrs().unwrap().next().unwrap())
}

pub(crate) const fn _default_max_payload_bytes() -> usize {
    1048576
}

pub(crate) const fn _default_api_limit_unauthenticated() -> u32 {
    60
}

pub(crate) const fn _default_api_limit_authenticated() -> u32 {
    120
}

#[inline]
pub(crate) const fn _default_api_window() -> Duration {
    Duration::from_secs(60)
}

pub(crate) const fn _default_login_max_attempts() -> u32 {
    5
}

#[inline]
pub(crate) const fn _default_login_window() -> Duration {
    Duration::from_secs(60 * 10)
}

#[inline]
pub(crate) const fn _default_login_block_duration() -> Duration {
    Duration::from_secs(60 * 10)
}

#[inline]
pub(crate) const fn _default_token_ttl() -> Duration {
    Duration::from_secs(60 * 60 * 24 * 30)
}

#[inline]
pub(crate) fn _default_security_log_path() -> String {
    "./data/security.log".to_owned()
}

pub(crate) const fn _default_security_log_max_bytes() -> u64 {
    10 * 1024 * 1024
}

pub(crate) const fn _default_security_log_generations() -> usize {
    10
}

#[inline]
pub(crate) const fn _default_maintenance_interval() -> Duration {
    Duration::from_secs(300)
}

#[inline]
pub(crate) const fn _default_reputation_retention() -> Duration {
    Duration::from_secs(60 * 60 * 24 * 365)
}

#[inline]
pub(crate) const fn _default_audit_retention() -> Duration {
    Duration::from_secs(60 * 60 * 24 * 90)
}
