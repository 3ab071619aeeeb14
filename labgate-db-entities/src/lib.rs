#![allow(non_snake_case)]

pub mod AlertEvent;
pub mod AlertMetric;
pub mod AlertRule;
pub mod AlertState;
pub mod ApiToken;
pub mod AuditLog;
pub mod BlockedIp;
pub mod IpReputation;
pub mod LoginAttempt;
pub mod RateLimitCounter;
pub mod User;
