use labgate_db_entities::AlertRule::AlertSeverity;
use labgate_db_entities::IpReputation::ReputationStatus;

pub(crate) const SCORE_WARNING: i32 = 1;
pub(crate) const SCORE_CRITICAL: i32 = 3;
pub(crate) const SCORE_AUTO_BLOCK: i32 = 5;
pub(crate) const SCORE_MIN: i32 = -100;
pub(crate) const SCORE_MAX: i32 = 1000;

pub(crate) const THRESHOLD_SUSPICIOUS: i32 = 10;
pub(crate) const THRESHOLD_MALICIOUS: i32 = 51;
pub(crate) const THRESHOLD_AUTO_BLOCK: i32 = 30;

pub(crate) const DECAY_INTERVAL_HOURS: i64 = 24;
pub(crate) const DECAY_RATE: f64 = 0.1;
pub(crate) const MIN_SCORE_FOR_DECAY: i32 = 1;

const ESCALATION_WINDOW_HOURS: f64 = 24.0;
const ESCALATION_MULTIPLIER_BASE: f64 = 1.0;
const ESCALATION_MULTIPLIER_MAX: f64 = 3.0;

/// Tuning constants above are deliberate production values; the 50/51
/// boundary in particular must not be "simplified" to a single threshold.
pub fn status_for_score(score: i32) -> ReputationStatus {
    if score >= THRESHOLD_MALICIOUS {
        ReputationStatus::Malicious
    } else if score >= THRESHOLD_SUSPICIOUS {
        ReputationStatus::Suspicious
    } else {
        ReputationStatus::Normal
    }
}

/// Scales penalties for rapid-fire incidents: 1.0 for incidents 24h or more
/// apart, rising linearly to 3.0 for back-to-back incidents.
pub fn escalation_multiplier(hours_since_last_incident: f64) -> f64 {
    if hours_since_last_incident >= ESCALATION_WINDOW_HOURS {
        return ESCALATION_MULTIPLIER_BASE;
    }

    let multiplier = ESCALATION_MULTIPLIER_BASE
        + (1.0 - (hours_since_last_incident / ESCALATION_WINDOW_HOURS))
            * (ESCALATION_MULTIPLIER_MAX - ESCALATION_MULTIPLIER_BASE);

    multiplier.min(ESCALATION_MULTIPLIER_MAX)
}

pub fn incident_score(severity: AlertSeverity, auto_blocked: bool, escalation: f64) -> i32 {
    let mut base = match severity {
        AlertSeverity::Critical => SCORE_CRITICAL,
        AlertSeverity::Warning => SCORE_WARNING,
    };
    if auto_blocked {
        base += SCORE_AUTO_BLOCK;
    }
    (base as f64 * escalation).ceil() as i32
}

pub fn block_duration_multiplier(score: i32) -> f64 {
    if score <= 0 {
        1.0
    } else if score < 20 {
        1.0
    } else if score < 40 {
        1.5
    } else if score < 60 {
        2.0
    } else if score < 80 {
        3.0
    } else {
        5.0
    }
}

pub fn rate_limit_multiplier(score: i32) -> f64 {
    if score <= 0 {
        0.9
    } else if score < 20 {
        1.0
    } else if score < 40 {
        1.5
    } else if score < 60 {
        2.0
    } else {
        3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_boundaries() {
        assert_eq!(status_for_score(-100), ReputationStatus::Normal);
        assert_eq!(status_for_score(9), ReputationStatus::Normal);
        assert_eq!(status_for_score(10), ReputationStatus::Suspicious);
        assert_eq!(status_for_score(50), ReputationStatus::Suspicious);
        assert_eq!(status_for_score(51), ReputationStatus::Malicious);
        assert_eq!(status_for_score(1000), ReputationStatus::Malicious);
    }

    #[test]
    fn test_escalation_multiplier_curve() {
        assert_eq!(escalation_multiplier(0.0), 3.0);
        assert_eq!(escalation_multiplier(12.0), 2.0);
        assert_eq!(escalation_multiplier(24.0), 1.0);
        assert_eq!(escalation_multiplier(999.0), 1.0);
    }

    #[test]
    fn test_incident_score_bases() {
        assert_eq!(incident_score(AlertSeverity::Warning, false, 1.0), 1);
        assert_eq!(incident_score(AlertSeverity::Critical, false, 1.0), 3);
        assert_eq!(incident_score(AlertSeverity::Critical, true, 1.0), 8);
    }

    #[test]
    fn test_incident_score_rounds_up() {
        // 3 * 1.5 = 4.5 -> 5
        assert_eq!(incident_score(AlertSeverity::Critical, false, 1.5), 5);
    }

    #[test]
    fn test_block_duration_multiplier_steps() {
        assert_eq!(block_duration_multiplier(-5), 1.0);
        assert_eq!(block_duration_multiplier(19), 1.0);
        assert_eq!(block_duration_multiplier(20), 1.5);
        assert_eq!(block_duration_multiplier(40), 2.0);
        assert_eq!(block_duration_multiplier(60), 3.0);
        assert_eq!(block_duration_multiplier(80), 5.0);
    }

    #[test]
    fn test_rate_limit_multiplier_steps() {
        assert_eq!(rate_limit_multiplier(0), 0.9);
        assert_eq!(rate_limit_multiplier(1), 1.0);
        assert_eq!(rate_limit_multiplier(20), 1.5);
        assert_eq!(rate_limit_multiplier(40), 2.0);
        assert_eq!(rate_limit_multiplier(60), 3.0);
    }
}
