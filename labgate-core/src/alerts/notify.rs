use chrono::SecondsFormat;
use tracing::info;

use labgate_db_entities::AlertEvent;
use labgate_db_entities::AlertRule::{AlertSeverity, AutoAction};

pub struct EmailAlert {
    pub subject: String,
    pub body: String,
}

pub(crate) fn suggested_action(
    auto_action: Option<&AutoAction>,
    severity: AlertSeverity,
) -> &'static str {
    if severity != AlertSeverity::Critical {
        return "Review and monitor";
    }
    match auto_action {
        Some(action) if action.block_ip => "IP has been automatically blocked",
        Some(action) if action.revoke_token => "Token has been automatically revoked",
        _ => "Immediate manual review required",
    }
}

pub(crate) fn format_alert_line(
    event: &AlertEvent::Model,
    endpoint: &str,
    suggested: &str,
) -> String {
    format!(
        "[ALERT] [{}] [{}] Rule: {} | Source: {}:{} | Count: {}/{}s | Endpoint: {} | AlertID: {} | Action: {}",
        event.fired_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        event.severity.as_str(),
        event.rule_name,
        event.source_kind,
        event.source_value,
        event.trigger_count,
        event.time_window_seconds,
        endpoint,
        event.id,
        suggested,
    )
}

/// Assembles the CRITICAL notification payload. Delivery is someone else's
/// job; the payload is logged so operators can see what would have gone out.
pub(crate) fn prepare_email(event: &AlertEvent::Model, endpoint: &str, suggested: &str) -> EmailAlert {
    let subject = format!(
        "[CRITICAL ALERT] {} - {}",
        event.rule_name, event.source_value
    );
    let body = format!(
        "CRITICAL SECURITY ALERT\n\
         \n\
         Alert ID: {}\n\
         Rule: {}\n\
         Severity: {}\n\
         Timestamp: {}\n\
         \n\
         Source:\n\
         \x20 Type: {}\n\
         \x20 Value: {}\n\
         \n\
         Trigger Details:\n\
         \x20 Count: {}\n\
         \x20 Time Window: {} seconds\n\
         \x20 Endpoint: {}\n\
         \n\
         Suggested Action: {}\n\
         \n\
         ---\n\
         This is an automated alert from the API security monitoring system.",
        event.id,
        event.rule_name,
        event.severity.as_str(),
        event.fired_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        event.source_kind,
        event.source_value,
        event.trigger_count,
        event.time_window_seconds,
        endpoint,
        suggested,
    );

    info!(subject = %subject, "Email alert prepared");
    EmailAlert { subject, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(severity: AlertSeverity) -> AlertEvent::Model {
        AlertEvent::Model {
            id: Uuid::nil(),
            rule_id: Uuid::nil(),
            rule_name: "Excessive 401s".into(),
            severity,
            source_kind: "IP".into(),
            source_value: "203.0.113.1".into(),
            trigger_count: 12,
            time_window_seconds: 300,
            metadata: serde_json::json!({}),
            fired_at: Utc::now(),
        }
    }

    #[test]
    fn test_suggested_action_ordering() {
        let block = AutoAction {
            block_ip: true,
            revoke_token: true,
            ..Default::default()
        };
        assert_eq!(
            suggested_action(Some(&block), AlertSeverity::Critical),
            "IP has been automatically blocked"
        );
        let revoke = AutoAction {
            revoke_token: true,
            ..Default::default()
        };
        assert_eq!(
            suggested_action(Some(&revoke), AlertSeverity::Critical),
            "Token has been automatically revoked"
        );
        assert_eq!(
            suggested_action(None, AlertSeverity::Warning),
            "Review and monitor"
        );
        assert_eq!(
            suggested_action(None, AlertSeverity::Critical),
            "Immediate manual review required"
        );
    }

    #[test]
    fn test_alert_line_contains_rule_and_source() {
        let line = format_alert_line(&event(AlertSeverity::Critical), "/api/auth/login", "x");
        assert!(line.starts_with("[ALERT] ["));
        assert!(line.contains("Rule: Excessive 401s"));
        assert!(line.contains("Source: IP:203.0.113.1"));
        assert!(line.contains("Count: 12/300s"));
    }

    #[test]
    fn test_email_subject() {
        let email = prepare_email(&event(AlertSeverity::Critical), "/api/auth/login", "x");
        assert_eq!(
            email.subject,
            "[CRITICAL ALERT] Excessive 401s - 203.0.113.1"
        );
        assert!(email.body.contains("Time Window: 300 seconds"));
    }
}
