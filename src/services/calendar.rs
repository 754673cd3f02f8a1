use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::GoogleConfig;
use crate::db::OAuthCredential;
use crate::error::AppResult;
use crate::services::extraction::{ExtractedEvent, DEFAULT_REMINDER};

/// Google accepts popup reminders up to four weeks ahead.
const MAX_REMINDER_MINUTES: i64 = 40_320;
const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Reference to an event the calendar accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEvent {
    pub id: String,
    #[serde(default)]
    pub html_link: Option<String>,
}

/// Writes a ready `create_event` into the owner's calendar.
#[async_trait]
pub trait CalendarWriter: Send + Sync {
    async fn insert_event(
        &self,
        event: &ExtractedEvent,
        credential: &OAuthCredential,
    ) -> AppResult<ScheduledEvent>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attendee {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminders {
    pub use_default: bool,
    pub overrides: Vec<ReminderOverride>,
}

/// Body of a Calendar v3 `events.insert` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEventRequest {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,
    pub reminders: Reminders,
}

/// Minutes for a free-form reminder token such as `10m`, `1h`, `2 days` or `15 min before`.
/// A bare number is read as minutes.
pub fn parse_reminder_minutes(token: &str) -> Option<i64> {
    let token = token.trim().to_lowercase();
    let token = token.strip_suffix("before").unwrap_or(token.as_str()).trim();

    let split = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    let (amount, unit) = token.split_at(split);
    let amount: i64 = amount.parse().ok()?;

    let factor = match unit.trim() {
        "" | "m" | "min" | "mins" | "minute" | "minutes" => 1,
        "h" | "hr" | "hrs" | "hour" | "hours" => 60,
        "d" | "day" | "days" => 60 * 24,
        "w" | "week" | "weeks" => 60 * 24 * 7,
        _ => return None,
    };

    amount
        .checked_mul(factor)
        .map(|m| m.min(MAX_REMINDER_MINUTES))
}

fn looks_like_email(candidate: &str) -> bool {
    match candidate.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !candidate.contains(char::is_whitespace)
        }
        None => false,
    }
}

pub fn build_event_request(event: &ExtractedEvent, config: &GoogleConfig) -> CalendarEventRequest {
    let start = event.starts_at();
    let end = start + Duration::minutes(config.event_duration_minutes.max(1));

    let (emails, names): (Vec<&String>, Vec<&String>) = event
        .participants()
        .iter()
        .partition(|p| looks_like_email(p));

    let description = (!names.is_empty()).then(|| {
        format!(
            "Participants: {}",
            names
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    });

    let minutes = parse_reminder_minutes(event.reminder()).unwrap_or_else(|| {
        tracing::debug!(
            "Unrecognized reminder '{}', using {}",
            event.reminder(),
            DEFAULT_REMINDER
        );
        parse_reminder_minutes(DEFAULT_REMINDER).unwrap_or(30)
    });

    CalendarEventRequest {
        summary: event.title().to_string(),
        description,
        start: EventDateTime {
            date_time: start.format(EVENT_TIME_FORMAT).to_string(),
            time_zone: config.time_zone.clone(),
        },
        end: EventDateTime {
            date_time: end.format(EVENT_TIME_FORMAT).to_string(),
            time_zone: config.time_zone.clone(),
        },
        attendees: emails
            .into_iter()
            .map(|email| Attendee {
                email: email.clone(),
            })
            .collect(),
        reminders: Reminders {
            use_default: false,
            overrides: vec![ReminderOverride {
                method: "popup".to_string(),
                minutes,
            }],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::extraction::{parse_completion, ExtractionOutcome};

    fn event(participants: &str, reminder: &str) -> ExtractedEvent {
        let text = format!(
            r#"{{"intent":"create_event","title":"Design review","participants":{},"date":"14-05-2026","time":"16:30","reminder":"{}"}}"#,
            participants, reminder
        );
        match parse_completion(&text) {
            ExtractionOutcome::Ready(event) => event,
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn reminder_tokens() {
        assert_eq!(parse_reminder_minutes("10m"), Some(10));
        assert_eq!(parse_reminder_minutes("15 min"), Some(15));
        assert_eq!(parse_reminder_minutes("15 min before"), Some(15));
        assert_eq!(parse_reminder_minutes("1h"), Some(60));
        assert_eq!(parse_reminder_minutes("2 Days"), Some(2880));
        assert_eq!(parse_reminder_minutes("45"), Some(45));
        assert_eq!(parse_reminder_minutes("10w"), Some(MAX_REMINDER_MINUTES));
        assert_eq!(parse_reminder_minutes("soon"), None);
        assert_eq!(parse_reminder_minutes("5 fortnights"), None);
    }

    #[test]
    fn request_spans_configured_duration_in_zone() {
        let config = GoogleConfig {
            time_zone: "Europe/Berlin".to_string(),
            event_duration_minutes: 45,
            ..Config::default().google
        };
        let request = build_event_request(&event(r#"["me"]"#, "1h"), &config);

        assert_eq!(request.summary, "Design review");
        assert_eq!(request.start.date_time, "2026-05-14T16:30:00");
        assert_eq!(request.end.date_time, "2026-05-14T17:15:00");
        assert_eq!(request.start.time_zone, "Europe/Berlin");
        assert_eq!(request.reminders.overrides[0].minutes, 60);
        assert!(!request.reminders.use_default);
    }

    #[test]
    fn email_participants_become_attendees() {
        let request = build_event_request(
            &event(r#"["ann@example.com","Bob","not an@email"]"#, "10m"),
            &Config::default().google,
        );

        assert_eq!(
            request.attendees,
            vec![Attendee {
                email: "ann@example.com".to_string()
            }]
        );
        assert_eq!(
            request.description.as_deref(),
            Some("Participants: Bob, not an@email")
        );
    }

    #[test]
    fn unknown_reminder_falls_back_to_default() {
        let request = build_event_request(&event(r#"["me"]"#, "whenever"), &Config::default().google);
        assert_eq!(request.reminders.overrides[0].minutes, 30);
    }

    #[test]
    fn serialized_body_uses_calendar_field_names() {
        let request = build_event_request(&event(r#"["a@b.co"]"#, "10m"), &Config::default().google);
        let body = serde_json::to_value(&request).expect("serialize");

        assert_eq!(body["start"]["dateTime"], "2026-05-14T16:30:00");
        assert_eq!(body["reminders"]["useDefault"], false);
        assert_eq!(body["attendees"][0]["email"], "a@b.co");
        assert!(body.get("description").is_none());
    }
}
