//! Turns raw model completions into validated event records.
//!
//! The model's text is untrusted: it is scanned for a fenced JSON block, decoded
//! strictly, and checked field by field. Every failing field is reported, in
//! declaration order, so the caller can ask for all of them at once.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::services::followup::build_followup_in;

pub const DEFAULT_REMINDER: &str = "30m";
pub const INVALID_JSON: &str = "invalid_json";

const FENCE: &str = "```";
const DATE_FORMAT: &str = "%d-%m-%Y";
const TIME_FORMAT: &str = "%H:%M";
const ACCEPTED_DATE_FORMATS: [&str; 4] = ["%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d"];
const ACCEPTED_TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Slots of an event, in schema declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventField {
    Intent,
    Title,
    Participants,
    Date,
    Time,
    Reminder,
}

impl EventField {
    pub const ALL: [EventField; 6] = [
        EventField::Intent,
        EventField::Title,
        EventField::Participants,
        EventField::Date,
        EventField::Time,
        EventField::Reminder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventField::Intent => "intent",
            EventField::Title => "title",
            EventField::Participants => "participants",
            EventField::Date => "date",
            EventField::Time => "time",
            EventField::Reminder => "reminder",
        }
    }
}

impl fmt::Display for EventField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CreateEvent,
    Unknown,
}

impl Intent {
    fn from_label(label: &str) -> Self {
        if label == "create_event" {
            Intent::CreateEvent
        } else {
            Intent::Unknown
        }
    }
}

/// A fully validated event. Only produced by [`validate_slots`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedEvent {
    intent: Intent,
    title: String,
    participants: Vec<String>,
    date: String,
    time: String,
    reminder: String,
    #[serde(skip)]
    starts_at: NaiveDateTime,
}

impl ExtractedEvent {
    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    /// `DD-MM-YYYY`
    pub fn date(&self) -> &str {
        &self.date
    }

    /// `HH:MM`, 24h.
    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn reminder(&self) -> &str {
        &self.reminder
    }

    /// Local wall-clock start, in whatever zone the calendar is configured for.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.starts_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Ready(ExtractedEvent),
    NeedsInfo {
        missing_fields: Vec<EventField>,
        followup_prompt: String,
    },
    Malformed(String),
}

/// Contents of the first fenced block, or the whole text when there is none.
/// Accepts both ```` ```json ```` and bare ```` ``` ```` fences. Prose around the
/// fence is dropped and never searched for a second candidate.
pub fn locate_json_block(text: &str) -> &str {
    let Some(open) = text.find(FENCE) else {
        return text.trim();
    };

    let body = &text[open + FENCE.len()..];
    let Some(close) = body.find(FENCE) else {
        return text.trim();
    };

    let inner = &body[..close];
    let inner = inner
        .strip_prefix("json")
        .or_else(|| inner.strip_prefix("JSON"))
        .unwrap_or(inner);
    inner.trim()
}

/// Strict decode of a candidate. Anything other than a JSON object is rejected.
pub fn decode_candidate(candidate: &str) -> Result<Map<String, Value>, String> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return Err(INVALID_JSON.to_string());
    }

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => {
            tracing::debug!("Model output decoded to a non-object JSON value: {}", other);
            Err(INVALID_JSON.to_string())
        }
        Err(e) => {
            tracing::debug!("Model output is not valid JSON: {}", e);
            Err(INVALID_JSON.to_string())
        }
    }
}

/// Locate and decode the slot object in a raw completion.
pub fn decode_completion(text: &str) -> Result<Map<String, Value>, String> {
    decode_candidate(locate_json_block(text))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim()),
        _ => None,
    }
}

fn normalize_date(raw: &str) -> Option<NaiveDate> {
    ACCEPTED_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn normalize_time(raw: &str) -> Option<NaiveTime> {
    ACCEPTED_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

fn participants_of(value: Option<&Value>) -> Option<Vec<String>> {
    let Some(Value::Array(items)) = value else {
        return None;
    };
    if items.is_empty() {
        return None;
    }

    items
        .iter()
        .map(|item| non_empty_str(Some(item)).map(str::to_string))
        .collect()
}

fn reminder_of(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => Some(DEFAULT_REMINDER.to_string()),
        Some(Value::String(s)) if s.trim().is_empty() => Some(DEFAULT_REMINDER.to_string()),
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => None,
    }
}

/// Check a decoded object against the event schema, normalizing dates and times.
/// On failure returns every failing field in declaration order.
pub fn validate_slots(slots: &Map<String, Value>) -> Result<ExtractedEvent, Vec<EventField>> {
    let mut missing = Vec::new();

    let intent = non_empty_str(slots.get("intent")).map(Intent::from_label);
    let title = non_empty_str(slots.get("title")).map(str::to_string);
    let participants = participants_of(slots.get("participants"));
    let date = non_empty_str(slots.get("date")).and_then(normalize_date);
    let time = non_empty_str(slots.get("time")).and_then(normalize_time);
    let reminder = reminder_of(slots.get("reminder"));

    for field in EventField::ALL {
        let ok = match field {
            EventField::Intent => intent.is_some(),
            EventField::Title => title.is_some(),
            EventField::Participants => participants.is_some(),
            EventField::Date => date.is_some(),
            EventField::Time => time.is_some(),
            EventField::Reminder => reminder.is_some(),
        };
        if !ok {
            missing.push(field);
        }
    }

    match (intent, title, participants, date, time, reminder) {
        (Some(intent), Some(title), Some(participants), Some(date), Some(time), Some(reminder))
            if missing.is_empty() =>
        {
            Ok(ExtractedEvent {
                intent,
                title,
                participants,
                date: date.format(DATE_FORMAT).to_string(),
                time: time.format(TIME_FORMAT).to_string(),
                reminder,
                starts_at: date.and_time(time),
            })
        }
        _ => Err(missing),
    }
}

pub fn outcome_from_slots(slots: &Map<String, Value>, lang: Option<&str>) -> ExtractionOutcome {
    match validate_slots(slots) {
        Ok(event) => ExtractionOutcome::Ready(event),
        Err(missing_fields) => {
            let names: Vec<&str> = missing_fields.iter().map(|f| f.as_str()).collect();
            let followup_prompt = build_followup_in(lang, &names).render();
            ExtractionOutcome::NeedsInfo {
                missing_fields,
                followup_prompt,
            }
        }
    }
}

/// Raw completion to outcome, with English follow-up prompts. The assistant runs the
/// same two steps itself so it can merge the decoded slots with a draft in between.
#[cfg(test)]
pub fn parse_completion(text: &str) -> ExtractionOutcome {
    match decode_completion(text) {
        Ok(slots) => outcome_from_slots(&slots, None),
        Err(reason) => ExtractionOutcome::Malformed(reason),
    }
}
