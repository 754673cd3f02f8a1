use chrono::{Duration, Utc};
use serde_json::{Map, Value};

use crate::db::{Database, OwnerId, SlotDraftRepository};
use crate::error::AppResult;
use crate::i18n;
use crate::services::extraction::{EventField, ExtractedEvent, ExtractionOutcome, Intent};

/// What to do with an extraction outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Complete `create_event`; hand it to the calendar.
    Schedule(ExtractedEvent),
    /// Complete, but the message did not ask for an event.
    NothingToSchedule(ExtractedEvent),
    AskUser {
        missing_fields: Vec<EventField>,
        prompt: String,
    },
    Rephrase {
        reason: String,
        prompt: String,
    },
}

/// Validation failures always ask for more; only undecodable output asks to rephrase.
pub fn resolve(outcome: ExtractionOutcome, lang: Option<&str>) -> Resolution {
    match outcome {
        ExtractionOutcome::Ready(event) => match event.intent() {
            Intent::CreateEvent => Resolution::Schedule(event),
            Intent::Unknown => Resolution::NothingToSchedule(event),
        },
        ExtractionOutcome::NeedsInfo {
            missing_fields,
            followup_prompt,
        } => Resolution::AskUser {
            missing_fields,
            prompt: followup_prompt,
        },
        ExtractionOutcome::Malformed(reason) => Resolution::Rephrase {
            reason,
            prompt: i18n::tr(lang, "reply.rephrase", None),
        },
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Overlay a fresh extraction on the slots gathered in earlier turns.
///
/// Fresh values win; blank fresh values (absent, null, empty) are filled from the
/// draft. A fresh `intent` other than `create_event` does not override a draft that
/// already established one, since follow-up answers rarely restate the intent.
pub fn merge_slots(draft: &Map<String, Value>, fresh: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = fresh.clone();

    for field in EventField::ALL {
        let key = field.as_str();
        let Some(previous) = draft.get(key) else {
            continue;
        };
        if is_blank(Some(previous)) {
            continue;
        }

        let keep_previous = match field {
            EventField::Intent => {
                fresh.get(key).and_then(Value::as_str) != Some("create_event")
                    && previous.as_str() == Some("create_event")
            }
            _ => is_blank(fresh.get(key)),
        };

        if keep_previous {
            merged.insert(key.to_string(), previous.clone());
        }
    }

    merged
}

/// Short-lived per-owner record of slots supplied so far.
///
/// Best effort: a missing or unreachable database only means the next message starts
/// from scratch, so failures are logged and swallowed.
#[derive(Clone)]
pub struct DraftStore {
    db: Database,
    ttl: Duration,
}

impl DraftStore {
    pub fn new(db: Database, ttl_minutes: i64) -> Self {
        Self {
            db,
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub async fn load(&self, owner_id: OwnerId) -> Option<Map<String, Value>> {
        let pool = self.db.pool().await?;
        let draft = match SlotDraftRepository::find_live(&pool, owner_id, Utc::now().naive_utc())
            .await
        {
            Ok(draft) => draft?,
            Err(e) => {
                tracing::warn!("Failed to load slot draft for owner {}: {:?}", owner_id, e);
                return None;
            }
        };

        match serde_json::from_str::<Value>(&draft.slots_json) {
            Ok(Value::Object(map)) => Some(map),
            _ => {
                tracing::warn!("Discarding unreadable slot draft for owner {}", owner_id);
                None
            }
        }
    }

    pub async fn save(&self, owner_id: OwnerId, slots: &Map<String, Value>) {
        let Some(pool) = self.db.pool().await else {
            tracing::debug!("Database not connected; slot draft for {} not kept", owner_id);
            return;
        };

        let json = match serde_json::to_string(slots) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to encode slot draft for owner {}: {}", owner_id, e);
                return;
            }
        };

        let now = Utc::now().naive_utc();
        if let Err(e) =
            SlotDraftRepository::upsert(&pool, owner_id, &json, now, now + self.ttl).await
        {
            tracing::warn!("Failed to save slot draft for owner {}: {:?}", owner_id, e);
        }
    }

    /// Returns true if a draft was discarded.
    pub async fn clear(&self, owner_id: OwnerId) -> bool {
        let Some(pool) = self.db.pool().await else {
            return false;
        };

        match SlotDraftRepository::delete(&pool, owner_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("Failed to clear slot draft for owner {}: {:?}", owner_id, e);
                false
            }
        }
    }

    pub async fn purge_expired(&self) -> AppResult<u64> {
        let Some(pool) = self.db.pool().await else {
            return Ok(0);
        };
        SlotDraftRepository::purge_expired(&pool, Utc::now().naive_utc()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::services::extraction::{parse_completion, INVALID_JSON};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn complete_create_event_is_scheduled() {
        let outcome = parse_completion(
            r#"{"intent":"create_event","title":"t","participants":["a"],"date":"01-01-2026","time":"10:00"}"#,
        );
        assert!(matches!(resolve(outcome, None), Resolution::Schedule(_)));
    }

    #[test]
    fn unknown_intent_is_reported_distinctly() {
        let outcome = parse_completion(
            r#"{"intent":"unknown","title":"t","participants":["a"],"date":"01-01-2026","time":"10:00"}"#,
        );
        assert!(matches!(
            resolve(outcome, None),
            Resolution::NothingToSchedule(_)
        ));
    }

    #[test]
    fn validation_failure_asks_the_user() {
        let outcome = parse_completion(r#"{"intent":"create_event","title":"sync"}"#);
        match resolve(outcome, None) {
            Resolution::AskUser {
                missing_fields,
                prompt,
            } => {
                assert_eq!(missing_fields.len(), 3);
                assert!(prompt.starts_with("Whom should I add as participants?"));
            }
            other => panic!("expected AskUser, got {:?}", other),
        }
    }

    #[test]
    fn malformed_output_asks_to_rephrase() {
        match resolve(parse_completion("no json here"), None) {
            Resolution::Rephrase { reason, prompt } => {
                assert_eq!(reason, INVALID_JSON);
                assert_eq!(prompt, i18n::t("reply.rephrase"));
            }
            other => panic!("expected Rephrase, got {:?}", other),
        }
    }

    #[test]
    fn merge_fills_blank_fresh_fields_from_draft() {
        let draft = object(json!({
            "intent": "create_event",
            "title": "sync",
            "participants": ["Ann"],
            "date": "",
        }));
        let fresh = object(json!({
            "intent": "unknown",
            "title": "",
            "participants": [],
            "date": "02-02-2026",
            "time": "10:00",
        }));

        let merged = merge_slots(&draft, &fresh);
        assert_eq!(merged["intent"], json!("create_event"));
        assert_eq!(merged["title"], json!("sync"));
        assert_eq!(merged["participants"], json!(["Ann"]));
        assert_eq!(merged["date"], json!("02-02-2026"));
        assert_eq!(merged["time"], json!("10:00"));
    }

    #[test]
    fn merge_prefers_fresh_values() {
        let draft = object(json!({"title": "old", "time": "09:00"}));
        let fresh = object(json!({"title": "new"}));

        let merged = merge_slots(&draft, &fresh);
        assert_eq!(merged["title"], json!("new"));
        assert_eq!(merged["time"], json!("09:00"));
    }

    #[tokio::test]
    async fn draft_store_round_trip_and_clear() {
        let drafts = DraftStore::new(Database::connected(test_pool().await), 15);
        let slots = object(json!({"intent": "create_event", "title": "sync"}));

        assert!(drafts.load(1).await.is_none());
        drafts.save(1, &slots).await;
        assert_eq!(drafts.load(1).await, Some(slots));

        assert!(drafts.clear(1).await);
        assert!(!drafts.clear(1).await);
        assert!(drafts.load(1).await.is_none());
    }

    #[tokio::test]
    async fn expired_drafts_are_ignored_and_purged() {
        let pool = test_pool().await;
        let past = Utc::now().naive_utc() - Duration::hours(1);
        SlotDraftRepository::upsert(&pool, 2, "{\"title\":\"x\"}", past, past)
            .await
            .expect("seed");

        let drafts = DraftStore::new(Database::connected(pool), 15);
        assert!(drafts.load(2).await.is_none());
        assert_eq!(drafts.purge_expired().await.expect("purge"), 1);
    }

    #[tokio::test]
    async fn disconnected_draft_store_is_a_no_op() {
        let drafts = DraftStore::new(Database::disconnected(), 15);
        drafts
            .save(3, &object(json!({"title": "x"})))
            .await;
        assert!(drafts.load(3).await.is_none());
        assert!(!drafts.clear(3).await);
        assert_eq!(drafts.purge_expired().await.expect("purge"), 0);
    }
}
