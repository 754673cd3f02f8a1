//! Conversation handling: commands, the authentication pre-filter and the
//! extraction pipeline. Every path ends in a reply; nothing here fails the request.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::db::OwnerId;
use crate::error::AppError;
use crate::i18n;
use crate::services::auth::LinkIssuer;
use crate::services::auth_gate::AuthGate;
use crate::services::calendar::{CalendarWriter, ScheduledEvent};
use crate::services::credentials::{CredentialLookup, CredentialStore};
use crate::services::extraction::{
    decode_completion, outcome_from_slots, ExtractedEvent, ExtractionOutcome,
};
use crate::services::google::GoogleOAuthService;
use crate::services::llm::{CompletionRequest, LlmClient};
use crate::services::slots::{merge_slots, resolve, DraftStore, Resolution};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    GoogleAuth,
    Cancel,
    Unlink,
    Unknown(String),
}

/// `None` when the text is not a command. Accepts the `/cmd@BotName` form used in groups.
pub fn parse_command(text: &str) -> Option<Command> {
    let first = text.trim().split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);

    Some(match name.to_lowercase().as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "google_auth" => Command::GoogleAuth,
        "cancel" => Command::Cancel,
        "unlink" => Command::Unlink,
        other => Command::Unknown(other.to_string()),
    })
}

pub struct EventAssistant {
    gate: AuthGate,
    credentials: CredentialStore,
    drafts: DraftStore,
    links: LinkIssuer,
    llm: Arc<dyn LlmClient>,
    calendar: Arc<dyn CalendarWriter>,
    google: Option<GoogleOAuthService>,
    llm_timeout: Duration,
}

impl EventAssistant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gate: AuthGate,
        credentials: CredentialStore,
        drafts: DraftStore,
        links: LinkIssuer,
        llm: Arc<dyn LlmClient>,
        calendar: Arc<dyn CalendarWriter>,
        google: Option<GoogleOAuthService>,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            credentials,
            drafts,
            links,
            llm,
            calendar,
            google,
            llm_timeout,
        }
    }

    pub async fn handle(
        &self,
        owner_id: Option<OwnerId>,
        text: &str,
        language_code: Option<&str>,
    ) -> String {
        let lang = i18n::resolve_language(language_code);
        let lang = lang.as_deref();

        let Some(owner_id) = owner_id else {
            return i18n::tr(lang, "auth.no_identity", None);
        };

        if let Some(command) = parse_command(text) {
            return self.handle_command(owner_id, command, lang).await;
        }

        if !self.gate.is_authenticated(owner_id).await {
            tracing::debug!("Owner {} not authenticated, asking to link", owner_id);
            return i18n::tr(lang, "auth.link_required", None);
        }

        self.extract_and_schedule(owner_id, text, lang).await
    }

    async fn handle_command(&self, owner_id: OwnerId, command: Command, lang: Option<&str>) -> String {
        match command {
            Command::Start => i18n::tr(lang, "bot.welcome", None),
            Command::Help => i18n::tr(lang, "bot.help", None),
            Command::GoogleAuth => match self.links.link_url(owner_id, lang) {
                Ok(url) => i18n::tr(lang, "auth.link_prompt", Some(&[("url", url.as_str())])),
                Err(e) => {
                    tracing::error!("Failed to issue link for owner {}: {:?}", owner_id, e);
                    i18n::tr(lang, "reply.upstream_error", None)
                }
            },
            Command::Cancel => {
                if self.drafts.clear(owner_id).await {
                    i18n::tr(lang, "reply.draft_cancelled", None)
                } else {
                    i18n::tr(lang, "reply.nothing_to_cancel", None)
                }
            }
            Command::Unlink => self.unlink(owner_id, lang).await,
            Command::Unknown(name) => {
                tracing::debug!("Unknown command /{} from owner {}", name, owner_id);
                i18n::tr(lang, "bot.unknown_command", None)
            }
        }
    }

    async fn unlink(&self, owner_id: OwnerId, lang: Option<&str>) -> String {
        if let (Some(google), CredentialLookup::Found(credential)) =
            (&self.google, self.credentials.get(owner_id).await)
        {
            let token = credential
                .refresh_token
                .as_deref()
                .unwrap_or(credential.access_token.as_str());
            if let Err(e) = google.revoke_token(token).await {
                tracing::warn!("Google token revocation for owner {} failed: {:?}", owner_id, e);
            }
        }

        self.drafts.clear(owner_id).await;
        match self.gate.revoke(owner_id).await {
            Ok(()) => i18n::tr(lang, "auth.unlinked", None),
            Err(e) => {
                tracing::error!("Failed to unlink owner {}: {:?}", owner_id, e);
                i18n::tr(lang, "auth.unlink_failed", None)
            }
        }
    }

    async fn extract_and_schedule(&self, owner_id: OwnerId, text: &str, lang: Option<&str>) -> String {
        let request = CompletionRequest::extraction(text, Utc::now().naive_utc());
        let completion = match tokio::time::timeout(self.llm_timeout, self.llm.complete(&request)).await
        {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                tracing::error!("LLM call failed for owner {}: {:?}", owner_id, e);
                return i18n::tr(lang, "reply.upstream_error", None);
            }
            Err(_) => {
                tracing::error!(
                    "LLM call for owner {} timed out after {:?}",
                    owner_id,
                    self.llm_timeout
                );
                return i18n::tr(lang, "reply.upstream_error", None);
            }
        };

        let (outcome, slots) = match decode_completion(&completion) {
            Ok(fresh) => {
                let slots = match self.drafts.load(owner_id).await {
                    Some(draft) => merge_slots(&draft, &fresh),
                    None => fresh,
                };
                (outcome_from_slots(&slots, lang), Some(slots))
            }
            Err(reason) => {
                tracing::info!("Unusable model output for owner {}: {}", owner_id, reason);
                (ExtractionOutcome::Malformed(reason), None)
            }
        };

        match resolve(outcome, lang) {
            Resolution::AskUser {
                missing_fields,
                prompt,
            } => {
                tracing::debug!("Owner {} still missing {:?}", owner_id, missing_fields);
                if let Some(slots) = slots {
                    self.drafts.save(owner_id, &slots).await;
                }
                prompt
            }
            Resolution::Rephrase { prompt, .. } => prompt,
            Resolution::NothingToSchedule(_) => {
                self.drafts.clear(owner_id).await;
                i18n::tr(lang, "reply.nothing_to_schedule", None)
            }
            Resolution::Schedule(event) => self.schedule(owner_id, &event, lang).await,
        }
    }

    async fn schedule(&self, owner_id: OwnerId, event: &ExtractedEvent, lang: Option<&str>) -> String {
        let credential = match self.credentials.get(owner_id).await {
            CredentialLookup::Found(credential) => credential,
            CredentialLookup::NotFound | CredentialLookup::Unavailable => {
                return i18n::tr(lang, "auth.link_required", None);
            }
        };

        match self.calendar.insert_event(event, &credential).await {
            Ok(created) => {
                tracing::info!("Scheduled event {} for owner {}", created.id, owner_id);
                self.drafts.clear(owner_id).await;
                scheduled_reply(event, &created, lang)
            }
            Err(AppError::Unauthorized) => {
                tracing::warn!("Calendar rejected credentials of owner {}", owner_id);
                i18n::tr(lang, "auth.link_required", None)
            }
            Err(e) if e.is_upstream() => {
                tracing::error!("Calendar unavailable for owner {}: {:?}", owner_id, e);
                i18n::tr(lang, "reply.upstream_error", None)
            }
            Err(e) => {
                tracing::error!("Failed to schedule event for owner {}: {:?}", owner_id, e);
                i18n::tr(lang, "reply.upstream_error", None)
            }
        }
    }
}

fn scheduled_reply(event: &ExtractedEvent, created: &ScheduledEvent, lang: Option<&str>) -> String {
    let participants = event.participants().join(", ");
    let mut reply = i18n::tr(
        lang,
        "reply.scheduled",
        Some(&[
            ("title", event.title()),
            ("date", event.date()),
            ("time", event.time()),
            ("participants", participants.as_str()),
            ("reminder", event.reminder()),
        ]),
    );

    if let Some(link) = created.html_link.as_deref() {
        reply.push('\n');
        reply.push_str(&i18n::tr(lang, "reply.scheduled_link", Some(&[("link", link)])));
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::config::Config;
    use crate::db::{test_pool, CredentialProfile, Database, OAuthCredential};
    use crate::error::AppResult;

    struct ScriptedLlm {
        replies: Mutex<Vec<AppResult<String>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<AppResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _request: &CompletionRequest) -> AppResult<String> {
            self.replies
                .lock()
                .expect("lock")
                .pop()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _request: &CompletionRequest) -> AppResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
    }

    #[derive(Default)]
    struct RecordingCalendar {
        inserted: Mutex<Vec<(String, String)>>,
        reject: bool,
        outage: bool,
    }

    #[async_trait]
    impl CalendarWriter for RecordingCalendar {
        async fn insert_event(
            &self,
            event: &ExtractedEvent,
            credential: &OAuthCredential,
        ) -> AppResult<ScheduledEvent> {
            if self.reject {
                return Err(AppError::Unauthorized);
            }
            if self.outage {
                return Err(AppError::GoogleApi("503 Service Unavailable".to_string()));
            }
            self.inserted
                .lock()
                .expect("lock")
                .push((event.title().to_string(), credential.access_token.clone()));
            Ok(ScheduledEvent {
                id: "evt-1".to_string(),
                html_link: Some("https://calendar.example/evt-1".to_string()),
            })
        }
    }

    struct Harness {
        assistant: EventAssistant,
        calendar: Arc<RecordingCalendar>,
        store: CredentialStore,
        gate: AuthGate,
    }

    async fn harness_with(llm: Arc<dyn LlmClient>, calendar: RecordingCalendar) -> Harness {
        let db = Database::connected(test_pool().await);
        let store = CredentialStore::new(db.clone(), 30);
        let gate = AuthGate::new(store.clone());
        let drafts = DraftStore::new(db, 15);
        let mut config = Config::default();
        config.jwt.secret = "secret".to_string();
        let calendar = Arc::new(calendar);

        let assistant = EventAssistant::new(
            gate.clone(),
            store.clone(),
            drafts,
            LinkIssuer::new(&config),
            llm,
            calendar.clone(),
            None,
            Duration::from_millis(200),
        );
        Harness {
            assistant,
            calendar,
            store,
            gate,
        }
    }

    async fn harness(replies: Vec<AppResult<String>>) -> Harness {
        harness_with(ScriptedLlm::new(replies), RecordingCalendar::default()).await
    }

    async fn link(h: &Harness, owner: OwnerId) {
        h.store
            .store(
                owner,
                &CredentialProfile {
                    external_account_id: "g".to_string(),
                    display_name: "Sam".to_string(),
                    access_token: "access".to_string(),
                    refresh_token: Some("refresh".to_string()),
                },
            )
            .await
            .expect("store");
        h.gate.mark_authenticated(owner).await.expect("mark");
    }

    const COMPLETE: &str = "```json\n{\"intent\":\"create_event\",\"title\":\"lunch with Sam\",\"participants\":[\"Sam\"],\"date\":\"01-06-2026\",\"time\":\"13:00\",\"reminder\":\"10m\"}\n```";

    #[test]
    fn commands_are_recognized() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/help@OnTimeBot"), Some(Command::Help));
        assert_eq!(parse_command(" /google_auth now"), Some(Command::GoogleAuth));
        assert_eq!(
            parse_command("/weather"),
            Some(Command::Unknown("weather".to_string()))
        );
        assert_eq!(parse_command("lunch at 1"), None);
    }

    #[tokio::test]
    async fn missing_identity_gets_fixed_reply() {
        let h = harness(vec![]).await;
        assert_eq!(
            h.assistant.handle(None, "hi", None).await,
            i18n::t("auth.no_identity")
        );
    }

    #[tokio::test]
    async fn unauthenticated_user_is_told_to_link() {
        let h = harness(vec![Ok(COMPLETE.to_string())]).await;
        assert_eq!(
            h.assistant.handle(Some(1), "lunch with Sam", None).await,
            "You need to authenticate first. Please use /google_auth command to link your Google account."
        );
        assert!(h.calendar.inserted.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn complete_request_is_scheduled() {
        let h = harness(vec![Ok(COMPLETE.to_string())]).await;
        link(&h, 2).await;

        let reply = h.assistant.handle(Some(2), "lunch with Sam", None).await;
        assert!(reply.contains("lunch with Sam"));
        assert!(reply.contains("01-06-2026 13:00"));
        assert!(reply.contains("https://calendar.example/evt-1"));
        assert_eq!(
            *h.calendar.inserted.lock().expect("lock"),
            vec![("lunch with Sam".to_string(), "access".to_string())]
        );
    }

    #[tokio::test]
    async fn follow_up_answers_fill_the_draft() {
        let h = harness(vec![
            Ok(r#"{"intent":"create_event","title":"sync","participants":["Ann"]}"#.to_string()),
            Ok(r#"{"intent":"unknown","title":"","participants":[],"date":"02-06-2026","time":"09:00"}"#.to_string()),
        ])
        .await;
        link(&h, 3).await;

        let first = h.assistant.handle(Some(3), "set up a sync with Ann", None).await;
        assert_eq!(
            first,
            "On which date should I schedule this event?\nAt what time should I schedule it?"
        );

        let second = h.assistant.handle(Some(3), "June 2nd at 9", None).await;
        assert!(second.contains("sync"), "unexpected reply: {}", second);
        assert_eq!(h.calendar.inserted.lock().expect("lock").len(), 1);

        // Draft consumed.
        assert_eq!(
            h.assistant.handle(Some(3), "/cancel", None).await,
            i18n::t("reply.nothing_to_cancel")
        );
    }

    #[tokio::test]
    async fn prose_output_asks_to_rephrase() {
        let h = harness(vec![Ok("I'm not sure what you mean.".to_string())]).await;
        link(&h, 4).await;
        assert_eq!(
            h.assistant.handle(Some(4), "hmm", None).await,
            i18n::t("reply.rephrase")
        );
    }

    #[tokio::test]
    async fn unknown_intent_is_nothing_to_schedule() {
        let h = harness(vec![Ok(
            r#"{"intent":"unknown","title":"chat","participants":["me"],"date":"01-01-2026","time":"10:00"}"#.to_string(),
        )])
        .await;
        link(&h, 5).await;
        assert_eq!(
            h.assistant.handle(Some(5), "how are you?", None).await,
            i18n::t("reply.nothing_to_schedule")
        );
        assert!(h.calendar.inserted.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn llm_failures_and_timeouts_get_apology() {
        let h = harness(vec![Err(AppError::UpstreamUnavailable("down".to_string()))]).await;
        link(&h, 6).await;
        assert_eq!(
            h.assistant.handle(Some(6), "lunch", None).await,
            i18n::t("reply.upstream_error")
        );

        let slow = harness_with(Arc::new(SlowLlm), RecordingCalendar::default()).await;
        link(&slow, 6).await;
        assert_eq!(
            slow.assistant.handle(Some(6), "lunch", None).await,
            i18n::t("reply.upstream_error")
        );
    }

    #[tokio::test]
    async fn rejected_calendar_credentials_ask_to_relink() {
        let h = harness_with(
            ScriptedLlm::new(vec![Ok(COMPLETE.to_string())]),
            RecordingCalendar {
                reject: true,
                ..Default::default()
            },
        )
        .await;
        link(&h, 7).await;
        assert_eq!(
            h.assistant.handle(Some(7), "lunch", None).await,
            i18n::t("auth.link_required")
        );
    }

    #[tokio::test]
    async fn google_auth_replies_with_link() {
        let h = harness(vec![]).await;
        let reply = h.assistant.handle(Some(8), "/google_auth", None).await;
        assert!(reply.contains("http://localhost:3000/auth/google?state="));
    }

    #[tokio::test]
    async fn unlink_revokes_authentication() {
        let h = harness(vec![]).await;
        link(&h, 9).await;

        assert_eq!(
            h.assistant.handle(Some(9), "/unlink", None).await,
            i18n::t("auth.unlinked")
        );
        assert!(!h.gate.is_authenticated(9).await);
    }

    #[tokio::test]
    async fn replies_follow_language_code() {
        let h = harness(vec![]).await;
        assert_eq!(
            h.assistant.handle(Some(10), "/start", Some("ru-RU")).await,
            i18n::tr(Some("ru"), "bot.welcome", None)
        );
    }

    #[tokio::test]
    async fn calendar_outage_apologizes_and_keeps_draft() {
        let h = harness_with(
            ScriptedLlm::new(vec![
                Ok(r#"{"intent":"create_event","title":"sync","participants":["Ann"]}"#.to_string()),
                Ok(r#"{"intent":"create_event","title":"","participants":[],"date":"02-06-2026","time":"09:00"}"#.to_string()),
            ]),
            RecordingCalendar {
                outage: true,
                ..Default::default()
            },
        )
        .await;
        link(&h, 11).await;

        h.assistant.handle(Some(11), "sync with Ann", None).await;
        assert_eq!(
            h.assistant.handle(Some(11), "June 2nd at 9", None).await,
            i18n::t("reply.upstream_error")
        );
        assert!(h.calendar.inserted.lock().expect("lock").is_empty());

        assert_eq!(
            h.assistant.handle(Some(11), "/cancel", None).await,
            i18n::t("reply.draft_cancelled")
        );
    }

    #[test]
    fn scheduled_reply_echoes_user_values_verbatim() {
        let slots = serde_json::json!({
            "intent": "create_event",
            "title": "Review {date} plan",
            "participants": ["{reminder} team"],
            "date": "01-06-2026",
            "time": "13:00",
            "reminder": "10m"
        });
        let slots = slots.as_object().expect("object");
        let event = crate::services::extraction::validate_slots(slots).expect("valid");
        let created = ScheduledEvent {
            id: "evt-1".to_string(),
            html_link: None,
        };

        let reply = scheduled_reply(&event, &created, None);
        assert!(reply.contains("Review {date} plan"), "unexpected reply: {}", reply);
        assert!(reply.contains("{reminder} team"), "unexpected reply: {}", reply);
        assert!(reply.contains("01-06-2026 13:00"));
    }
}
