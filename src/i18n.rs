/*
Simple i18n helper for bot replies.

This module provides:
- A tiny embedded translations store for EN/RU (compile-time embedded JSON).
- A simple `tr` function to lookup translations by key + optional params.
- A `t` convenience wrapper using the default language (DEFAULT_LANG).

Usage:
    use crate::i18n;
    let msg = i18n::t("reply.rephrase");
    let msg_with = i18n::tr(Some("ru"), "followup.generic", Some(&[("field", "location")]));

Notes:
- Placeholders in translation strings use single-brace format: `{name}`.
- Default language is `en`. If a key is missing for the requested language,
  the fallback language will be used.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "en";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const EN_JSON: &str = r#"
{
  "followup.title": "What should be the title of the event?",
  "followup.date": "On which date should I schedule this event?",
  "followup.time": "At what time should I schedule it?",
  "followup.participants": "Whom should I add as participants?",
  "followup.reminder": "When do you want me to remind you?",
  "followup.generic": "I need more information for: {field}",
  "reply.rephrase": "Sorry, I couldn't understand that. Could you please rephrase your request?",
  "reply.nothing_to_schedule": "Got it! I didn't find an event to schedule in that message.",
  "reply.scheduled": "✅ Event scheduled: {title}\n📅 {date} {time}\n👥 {participants}\n⏰ Reminder: {reminder}",
  "reply.scheduled_link": "🔗 {link}",
  "reply.upstream_error": "Sorry, something went wrong on our side. Please try again in a moment.",
  "reply.draft_cancelled": "Okay, I've discarded the event we were working on.",
  "reply.nothing_to_cancel": "There is nothing to cancel.",
  "bot.welcome": "Welcome to OnTime Bot! Send your message",
  "bot.help": "I will help you stay on time!\n\nDescribe an event in plain words, e.g. \"lunch with Sam tomorrow 1pm, remind me 10 min before\".\n\n/google_auth - link your Google Calendar\n/cancel - discard the event in progress\n/unlink - disconnect your Google account",
  "bot.unknown_command": "Unknown command. Send /help to see what I can do.",
  "auth.no_identity": "Unable to identify your Telegram ID. Please try again.",
  "auth.link_required": "You need to authenticate first. Please use /google_auth command to link your Google account.",
  "auth.link_prompt": "Open this link to connect your Google Calendar:\n{url}",
  "auth.linked": "Google account linked successfully",
  "auth.linked_not_saved": "Google account linked, but your credentials could not be saved. Please try /google_auth again later.",
  "auth.failed": "Google authentication failed",
  "auth.unlinked": "Your Google account has been unlinked.",
  "auth.unlink_failed": "Could not unlink your Google account right now. Please try again later."
}
"#;

const RU_JSON: &str = r#"
{
  "followup.title": "Как назвать это событие?",
  "followup.date": "На какую дату запланировать событие?",
  "followup.time": "На какое время запланировать?",
  "followup.participants": "Кого добавить в участники?",
  "followup.reminder": "Когда вам напомнить?",
  "followup.generic": "Нужно больше информации: {field}",
  "reply.rephrase": "Извините, я не понял. Попробуйте сформулировать запрос иначе.",
  "reply.nothing_to_schedule": "Понял! В этом сообщении нет события для планирования.",
  "reply.scheduled": "✅ Событие запланировано: {title}\n📅 {date} {time}\n👥 {participants}\n⏰ Напоминание: {reminder}",
  "reply.upstream_error": "Извините, у нас что-то пошло не так. Попробуйте ещё раз чуть позже.",
  "reply.draft_cancelled": "Хорошо, я отменил событие, над которым мы работали.",
  "reply.nothing_to_cancel": "Нечего отменять.",
  "bot.welcome": "Добро пожаловать в OnTime Bot! Отправьте сообщение",
  "bot.unknown_command": "Неизвестная команда. Отправьте /help, чтобы узнать, что я умею.",
  "auth.no_identity": "Не удалось определить ваш Telegram ID. Попробуйте ещё раз.",
  "auth.link_required": "Сначала нужно авторизоваться. Используйте команду /google_auth, чтобы привязать аккаунт Google.",
  "auth.link_prompt": "Откройте ссылку, чтобы подключить Google Календарь:\n{url}",
  "auth.unlinked": "Ваш аккаунт Google отвязан."
}
"#;

/// Initialize translations map (lazy).
fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    // Parse EN
    let en_map: HashMap<String, String> = serde_json::from_str(EN_JSON).unwrap_or_else(|e| {
        panic!("failed to parse EN_JSON in i18n module: {}", e);
    });
    out.insert("en".to_string(), en_map);

    // Parse RU
    let ru_map: HashMap<String, String> = serde_json::from_str(RU_JSON).unwrap_or_else(|e| {
        panic!("failed to parse RU_JSON in i18n module: {}", e);
    });
    out.insert("ru".to_string(), ru_map);

    out
}

/// Returns the global translations map (lang -> (key -> message)).
fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "en-US" -> "en").
///
/// Telegram reports `language_code` as an IETF tag; this converts it to the
/// short form used by the translation keys.
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

/// Returns true if the given language code has a translation table.
pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Pick a supported language from an optional Telegram `language_code`.
pub fn resolve_language(language_code: Option<&str>) -> Option<String> {
    language_code
        .map(normalize_language)
        .filter(|l| is_supported_language(l))
}

/// Translate a key using an explicit language (or default if None).
///
/// - `lang`: optional language code (`"en"`, `"ru"`). If None, DEFAULT_LANG is used.
/// - `key`: translation key (flat string, e.g. "followup.title").
/// - `params`: optional slice of (name, value) for placeholder replacement.
///
/// Returns the translated and parameter-substituted string. If no translation is found,
/// returns the default language value or the key itself.
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang.unwrap_or(DEFAULT_LANG);

    let val = map
        .get(desired)
        .and_then(|m| m.get(key))
        .cloned()
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        .unwrap_or_else(|| key.to_string());

    match params {
        Some(params) => substitute(&val, params),
        None => val,
    }
}

/// Single left-to-right pass over `template`. Inserted values are never rescanned,
/// so a value containing `{name}` is emitted verbatim. Unknown placeholders stay as-is.
fn substitute(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match params.iter().find(|(k, _)| *k == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Convenience wrapper: translate using default language (DEFAULT_LANG).
pub fn t(key: &str) -> String {
    tr(None, key, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr_basic() {
        let s = tr(Some("en"), "auth.link_required", None);
        assert!(s.contains("/google_auth"));
    }

    #[test]
    fn test_tr_with_params() {
        let s = tr(None, "followup.generic", Some(&[("field", "location")]));
        assert_eq!(s, "I need more information for: location");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let s = tr(
            None,
            "followup.generic",
            Some(&[("field", "{field} and {date}"), ("date", "01-06-2026")]),
        );
        assert_eq!(s, "I need more information for: {field} and {date}");
    }

    #[test]
    fn substitute_keeps_unknown_and_unclosed_braces() {
        assert_eq!(substitute("a {x} {y", &[("z", "1")]), "a {x} {y");
        assert_eq!(substitute("{a}{b}", &[("a", "1"), ("b", "2")]), "12");
    }

    #[test]
    fn test_fallback_to_default() {
        // Unknown language falls back to default (en)
        let s = tr(Some("fr"), "followup.title", None);
        assert_eq!(s, "What should be the title of the event?");
        // Key missing from RU falls back to EN
        let s = tr(Some("ru"), "auth.linked", None);
        assert_eq!(s, "Google account linked successfully");
    }

    #[test]
    fn missing_key_returns_key() {
        let k = "non.existent.key";
        assert_eq!(t(k), k.to_string());
    }

    #[test]
    fn test_resolve_language() {
        assert_eq!(resolve_language(Some("ru-RU")), Some("ru".to_string()));
        assert_eq!(resolve_language(Some("EN-us")), Some("en".to_string()));
        assert_eq!(resolve_language(Some("de")), None);
        assert_eq!(resolve_language(None), None);
    }
}
