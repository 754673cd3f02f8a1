//! Renders follow-up questions for slots the model could not fill.

use crate::i18n;

/// Questions for a set of missing slots. The generator only renders text; the
/// caller decides whether to send the sequence as one message or one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    Single(String),
    Sequence(Vec<String>),
}

impl FollowUp {
    pub fn questions(&self) -> Vec<&str> {
        match self {
            FollowUp::Single(q) => vec![q.as_str()],
            FollowUp::Sequence(qs) => qs.iter().map(String::as_str).collect(),
        }
    }

    /// All questions joined into one message, one per line, in order.
    pub fn render(&self) -> String {
        self.questions().join("\n")
    }
}

/// Canned question for one slot name. Unknown names fall back to a generic prompt.
pub fn question_for(lang: Option<&str>, field: &str) -> String {
    match field {
        "title" | "date" | "time" | "participants" | "reminder" => {
            i18n::tr(lang, &format!("followup.{}", field), None)
        }
        other => i18n::tr(lang, "followup.generic", Some(&[("field", other)])),
    }
}

#[cfg(test)]
pub fn build_followup<S: AsRef<str>>(fields: &[S]) -> FollowUp {
    build_followup_in(None, fields)
}

pub fn build_followup_in<S: AsRef<str>>(lang: Option<&str>, fields: &[S]) -> FollowUp {
    if let [only] = fields {
        return FollowUp::Single(question_for(lang, only.as_ref()));
    }

    FollowUp::Sequence(
        fields
            .iter()
            .map(|f| question_for(lang, f.as_ref()))
            .collect(),
    )
}
