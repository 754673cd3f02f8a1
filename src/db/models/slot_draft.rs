use sqlx::FromRow;

/// Slots a user has supplied so far for an event that is not complete yet.
/// Ownership and expiry are filtered in the query, so only the payload is loaded.
#[derive(Debug, Clone, FromRow)]
pub struct SlotDraft {
    /// JSON object keyed by slot name, in the same shape the model emits.
    pub slots_json: String,
}
