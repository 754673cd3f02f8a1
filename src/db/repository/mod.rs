pub mod credential;
pub mod link_state;
pub mod slot_draft;

pub use credential::CredentialRepository;
pub use link_state::LinkStateRepository;
pub use slot_draft::SlotDraftRepository;
