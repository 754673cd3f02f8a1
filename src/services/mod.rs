pub mod assistant;
pub mod auth;
pub mod auth_gate;
pub mod calendar;
pub mod credentials;
pub mod extraction;
pub mod followup;
pub mod google;
pub mod init;
pub mod llm;
pub mod slots;
pub mod telegram;
pub mod webhooks;
