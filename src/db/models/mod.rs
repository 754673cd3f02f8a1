#![allow(unused_imports)]

//! Database models, one file per table.

pub mod credential;
pub mod slot_draft;

pub use self::credential::*;
pub use self::slot_draft::*;
