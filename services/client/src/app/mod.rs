//! services/client/src/app/mod.rs
//!
//! The application layer on top of the synchronizers: navigation state, account
//! flows, the tutor conversation, video generation and the line-oriented shell.

pub mod account;
pub mod router;
pub mod shell;
pub mod state;
pub mod tutor;
pub mod video;

pub use account::{AccountError, AccountFlows, CredentialPrompt};
pub use router::{Activity, EditorState, Router, View};
pub use shell::{Command, Flow, Shell};
pub use state::{AppState, StudyApp};
pub use tutor::TutorSession;
pub use video::{VideoError, VideoJob, VideoJobState};
