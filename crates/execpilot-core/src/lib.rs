//! # ExecPilot Core
//!
//! Shared types, typed user preferences, collaborator traits, configuration,
//! and the unified error type used by every ExecPilot crate.

pub mod config;
pub mod error;
pub mod preferences;
pub mod traits;
pub mod types;

pub use config::ExecPilotConfig;
pub use error::{ExecPilotError, Result};
pub use preferences::UserPreferences;
pub use types::{
    ChannelKind, ChatSendResult, Email, InboxOptions, InboxSummary, Lead, Meeting, Priority, Task,
    TaskStatus, UserRecord,
};
