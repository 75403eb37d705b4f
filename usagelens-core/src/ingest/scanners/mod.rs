//! Source-specific scanners
//!
//! | Scanner | Files | Produces |
//! |---------|-------|----------|
//! | [`ChatSessionScanner`] | `*/chatSessions/*.json` | sessions with turns |
//! | [`EditStateScanner`] | `*/chatEditingSessions/*/state.json` | request timelines |
//! | [`LogScanner`] | `*/window*/exthost/GitHub.copilot-chat/*.log` | request log entries |

pub mod chat_sessions;
pub mod edit_state;
pub mod window_logs;

pub use chat_sessions::{
    language_for_path, ChatSessionScan, ChatSessionScanResult, ChatSessionScanner, ChatTurn,
};
pub use edit_state::{EditStateScan, EditStateScanner};
pub use window_logs::{LogFileUpdate, LogScan, LogScanner};
