//! Ingestion: finding source files and turning them into records.
//!
//! - [`log_parsing`]: stateless text helpers for request logs
//! - [`scanner`]: the [`SourceScanner`] trait shared by all sources
//! - [`scanners`]: one scanner per on-disk source

pub mod log_parsing;
pub mod scanner;
pub mod scanners;

pub use log_parsing::{
    file_size, parse_multi_line_requests, parse_timestamp, read_file_content, read_new_content,
    TailRead,
};
pub use scanner::{FileMeta, SourcePattern, SourceScanner};
pub use scanners::{
    ChatSessionScan, ChatSessionScanResult, ChatSessionScanner, EditStateScan, EditStateScanner,
    LogFileUpdate, LogScan, LogScanner,
};
