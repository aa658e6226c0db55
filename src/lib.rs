pub mod config;
pub mod content_id;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod intake;
pub mod lifecycle;
pub mod limiter;
pub mod lock;
pub mod log;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod recovery;
pub mod store;
pub mod types;
