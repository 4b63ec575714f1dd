//! Request orchestration and error shaping.

pub mod errors;
pub mod processor;

pub use errors::{codes, enrich_error_data, ProxyError};
pub use processor::{ProcessOutcome, ProcessorConfig, RequestProcessor, SingleOutcome};
