//! Structured logging for the follow-up engine.
//!
//! Handles log redaction, console plus rolling NDJSON file output, and the
//! delivery lifecycle event stream.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{DeliveryEvent, DeliveryEventLogger, EventLogEntry};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
