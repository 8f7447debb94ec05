//! Async entry points for a request-handling layer sitting on top of the
//! courier store: send, edit, delete, thread and inbox reads.

pub mod config;
pub mod error;
pub mod logging;
pub mod service;

pub use config::Config;
pub use error::ServiceError;
pub use service::MessagingService;
