pub mod channels;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod local;

pub use dispatch::decision::{TriggerEvent, SEQUENCE_MAX, STIM_THRESHOLD};
pub use error::Error;
