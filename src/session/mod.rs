//! Per-call session state: the carrier media bridge and its inference
//! counterpart.

pub mod inference_client;
pub mod types;

pub use inference_client::{Session, SessionEvent};
