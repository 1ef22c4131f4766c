pub mod models;
pub mod queries;

pub use models::*;
pub use queries::{init_db, CallContextRepo, CallEventRepo, CallRepo, DbPool, IvrPathRepo, TranscriptionRepo};
