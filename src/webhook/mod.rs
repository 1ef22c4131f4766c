//! Carrier webhook ingestion: event parsing, the closing-protocol
//! classifier, the carrier REST client, IVR auto-navigation, and the call
//! state machine that ties them together.

pub mod carrier_client;
pub mod closing;
pub mod events;
pub mod ivr;
pub mod state_machine;

pub use carrier_client::CarrierClient;
pub use state_machine::{handle_webhook, retry_recap, WebhookState};
