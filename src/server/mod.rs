//! The bridge server: HTTP health/start-session endpoints plus the two
//! WebSocket upgrade points (carrier media, frontend fan-out).

pub mod broadcast;
pub mod carrier_ws;
pub mod frontend_ws;
pub mod registry;
pub mod routes;
pub mod state;

pub use broadcast::{BroadcastManager, FrontendEvent};
pub use registry::SessionRegistry;
pub use routes::create_router;
pub use state::AppState;
