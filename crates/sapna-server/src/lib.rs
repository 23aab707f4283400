// HTTP and WebSocket surfaces of the fantasy rooms service.

pub mod api;
pub mod overlay;
pub mod state;

pub use api::build_router;
pub use state::AppState;
