//! HTTP submission surface

pub mod handlers;
pub mod state;

pub use handlers::{canonical_component_name, create_router, ApiStatus, SubmitResponse};
pub use state::AppState;
