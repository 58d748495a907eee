//! HTTP surface and background loops.
//!
//! Exposed as a library so integration tests can build the router and drive
//! it in-process with `tower::ServiceExt::oneshot`.

pub mod api;
pub mod background;
pub mod identity;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
