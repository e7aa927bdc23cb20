//! Gateway server implementation

pub mod embed;
mod router;
mod server;

pub use router::{AppState, create_router};
pub use server::Gateway;
