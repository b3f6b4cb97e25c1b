pub mod frame;
pub mod hub;
pub mod server;

pub use hub::{RelayHub, RelayUpdate, SessionInfo, DEFAULT_RECENT_LIMIT};
pub use server::serve;
