pub mod api;
pub mod server;

pub use api::StatusState;
pub use server::{router, start_server};
