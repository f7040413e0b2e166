pub mod channel;
pub mod runner;

pub use channel::{create_channel, Receiver, Sender};
pub use runner::{Agent, RunError, RunSummary};
