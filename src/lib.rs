pub mod buffer;
pub mod cli;
pub mod config;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod shipper;
pub mod source;
pub mod status;
pub mod storage;
