pub mod config;
pub mod error;
pub mod journal;
pub mod memory;
pub mod output;
pub mod rpc;
pub mod store;
pub mod time;
