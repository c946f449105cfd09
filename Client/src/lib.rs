pub mod args;
pub mod error;
pub mod events;
pub mod session;
pub mod utils;
