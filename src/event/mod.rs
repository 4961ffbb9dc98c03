//! Bridges collection cache events to the notify service.

mod instance_handler;
pub use instance_handler::*;

#[cfg(test)]
mod instance_handler_test;
