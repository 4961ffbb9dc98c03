pub(crate) mod backoff;
mod signal;
pub use signal::*;

#[cfg(test)]
mod backoff_test;
#[cfg(test)]
mod signal_test;
