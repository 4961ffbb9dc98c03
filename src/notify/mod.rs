//! Typed publish/subscribe notification service.
//!
//! Producers (cache event handlers) publish [`NotifyJob`]s; long-lived
//! watchers register as [`Subscriber`]s under a (type, subject) pair. Every
//! notify type has its own bounded queue drained by one worker, so a slow
//! type never delays another.

mod health_checker;
mod job;
mod list_watcher;
mod service;
mod subscriber;
pub use health_checker::*;
pub use job::*;
pub use list_watcher::*;
pub use service::*;
pub use subscriber::*;
