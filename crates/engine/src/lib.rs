pub mod billing;
pub mod booking;
pub mod error;
pub mod locks;
pub mod merge;
pub mod outbound;
pub mod recon;
pub mod resolver;

pub use billing::{AdminLookup, BillingAdapter, BillingEvent, BillingWebhook};
pub use error::EngineError;
pub use locks::KeyedLocks;
pub use outbound::{CascadeReport, CrmApi, OutboundSync, RateLimiter, RemoteError, RetryPolicy};
pub use recon::{Outcome, Reconciler};
