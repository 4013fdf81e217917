//! Deferred actions: orders and cart snapshots made while offline, replayed
//! when a sync trigger fires.

mod replay;
mod scheduler;
mod store;

pub use replay::{CartSyncOutcome, DeferredQueue, OrderOutcome, ReplayOutcome};
pub use scheduler::{ReplayFeedback, ReplayScheduler};
pub use store::{ActionStore, CartItem, PendingAction};
