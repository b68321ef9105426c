//! Push delivery handling and watch lifecycle
//!
//! Gmail publishes mailbox changes to a Pub/Sub topic, which pushes them to
//! the service. `NotificationReceiver` turns a push body into a reconciliation
//! pass; `SubscriptionManager` registers and cancels the provider-side watch.

mod receiver;
mod subscription;

pub use receiver::{
    Acknowledgement, NotificationReceiver, PushEnvelope, PushMessage, decode_envelope,
};
pub use subscription::SubscriptionManager;
