//! Inbound Close webhooks.
//!
//! - [`signing`]: HMAC-SHA256 verification of `close-sig-hash` against per-subscription keys
//! - [`envelope`]: Normalization of the legacy and enveloped payload shapes
//! - [`events`]: Canonical actions and the notifications listeners receive
//! - [`dispatcher`]: Key → handler registry and the fixed emission order

pub mod dispatcher;
pub mod envelope;
pub mod events;
pub mod signing;

pub use dispatcher::{ListenerId, Listeners, notifications};
pub use envelope::{WebhookEnvelope, normalize};
pub use events::{Action, ActionPayload, Notification, NotificationPayload};
pub use signing::{SecretLookup, SignatureHeaders, SignatureKeys, sign_payload, verify};
