//! Client side of settings synchronization.
//!
//! Control flow: a local edit goes through [`SettingsHolder::update_local`],
//! which marks the scope dirty and arms the [`Debouncer`]. When the timer
//! fires, [`SyncClient::sync_if_idle`] pushes every dirty scope in one
//! request, clears the dirty flags the server confirmed, and reconciles any
//! newer server copies back into the holder via
//! [`reconcile`](reconcile::reconcile).

pub mod cache;
pub mod client;
pub mod debounce;
pub mod reconcile;
pub mod state;
pub mod transport;

pub use client::{RoundReport, SkipReason, SyncClient, SyncOptions, SyncOutcome, SyncStatus};
pub use debounce::Debouncer;
pub use reconcile::Resolution;
pub use state::{ChangeOrigin, SettingsChange, SettingsHolder, SettingsState};
pub use transport::{HttpTransport, SyncTransport};
