//! Port definitions for the collaborators the hub is constructed with.
//!
//! The hub never reaches for ambient globals: paths, user-facing messages
//! and snapshot delivery all come in through these traits.

mod error;
mod notifier;
mod observer;
mod paths;

pub use error::HubError;
pub use notifier::{NoopNotifier, Notice, NoticeLevel, UserNotifier};
pub use observer::{NoopObserver, SnapshotObserver};
pub use paths::SettingsPathProvider;
