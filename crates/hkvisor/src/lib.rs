//! hkvisor
//!
//! Watches the event notification streams of network cameras and emails a
//! snapshot each time a camera reports a new event.
//!
//! # Architecture
//!
//! ```text
//! camera ─ alertStream ─► StreamSubscriber ──┐
//! camera ─ alertStream ─► StreamSubscriber ──┼─► mpsc ──► Dispatcher ──► SMTP
//! camera ─ alertStream ─► StreamSubscriber ──┘               │
//!                                                    snapshot capture
//! ```
//!
//! # Modules
//!
//! - [`config`]: YAML configuration for cameras, the SMTP receiver and retry tuning.
//! - [`error`]: Error type for daemon startup and wiring.
//! - [`multipart`]: Incremental `multipart/mixed` stream splitter.
//! - [`xml`]: Namespace-agnostic element lookup for alert payloads.
//! - [`event`]: Alert records and the logical events built from them.
//! - [`subscriber`]: Per-camera stream reader with reconnect and de-duplication.
//! - [`capture`]: Snapshot download.
//! - [`notify`]: Email composition and SMTP delivery.
//! - [`dispatcher`]: Per-camera delivery records and retry sweeps.
//! - [`daemon`]: Task wiring and shutdown.

pub mod capture;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod multipart;
pub mod notify;
pub mod subscriber;
pub mod xml;
