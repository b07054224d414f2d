//! Delivery loop that turns logical events into notifications.
//!
//! All subscribers share one bounded channel into a single dispatcher. Each
//! camera has at most one [`DeliveryRecord`]; a new event for the camera
//! replaces it. Every pending record gets one attempt per sweep.
//!
//! ```text
//! subscriber (Front Door) ──┐
//! subscriber (Garage)     ──┼─► mpsc ──► handle_event ──► sweep ──► notifier
//! subscriber (Driveway)   ──┘                               ▲
//!                                                    retry timer (optional)
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};

use crate::capture::ImageCapture;
use crate::config::DispatcherConfig;
use crate::event::LogicalEvent;
use crate::notify::{Notification, Notifier};

/// Delivery state of the latest event for one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub event_type: String,
    pub attempts: u32,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
    /// Snapshot taken when the event arrived, if the capture succeeded
    pub image: Option<PathBuf>,
}

impl DeliveryRecord {
    fn new(event_type: String, image: Option<PathBuf>) -> Self {
        Self {
            event_type,
            attempts: 0,
            delivered: false,
            created_at: Utc::now(),
            image,
        }
    }

    pub fn is_pending(&self, max_attempts: u32) -> bool {
        !self.delivered && self.attempts < max_attempts
    }

    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        !self.delivered && self.attempts >= max_attempts
    }
}

/// Owns the delivery records and the capture and notify collaborators.
pub struct Dispatcher<C, N> {
    capture: C,
    notifier: N,
    records: BTreeMap<String, DeliveryRecord>,
    max_attempts: u32,
    retry_interval: Option<Duration>,
}

impl<C: ImageCapture, N: Notifier> Dispatcher<C, N> {
    pub fn new(capture: C, notifier: N, config: &DispatcherConfig) -> Self {
        Self {
            capture,
            notifier,
            records: BTreeMap::new(),
            max_attempts: config.max_attempts,
            retry_interval: config.retry_interval(),
        }
    }

    pub fn record(&self, camera: &str) -> Option<&DeliveryRecord> {
        self.records.get(camera)
    }

    pub fn records(&self) -> &BTreeMap<String, DeliveryRecord> {
        &self.records
    }

    /// Capture a snapshot and reset the camera's record to a fresh pending one.
    pub async fn handle_event(&mut self, event: &LogicalEvent) {
        let name = event.camera_name();
        log::info!(
            "[{}] {} event at {}",
            name,
            event.event_type,
            event.detected_at.format("%Y-%m-%d %H:%M:%S %Z")
        );

        let image = match self.capture.capture(&event.camera).await {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("[{}] Snapshot failed, sending without image: {:#}", name, e);
                None
            }
        };

        if let Some(old) = self.records.get(name) {
            if old.is_pending(self.max_attempts) {
                log::debug!(
                    "[{}] Replacing undelivered {} event",
                    name,
                    old.event_type
                );
            }
        }
        self.records.insert(
            name.to_string(),
            DeliveryRecord::new(event.event_type.clone(), image),
        );
    }

    /// One delivery attempt for every pending record, in camera-name order.
    /// Returns the number of notifications delivered.
    pub async fn sweep(&mut self) -> usize {
        let mut delivered = 0;
        for (camera, record) in self.records.iter_mut() {
            if !record.is_pending(self.max_attempts) {
                continue;
            }

            record.attempts += 1;
            log::debug!(
                "[{}] Sending {} notification (attempt {}/{})",
                camera,
                record.event_type,
                record.attempts,
                self.max_attempts
            );

            let notification = Notification {
                camera,
                event_type: &record.event_type,
                image: record.image.as_deref(),
            };
            match self.notifier.notify(&notification).await {
                Ok(()) => {
                    record.delivered = true;
                    delivered += 1;
                    log::info!("[{}] Notification sent", camera);
                }
                Err(e) if record.attempts >= self.max_attempts => {
                    log::error!(
                        "[{}] Giving up on {} event after {} attempts: {:#}",
                        camera,
                        record.event_type,
                        record.attempts,
                        e
                    );
                }
                Err(e) => {
                    log::warn!("[{}] Notification failed: {:#}", camera, e);
                }
            }
        }
        delivered
    }

    /// Process events until every sender is dropped or shutdown fires.
    ///
    /// Each event is followed by a sweep. With a retry interval configured,
    /// pending records are also swept on a timer.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<LogicalEvent>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        let mut retry_timer = self.retry_interval.map(|period| {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            self.handle_event(&event).await;
                            self.sweep().await;
                        }
                        None => {
                            log::info!("All event streams closed");
                            break;
                        }
                    }
                }
                _ = next_tick(&mut retry_timer) => {
                    self.sweep().await;
                }
                _ = shutdown_rx.changed() => {
                    log::info!("Shutdown signal received, stopping dispatcher");
                    break;
                }
            }
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
