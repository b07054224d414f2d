//! Per-camera alert stream reader.
//!
//! Each camera gets one [`StreamSubscriber`] task. It holds a long-lived
//! `GET /ISAPI/Event/notification/alertStream`, cuts the multipart body into
//! alert records, and forwards one [`LogicalEvent`] per inactive to active
//! transition. Failures stay inside the task: the connection is retried with
//! backoff while sibling cameras and the dispatcher keep running.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::sync::{mpsc, watch};

use crate::config::{CameraConfig, ReconnectConfig};
use crate::event::{EventState, LogicalEvent, RawEventRecord};
use crate::multipart::{self, MultipartError, MultipartParser};

/// Event notification endpoint, relative to the camera's address.
pub const ALERT_STREAM_PATH: &str = "/ISAPI/Event/notification/alertStream";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("camera answered {0}")]
    Status(reqwest::StatusCode),

    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),

    #[error("gave up after {0} consecutive failures")]
    Degraded(u32),

    #[error("event channel closed")]
    ChannelClosed,
}

/// HTTP client for alert streams: bounded connect, unbounded body.
pub fn stream_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// Whether an event is currently active on the camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    Inactive,
    Active,
}

/// De-duplicates repeated `active` pushes into single transitions.
#[derive(Debug, Default)]
pub struct EventTracker {
    state: StreamState,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Fold one record's state in. Returns true when it starts a new event.
    pub fn observe(&mut self, state: &EventState) -> bool {
        match state {
            EventState::Active => {
                let started = self.state == StreamState::Inactive;
                self.state = StreamState::Active;
                started
            }
            EventState::Inactive => {
                self.state = StreamState::Inactive;
                false
            }
            EventState::Other(_) => false,
        }
    }
}

/// How a connection ended without error.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    Eof,
    Shutdown,
}

/// Reads one camera's alert stream and feeds the shared event channel.
pub struct StreamSubscriber {
    camera: Arc<CameraConfig>,
    client: reqwest::Client,
    events: mpsc::Sender<LogicalEvent>,
    reconnect: ReconnectConfig,
    tz: Tz,
}

impl StreamSubscriber {
    pub fn new(
        camera: Arc<CameraConfig>,
        client: reqwest::Client,
        events: mpsc::Sender<LogicalEvent>,
        reconnect: ReconnectConfig,
        tz: Tz,
    ) -> Self {
        Self {
            camera,
            client,
            events,
            reconnect,
            tz,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}{}", self.camera.ip_address, ALERT_STREAM_PATH)
    }

    /// Run until the stream ends cleanly, shutdown fires, or reconnects are
    /// exhausted.
    ///
    /// A clean end of stream completes the subscriber; errors reconnect with
    /// exponential backoff.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) -> Result<(), StreamError> {
        let name = self.camera.name.clone();
        log::info!("[{}] Subscribing to {}", name, self.url());

        let mut failures = 0u32;
        loop {
            let connected = tokio::select! {
                _ = shutdown_rx.changed() => return Ok(()),
                response = self.connect() => response,
            };

            let result = match connected {
                Ok(response) => {
                    log::info!("[{}] Event stream connected", name);
                    self.consume(response, &mut shutdown_rx, &mut failures).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(StreamEnd::Eof) => {
                    log::info!("[{}] Event stream ended", name);
                    return Ok(());
                }
                Ok(StreamEnd::Shutdown) => {
                    log::debug!("[{}] Subscriber stopping", name);
                    return Ok(());
                }
                Err(StreamError::ChannelClosed) => {
                    log::warn!("[{}] Dispatcher gone, subscriber stopping", name);
                    return Err(StreamError::ChannelClosed);
                }
                Err(e) => {
                    failures += 1;
                    if let Some(max) = self.reconnect.max_attempts {
                        if failures >= max {
                            log::error!(
                                "[{}] Camera degraded after {} consecutive failures, last: {}",
                                name,
                                failures,
                                e
                            );
                            return Err(StreamError::Degraded(failures));
                        }
                    }

                    let delay = self.reconnect.delay_for(failures);
                    log::warn!(
                        "[{}] Event stream failed: {}. Reconnecting in {:?}",
                        name,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = shutdown_rx.changed() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect(&self) -> Result<reqwest::Response, StreamError> {
        let response = self
            .client
            .get(self.url())
            .basic_auth(&self.camera.username, Some(&self.camera.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status));
        }
        Ok(response)
    }

    /// Read parts until the stream ends. `failures` is cleared once the
    /// connection delivers a complete part, so a camera that answers 200 and
    /// then sends garbage keeps backing off.
    async fn consume(
        &self,
        mut response: reqwest::Response,
        shutdown_rx: &mut watch::Receiver<()>,
        failures: &mut u32,
    ) -> Result<StreamEnd, StreamError> {
        let declared = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(multipart::boundary_from_content_type);
        let boundary = declared.unwrap_or_else(|| {
            log::debug!(
                "[{}] No boundary declared, assuming '{}'",
                self.camera.name,
                multipart::FALLBACK_BOUNDARY
            );
            multipart::FALLBACK_BOUNDARY.to_string()
        });

        let mut parser = MultipartParser::new(&boundary);
        // Fresh per connection: a reconnect starts from Inactive.
        let mut tracker = EventTracker::new();

        loop {
            let chunk = tokio::select! {
                _ = shutdown_rx.changed() => return Ok(StreamEnd::Shutdown),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                return Ok(StreamEnd::Eof);
            };

            parser.push(&chunk);
            while let Some(part) = parser.next_part()? {
                *failures = 0;
                if let Some(end) = self
                    .handle_part(&part.body, &mut tracker, shutdown_rx)
                    .await?
                {
                    return Ok(end);
                }
            }
            if parser.is_finished() {
                return Ok(StreamEnd::Eof);
            }
        }
    }

    async fn handle_part(
        &self,
        body: &[u8],
        tracker: &mut EventTracker,
        shutdown_rx: &mut watch::Receiver<()>,
    ) -> Result<Option<StreamEnd>, StreamError> {
        let record = match RawEventRecord::parse(body, self.tz) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("[{}] Skipping malformed event: {}", self.camera.name, e);
                return Ok(None);
            }
        };

        log::debug!(
            "{} event: {} ({} - {})",
            self.camera.name,
            record.event_type,
            record.state,
            record.sequence
        );

        if !tracker.observe(&record.state) {
            return Ok(None);
        }

        let event = LogicalEvent::from_record(self.camera.clone(), &record, self.tz);
        // Blocks while the dispatcher is busy.
        tokio::select! {
            _ = shutdown_rx.changed() => Ok(Some(StreamEnd::Shutdown)),
            sent = self.events.send(event) => {
                sent.map_err(|_| StreamError::ChannelClosed)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(code: u8) -> EventState {
        match code {
            0 => EventState::Active,
            1 => EventState::Inactive,
            _ => EventState::Other("standby".into()),
        }
    }

    #[test]
    fn test_repeated_active_emits_once() {
        let mut tracker = EventTracker::new();
        assert!(tracker.observe(&EventState::Active));
        assert!(!tracker.observe(&EventState::Active));
        assert!(!tracker.observe(&EventState::Active));
        assert_eq!(tracker.state(), StreamState::Active);
    }

    #[test]
    fn test_inactive_rearms() {
        let mut tracker = EventTracker::new();
        assert!(tracker.observe(&EventState::Active));
        assert!(!tracker.observe(&EventState::Inactive));
        assert_eq!(tracker.state(), StreamState::Inactive);
        assert!(tracker.observe(&EventState::Active));
    }

    #[test]
    fn test_other_state_changes_nothing() {
        let mut tracker = EventTracker::new();
        assert!(!tracker.observe(&EventState::Other("standby".into())));
        assert_eq!(tracker.state(), StreamState::Inactive);
        assert!(tracker.observe(&EventState::Active));
        assert!(!tracker.observe(&EventState::Other("standby".into())));
        assert_eq!(tracker.state(), StreamState::Active);
        assert!(!tracker.observe(&EventState::Active));
    }

    #[test]
    fn test_emits_exactly_on_inactive_to_active_transitions() {
        // Every sequence of up to 6 records over {active, inactive, other}.
        for len in 0..=6u32 {
            for mut code in 0..3u32.pow(len) {
                let mut seq = Vec::new();
                for _ in 0..len {
                    seq.push(state((code % 3) as u8));
                    code /= 3;
                }

                let mut tracker = EventTracker::new();
                let emitted: Vec<usize> = seq
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| tracker.observe(s))
                    .map(|(i, _)| i)
                    .collect();

                // Independent model: an active record emits when the most recent
                // active/inactive record before it is inactive, or there is none.
                let expected: Vec<usize> = (0..seq.len())
                    .filter(|&i| {
                        seq[i] == EventState::Active
                            && seq[..i]
                                .iter()
                                .rev()
                                .find(|s| !matches!(s, EventState::Other(_)))
                                .map_or(true, |s| *s == EventState::Inactive)
                    })
                    .collect();

                assert_eq!(emitted, expected, "sequence {:?}", seq);
            }
        }
    }

    #[test]
    fn test_url() {
        let (tx, _rx) = mpsc::channel(1);
        let subscriber = StreamSubscriber::new(
            Arc::new(CameraConfig {
                name: "Front Door".into(),
                ip_address: "192.168.1.64:8080".into(),
                username: "admin".into(),
                password: "secret".into(),
            }),
            reqwest::Client::new(),
            tx,
            ReconnectConfig::default(),
            chrono_tz::America::New_York,
        );
        assert_eq!(
            subscriber.url(),
            "http://192.168.1.64:8080/ISAPI/Event/notification/alertStream"
        );
    }
}
