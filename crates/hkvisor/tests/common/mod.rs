//! Test helpers: an in-process fake camera and recording collaborators.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, StreamExt};

use hkvisor::capture::ImageCapture;
use hkvisor::config::{CameraConfig, Config};
use hkvisor::notify::{Notification, Notifier};

/// `Authorization` value for admin:secret
const ADMIN_SECRET: &str = "Basic YWRtaW46c2VjcmV0";

pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0xFF, 0xD9];

/// An alert payload as the camera pushes it.
pub fn alert(event_type: &str, state: &str, count: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<EventNotificationAlert version="2.0" xmlns="http://www.hikvision.com/ver20/XMLSchema">
<ipAddress>192.168.1.64</ipAddress>
<portNo>80</portNo>
<protocol>HTTP</protocol>
<channelID>1</channelID>
<dateTime>2023-05-01T12:00:{:02}-04:00</dateTime>
<activePostCount>{count}</activePostCount>
<eventType>{event_type}</eventType>
<eventState>{state}</eventState>
<eventDescription>Motion alarm</eventDescription>
</EventNotificationAlert>"#,
        count % 60
    )
}

/// What the fake camera sends on its alert stream.
#[derive(Clone)]
pub struct StreamScript {
    /// Boundary used in the body
    pub boundary: String,
    /// Whether `boundary=` is declared in the Content-Type header
    pub declare_boundary: bool,
    /// Part bodies, one chunk each
    pub parts: Vec<String>,
    /// Keep the connection open after the last part instead of closing it
    pub hold_open: bool,
    /// Sent verbatim instead of the framed parts
    pub raw_body: Option<String>,
}

impl StreamScript {
    pub fn new(parts: Vec<String>) -> Self {
        Self {
            boundary: "boundary".into(),
            declare_boundary: true,
            parts,
            hold_open: false,
            raw_body: None,
        }
    }

    /// A 200 response whose body is `body` as-is.
    pub fn raw(body: String) -> Self {
        Self {
            raw_body: Some(body),
            ..Self::new(Vec::new())
        }
    }

    fn chunks(&self) -> Vec<Result<Bytes, std::io::Error>> {
        if let Some(raw) = &self.raw_body {
            return vec![Ok(Bytes::from(raw.clone()))];
        }
        let mut chunks: Vec<Result<Bytes, std::io::Error>> = self
            .parts
            .iter()
            .map(|body| {
                Ok(Bytes::from(format!(
                    "--{}\r\nContent-Type: application/xml; charset=\"UTF-8\"\r\nContent-Length: {}\r\n\r\n{}\r\n",
                    self.boundary,
                    body.len(),
                    body
                )))
            })
            .collect();
        if !self.hold_open {
            chunks.push(Ok(Bytes::from(format!("--{}--\r\n", self.boundary))));
        }
        chunks
    }
}

struct CameraState {
    script: StreamScript,
    stream_requests: AtomicUsize,
    snapshot_requests: AtomicUsize,
}

/// A camera serving the alert stream and snapshot endpoints on localhost.
pub struct FakeCamera {
    pub addr: SocketAddr,
    state: Arc<CameraState>,
}

impl FakeCamera {
    pub async fn start(script: StreamScript) -> Self {
        let state = Arc::new(CameraState {
            script,
            stream_requests: AtomicUsize::new(0),
            snapshot_requests: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/ISAPI/Event/notification/alertStream", get(alert_stream))
            .route("/Streaming/channels/1/picture", get(picture))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn stream_requests(&self) -> usize {
        self.state.stream_requests.load(Ordering::SeqCst)
    }

    pub fn snapshot_requests(&self) -> usize {
        self.state.snapshot_requests.load(Ordering::SeqCst)
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(ADMIN_SECRET)
}

async fn alert_stream(State(state): State<Arc<CameraState>>, headers: HeaderMap) -> Response {
    state.stream_requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let script = &state.script;
    let content_type = if script.declare_boundary {
        format!("multipart/mixed; boundary={}", script.boundary)
    } else {
        "multipart/mixed".to_string()
    };
    let chunks = stream::iter(script.chunks());
    let body = if script.hold_open {
        Body::from_stream(chunks.chain(stream::pending()))
    } else {
        Body::from_stream(chunks)
    };
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn picture(State(state): State<Arc<CameraState>>, headers: HeaderMap) -> Response {
    state.snapshot_requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ([(header::CONTENT_TYPE, "image/jpeg")], JPEG).into_response()
}

/// A notification as seen by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub camera: String,
    pub event_type: String,
    pub image: Option<PathBuf>,
}

/// Records every notification; cameras in `failing` always fail.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub attempts: Arc<Mutex<Vec<Sent>>>,
    pub delivered: Arc<Mutex<Vec<Sent>>>,
    pub failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingNotifier {
    pub fn failing(cameras: &[&str]) -> Self {
        let notifier = Self::default();
        notifier
            .failing
            .lock()
            .unwrap()
            .extend(cameras.iter().map(|c| c.to_string()));
        notifier
    }

    pub fn recover(&self, camera: &str) {
        self.failing.lock().unwrap().remove(camera);
    }

    pub fn delivered(&self) -> Vec<Sent> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, camera: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.camera == camera)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification<'_>) -> anyhow::Result<()> {
        let sent = Sent {
            camera: notification.camera.to_string(),
            event_type: notification.event_type.to_string(),
            image: notification.image.map(Path::to_path_buf),
        };
        self.attempts.lock().unwrap().push(sent.clone());
        if self.failing.lock().unwrap().contains(notification.camera) {
            anyhow::bail!("mail server rejected {}", notification.camera);
        }
        self.delivered.lock().unwrap().push(sent);
        Ok(())
    }
}

/// Pretends to capture by returning `<dir>/<camera>.jpg` without touching the
/// network. Cameras in `failing` produce an error.
#[derive(Clone)]
pub struct StaticCapture {
    pub dir: PathBuf,
    pub failing: HashSet<String>,
    pub calls: Arc<AtomicUsize>,
}

impl StaticCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            failing: HashSet::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_for(mut self, camera: &str) -> Self {
        self.failing.insert(camera.to_string());
        self
    }
}

#[async_trait]
impl ImageCapture for StaticCapture {
    async fn capture(&self, camera: &CameraConfig) -> anyhow::Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&camera.name) {
            anyhow::bail!("snapshot timed out");
        }
        Ok(hkvisor::capture::snapshot_path(&self.dir, &camera.name))
    }
}

/// A camera entry for [`config_yaml`].
pub struct TestCamera<'a> {
    pub name: &'a str,
    pub addr: SocketAddr,
    pub password: &'a str,
}

/// Build a validated config for `cameras`, with fast reconnects.
pub fn config_yaml(cameras: &[TestCamera<'_>], snapshot_dir: &Path, extra: &str) -> Config {
    let mut yaml = String::from("cameras:\n");
    for camera in cameras {
        yaml.push_str(&format!(
            "  - name: {}\n    ip_address: \"{}\"\n    username: admin\n    password: {}\n",
            camera.name, camera.addr, camera.password
        ));
    }
    yaml.push_str(&format!(
        "receivers:\n  smtp:\n    from: cams@example.com\n    to: me@example.com\n    server: localhost\n\
         snapshot_dir: {}\n\
         snapshot_timeout_secs: 2\n\
         reconnect:\n  initial_delay_ms: 10\n  max_delay_secs: 1\n  max_attempts: 2\n{}",
        snapshot_dir.display(),
        extra
    ));
    Config::parse(&yaml).unwrap()
}

/// A camera descriptor for dispatcher tests that never hit the network.
pub fn camera(name: &str) -> Arc<CameraConfig> {
    Arc::new(CameraConfig {
        name: name.into(),
        ip_address: "127.0.0.1:1".into(),
        username: "admin".into(),
        password: "secret".into(),
    })
}

/// Poll `condition` every 10ms until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
