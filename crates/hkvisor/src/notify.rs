//! Email notifications with the captured snapshot embedded inline.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lettre::message::header::{ContentType, ContentTypeErr};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpReceiver;

/// Port on which the server expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid address '{address}': {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },

    #[error("message error: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("content type error: {0}")]
    ContentType(#[from] ContentTypeErr),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("failed to read snapshot {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What the dispatcher asks to be sent.
#[derive(Debug, Clone, Copy)]
pub struct Notification<'a> {
    pub camera: &'a str,
    pub event_type: &'a str,
    pub image: Option<&'a Path>,
}

impl Notification<'_> {
    pub fn subject(&self) -> String {
        format!("{} {} Event", self.camera, self.event_type)
    }
}

/// Delivery channel for notifications. An `Err` counts as a failed attempt.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: &Notification<'_>) -> anyhow::Result<()>;
}

/// Content-ID for the inline image: the snapshot's file name, so each camera
/// references its own picture.
pub fn content_id(image: &Path) -> String {
    image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot.jpg".to_string())
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}

/// Build the email for `notification`. `image` carries the snapshot bytes
/// when one was captured and could be read.
pub fn compose(
    from: &Mailbox,
    to: &[Mailbox],
    notification: &Notification<'_>,
    image: Option<(String, Vec<u8>)>,
) -> Result<Message, NotifyError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(notification.subject());
    for recipient in to {
        builder = builder.to(recipient.clone());
    }

    let camera = escape_html(notification.camera);
    let message = match image {
        Some((cid, bytes)) => {
            let html = format!(r#"<img src="cid:{}" alt="{}" />"#, cid, camera);
            let jpeg = ContentType::parse("image/jpeg")?;
            builder.multipart(
                MultiPart::related()
                    .singlepart(SinglePart::html(html))
                    .singlepart(Attachment::new_inline(cid).body(bytes, jpeg)),
            )?
        }
        None => builder.singlepart(SinglePart::html(format!(
            "<p>{} {} event. No snapshot was available.</p>",
            camera,
            escape_html(notification.event_type)
        )))?,
    };
    Ok(message)
}

/// Sends notifications through the configured SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    /// Port 465 uses implicit TLS; any other port upgrades with STARTTLS.
    pub fn new(receiver: &SmtpReceiver) -> Result<Self, NotifyError> {
        let builder = if receiver.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&receiver.server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&receiver.server)?
        };
        let mut builder = builder.port(receiver.port);
        if !receiver.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                receiver.username.clone(),
                receiver.password.clone(),
            ));
        }

        let to = receiver
            .recipients()
            .into_iter()
            .map(parse_mailbox)
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Notifications go to {} via {}:{}",
            receiver.to,
            receiver.server,
            receiver.port
        );

        Ok(Self {
            transport: builder.build(),
            from: parse_mailbox(&receiver.from)?,
            to,
        })
    }

    async fn send(&self, notification: &Notification<'_>) -> Result<(), NotifyError> {
        let image = match notification.image {
            Some(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| NotifyError::Image {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Some((content_id(path), bytes))
            }
            None => None,
        };

        let message = compose(&self.from, &self.to, notification, image)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notification: &Notification<'_>) -> anyhow::Result<()> {
        Ok(self.send(notification).await?)
    }
}
