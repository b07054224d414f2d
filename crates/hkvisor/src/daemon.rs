//! Wires subscribers, the event channel and the dispatcher together.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::capture::{HttpSnapshotCapture, ImageCapture};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::notify::{Notifier, SmtpNotifier};
use crate::subscriber::{self, StreamSubscriber};

/// Run with the HTTP snapshot capture and the SMTP notifier from `config`.
pub async fn run(config: Config, shutdown_rx: watch::Receiver<()>) -> Result<()> {
    tokio::fs::create_dir_all(&config.snapshot_dir).await?;
    let capture = HttpSnapshotCapture::new(&config.snapshot_dir, config.snapshot_timeout())?;
    let notifier = SmtpNotifier::new(&config.receivers.smtp)?;

    run_with(&config, capture, notifier, shutdown_rx).await?;
    Ok(())
}

/// Run the pipeline with the given collaborators until every subscriber has
/// finished or shutdown fires. Returns the dispatcher so its final delivery
/// state can be inspected.
pub async fn run_with<C, N>(
    config: &Config,
    capture: C,
    notifier: N,
    shutdown_rx: watch::Receiver<()>,
) -> Result<Dispatcher<C, N>>
where
    C: ImageCapture,
    N: Notifier,
{
    let tz = config.timezone()?;
    let client = subscriber::stream_client()?;
    let (tx, rx) = mpsc::channel(config.dispatcher.channel_capacity);

    let mut dispatcher = Dispatcher::new(capture, notifier, &config.dispatcher);
    let dispatcher_shutdown = shutdown_rx.clone();
    let dispatcher_task = tokio::spawn(async move {
        dispatcher.run(rx, dispatcher_shutdown).await;
        dispatcher
    });

    let mut names = Vec::with_capacity(config.cameras.len());
    let mut handles = Vec::with_capacity(config.cameras.len());
    for camera in &config.cameras {
        let camera = Arc::new(camera.clone());
        names.push(camera.name.clone());
        let subscriber = StreamSubscriber::new(
            camera,
            client.clone(),
            tx.clone(),
            config.reconnect.clone(),
            tz,
        );
        handles.push(tokio::spawn(subscriber.run(shutdown_rx.clone())));
    }
    drop(tx);
    log::info!("Watching {} camera(s)", handles.len());

    let results = futures::future::join_all(handles).await;
    for (name, result) in names.iter().zip(results) {
        match result {
            Ok(Ok(())) => log::debug!("[{}] Subscriber finished", name),
            Ok(Err(e)) => log::error!("[{}] Subscriber stopped: {}", name, e),
            Err(e) => log::error!("[{}] Subscriber task failed: {}", name, e),
        }
    }

    let dispatcher = dispatcher_task.await?;
    log::info!("Dispatcher stopped");
    Ok(dispatcher)
}
