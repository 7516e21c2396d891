//! Device watch daemon.
//!
//! Watches the configured subsystems and reports every device change,
//! either as structured log lines or, with `DEVWATCH_JSON=1`, as one JSON
//! object per line on stdout.

use std::env;

use anyhow::Context;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use devwatch::config::MonitorConfig;
use devwatch::monitor::{ChannelSink, DeviceContext, Dispatcher, MonitorEvent};
use devwatch::tracing::{self, prelude::*};

const EVENT_QUEUE_DEPTH: usize = 64;

/// Open the subscription and run the dispatcher on the current (blocking)
/// thread until `running` is cancelled.
fn monitor_blocking(
    config: MonitorConfig,
    event_tx: mpsc::Sender<MonitorEvent>,
    running: CancellationToken,
) -> devwatch::error::Result<()> {
    let context = DeviceContext::open()?;
    let mut subscription = context.subscribe(&config.source)?;
    for filter in &config.filters {
        subscription.add_filter(&filter.subsystem, filter.devtype.as_deref())?;
    }
    subscription.activate()?;

    let mut sink =
        ChannelSink::new(event_tx).capture(config.attributes.clone(), config.properties.clone());
    let result = Dispatcher::from_config(&config).run(&mut subscription, &mut sink, &running);

    subscription.release();
    context.close();
    result
}

async fn report(mut event_rx: mpsc::Receiver<MonitorEvent>, json: bool, running: CancellationToken) {
    while let Some(event) = event_rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!(error = %e, "Failed to encode event"),
            }
            continue;
        }

        match event {
            MonitorEvent::Device(device) => info!(
                action = %device.action,
                devnode = ?device.device_node,
                subsystem = ?device.subsystem,
                properties = ?device.properties,
                "Device {}",
                device.syspath.display()
            ),
            MonitorEvent::Error { message } => warn!(%message, "Device event dropped"),
            MonitorEvent::Terminated { message } => {
                error!(%message, "Monitoring stopped");
                running.cancel();
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = MonitorConfig::load().context("loading configuration")?;
    let json = env::var("DEVWATCH_JSON").is_ok_and(|v| v == "1");
    debug!(?config, "Configuration loaded");

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let monitor = {
        let running = running.clone();
        tokio::task::spawn_blocking(move || {
            let result = monitor_blocking(config, event_tx, running.clone());
            if let Err(e) = &result {
                error!(error = %e, "Device monitor failed");
            }
            running.cancel();
            result
        })
    };
    tracker.spawn(report(event_rx, json, running.clone()));
    tracker.close();
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = running.cancelled() => {},
    }

    trace!("Shutting down.");
    running.cancel();

    let outcome = monitor.await.context("monitor thread panicked")?;
    tracker.wait().await;
    info!("Exiting.");
    outcome.context("device monitoring failed")
}
