//! Host runner: builds an emulator from a configuration file and drives
//! its frame loop until interrupted.
//!
//! Usage: `pinhost [CONFIG.json]`

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use pinhost::config::Config;
use pinhost::log_sink;
use pinhost::serial::format::SERIAL_8N1;
use pinhost::tracing::{self, prelude::*};
use pinhost::{Emulator, SerialBridge};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let path = env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref()).context("failed to load configuration")?;

    let (sink, drain) = log_sink::channel();
    let mut emulator = Emulator::new(&config, sink);
    let mut bridge = SerialBridge::from_config(&config.serial, drain);

    for device in &config.devices {
        emulator
            .add_device(device)
            .with_context(|| format!("failed to set up device '{}'", device.module))?;
    }
    for port in &config.serial.ports {
        bridge
            .attach(port.uart, port.host_port)
            .and_then(|()| bridge.begin(port.uart, port.baud, SERIAL_8N1, None, None))
            .with_context(|| format!("failed to open UART {}", port.uart))?;
        bridge.on_receive(
            port.uart,
            Box::new(|reader| {
                let mut buf = [0u8; 256];
                let n = reader.read_into(&mut buf);
                debug!(uart = reader.uart(), data = %hex::encode(&buf[..n]), "Received");
            }),
        )?;
    }

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    tracker.spawn(watch_pins(emulator.subscribe(), running.clone()));
    tracker.spawn(run_frames(
        emulator,
        bridge,
        Duration::from_millis(config.emulator.frame_ms.max(1)),
        running.clone(),
    ));
    tracker.close();
    info!(devices = config.devices.len(), "Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }

    trace!("Shutting down.");
    running.cancel();

    tracker.wait().await;
    info!("Exiting.");
    Ok(())
}

/// Host frame loop.
async fn run_frames(
    mut emulator: Emulator,
    mut bridge: SerialBridge,
    period: Duration,
    running: CancellationToken,
) {
    trace!("Frame loop started.");
    let mut frames = time::interval(period);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = running.cancelled() => break,
            _ = frames.tick() => {}
        }
        emulator.tick();
        if let Err(e) = bridge.forward_logs().await {
            warn!(error = %e, "Failed to forward device logs");
        }
        bridge.dispatch_receive_events();
    }

    bridge.shutdown().await;
    emulator.shutdown();
    trace!("Frame loop stopped.");
}

async fn watch_pins(
    mut events: tokio::sync::broadcast::Receiver<pinhost::gpio::PinEvent>,
    running: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = running.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(e) => debug!(pin = e.pin, mode = %e.mode, value = e.value, "Pin changed"),
            Err(RecvError::Lagged(n)) => warn!(missed = n, "Pin watcher fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
