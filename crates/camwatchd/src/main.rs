//! camwatchd - unattended security-camera daemon.
//!
//! Arms/disarms motion surveillance on operator command, captures stills
//! from the shared camera, relays them to the owners, and drives the
//! buzzer and capture LED.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use camwatchd::buzzer::{self, BuzzerHandle};
use camwatchd::camera::{CameraArbiter, ShotCommand};
use camwatchd::config::Config;
use camwatchd::controller::{self, Controller};
use camwatchd::gpio::{Gpio, SysfsGpio};
use camwatchd::led::LedControl;
use camwatchd::logging;
use camwatchd::motion::{
    DaemonSupervisor, MotionSource, MotionSourceKind, PirSource, SystemProcessControl,
};
use camwatchd::pipeline::{self, CapturePipeline};
use camwatchd::router::{self, CommandRouter};
use camwatchd::state::DaemonState;
use camwatchd::transport::{StdioTransport, Transport};

#[derive(Parser, Debug)]
#[command(name = "camwatchd", version, about = "Unattended security-camera daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "/etc/camwatch/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,

    /// Sender identity used for commands typed on stdin
    #[arg(long, default_value = "local")]
    local_sender: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let _log_guard = logging::init(&config.general.log_dir, args.verbose)?;

    info!("camwatchd v{} starting", env!("CARGO_PKG_VERSION"));

    let gpio: Arc<dyn Gpio> = Arc::new(SysfsGpio::new());

    let led = if config.capture.led.enable {
        Some(Arc::new(LedControl::new(Arc::clone(&gpio), config.capture.led.gpio)))
    } else {
        None
    };

    let buzzer = if config.buzzer.enable {
        let (handle, _task) = buzzer::spawn(Arc::clone(&gpio), config.buzzer.gpio);
        handle
    } else {
        BuzzerHandle::disabled()
    };

    let arbiter = Arc::new(CameraArbiter::new(
        ShotCommand { cmd: config.capture.cmd.clone(), file: config.capture.file.clone() },
        config.pir.enable.then(|| ShotCommand {
            cmd: config.pir.capture_cmd.clone(),
            file: config.pir.capture_file.clone(),
        }),
        led.clone(),
        Duration::from_secs(config.capture.timeout_secs),
    ));

    // transport: stdin lines become operator commands for local runs
    let stdio = Arc::new(StdioTransport::new(&args.local_sender));
    let transport: Arc<dyn Transport> = Arc::clone(&stdio) as Arc<dyn Transport>;

    let state = Arc::new(RwLock::new(DaemonState::new(false)));

    pipeline::prepare_image_dir(&config.general.image_dir, config.general.delete_images)
        .with_context(|| format!("preparing {}", config.general.image_dir.display()))?;
    let pipeline = Arc::new(CapturePipeline::new(
        Arc::clone(&transport),
        config.owners.clone(),
        config.general.delete_images,
    ));
    let (watch_tx, watch_rx) = mpsc::unbounded_channel();
    let _watcher = pipeline::spawn_watcher(&config.general.image_dir, watch_tx)?;
    let _drain = pipeline::spawn_drain(Arc::clone(&pipeline), Arc::clone(&state), watch_rx);

    let (pir_tx, pir_rx) = mpsc::channel(16);
    let motion = match MotionSourceKind::from_config(&config.pir, &config.motion) {
        MotionSourceKind::Pir => {
            let pir = PirSource::new(config.pir.clone(), Arc::clone(&gpio), pir_tx);
            if let Err(e) = pir.watch_from_boot() {
                warn!("PIR listener not watching from boot: {}", e);
            }
            MotionSource::Pir(pir)
        }
        MotionSourceKind::ExternalDaemon => MotionSource::ExternalDaemon(DaemonSupervisor::new(
            config.motion.clone(),
            Arc::new(SystemProcessControl),
        )),
        MotionSourceKind::None => MotionSource::None,
    };

    let controller = Arc::new(Controller::new(
        config.clone(),
        Arc::clone(&state),
        arbiter,
        buzzer,
        led,
        motion,
        Arc::clone(&pipeline),
        Arc::clone(&transport),
    ));
    let _motion_loop = controller::spawn_motion_loop(Arc::clone(&controller), pir_rx);

    controller.startup().await;

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let _stdin_pump = {
        let stdio = Arc::clone(&stdio);
        tokio::spawn(async move { stdio.pump(cmd_tx).await })
    };
    let _router = router::spawn(
        CommandRouter::new(Arc::clone(&controller), transport, config.owners.clone()),
        cmd_rx,
    );

    info!("camwatchd ready");
    wait_for_shutdown().await?;

    info!("shutting down");
    controller.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
