//! End-to-end daemon flows over fake hardware and a channel transport.
//!
//! The capture and motion-daemon commands are ordinary shell one-liners
//! (`touch`, backgrounded `sleep`) so the real spawn/signal/PID paths are
//! exercised without a camera attached.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;

use camwatchd::camera::{CameraArbiter, ShotCommand};
use camwatchd::config::Config;
use camwatchd::controller::{spawn_motion_loop, Controller};
use camwatchd::gpio::{Gpio, MemoryGpio};
use camwatchd::motion::{DaemonSupervisor, MotionSource, PirSource, SystemProcessControl};
use camwatchd::pipeline::{self, CapturePipeline};
use camwatchd::router::CommandRouter;
use camwatchd::state::{ArmState, DaemonState};
use camwatchd::transport::{ChannelTransport, IncomingMessage, Outbound, Transport};
use camwatchd::buzzer::BuzzerHandle;

const PIR_PIN: u8 = 23;
const RECV_DEADLINE: Duration = Duration::from_secs(5);

struct Rig {
    controller: Arc<Controller>,
    state: Arc<RwLock<DaemonState>>,
    gpio: Arc<MemoryGpio>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    config: Config,
    _dir: tempfile::TempDir,
}

enum Source {
    Pir,
    Daemon,
    None,
}

fn base_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.owners = vec!["1".into(), "2".into()];
    config.general.image_dir = dir.path().join("images");
    config.general.log_dir = dir.path().join("logs");
    config.capture.file = dir.path().join("manual.jpg");
    config.capture.cmd = format!("touch {}", config.capture.file.display());
    config.pir.capture_file = dir.path().join("motion.jpg");
    config.pir.capture_cmd = format!("touch {}", config.pir.capture_file.display());
    config.pir.gpio = PIR_PIN;
    config.pir.poll_ms = 5;
    config.motion.pid_file = dir.path().join("motion.pid");
    config.motion.cmd =
        format!("sleep 30 & echo $! > {}", config.motion.pid_file.display());
    config.motion.kill_name = "camwatch-test-absent".into();
    config.motion.start_timeout_secs = 3;
    config.motion.stop_grace_secs = 2;
    config
}

async fn rig(source: Source, mut config: Config, dir: tempfile::TempDir) -> Rig {
    match source {
        Source::Pir => config.pir.enable = true,
        Source::Daemon => config.motion.enable = true,
        Source::None => {}
    }
    config.validate().unwrap();

    let gpio = Arc::new(MemoryGpio::new());
    let (transport, outbound) = ChannelTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let state = Arc::new(RwLock::new(DaemonState::new(false)));
    let arbiter = Arc::new(CameraArbiter::new(
        ShotCommand { cmd: config.capture.cmd.clone(), file: config.capture.file.clone() },
        Some(ShotCommand {
            cmd: config.pir.capture_cmd.clone(),
            file: config.pir.capture_file.clone(),
        }),
        None,
        Duration::from_secs(5),
    ));

    pipeline::prepare_image_dir(&config.general.image_dir, config.general.delete_images).unwrap();
    let pipeline = Arc::new(CapturePipeline::new(
        Arc::clone(&transport),
        config.owners.clone(),
        config.general.delete_images,
    ));

    let (pir_tx, pir_rx) = mpsc::channel(16);
    let motion = match source {
        Source::Pir => {
            let pir =
                PirSource::new(config.pir.clone(), Arc::clone(&gpio) as Arc<dyn Gpio>, pir_tx);
            pir.watch_from_boot().unwrap();
            MotionSource::Pir(pir)
        }
        Source::Daemon => MotionSource::ExternalDaemon(DaemonSupervisor::new(
            config.motion.clone(),
            Arc::new(SystemProcessControl),
        )),
        Source::None => MotionSource::None,
    };

    let controller = Arc::new(Controller::new(
        config.clone(),
        Arc::clone(&state),
        arbiter,
        BuzzerHandle::disabled(),
        None,
        motion,
        pipeline,
        Arc::clone(&transport),
    ));
    spawn_motion_loop(Arc::clone(&controller), pir_rx);

    Rig { controller, state, gpio, outbound, config, _dir: dir }
}

async fn expect_file(rig: &mut Rig) -> (String, std::path::PathBuf) {
    loop {
        let outbound = timeout(RECV_DEADLINE, rig.outbound.recv())
            .await
            .expect("outbound message within deadline")
            .expect("transport channel open");
        match outbound {
            Outbound::File { owner, path, .. } => return (owner, path),
            Outbound::Text { .. } => continue,
        }
    }
}

#[tokio::test]
async fn pir_edge_captures_and_delivers_to_all_owners() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let mut rig = rig(Source::Pir, config, dir).await;

    let reply = rig.controller.arm().await;
    assert_eq!(reply, "Motion-based capturing enabled.");

    rig.gpio.set_input(PIR_PIN, true);

    let (first, path) = expect_file(&mut rig).await;
    let (second, _) = expect_file(&mut rig).await;
    assert_eq!((first.as_str(), second.as_str()), ("1", "2"));
    assert_eq!(path, rig.config.pir.capture_file);

    // delete_images defaults on: the shot is gone after delivery
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!rig.config.pir.capture_file.exists());
    assert!(rig.state.read().await.last_motion.is_some());
}

#[tokio::test]
async fn pir_edge_while_disarmed_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let mut rig = rig(Source::Pir, config, dir).await;

    // listener only runs while armed (no creepy_mode)
    rig.gpio.set_input(PIR_PIN, true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rig.outbound.try_recv().is_err());
    assert!(rig.state.read().await.last_motion.is_none());
}

#[tokio::test]
async fn manual_capture_pauses_and_restarts_the_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let mut rig = rig(Source::Daemon, config, dir).await;

    let reply = rig.controller.arm().await;
    assert_eq!(reply, "Motion-based capturing enabled.");
    let pid_before: i32 =
        std::fs::read_to_string(&rig.config.motion.pid_file).unwrap().trim().parse().unwrap();

    let reply = rig.controller.manual_capture().await;
    assert_eq!(reply, "Capture delivered.");
    let (_, path) = expect_file(&mut rig).await;
    assert_eq!(path, rig.config.capture.file);

    // a fresh daemon is running under a new PID
    let pid_after: i32 =
        std::fs::read_to_string(&rig.config.motion.pid_file).unwrap().trim().parse().unwrap();
    assert_ne!(pid_before, pid_after);
    assert!(std::path::Path::new(&format!("/proc/{pid_after}")).exists());

    // manual shot lives outside the watched dir: nothing double-ingested
    let _ = expect_file(&mut rig).await; // second owner's copy
    assert!(rig.outbound.try_recv().is_err());

    rig.controller.disarm().await;
}

#[tokio::test]
async fn disarm_succeeds_with_stale_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let rig = rig(Source::Daemon, config, dir).await;

    // armed, but the daemon died behind our back and left a bogus PID
    rig.state.write().await.arm = ArmState::Armed;
    std::fs::write(&rig.config.motion.pid_file, "99999999").unwrap();

    let reply = rig.controller.disarm().await;
    assert_eq!(reply, "Motion-based capturing disabled.");
    assert_eq!(rig.state.read().await.arm, ArmState::Disarmed);
    // the stale PID file was cleaned up
    assert!(!rig.config.motion.pid_file.exists());
}

#[tokio::test]
async fn disarm_succeeds_with_missing_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let rig = rig(Source::Daemon, config, dir).await;

    rig.state.write().await.arm = ArmState::Armed;
    // name-based fallback fires against a name that matches nothing
    let reply = rig.controller.disarm().await;
    assert_eq!(reply, "Motion-based capturing disabled.");
    assert_eq!(rig.state.read().await.arm, ArmState::Disarmed);
}

#[tokio::test]
async fn arm_without_a_source_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let rig = rig(Source::None, config, dir).await;

    let reply = rig.controller.arm().await;
    assert!(reply.starts_with("Error:"));
    assert_eq!(rig.state.read().await.arm, ArmState::Disarmed);
}

#[tokio::test]
async fn arm_failure_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    // launcher fails until the ready flag appears: no daemon, no PID file
    let ready = dir.path().join("launcher-ready");
    config.motion.cmd = format!(
        "test -f {ready} || exit 1; sleep 30 & echo $! > {pid}",
        ready = ready.display(),
        pid = config.motion.pid_file.display()
    );
    config.motion.start_timeout_secs = 1;
    let rig = rig(Source::Daemon, config, dir).await;

    let reply = rig.controller.arm().await;
    assert!(reply.starts_with("Error:"));
    assert_eq!(rig.state.read().await.arm, ArmState::Disarmed);

    // and the machine still arms once the source works again
    std::fs::write(&ready, "").unwrap();
    let reply = rig.controller.arm().await;
    assert_eq!(reply, "Motion-based capturing enabled.");
    assert_eq!(rig.state.read().await.arm, ArmState::Armed);

    rig.controller.disarm().await;
}

#[tokio::test]
async fn watched_images_flow_to_owners_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let mut rig = rig(Source::Daemon, config, dir).await;
    rig.state.write().await.arm = ArmState::Armed;

    let (watch_tx, watch_rx) = mpsc::unbounded_channel();
    let _watcher = pipeline::spawn_watcher(&rig.config.general.image_dir, watch_tx).unwrap();
    let pipeline = Arc::new(CapturePipeline::new(
        {
            let (transport, outbound) = ChannelTransport::new();
            rig.outbound = outbound;
            Arc::new(transport)
        },
        rig.config.owners.clone(),
        true,
    ));
    pipeline::spawn_drain(pipeline, Arc::clone(&rig.state), watch_rx);

    let a = rig.config.general.image_dir.join("a.jpg");
    let b = rig.config.general.image_dir.join("b.jpg");
    std::fs::write(&a, b"jpeg").unwrap();
    std::fs::write(&b, b"jpeg").unwrap();

    // arrival order preserved across files, each fanned out to both owners
    let (_, first) = expect_file(&mut rig).await;
    let (_, second) = expect_file(&mut rig).await;
    let (_, third) = expect_file(&mut rig).await;
    let (_, fourth) = expect_file(&mut rig).await;
    assert_eq!((first, second), (a.clone(), a.clone()));
    assert_eq!((third, fourth), (b.clone(), b.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!a.exists());
    assert!(!b.exists());
}

#[tokio::test]
async fn unauthorized_sender_mutates_nothing_and_gets_no_reply() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let mut rig = rig(Source::Pir, config, dir).await;

    let (transport, mut unused) = ChannelTransport::new();
    let router = CommandRouter::new(
        Arc::clone(&rig.controller),
        Arc::new(transport),
        rig.config.owners.clone(),
    );
    router
        .handle(IncomingMessage { sender: "stranger".into(), text: "/arm".into() })
        .await;

    assert!(unused.try_recv().is_err());
    assert!(rig.outbound.try_recv().is_err());
    assert_eq!(rig.state.read().await.arm, ArmState::Disarmed);
}

#[tokio::test]
async fn owner_commands_get_text_replies() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let rig = rig(Source::Pir, config, dir).await;

    let (transport, mut replies) = ChannelTransport::new();
    let router = CommandRouter::new(
        Arc::clone(&rig.controller),
        Arc::new(transport),
        rig.config.owners.clone(),
    );

    router.handle(IncomingMessage { sender: "1".into(), text: "/status".into() }).await;
    match replies.try_recv().unwrap() {
        Outbound::Text { owner, text } => {
            assert_eq!(owner, "1");
            assert!(text.contains("not enabled"));
        }
        other => panic!("unexpected outbound: {other:?}"),
    }

    router.handle(IncomingMessage { sender: "1".into(), text: "/frobnicate".into() }).await;
    match replies.try_recv().unwrap() {
        Outbound::Text { text, .. } => assert!(text.starts_with("Unknown command.")),
        other => panic!("unexpected outbound: {other:?}"),
    }

    router.handle(IncomingMessage { sender: "1".into(), text: "/ledstatus".into() }).await;
    match replies.try_recv().unwrap() {
        Outbound::Text { text, .. } => assert_eq!(text, "No capture LED configured."),
        other => panic!("unexpected outbound: {other:?}"),
    }
}

#[tokio::test]
async fn capture_file_is_retained_without_delete_images() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.general.delete_images = false;
    let mut rig = rig(Source::Pir, config, dir).await;

    rig.controller.arm().await;
    rig.gpio.set_input(PIR_PIN, true);
    let _ = expect_file(&mut rig).await;
    let _ = expect_file(&mut rig).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.config.pir.capture_file.exists());
}

#[tokio::test]
async fn creepy_mode_records_motion_while_disarmed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.pir.creepy_mode = true;
    let mut rig = rig(Source::Pir, config, dir).await;

    rig.gpio.set_input(PIR_PIN, true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // timestamp recorded, but no capture fired
    assert!(rig.state.read().await.last_motion.is_some());
    assert!(rig.outbound.try_recv().is_err());
    let status = rig.controller.status().await;
    assert!(status.contains("Last motion:"));
}
