// boothcam-kiosk: headless acquisition controller driven by stdin commands
// and camera hot-plug events. Prints the controller view as JSON lines.

use anyhow::Context;
use boothcam::client::{
    AcquisitionController, ControllerEvent, DaemonLink, HttpDaemonLink, LocalMediaDevices,
    MediaDevices,
};
use boothcam::config::BoothConfig;
use boothcam::platform::{DeviceEvent, DeviceMonitor};
use boothcam::storage::StorageLocator;
use crossbeam_channel::{unbounded, Sender};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

enum Input {
    Event(ControllerEvent),
    Snapshot(Option<PathBuf>),
    Diagnostics,
    Storage,
    View,
    Help,
    Quit,
}

const HELP: &str = "commands: init | retry | hide | show | devices | select <id>|none | \
                    snapshot [path] | diag | storage | view | quit";

fn parse_command(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let argument = words.next();

    let input = match command {
        "init" => Input::Event(ControllerEvent::Initialize),
        "retry" => Input::Event(ControllerEvent::Retry),
        "hide" => Input::Event(ControllerEvent::VisibilityChanged { visible: false }),
        "show" => Input::Event(ControllerEvent::VisibilityChanged { visible: true }),
        "devices" => Input::Event(ControllerEvent::DevicesChanged),
        "select" => Input::Event(ControllerEvent::DeviceSelected(
            argument.filter(|id| *id != "none").map(str::to_string),
        )),
        "snapshot" => Input::Snapshot(argument.map(PathBuf::from)),
        "diag" => Input::Diagnostics,
        "storage" => Input::Storage,
        "view" => Input::View,
        "quit" | "exit" => Input::Quit,
        _ => Input::Help,
    };
    Some(input)
}

fn spawn_stdin_reader(tx: Sender<Input>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(input) = parse_command(&line) {
                if tx.send(input).is_err() {
                    return;
                }
            }
        }
        let _ = tx.send(Input::Quit);
    });
}

/// Hot-plug events become `DevicesChanged`
fn spawn_device_monitor(tx: Sender<Input>, poll: Duration) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build monitor runtime")?;

    std::thread::spawn(move || {
        runtime.block_on(async move {
            let monitor = DeviceMonitor::new().with_interval(poll);
            if let Err(e) = monitor.start_monitoring().await {
                log::warn!("Hot-plug monitoring unavailable: {}", e);
                return;
            }
            while let Some(event) = monitor.wait_for_event().await {
                if let DeviceEvent::Disconnected(id) = &event {
                    log::debug!("Forwarding removal of camera {}", id);
                }
                if tx.send(Input::Event(ControllerEvent::DevicesChanged)).is_err() {
                    break;
                }
            }
        });
    });
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to serialize output: {}", e),
    }
}

fn run<M: MediaDevices, D: DaemonLink>(
    mut controller: AcquisitionController<M, D>,
    config: &BoothConfig,
    inputs: crossbeam_channel::Receiver<Input>,
) -> anyhow::Result<()> {
    controller.handle(ControllerEvent::Initialize);
    print_json(&controller.view());

    while let Ok(input) = inputs.recv() {
        match input {
            Input::Event(event) => {
                controller.handle(event);
                print_json(&controller.view());
            }
            Input::Snapshot(path) => match controller.snapshot() {
                Ok(frame) => {
                    if let Some(path) = path {
                        std::fs::write(&path, &frame.data)
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        println!("snapshot saved to {} ({} bytes)", path.display(), frame.len());
                    } else {
                        println!("snapshot #{} ({} bytes)", frame.sequence, frame.len());
                    }
                }
                Err(e) => {
                    println!("snapshot failed: {}", e);
                    print_json(&controller.view());
                }
            },
            Input::Diagnostics => print_json(&controller.diagnostics()),
            Input::Storage => match StorageLocator::from_config(&config.storage).locate() {
                Ok(path) => println!("storage: {}", path.display()),
                Err(e) => println!("storage unavailable: {}", e),
            },
            Input::View => print_json(&controller.view()),
            Input::Help => println!("{}", HELP),
            Input::Quit => break,
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    boothcam::init_logging();

    let config_path = std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(BoothConfig::default_path);
    let config = BoothConfig::load_from_file(&config_path)?;
    config.validate()?;

    let (tx, rx) = unbounded();
    {
        let tx = tx.clone();
        ctrlc::set_handler(move || {
            let _ = tx.send(Input::Quit);
        })
        .context("Failed to install Ctrl-C handler")?;
    }
    spawn_stdin_reader(tx.clone());
    spawn_device_monitor(tx, Duration::from_millis(config.client.device_poll_ms))?;

    let media = LocalMediaDevices::new()
        .with_quality(config.camera.jpeg_quality)
        .with_timeout(config.client.request_timeout());
    let daemon = match config.client.daemon_url() {
        Some(url) => Some(HttpDaemonLink::new(url, config.client.request_timeout())?),
        None => {
            log::warn!("No daemon URL configured; Plan B disabled");
            None
        }
    };

    let controller = AcquisitionController::from_config(media, daemon, &config.client);
    eprintln!("{}", HELP);
    run(controller, &config, rx)
}
