// boothcamd: capture daemon serving /stream, /snapshot and /health

use anyhow::{bail, Context};
use boothcam::config::BoothConfig;
use boothcam::daemon::{router, CaptureDaemon};
use boothcam::driver::Mechanism;
use std::env;
use std::path::PathBuf;

struct Args {
    config: PathBuf,
    mechanism: Option<Mechanism>,
    bind: Option<String>,
    keep_warm: bool,
    print_config: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        config: BoothConfig::default_path(),
        mechanism: None,
        bind: None,
        keep_warm: false,
        print_config: false,
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                args.config = iter.next().context("--config needs a path")?.into();
            }
            "--mechanism" | "-m" => {
                let name = iter.next().context("--mechanism needs a name")?;
                let mechanism: Mechanism = serde_json::from_value(serde_json::Value::String(name.clone()))
                    .with_context(|| format!("Unknown mechanism '{}' (native, v4l2, process, synthetic)", name))?;
                args.mechanism = Some(mechanism);
            }
            "--bind" | "-b" => {
                args.bind = Some(iter.next().context("--bind needs an address")?);
            }
            "--keep-warm" => args.keep_warm = true,
            "--print-config" => args.print_config = true,
            "--help" | "-h" => {
                println!(
                    "Usage: boothcamd [--config PATH] [--mechanism NAME] [--bind ADDR] [--keep-warm] [--print-config]"
                );
                std::process::exit(0);
            }
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    boothcam::init_logging();
    let args = parse_args()?;

    let mut config = BoothConfig::load_from_file(&args.config)?;
    if let Some(mechanism) = args.mechanism {
        config.camera.mechanism = Some(mechanism);
    }
    if let Some(bind) = args.bind {
        config.daemon.bind_address = bind;
    }
    if args.keep_warm {
        config.daemon.keep_warm = true;
    }
    config.validate()?;

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let addr = config.daemon.socket_addr()?;
    let daemon = CaptureDaemon::from_config(&config).context("Capture daemon cannot start")?;
    let stream_loop = daemon.start();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    log::info!(
        "{} {} listening on http://{} ({})",
        boothcam::NAME,
        boothcam::VERSION,
        addr,
        daemon.mechanism().as_str()
    );

    axum::serve(listener, router(daemon.clone()))
        .with_graceful_shutdown(shutdown_signal(daemon, stream_loop))
        .await
        .context("HTTP server failed")?;

    log::info!("Capture daemon stopped");
    Ok(())
}

async fn shutdown_signal(daemon: CaptureDaemon, stream_loop: tokio::task::JoinHandle<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
    // Streams never finish on their own; close them so open connections drain
    stream_loop.abort();
    daemon.close_streams();
}
