//! fastboot-bridge
//!
//! Exposes the single attached fastboot-mode USB device over TCP.

use anyhow::{Context, Result, anyhow};
use bridge::config::{BridgeConfig, Overrides};
use bridge::network::{BridgeServer, SessionSettings};
use bridge::usb::{RusbTransport, spawn_usb_worker};
use clap::Parser;
use common::{UsbBridge, create_usb_bridge, setup_logging};
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fastboot-bridge")]
#[command(
    author,
    version,
    about = "Bridge a fastboot-mode USB device to a TCP port"
)]
#[command(long_about = "
Relays the fastboot protocol between one TCP client and the single attached
USB device in fastboot mode. Clients open with the FB01 handshake and then
exchange 8-byte big-endian length-prefixed frames.

EXAMPLES:
    # Serve on all interfaces, port 5554
    fastboot-bridge

    # Serve one specific device on localhost
    fastboot-bridge -l 127.0.0.1:5554 -s 0123456789ABCDEF

    # Fail fast if the device cannot be opened
    fastboot-bridge --check

CONFIGURATION:
    The bridge looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/fastboot-bridge/bridge.toml
    3. /etc/fastboot-bridge/bridge.toml
    4. Built-in defaults
")]
struct Args {
    /// <host>:port tcp host and port to listen to
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Serial number of the device to use
    #[arg(short, long, value_name = "SERIAL")]
    serial: Option<String>,

    /// Check that the device can be opened before serving
    #[arg(short = 'c', long)]
    check: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = BridgeConfig::default();
        let path = BridgeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        BridgeConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        BridgeConfig::load_or_default().context("Failed to load configuration")?
    };

    config.apply(Overrides {
        listen: args.listen,
        serial: args.serial,
        check: args.check,
        log_level: args.log_level,
    });
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.server.log_level).context("Failed to setup logging")?;

    info!("fastboot-bridge v{}", env!("CARGO_PKG_VERSION"));

    let transport = RusbTransport::new().context("create USB context failed")?;

    let (usb_bridge, worker) = create_usb_bridge();
    let usb_worker_handle = spawn_usb_worker(worker, transport, config.usb.transfer_timeout())
        .context("Failed to spawn USB worker thread")?;

    let result = serve(&config, usb_bridge.clone()).await;

    info!("Shutting down USB subsystem...");
    if let Err(e) = usb_bridge.shutdown().await {
        error!("Error shutting down USB worker: {}", e);
    }
    if let Err(e) = usb_worker_handle.join() {
        error!("USB worker thread panicked: {:?}", e);
    }

    result
}

/// Optional device check, then the accept loop until Ctrl+C
async fn serve(config: &BridgeConfig, usb_bridge: UsbBridge) -> Result<()> {
    if config.usb.check_device {
        check_device(config, &usb_bridge).await?;
    }

    let listen = config.listen_addr();
    info!("launching server at {}", listen);

    let settings = SessionSettings {
        serial: config.usb.serial.clone(),
        response_capacity: config.usb.response_capacity,
        acquire_retry_delay: config.usb.acquire_retry_delay(),
        read_timeout: config.read_timeout(),
    };
    let server = BridgeServer::bind(&listen, usb_bridge, settings)
        .await
        .context("open tcp server failed")?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {:#}", e);
        }
    });

    info!("Press Ctrl+C to shutdown");
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    server_handle.abort();
    Ok(())
}

/// Open and claim the device once, then release it
async fn check_device(config: &BridgeConfig, usb_bridge: &UsbBridge) -> Result<()> {
    let info = usb_bridge
        .acquire(config.usb.serial.clone())
        .await
        .map_err(|e| anyhow!("device check failed: {}", e))?;
    info!("Device check passed: {}", info);

    usb_bridge
        .release()
        .await
        .context("Failed to release device after check")?;
    Ok(())
}
