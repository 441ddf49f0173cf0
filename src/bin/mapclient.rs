//! MAP client CLI binary.
//!
//! Drives the connection core against the built-in loopback MAS.
//!
//! # Commands
//!
//! - `simulate` - Run one connection lifecycle and print events and stored messages
//! - `config` - Print the effective configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mapclient::{
    BluetoothAddress, Bmessage, BmessageType, ChannelObserver, Config, ConnectionHandle,
    ConnectionState, Folder, LoopbackOptions, LoopbackServer, MemoryStore, Recipient, SendOptions,
    VERSION,
};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "mapclient")]
#[command(version = VERSION)]
#[command(about = "Bluetooth MAP client connection core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a loopback MAS, sync, send and disconnect
    Simulate {
        /// Remote device address
        #[arg(short, long, default_value = "00:11:22:33:44:55")]
        device: String,

        /// Phone number the simulated phone owns
        #[arg(long, default_value = "555-1234")]
        own_number: String,

        /// Number of messages pre-filed in the inbox
        #[arg(long, default_value = "3")]
        inbox: usize,

        /// Outbound message as RECIPIENT=BODY (repeatable)
        #[arg(short, long)]
        send: Vec<String>,

        /// Simulated server latency in milliseconds
        #[arg(long, default_value = "20")]
        latency_ms: u64,

        /// Never acknowledge shutdown (exercises the disconnect deadline)
        #[arg(long)]
        no_ack: bool,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Write logs to stderr as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Config file path (default: user config dir)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            device,
            own_number,
            inbox,
            send,
            latency_ms,
            no_ack,
            config,
            verbose,
            json_logs,
        } => {
            init_logging(verbose, json_logs);
            cmd_simulate(&device, &own_number, inbox, &send, latency_ms, no_ack, config)
        },

        Commands::Config { file } => cmd_config(file),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let file = match path.or_else(Config::default_path) {
        Some(path) if path.exists() => Config::from_file(path)?,
        _ => Config::default(),
    };
    Ok(file.merge(Config::from_env()))
}

fn cmd_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(file)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_simulate(
    device: &str,
    own_number: &str,
    inbox: usize,
    send: &[String],
    latency_ms: u64,
    no_ack: bool,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let device: BluetoothAddress = device.parse()?;
    let outbound = send
        .iter()
        .map(|spec| {
            spec.split_once('=')
                .map(|(to, body)| (to.to_string(), body.to_string()))
                .ok_or_else(|| anyhow::anyhow!("expected RECIPIENT=BODY, got {spec}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let server = LoopbackServer::new(LoopbackOptions {
        latency: Duration::from_millis(latency_ms),
        acknowledge_shutdown: !no_ack,
        ..LoopbackOptions::default()
    });
    for i in 0..inbox {
        server.add_message(
            Folder::Inbox,
            Bmessage::new(BmessageType::SmsGsm, Folder::Inbox)
                .with_body(format!("inbox message {i}"))
                .with_originator(Recipient::phone(&format!("555-01{i:02}")))
                .with_recipient(Recipient::phone(own_number)),
        );
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (observer, mut events) = ChannelObserver::new(256);
        let store = MemoryStore::new(config.store.max_records);

        let printer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!("failed to encode event: {e}"),
                    },
                    Err(RecvError::Lagged(missed)) => tracing::warn!("{missed} events dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        tracing::info!("Connecting to {device}");
        let handle = ConnectionHandle::connect(
            device,
            config.connection.clone(),
            |sink| server.client(sink),
            store.clone(),
            observer,
        );

        let connected = tokio::select! {
            r = handle.wait_for_state(ConnectionState::Connected) => r.is_ok(),
            r = handle.wait_for_state(ConnectionState::Disconnected) => { r?; false },
        };
        if !connected {
            anyhow::bail!("connection to {device} failed");
        }

        settle(&handle).await?;
        for (to, body) in &outbound {
            handle.send_message(&[to.as_str()], body, SendOptions::default())?;
        }
        server.deliver_incoming(
            Bmessage::new(BmessageType::SmsGsm, Folder::Inbox)
                .with_body("incoming while connected")
                .with_originator(Recipient::phone("555-0199"))
                .with_recipient(Recipient::phone(own_number)),
        );
        settle(&handle).await?;

        let snapshot = handle.snapshot().await?;
        tracing::info!(
            "Own number: {}",
            snapshot.own_number.as_deref().unwrap_or("unknown")
        );

        handle.disconnect()?;
        handle.wait_for_state(ConnectionState::Disconnected).await?;
        handle.quit();
        drop(handle);
        let _ = printer.await;

        println!("{}", store.to_json()?);
        Ok::<_, anyhow::Error>(())
    })
}

/// Wait until discovery is done and no request is outstanding
async fn settle(handle: &ConnectionHandle) -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = handle.snapshot().await?;
        if snapshot.state != ConnectionState::Connected {
            return Ok(());
        }
        if snapshot.discovery_concluded && snapshot.outstanding.is_empty() {
            // give in-flight event reports a chance to land
            tokio::time::sleep(Duration::from_millis(50)).await;
            let snapshot = handle.snapshot().await?;
            if snapshot.outstanding.is_empty() {
                return Ok(());
            }
        }
    }
}
