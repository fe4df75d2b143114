use anyhow::Context;
use chrono::Local;
use clap::Parser;
use log::{debug, error, info, LevelFilter, Metadata, Record};
use mqtt_snmp_bridge::bus::MqttBus;
use mqtt_snmp_bridge::config::DaemonConfig;
use mqtt_snmp_bridge::model::SnmpModel;
use mqtt_snmp_bridge::snmp::{translate_config, UdpFactory};
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Instant;

/// systemd EXIT_NOTCONFIGURED
const EXIT_NOTCONFIGURED: i32 = 6;

const MQTT_CLIENT_ID: &str = "snmp";

/// Minimal logger that writes to stderr with timestamps
struct SimpleLogger {
    level: LevelFilter,
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            eprintln!("[{}] [{}] {}", timestamp, record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logger(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string())
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::Info)
    };

    let logger = SimpleLogger { level };
    log::set_boxed_logger(Box::new(logger))
        .map(|()| log::set_max_level(level))
        .ok();
}

#[derive(Parser)]
#[command(name = "mqtt-snmp-bridge")]
#[command(about = "SNMP to MQTT bridge daemon", long_about = None)]
struct Args {
    /// MQTT broker address (host or host:port)
    #[arg(long, env = "MQTT_SNMP_BROKER", default_value = "localhost:1883")]
    broker: String,

    /// Config file location
    #[arg(long, env = "MQTT_SNMP_CONFIG", default_value = "/etc/mqtt-snmp-bridge.conf")]
    config: PathBuf,

    /// Templates directory
    #[arg(long, default_value = "/usr/share/mqtt-snmp-bridge/templates")]
    templates: PathBuf,

    /// Enable debugging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match DaemonConfig::from_file(&args.config, &args.templates) {
        Ok(config) => config,
        Err(e) => {
            init_logger(args.debug);
            error!("error loading config file {}: {}", args.config.display(), e);
            process::exit(EXIT_NOTCONFIGURED);
        }
    };

    config.debug = config.debug || args.debug;
    init_logger(config.debug);

    info!("mqtt-snmp-bridge starting");

    if let Err(e) = translate_config(&mut config) {
        error!("error translating OIDs: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(&args, config).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(args: &Args, config: DaemonConfig) -> anyhow::Result<()> {
    let bus = Arc::new(MqttBus::connect(&args.broker, MQTT_CLIENT_ID));

    let mut model = SnmpModel::new(&UdpFactory, config, bus, Instant::now())
        .await
        .context("can't create SNMP model")?;
    model.start().await.context("can't start model")?;
    info!("polling started");

    let mut sigint = signal(SignalKind::interrupt()).context("can't install signal handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("can't install signal handler")?;
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    debug!("termination signal caught, shutting down...");

    model.stop().await;
    Ok(())
}
