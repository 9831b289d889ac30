//! CLI entry point for laser_tune
//!
//! Talks to a pulsed laser controller over a serial port:
//! - list serial ports
//! - probe the link and read or write PID parameters
//! - run the closed-loop tuning search and save its history
//!
//! # Usage
//!
//! ```bash
//! laser_tune ports
//! laser_tune --port /dev/ttyUSB0 get-pid
//! laser_tune --port /dev/ttyUSB0 set-pid --kp 0.5 --ki 0.2 --kd 0.01
//! laser_tune --config tune.toml tune --iterations 40
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use laser_tune::config::TuneConfig;
use laser_tune::logging;
use laser_tune::protocol::composer::SetPidRequest;
use laser_tune::protocol::registry::ids;
use laser_tune::protocol::reply::{parse_ack, PID_FIELD_NAMES};
use laser_tune::serial::{list_ports, open_serial_async, DynSerial};
use laser_tune::transport::LineTransport;
use laser_tune::trial::TrialRunner;
use laser_tune::tuning::{RandomSearch, Tuner, TuningHistory};

#[derive(Parser)]
#[command(name = "laser_tune")]
#[command(about = "Laser controller link tool and PID tuner", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides link.port
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate, overrides link.baud_rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Send GET_FLOW and print the first reply line
    Probe,

    /// Read the controller's PID parameters
    GetPid,

    /// Write PID parameters; unspecified values keep the controller's current ones
    SetPid {
        /// Pulse-width Kp
        #[arg(long)]
        kp: f64,
        /// Pulse-width Ki
        #[arg(long)]
        ki: f64,
        /// Pulse-width Kd
        #[arg(long)]
        kd: f64,
        #[arg(long)]
        pp_kp: Option<f64>,
        #[arg(long)]
        pp_ki: Option<f64>,
        #[arg(long)]
        pp_kd: Option<f64>,
        #[arg(long)]
        holdoff: Option<f64>,
        #[arg(long)]
        sample_interval: Option<f64>,
    },

    /// Run the gain search
    Tune {
        /// Number of trials, overrides tuning.iterations
        #[arg(long)]
        iterations: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TuneConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.link.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.link.baud_rate = baud;
    }
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Ports => show_ports(),
        Commands::Probe => probe(&config).await,
        Commands::GetPid => get_pid(&config).await,
        Commands::SetPid {
            kp,
            ki,
            kd,
            pp_kp,
            pp_ki,
            pp_kd,
            holdoff,
            sample_interval,
        } => {
            let request = SetPidRequest {
                pp_kp,
                pp_ki,
                pp_kd,
                holdoff,
                sample_interval,
                ..SetPidRequest::pulse_width(kp, ki, kd)
            };
            set_pid(&config, &request).await
        }
        Commands::Tune { iterations } => {
            if let Some(iterations) = iterations {
                config.tuning.iterations = iterations;
                config.validate()?;
            }
            tune(&config).await
        }
    }
}

fn show_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.description);
    }
    Ok(())
}

async fn connect(config: &TuneConfig) -> Result<LineTransport> {
    let Some(path) = config.link.port.as_deref() else {
        bail!("No serial port given; use --port or set link.port");
    };
    let stream = open_serial_async(path, config.link.baud_rate, "laser controller").await?;
    info!(port = path, baud = config.link.baud_rate, "link open");

    let port: DynSerial = Box::new(stream);
    Ok(LineTransport::new(port).with_options(config.link_options()))
}

async fn probe(config: &TuneConfig) -> Result<()> {
    let mut link = connect(config).await?;
    link.write_command("", ids::GET_FLOW).await?;
    match link.read_line(config.command_timeout()).await {
        Ok(line) => println!("Reply: {}", line),
        Err(e) if e.is_timeout() => println!("No reply within {:?}", config.command_timeout()),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn get_pid(config: &TuneConfig) -> Result<()> {
    let mut link = connect(config).await?;
    let values = link
        .get_pid_values(config.command_timeout())
        .await
        .context("GET_PID failed")?;
    for (name, value) in PID_FIELD_NAMES.iter().zip(values.to_array()) {
        println!("{:<16} {}", name, value);
    }
    Ok(())
}

async fn set_pid(config: &TuneConfig, request: &SetPidRequest) -> Result<()> {
    let mut link = connect(config).await?;
    let ack = link
        .set_pid_values(request, None, config.command_timeout())
        .await
        .context("SET_PID failed")?;
    let parsed = parse_ack(&ack);
    if parsed.success {
        println!("SET_PID acknowledged ({})", ack);
        Ok(())
    } else {
        bail!("SET_PID not acknowledged: '{}'", ack)
    }
}

async fn tune(config: &TuneConfig) -> Result<()> {
    let mut link = connect(config).await?;
    let runner = TrialRunner::new(config.trial_settings());
    let mut search = RandomSearch::new(config.search_space(), config.tuning.seed);
    let tuner = Tuner::new(config.tuning.iterations, config.tuning.desired_output);
    let mut history = TuningHistory::new();

    let outcome = tuner
        .run(&mut link, &runner, &mut search, &mut history)
        .await;

    #[cfg(feature = "storage_csv")]
    {
        let path = &config.tuning.history_path;
        history.write_csv(path)?;
        info!(path = %path.display(), records = history.len(), "tuning history written");
    }

    if let Err(e) = outcome {
        warn!(error = %e, records = history.len(), "tuning stopped early");
        return Err(e).context("tuning run failed");
    }

    match history.best() {
        Some(best) => println!(
            "Best: kp={:.4} ki={:.4} kd={:.4} score={:.4}{}",
            best.kp,
            best.ki,
            best.kd,
            best.score,
            if best.aborted { " (aborted)" } else { "" }
        ),
        None => println!("No trial produced a score"),
    }
    Ok(())
}
