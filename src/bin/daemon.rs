// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! pwmfan-daemon: system service that samples CPU temperature, drives the
//! fan's PWM output with a hysteresis band, and answers status queries over
//! a Unix domain socket.

use anyhow::Context;
use clap::Parser;
use pwm_fan_control::config::{self, Config};
use pwm_fan_control::control::{Controller, FanActuator, TemperatureSource};
use pwm_fan_control::curve::SpeedCommand;
use pwm_fan_control::protocol::{self, Request, Response, Status};
use pwm_fan_control::sysfs::{self, ThermalZone};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, watch};
use tokio::time::{self, Duration, MissedTickBehavior};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug, Clone)]
#[command(name = "pwmfan-daemon", about = "PWM fan control daemon", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<String>,

    /// Polling rate in milliseconds.
    #[arg(long, value_name = "MS")]
    poll: Option<u64>,

    /// PWM control frequency in Hz (pwmchip output only).
    #[arg(long, value_name = "HZ")]
    freq: Option<u32>,

    /// Minimum fan speed as a percent from 0 to 100.
    #[arg(long, value_name = "PERCENT")]
    min_speed: Option<u8>,

    /// Temperature (°C) to start the fan.
    #[arg(long, value_name = "CELSIUS")]
    start_temp: Option<f64>,

    /// Temperature (°C) to stop the fan.
    #[arg(long, value_name = "CELSIUS")]
    stop_temp: Option<f64>,

    /// Temperature (°C) for full fan speed.
    #[arg(long, value_name = "CELSIUS")]
    max_temp: Option<f64>,
}

impl Cli {
    /// Layer command-line values over the file config.
    fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(socket) = &self.socket {
            cfg.daemon.socket_path = socket.clone();
        }
        if let Some(poll) = self.poll {
            cfg.daemon.poll_interval_ms = poll;
        }
        if let Some(freq) = self.freq {
            match &mut cfg.output {
                config::OutputConfig::PwmChip { frequency_hz, .. } => *frequency_hz = freq,
                config::OutputConfig::Hwmon { .. } => {
                    log::warn!("--freq has no effect on an hwmon output");
                }
            }
        }
        if let Some(min_speed) = self.min_speed {
            cfg.thresholds.min_speed_percent = min_speed;
        }
        if let Some(t) = self.start_temp {
            cfg.thresholds.start_temp_c = t;
        }
        if let Some(t) = self.stop_temp {
            cfg.thresholds.stop_temp_c = t;
        }
        if let Some(t) = self.max_temp {
            cfg.thresholds.max_temp_c = t;
        }
    }
}

// ---------------------------------------------------------------------------
// Shared daemon state
// ---------------------------------------------------------------------------

struct DaemonState {
    config: Config,
    controller: Controller,
    sensor: ThermalZone,
    output: Box<dyn FanActuator>,
    config_path: PathBuf,
    cli: Cli,
}

type SharedState = Arc<Mutex<DaemonState>>;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::info!("pwmfan-daemon {}", env!("CARGO_PKG_VERSION"));

    let config_path = PathBuf::from(&cli.config);
    let mut cfg = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    cli.apply_overrides(&mut cfg);
    log::info!("{cfg}");
    cfg.validate().context("Configuration error")?;

    let sensor = ThermalZone::new(cfg.sensor.thermal_zone);
    let mut output = sysfs::open_output(&cfg.output);
    output
        .enable()
        .with_context(|| format!("Failed to enable PWM output {}", output.describe()))?;
    log::info!(
        "Reading {} and driving {}",
        sensor.describe(),
        output.describe()
    );

    let socket_path = cfg.daemon.socket_path.clone();
    let poll_interval = cfg.daemon.poll_interval();
    let state: SharedState = Arc::new(Mutex::new(DaemonState {
        controller: Controller::new(cfg.thresholds),
        config: cfg,
        sensor,
        output,
        config_path,
        cli,
    }));

    // Clean up old socket file
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind {socket_path}"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o660);
        std::fs::set_permissions(&socket_path, perms)?;
    }

    log::info!("Listening on {socket_path}");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Signal handler
    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown_for_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("Received shutdown signal");
        shutdown_for_signal.send_replace(true);
    });

    // Control loop
    let state_for_control = state.clone();
    let shutdown_for_control = shutdown_tx.clone();
    let control_rx = shutdown_tx.subscribe();
    let control = tokio::spawn(async move {
        let result = run_control_loop(state_for_control, poll_interval, control_rx).await;
        if let Err(e) = &result {
            log::error!("Control loop stopped: {e}");
        }
        shutdown_for_control.send_replace(true);
        result
    });

    // Accept client connections
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state_clone = state.clone();
                        tokio::spawn(handle_client(stream, state_clone));
                    }
                    Err(e) => {
                        log::error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                log::info!("Daemon shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    let control_result = control.await.context("Control loop panicked")?;

    {
        let mut guard = state.lock().await;
        let st = &mut *guard;
        let exit_speed = st.config.daemon.exit_speed_percent;
        match st.controller.force(st.output.as_mut(), exit_speed) {
            Ok(()) => log::info!("Fan set to {exit_speed}% for exit"),
            Err(e) => log::error!("Failed to set exit fan speed: {e}"),
        }
        if st.config.daemon.restore_on_exit {
            if let Err(e) = st.output.disable() {
                log::warn!("Failed to release {}: {e}", st.output.describe());
            }
        }
    }

    control_result.context("Fan control failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

/// Consecutive unusable readings tolerated before the loop gives up.
const MAX_INVALID_READINGS: u32 = 10;

/// Count consecutive [`SpeedCommand::Keep`] ticks and fail once the sensor
/// has produced nothing usable for [`MAX_INVALID_READINGS`] polls.
fn track_reading(invalid_streak: &mut u32, command: SpeedCommand) -> io::Result<()> {
    match command {
        SpeedCommand::Set(_) => *invalid_streak = 0,
        SpeedCommand::Keep => {
            *invalid_streak += 1;
            if *invalid_streak >= MAX_INVALID_READINGS {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{invalid_streak} consecutive unusable temperature readings"),
                ));
            }
        }
    }
    Ok(())
}

async fn run_control_loop(
    state: SharedState,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut invalid_streak = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut guard = state.lock().await;
                let st = &mut *guard;
                let command = st.controller.tick(&mut st.sensor, st.output.as_mut())?;
                track_reading(&mut invalid_streak, command)?;
            }
            _ = shutdown.changed() => {
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client connection handler
// ---------------------------------------------------------------------------

async fn handle_client(stream: UnixStream, state: SharedState) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let response = match protocol::decode::<Request>(&line) {
            Ok(req) => process_request(req, &state).await,
            Err(e) => Response::Error {
                message: format!("Invalid request: {e}"),
            },
        };

        let encoded = match protocol::encode(&response) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                continue;
            }
        };

        if writer.write_all(encoded.as_bytes()).await.is_err() {
            break; // Client disconnected
        }
    }
}

async fn process_request(req: Request, state: &SharedState) -> Response {
    let mut st = state.lock().await;

    match req {
        Request::GetStatus => Response::Status(Status {
            temp_c: st.controller.last_temp_c(),
            speed_percent: st.controller.speed(),
            running: st.controller.is_running(),
            thresholds: *st.controller.thresholds(),
            sensor: st.sensor.describe(),
            output: st.output.describe(),
        }),

        Request::SetThresholds { thresholds } => {
            if let Err(e) = config::validate_thresholds(&thresholds) {
                return Response::Error {
                    message: format!("Invalid thresholds: {e}"),
                };
            }
            st.controller.set_thresholds(thresholds);
            st.config.thresholds = thresholds;
            log::info!("Thresholds updated: {thresholds:?}");
            Response::Ok {
                message: "Thresholds updated".to_string(),
            }
        }

        Request::ReloadConfig => {
            let mut cfg = match config::load_config(&st.config_path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    return Response::Error {
                        message: format!("Failed to reload config: {e}"),
                    };
                }
            };
            st.cli.apply_overrides(&mut cfg);
            if let Err(e) = cfg.validate() {
                return Response::Error {
                    message: format!("Invalid config: {e}"),
                };
            }

            if cfg.output != st.config.output
                || cfg.sensor != st.config.sensor
                || cfg.daemon.poll_interval_ms != st.config.daemon.poll_interval_ms
                || cfg.daemon.socket_path != st.config.daemon.socket_path
            {
                log::warn!("Output, sensor, poll and socket changes take effect after a restart");
            }

            st.controller.set_thresholds(cfg.thresholds);
            st.config.thresholds = cfg.thresholds;
            st.config.daemon.exit_speed_percent = cfg.daemon.exit_speed_percent;
            st.config.daemon.restore_on_exit = cfg.daemon.restore_on_exit;
            log::info!("{}", st.config);
            Response::Ok {
                message: "Config reloaded".to_string(),
            }
        }
    }
}
