// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! pwmfan-status: command-line client that queries or adjusts a running
//! pwmfan-daemon over its Unix domain socket.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use pwm_fan_control::config;
use pwm_fan_control::protocol::{self, Request, Response, Status};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "pwmfan-status", about = "Query the PWM fan daemon", version)]
struct Cli {
    /// Path to the daemon socket.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show temperature, fan speed and thresholds (default).
    Show,

    /// Change thresholds on the running daemon. Unset values are kept.
    Set {
        #[arg(long, value_name = "CELSIUS")]
        start_temp: Option<f64>,
        #[arg(long, value_name = "CELSIUS")]
        stop_temp: Option<f64>,
        #[arg(long, value_name = "CELSIUS")]
        max_temp: Option<f64>,
        #[arg(long, value_name = "PERCENT")]
        min_speed: Option<u8>,
    },

    /// Ask the daemon to re-read its config file.
    Reload,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Connection {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Connection {
    fn connect(path: &str) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(Duration::from_secs(2)))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader })
    }

    fn send_request(&mut self, req: &Request) -> io::Result<Response> {
        let encoded = protocol::encode(req).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Encode error: {e}"))
        })?;
        self.stream.write_all(encoded.as_bytes())?;
        self.stream.flush()?;

        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        protocol::decode(&line).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Decode error: {e}"))
        })
    }

    fn status(&mut self) -> anyhow::Result<Status> {
        match self.send_request(&Request::GetStatus)? {
            Response::Status(status) => Ok(status),
            Response::Error { message } => bail!("{message}"),
            other => bail!("Unexpected response: {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut conn = Connection::connect(&cli.socket).with_context(|| {
        format!(
            "Could not connect to {}. Is pwmfan-daemon running?",
            cli.socket
        )
    })?;
    log::debug!("Connected to daemon at {}", cli.socket);

    match cli.command.unwrap_or(Command::Show) {
        Command::Show => {
            let status = conn.status()?;
            print!("{}", render_status(&status));
        }
        Command::Set {
            start_temp,
            stop_temp,
            max_temp,
            min_speed,
        } => {
            let mut thresholds = conn.status()?.thresholds;
            if let Some(t) = start_temp {
                thresholds.start_temp_c = t;
            }
            if let Some(t) = stop_temp {
                thresholds.stop_temp_c = t;
            }
            if let Some(t) = max_temp {
                thresholds.max_temp_c = t;
            }
            if let Some(p) = min_speed {
                thresholds.min_speed_percent = p;
            }
            expect_ok(conn.send_request(&Request::SetThresholds { thresholds })?)?;
        }
        Command::Reload => {
            expect_ok(conn.send_request(&Request::ReloadConfig)?)?;
        }
    }

    Ok(())
}

fn expect_ok(response: Response) -> anyhow::Result<()> {
    match response {
        Response::Ok { message } => {
            println!("{message}");
            Ok(())
        }
        Response::Error { message } => bail!("{message}"),
        other => bail!("Unexpected response: {other:?}"),
    }
}

fn render_status(status: &Status) -> String {
    let temp = status
        .temp_c
        .map(|t| format!("{t:.1} °C"))
        .unwrap_or_else(|| "--".to_string());
    let state = if status.running { "running" } else { "idle" };
    let t = &status.thresholds;

    format!(
        "CPU Temp:          {temp}\n\
         Fan Speed:         {}% ({state})\n\
         Start Temp:        {} °C\n\
         Stop Temp:         {} °C\n\
         Max Temp:          {} °C\n\
         Minimum Fan Speed: {}%\n\
         Sensor:            {}\n\
         Output:            {}\n",
        status.speed_percent,
        t.start_temp_c,
        t.stop_temp_c,
        t.max_temp_c,
        t.min_speed_percent,
        status.sensor,
        status.output,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwm_fan_control::curve::Thresholds;

    #[test]
    fn test_render_status() {
        let status = Status {
            temp_c: Some(41.26),
            speed_percent: 30,
            running: true,
            thresholds: Thresholds::default(),
            sensor: "zone0".to_string(),
            output: "pwm0".to_string(),
        };
        let text = render_status(&status);
        assert!(text.starts_with("CPU Temp:          41.3 °C\n"));
        assert!(text.contains("Fan Speed:         30% (running)\n"));
        assert!(text.contains("Minimum Fan Speed: 30%\n"));
    }

    #[test]
    fn test_render_status_before_first_reading() {
        let status = Status {
            temp_c: None,
            speed_percent: 0,
            running: false,
            thresholds: Thresholds::default(),
            sensor: "zone0".to_string(),
            output: "pwm0".to_string(),
        };
        assert!(render_status(&status).contains("CPU Temp:          --\n"));
        assert!(render_status(&status).contains("(idle)"));
    }

    #[test]
    fn test_subcommand_defaults_to_show() {
        let cli = Cli::try_parse_from(["pwmfan-status"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.socket, config::DEFAULT_SOCKET_PATH);

        let cli = Cli::try_parse_from(["pwmfan-status", "set", "--max-temp", "60"]).unwrap();
        let Some(Command::Set {
            start_temp,
            max_temp,
            ..
        }) = cli.command
        else {
            panic!("expected the set subcommand");
        };
        assert_eq!(start_temp, None);
        assert_eq!(max_temp, Some(60.0));
    }
}
