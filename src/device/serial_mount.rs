//! Serial motor-controller driver for the equatorial mount
//!
//! The RA stepper is driven by a microcontroller that generates the step
//! pulses itself; this driver only tells it what to do. Requires the
//! `mount_serial` feature.
//!
//! Protocol Overview:
//! - ASCII lines terminated with `\n`, one reply line per command
//! - `PING` → `PONG`
//! - `TRACK <E|W> <speed>` → `OK` (speed is a multiple of sidereal rate)
//! - `STOP` → `OK`
//! - `STATUS` → `IDLE` or `TRACKING <E|W> <speed>`
//! - Any failure → `ERR <message>`

use super::{Direction, TrackingState};
use crate::error::{RigError, RigResult};

/// Encode a tracking command.
pub fn track_command(direction: Direction, speed: f64) -> String {
    let dir = match direction {
        Direction::East => "E",
        Direction::West => "W",
    };
    format!("TRACK {} {:.4}", dir, speed)
}

/// Check a reply that should be `OK` (or `PONG` for pings).
pub fn expect_ack(command: &str, reply: &str, expected: &str) -> RigResult<()> {
    let reply = reply.trim();
    if reply == expected {
        return Ok(());
    }
    let reason = reply.strip_prefix("ERR").map(str::trim).unwrap_or(reply);
    Err(RigError::operation(
        command.split_whitespace().next().unwrap_or(command),
        format!("controller replied '{}'", reason),
    ))
}

/// Parse a `STATUS` reply.
pub fn parse_status(reply: &str) -> RigResult<Option<TrackingState>> {
    let mut parts = reply.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("IDLE"), None, None) => Ok(None),
        (Some("TRACKING"), Some(dir), Some(speed)) => {
            let direction = dir.parse::<Direction>()?;
            let speed = speed.parse::<f64>().map_err(|e| {
                RigError::operation("STATUS", format!("bad speed '{}': {}", speed, e))
            })?;
            Ok(Some(TrackingState { direction, speed }))
        }
        _ => Err(RigError::operation(
            "STATUS",
            format!("unrecognised reply '{}'", reply.trim()),
        )),
    }
}

#[cfg(feature = "mount_serial")]
mod serial_enabled {
    use super::*;
    use crate::config::MountDriverConfig;
    use crate::device::{validate_tracking_speed, Mount};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio_serial::{SerialPortBuilderExt, SerialStream};
    use tracing::{debug, info};

    /// Mount driven by a serial motor controller.
    pub struct SerialMount {
        port_path: String,
        baud_rate: u32,
        timeout: Duration,
        port: Option<BufReader<SerialStream>>,
        tracking: Option<TrackingState>,
    }

    impl SerialMount {
        /// The port is opened by `initialize`.
        pub fn new(config: &MountDriverConfig) -> Self {
            Self {
                port_path: config.serial_port.clone(),
                baud_rate: config.baud_rate,
                timeout: config.timeout,
                port: None,
                tracking: None,
            }
        }

        /// Send one command line and read one reply line.
        async fn transaction(&mut self, command: &str) -> RigResult<String> {
            let timeout = self.timeout;
            let port = self
                .port
                .as_mut()
                .ok_or_else(|| RigError::operation(command, "mount not initialized"))?;

            port.get_mut()
                .write_all(format!("{}\n", command).as_bytes())
                .await
                .map_err(|e| RigError::operation(command, e))?;
            debug!(command, "Sent mount command");

            let mut line = String::new();
            match tokio::time::timeout(timeout, port.read_line(&mut line)).await {
                Ok(Ok(0)) => Err(RigError::operation(command, "serial port closed")),
                Ok(Ok(_)) => {
                    debug!(reply = line.trim(), "Mount reply");
                    Ok(line.trim().to_string())
                }
                Ok(Err(e)) => Err(RigError::operation(command, e)),
                Err(_) => Err(RigError::operation(
                    command,
                    format!("no reply within {:?}", timeout),
                )),
            }
        }
    }

    #[async_trait]
    impl Mount for SerialMount {
        fn driver_name(&self) -> &'static str {
            "serial-mount"
        }

        async fn initialize(&mut self) -> RigResult<()> {
            let port = tokio_serial::new(&self.port_path, self.baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|e| {
                    RigError::unavailable(self.driver_name(), format!("{}: {}", self.port_path, e))
                })?;
            self.port = Some(BufReader::new(port));

            let reply = self
                .transaction("PING")
                .await
                .map_err(|e| RigError::unavailable("serial-mount", e.to_string()))?;
            expect_ack("PING", &reply, "PONG")
                .map_err(|e| RigError::unavailable("serial-mount", e.to_string()))?;

            let status = self.transaction("STATUS").await?;
            self.tracking = parse_status(&status)?;
            info!(port = %self.port_path, tracking = ?self.tracking, "Mount controller connected");
            Ok(())
        }

        async fn start_tracking(&mut self, direction: Direction, speed: f64) -> RigResult<()> {
            validate_tracking_speed(speed)?;
            let command = track_command(direction, speed);
            let reply = self.transaction(&command).await?;
            expect_ack(&command, &reply, "OK")?;
            self.tracking = Some(TrackingState { direction, speed });
            Ok(())
        }

        async fn stop_tracking(&mut self) -> RigResult<()> {
            let reply = self.transaction("STOP").await?;
            expect_ack("STOP", &reply, "OK")?;
            self.tracking = None;
            Ok(())
        }

        fn tracking(&self) -> Option<TrackingState> {
            self.tracking
        }

        async fn cleanup(&mut self) {
            if self.port.take().is_some() {
                debug!(tracking = ?self.tracking, "Serial port closed");
            }
        }
    }
}

#[cfg(not(feature = "mount_serial"))]
mod serial_disabled {
    use super::*;
    use crate::config::MountDriverConfig;
    use crate::device::Mount;
    use async_trait::async_trait;

    /// Placeholder used when the crate is built without `mount_serial`.
    pub struct SerialMount;

    impl SerialMount {
        pub fn new(_config: &MountDriverConfig) -> Self {
            Self
        }
    }

    #[async_trait]
    impl Mount for SerialMount {
        fn driver_name(&self) -> &'static str {
            "serial-mount"
        }

        async fn initialize(&mut self) -> RigResult<()> {
            Err(RigError::FeatureNotEnabled("mount_serial".to_string()))
        }

        async fn start_tracking(&mut self, _direction: Direction, _speed: f64) -> RigResult<()> {
            Err(RigError::FeatureNotEnabled("mount_serial".to_string()))
        }

        async fn stop_tracking(&mut self) -> RigResult<()> {
            Err(RigError::FeatureNotEnabled("mount_serial".to_string()))
        }

        fn tracking(&self) -> Option<TrackingState> {
            None
        }

        async fn cleanup(&mut self) {}
    }
}

#[cfg(feature = "mount_serial")]
pub use serial_enabled::SerialMount;

#[cfg(not(feature = "mount_serial"))]
pub use serial_disabled::SerialMount;
