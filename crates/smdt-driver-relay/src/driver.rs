//! Async driver for the tube relay board.
//!
//! Protocol Overview:
//! - Baud: 9600, 8N1, no flow control (taken from the port descriptor)
//! - Fixed 4-byte frames, see [`crate::frame`]
//! - No acknowledgement: a frame counts as delivered once write + flush
//!   complete within the write timeout
//! - The relays need a settle delay after every frame
//! - The board resets when the port is opened and ignores frames for about
//!   two seconds

use crate::error::{RelayError, Result};
use crate::frame::RelayFrame;
use smdt_core::port::PortDescriptor;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, instrument};

pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased relay transport.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Delays and bounds of the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTimings {
    /// Bound on write + flush of one frame
    pub write_timeout: Duration,
    /// Wait after every frame for the relay to switch
    pub settle: Duration,
    /// Wait after opening the port for the board to come out of reset
    pub startup: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(1),
            settle: Duration::from_millis(250),
            startup: Duration::from_secs(2),
        }
    }
}

/// Driver for the relay board that switches tubes onto supply channels.
pub struct RelayProtocolDriver {
    port: DynSerial,
    timings: RelayTimings,
}

impl RelayProtocolDriver {
    /// Open the relay board's serial port and wait out its reset.
    #[instrument(skip(port, timings), fields(port = %port.port), err)]
    pub async fn open(port: &PortDescriptor, timings: RelayTimings) -> Result<Self> {
        let descriptor = port.clone();

        // Use spawn_blocking to avoid blocking the async runtime
        let stream = spawn_blocking(move || {
            tokio_serial::new(&descriptor.port, descriptor.baud_rate)
                .data_bits(data_bits(descriptor.data_bits))
                .parity(parity(descriptor.parity))
                .stop_bits(stop_bits(descriptor.stop_bits))
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| RelayError::Open {
            port: port.port.clone(),
            message: format!("spawn_blocking for relay port opening failed: {}", e),
        })?
        .map_err(|e| RelayError::Open {
            port: port.port.clone(),
            message: e.to_string(),
        })?;

        tokio::time::sleep(timings.startup).await;
        info!("Relay board ready");

        Ok(Self::with_transport(Box::new(stream), timings))
    }

    /// Drive the board over any async byte stream.
    pub fn with_transport(port: DynSerial, timings: RelayTimings) -> Self {
        Self { port, timings }
    }

    pub fn timings(&self) -> &RelayTimings {
        &self.timings
    }

    /// Switch physical position `tube` onto its channel.
    pub async fn connect_tube(&mut self, tube: u32) -> Result<()> {
        self.send(RelayFrame::connect(tube_byte(tube)?)).await
    }

    /// Release physical position `tube`.
    pub async fn disconnect_tube(&mut self, tube: u32) -> Result<()> {
        self.send(RelayFrame::disconnect(tube_byte(tube)?)).await
    }

    async fn send(&mut self, frame: RelayFrame) -> Result<()> {
        let bytes = frame.encode();
        let timeout = self.timings.write_timeout;
        let port = &mut self.port;

        let write = async move {
            port.write_all(&bytes).await?;
            port.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(RelayError::Write {
                    tube: frame.tube,
                    source,
                })
            }
            Err(_) => {
                return Err(RelayError::WriteTimeout {
                    tube: frame.tube,
                    timeout,
                })
            }
        }
        debug!(tube = frame.tube, enable = frame.enable, "Relay frame sent");

        tokio::time::sleep(self.timings.settle).await;
        Ok(())
    }
}

fn tube_byte(tube: u32) -> Result<u8> {
    u8::try_from(tube).map_err(|_| RelayError::TubeOutOfRange { tube })
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parity(code: u8) -> tokio_serial::Parity {
    match code {
        1 => tokio_serial::Parity::Odd,
        2 => tokio_serial::Parity::Even,
        _ => tokio_serial::Parity::None,
    }
}

fn stop_bits(code: u8) -> tokio_serial::StopBits {
    match code {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_LEN;
    use tokio::io::AsyncReadExt;
    use tokio::time::Instant;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn driver_over_duplex(capacity: usize) -> (RelayProtocolDriver, tokio::io::DuplexStream) {
        let (host, device) = tokio::io::duplex(capacity);
        let driver = RelayProtocolDriver::with_transport(Box::new(device), RelayTimings::default());
        (driver, host)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_tube_writes_enable_frame() -> TestResult {
        let (mut driver, mut host) = driver_over_duplex(64);

        driver.connect_tube(5).await?;

        let mut buf = [0u8; FRAME_LEN];
        host.read_exact(&mut buf).await?;
        assert_eq!(buf[1], 5);
        assert_eq!(buf[2], 1);
        assert_eq!(buf, [b'{', 5, 1, b'}']);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_tube_writes_disable_frame() -> TestResult {
        let (mut driver, mut host) = driver_over_duplex(64);

        driver.disconnect_tube(5).await?;

        let mut buf = [0u8; FRAME_LEN];
        host.read_exact(&mut buf).await?;
        assert_eq!(buf[1], 5);
        assert_eq!(buf[2], 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn frames_match_wire_script() -> TestResult {
        let port = tokio_test::io::Builder::new()
            .write(&[0x7B, 0, 0, 0x7D])
            .write(&[0x7B, 9, 1, 0x7D])
            .write(&[0x7B, 9, 0, 0x7D])
            .build();
        let mut driver = RelayProtocolDriver::with_transport(Box::new(port), RelayTimings::default());

        driver.disconnect_tube(0).await?;
        driver.connect_tube(9).await?;
        driver.disconnect_tube(9).await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn every_frame_waits_for_settle() -> TestResult {
        let (mut driver, _host) = driver_over_duplex(64);
        let start = Instant::now();

        driver.connect_tube(1).await?;
        driver.disconnect_tube(1).await?;

        assert!(start.elapsed() >= Duration::from_millis(500));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_write_times_out() {
        // Room for exactly one frame and nobody reading
        let (mut driver, _host) = driver_over_duplex(FRAME_LEN);

        driver.connect_tube(0).await.unwrap();
        let err = driver.connect_tube(1).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.class(), smdt_core::ErrorClass::ProtocolTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_position_rejected_without_write() {
        let (mut driver, mut host) = driver_over_duplex(64);

        let err = driver.connect_tube(256).await.unwrap_err();
        assert!(matches!(err, RelayError::TubeOutOfRange { tube: 256 }));

        drop(driver);
        let mut rest = Vec::new();
        host.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn open_missing_port_fails() {
        let port = PortDescriptor::new("/dev/smdt-relay-does-not-exist");
        let err = RelayProtocolDriver::open(&port, RelayTimings::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::Open { .. }));
    }
}
