//! Serial port abstractions for the controller link.
//!
//! The transport is written against [`SerialPortIO`], so anything that implements
//! `AsyncRead + AsyncWrite` can stand in for the controller:
//! - `tokio_serial::SerialStream` (real hardware, feature `serial`)
//! - `tokio::io::DuplexStream` (tests)
//!
//! # Example
//!
//! ```rust,ignore
//! use laser_tune::serial::open_serial_async;
//! use laser_tune::transport::LineTransport;
//!
//! let port = open_serial_async("/dev/ttyUSB0", 115200, "laser controller").await?;
//! let mut link = LineTransport::new(Box::new(port));
//! let pid = link.get_pid_values(std::time::Duration::from_secs(2)).await?;
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

/// Trait alias for async serial port I/O.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Serial port discovered on this host.
#[cfg(feature = "serial")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortListing {
    /// OS path or name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub name: String,
    /// Short description of the port type (USB vendor/product when known).
    pub description: String,
}

/// Enumerate serial ports.
#[cfg(feature = "serial")]
pub fn list_ports() -> anyhow::Result<Vec<PortListing>> {
    use anyhow::Context;

    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    Ok(ports
        .into_iter()
        .map(|p| PortListing {
            description: describe_port_type(&p.port_type),
            name: p.port_name,
        })
        .collect())
}

#[cfg(feature = "serial")]
fn describe_port_type(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {:04x}:{:04x} {}",
            usb.vid,
            usb.pid,
            usb.product.as_deref().unwrap_or("")
        )
        .trim_end()
        .to_string(),
        serialport::SerialPortType::PciPort => "PCI".to_string(),
        serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        serialport::SerialPortType::Unknown => "unknown".to_string(),
    }
}
