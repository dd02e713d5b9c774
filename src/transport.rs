use std::io::{Read, Write};

use crate::types::ChannelConfig;
use crate::Result;

/// A byte stream a channel reader can pull lines from and push tear-down lines to.
///
/// Reads must honour a timeout (returning `TimedOut` or `WouldBlock`) so the
/// reader thread can poll its stop flag.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// Opens transports for channel readers. Called again after every connection fault.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &ChannelConfig) -> Result<Box<dyn Transport>>;
}

/// Opens real serial ports through the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn connect(&self, config: &ChannelConfig) -> Result<Box<dyn Transport>> {
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .timeout(config.read_timeout)
            .open()?;
        log::debug!("Opened {} at {} baud", config.port, config.baud_rate);
        Ok(Box::new(port))
    }
}

/// List serial ports visible to the OS.
pub fn available_ports() -> Result<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}
