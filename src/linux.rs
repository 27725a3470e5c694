use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, ErrorKind as SerialErrorKind, FlowControl, Parity,
    SerialDevice as _, SerialPortSettings as _, StopBits,
};

use crate::{Options, Programmer};

/// The bootloader auto-detects this rate from the sync byte
pub const BAUD_RATE: usize = 115_200;

/// Per-read wait on the tty. Reads return at once and the programmer's poll
/// delay paces the wait, so timeouts are not stretched by the driver.
const READ_TIMEOUT: Duration = Duration::from_millis(0);

impl Programmer<Serial, Delay, IoErrorKind> {
    /// Open and configure a linux serial port, discarding any stale input
    pub fn linux<P: AsRef<Path>>(port: P, options: Options) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(BAUD_RATE))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityEven);

        port.0.write_settings(&settings)?;

        port.0.set_timeout(READ_TIMEOUT)?;

        let mut p = Self::new(port, Delay {}, options);

        p.drain()
            .map_err(|e| SerialError::new(SerialErrorKind::Io(IoErrorKind::Other), e.to_string()))?;

        Ok(p)
    }
}
