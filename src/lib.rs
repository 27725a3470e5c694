//! GD32 Serial Bootloader.
//!
//! Based on AN3155, which the GD32 factory ISP bootloader implements for
//! the commands used here (sync, read, write, mass erase and go).

use core::fmt::{self, Debug};
use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod flash;
pub mod ihex;
mod memory;
pub mod protocol;

#[cfg(test)]
mod mock;

pub use flash::FlashLayout;
pub use protocol::*;

/// Byte-oriented serial port the bootloader is attached to
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Init,
    Synchronised,
}

/// Protocol step an acknowledgement was expected for
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Stage {
    Command,
    Address,
    Size,
    EraseSelect,
    Data,
    Go,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Command => "command",
            Stage::Address => "address",
            Stage::Size => "size",
            Stage::EraseSelect => "erase select",
            Stage::Data => "data",
            Stage::Go => "go confirmation",
        };
        f.write_str(s)
    }
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: Debug> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("bootloader did not synchronise after {attempts} attempts")]
    HandshakeFailed { attempts: usize },

    #[error("bootloader not synchronised")]
    NotSynchronised,

    #[error("{stage} stage rejected (expected 0x79, received 0x{observed:02x})")]
    Protocol { stage: Stage, observed: u8 },

    #[error("timeout awaiting {0} acknowledgement")]
    ResponseTimeout(Stage),

    #[error("short read (expected {expected} bytes, received {received})")]
    ShortRead { expected: usize, received: usize },

    #[error("invalid transfer length {0} (must be 1..=256 bytes)")]
    InvalidLength(usize),

    #[error("region of {size} bytes at 0x{base:08x} runs past the end of the address space")]
    AddressOverflow { base: u32, size: usize },

    #[error("image of {size} bytes exceeds flash window of {limit} bytes")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("verification failed for block at 0x{address:08x}")]
    VerifyFailed { address: u32 },

    #[error("image i/o error: {0:?}")]
    Io(std::io::ErrorKind),
}

impl<SerialError: Debug> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "600"))]
    pub response_timeout_ms: u32,

    /// Timeout to wait for the mass erase to complete
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1200"))]
    pub erase_timeout_ms: u32,

    /// Period to poll for bootloader responses, the only wait counted
    /// against a timeout
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Period to wait after synchronisation before issuing commands
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1000"))]
    pub settle_delay_ms: u32,

    /// Number of sync bytes to send before giving up
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "6"))]
    pub sync_attempts: usize,

    /// Log every frame written to and read from the bootloader
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub trace: bool,

    /// Pause between written bytes, for adapters that drop back-to-back bytes
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub slow: bool,

    /// Read back and compare every block after writing
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub verify: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 600,
            erase_timeout_ms: 1200,
            poll_delay_ms: 1,
            settle_delay_ms: 1000,
            sync_attempts: 6,
            trace: false,
            slow: false,
            verify: false,
        }
    }
}

/// Upper bound on bytes discarded by `drain`
const DRAIN_LIMIT: usize = 4096;

pub struct Programmer<P, D, E> {
    state: State,
    options: Options,
    port: P,
    delay: D,
    _err: PhantomData<E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            state: State::Init,
            options,
            port,
            delay,
            _err: PhantomData,
        }
    }

    /// Fetch the programmer state
    pub fn state(&self) -> State {
        self.state
    }

    /// Close the session, returning the underlying port
    pub fn close(self) -> P {
        debug!("Closing bootloader session");
        self.port
    }

    /// Discard anything already buffered on the port
    pub fn drain(&mut self) -> Result<usize, Error<E>> {
        let mut n = 0;

        while n < DRAIN_LIMIT {
            match self.port.read() {
                Ok(_) => n += 1,
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }
        }

        if n > 0 {
            debug!("Drained {} stale bytes", n);
        }

        Ok(n)
    }

    /// Synchronise with the bootloader.
    ///
    /// The bootloader answers a sync byte with 0x1F once it has locked on.
    /// The first response after power-on is frequently a plain ACK, after
    /// which the next command fails, so anything other than 0x1F means
    /// send the sync byte again.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.state = State::Init;

        for attempt in 1..=self.options.sync_attempts {
            debug!("Sending sync character (attempt {})", attempt);
            self.write_frame(&[UART_SYNC])?;

            match self.read_byte(self.options.response_timeout_ms)? {
                Some(UART_SYNC_ACK) => {
                    debug!("Bootloader synchronised");
                    self.delay.delay_ms(self.options.settle_delay_ms);
                    self.state = State::Synchronised;
                    return Ok(());
                }
                Some(v) => debug!("Discarding sync response 0x{:02x}", v),
                None => debug!("No sync response"),
            }
        }

        error!(
            "Bootloader did not synchronise after {} attempts",
            self.options.sync_attempts
        );

        Err(Error::HandshakeFailed {
            attempts: self.options.sync_attempts,
        })
    }

    pub(crate) fn ensure_synchronised(&self) -> Result<(), Error<E>> {
        match self.state {
            State::Synchronised => Ok(()),
            State::Init => Err(Error::NotSynchronised),
        }
    }

    pub(crate) fn write_frame(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        if self.options.trace {
            debug!("wr {}: {:02X?}", data.len(), data);
        }

        for b in data {
            block!(self.port.write(*b))?;

            if self.options.slow {
                block!(self.port.flush())?;
                self.delay.delay_ms(1);
            }
        }

        block!(self.port.flush())?;

        Ok(())
    }

    /// Poll for a single byte, `None` on timeout
    pub(crate) fn read_byte(&mut self, timeout_ms: u32) -> Result<Option<u8>, Error<E>> {
        let step = self.options.poll_delay_ms.max(1);
        let mut t = 0;

        loop {
            match self.port.read() {
                Ok(v) => return Ok(Some(v)),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }

            if t >= timeout_ms {
                return Ok(None);
            }

            self.delay.delay_ms(step);
            t = t.saturating_add(step);
        }
    }

    /// Fill `data` from the port, returning the number of bytes received
    /// before a timeout
    pub(crate) fn read_exact(&mut self, data: &mut [u8]) -> Result<usize, Error<E>> {
        let mut n = 0;

        while n < data.len() {
            match self.read_byte(self.options.response_timeout_ms)? {
                Some(v) => data[n] = v,
                None => break,
            }
            n += 1;
        }

        if self.options.trace {
            debug!("rd {}: {:02X?}", n, &data[..n]);
        }

        Ok(n)
    }

    pub(crate) fn await_ack(&mut self, stage: Stage, timeout_ms: u32) -> Result<(), Error<E>> {
        let v = self.read_byte(timeout_ms)?;

        if self.options.trace {
            debug!("rd ack: {:02X?}", v);
        }

        match v {
            Some(UART_ACK) => Ok(()),
            Some(v) => {
                debug!("Bootloader rejected {} stage: 0x{:02x}", stage, v);
                Err(Error::Protocol { stage, observed: v })
            }
            None => {
                error!("Receive timeout awaiting {} acknowledgement", stage);
                Err(Error::ResponseTimeout(stage))
            }
        }
    }
}
