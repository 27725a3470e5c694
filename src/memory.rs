//! Bootloader memory commands: erase, read, write, go.

use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::*;
use crate::{Error, Programmer, SerialPort, Stage};

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Issue a command opcode and await its acknowledgement
    fn command(&mut self, command: Command) -> Result<(), Error<E>> {
        self.ensure_synchronised()?;

        debug!("Sending command {:?}", command);
        self.write_frame(&command.frame())?;

        self.await_ack(Stage::Command, self.options.response_timeout_ms)
    }

    fn send_address(&mut self, address: u32) -> Result<(), Error<E>> {
        self.write_frame(&address_frame(address))?;
        self.await_ack(Stage::Address, self.options.response_timeout_ms)
    }

    /// Mass erase the whole flash.
    ///
    /// The final acknowledgement only arrives once the erase has completed,
    /// so it is awaited with `erase_timeout_ms` rather than the usual
    /// response timeout.
    pub fn erase_all(&mut self) -> Result<(), Error<E>> {
        self.command(Command::Erase)?;

        debug!("Requesting mass erase");
        self.write_frame(&complement_pair(ERASE_ALL))?;

        self.await_ack(Stage::EraseSelect, self.options.erase_timeout_ms)
    }

    /// Read `data.len()` (1..=256) bytes of memory starting at `address`
    pub fn read_mem(&mut self, address: u32, data: &mut [u8]) -> Result<(), Error<E>> {
        let n = length_byte(data.len()).ok_or_else(|| Error::InvalidLength(data.len()))?;

        self.command(Command::ReadMemory)?;
        self.send_address(address)?;

        self.write_frame(&complement_pair(n))?;
        self.await_ack(Stage::Size, self.options.response_timeout_ms)?;

        // Data follows directly, a short read is the only failure signal
        let received = self.read_exact(data)?;
        if received != data.len() {
            error!(
                "Short read at 0x{:08x}: {} of {} bytes",
                address,
                received,
                data.len()
            );
            return Err(Error::ShortRead {
                expected: data.len(),
                received,
            });
        }

        Ok(())
    }

    /// Write 1..=256 bytes of memory starting at `address`.
    ///
    /// The bootloader validates the payload checksum itself, with
    /// `Options::verify` the block is additionally read back and compared.
    pub fn write_mem(&mut self, address: u32, data: &[u8]) -> Result<(), Error<E>> {
        let frame = payload_frame(data).ok_or_else(|| Error::InvalidLength(data.len()))?;

        self.command(Command::WriteMemory)?;
        self.send_address(address)?;

        self.write_frame(&frame)?;
        self.await_ack(Stage::Data, self.options.response_timeout_ms)?;

        if self.options.verify {
            let mut readback = vec![0u8; data.len()];
            self.read_mem(address, &mut readback)?;

            if readback != data {
                error!("Verification failed at 0x{:08x}", address);
                return Err(Error::VerifyFailed { address });
            }
        }

        Ok(())
    }

    /// Read the factory programmed unique ID as an uppercase hex string
    pub fn unique_id(&mut self) -> Result<String, Error<E>> {
        let mut id = [0u8; UNIQUE_ID_LEN];

        if let Err(e) = self.read_mem(UNIQUE_ID_ADDR, &mut id) {
            error!("Cannot identify device: {}", e);
            return Err(e);
        }

        Ok(hex::encode_upper(id))
    }

    /// Jump to the application at `address`.
    ///
    /// The bootloader acknowledges the command, the address, and then the
    /// jump itself. Only the third acknowledgement means the jump happened.
    pub fn go(&mut self, address: u32) -> Result<(), Error<E>> {
        self.command(Command::Go)?;
        self.send_address(address)?;

        self.await_ack(Stage::Go, self.options.response_timeout_ms)?;

        info!("Running firmware from 0x{:08x}", address);

        Ok(())
    }
}
