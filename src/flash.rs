//! Whole-image transfers built on the memory commands.

use core::convert::TryFrom;
use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::{FLASH_BASE, FLASH_SIZE, MAX_CHUNK};
use crate::{Error, Programmer, SerialPort};

/// Region of flash covered by an image transfer
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct FlashLayout {
    /// Address of the first block, also the application entry point
    pub base: u32,
    /// Total image size in bytes
    pub size: usize,
    /// Transfer block size, at most 256 bytes
    pub block: usize,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            base: FLASH_BASE,
            size: FLASH_SIZE,
            block: MAX_CHUNK,
        }
    }
}

impl FlashLayout {
    /// Check the block size is transferable and the region fits the 32-bit
    /// address space
    pub fn check<E: Debug>(&self) -> Result<(), Error<E>> {
        if self.block == 0 || self.block > MAX_CHUNK {
            return Err(Error::InvalidLength(self.block));
        }

        let end = u64::from(self.base) + self.size as u64;
        if end > 1 << 32 {
            return Err(Error::AddressOverflow {
                base: self.base,
                size: self.size,
            });
        }

        Ok(())
    }

    /// Iterate over `(address, length)` of each block in the layout, ending
    /// at the top of the address space
    pub fn blocks(&self) -> impl Iterator<Item = (u32, usize)> {
        let FlashLayout { base, size, block } = *self;

        (0..size).step_by(block.max(1)).map_while(move |offset| {
            let address = u32::try_from(offset)
                .ok()
                .and_then(|o| base.checked_add(o))?;
            Some((address, block.min(size - offset)))
        })
    }
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Synchronise and read the unique ID, proving the chip is responding
    pub fn identify(&mut self) -> Result<String, Error<E>> {
        self.init()?;

        let id = self.unique_id()?;
        info!("Connected to chip, id: {}", id);

        Ok(id)
    }

    /// Read the flash region described by `layout` into `out`.
    ///
    /// Blocks are written to `out` as they arrive, so when a block fails the
    /// data read so far has already been handed over and flushed. `progress` receives
    /// `(bytes done, bytes total)` after each block.
    pub fn read_flash<W, F>(
        &mut self,
        layout: &FlashLayout,
        out: &mut W,
        progress: F,
    ) -> Result<usize, Error<E>>
    where
        W: std::io::Write,
        F: FnMut(usize, usize),
    {
        layout.check()?;

        self.identify()?;

        self.read_blocks(layout, out, progress)
    }

    /// Read the flash region described by `layout` into `out` over an
    /// already synchronised session.
    ///
    /// On a failed block `out` is flushed before the error is returned.
    pub fn read_blocks<W, F>(
        &mut self,
        layout: &FlashLayout,
        out: &mut W,
        mut progress: F,
    ) -> Result<usize, Error<E>>
    where
        W: std::io::Write,
        F: FnMut(usize, usize),
    {
        layout.check()?;
        self.ensure_synchronised()?;

        info!("Reading {} bytes from 0x{:08x}", layout.size, layout.base);

        let mut buff = [0u8; MAX_CHUNK];
        let mut done = 0;

        for (i, (address, len)) in layout.blocks().enumerate() {
            let chunk = &mut buff[..len];

            if let Err(e) = self.read_mem(address, chunk) {
                error!("Cannot read memory block {} (0x{:08x}): {}", i, address, e);
                warn!("Read aborted after {} of {} bytes", done, layout.size);

                if let Err(f) = out.flush() {
                    warn!("Failed to flush partial image: {}", f);
                }

                return Err(e);
            }

            out.write_all(chunk).map_err(|e| Error::Io(e.kind()))?;

            done += len;
            progress(done, layout.size);
        }

        out.flush().map_err(|e| Error::Io(e.kind()))?;

        Ok(done)
    }

    /// Erase the chip, write `image` from `layout.base` and start it.
    ///
    /// The final block may be shorter than `layout.block`. Nothing is written
    /// if the erase fails, and the application is only started once every
    /// block has been accepted.
    pub fn write_flash<F>(
        &mut self,
        layout: &FlashLayout,
        image: &[u8],
        mut progress: F,
    ) -> Result<(), Error<E>>
    where
        F: FnMut(usize, usize),
    {
        layout.check()?;

        if image.len() > layout.size {
            return Err(Error::ImageTooLarge {
                size: image.len(),
                limit: layout.size,
            });
        }

        self.identify()?;

        info!("Erasing flash");
        if let Err(e) = self.erase_all() {
            error!("Failed to erase chip: {}", e);
            return Err(e);
        }

        info!("Writing {} bytes to 0x{:08x}", image.len(), layout.base);

        let region = FlashLayout {
            size: image.len(),
            ..*layout
        };
        let mut done = 0;

        for (i, (address, len)) in region.blocks().enumerate() {
            let chunk = &image[done..done + len];

            if let Err(e) = self.write_mem(address, chunk) {
                error!("Cannot write memory block {} (0x{:08x}): {}", i, address, e);
                warn!("Write aborted after {} of {} bytes", done, image.len());
                return Err(e);
            }

            done += len;
            progress(done, image.len());
        }

        self.go(layout.base)
    }
}
