//! Wire constants and frame primitives for the GD32 ISP bootloader.
//!
//! Every frame the bootloader accepts is either a single byte followed by
//! its complement, or a byte run followed by the XOR of that run.

/// Synchronisation byte, sent until the bootloader locks on to our baud rate
pub const UART_SYNC: u8 = 0x7F;

/// Command / stage acknowledgement
pub const UART_ACK: u8 = 0x79;

/// Returned in response to a sync byte once the bootloader is ready
pub const UART_SYNC_ACK: u8 = 0x1F;

/// Mass erase selector for the `Erase` command
pub const ERASE_ALL: u8 = 0xFF;

/// Maximum payload for a single read or write
pub const MAX_CHUNK: usize = 256;

/// Start of main flash, also the default application entry point
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Default programmable window
pub const FLASH_SIZE: usize = 64 * 1024;

/// Factory programmed 96-bit unique ID
pub const UNIQUE_ID_ADDR: u32 = 0x1FFF_F7AC;
pub const UNIQUE_ID_LEN: usize = 12;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Command {
    /// Reads up to 256 bytes of memory starting from an address specified by the application.
    ReadMemory = 0x11,

    /// Jumps to user application code located in the internal Flash memory or in the SRAM.
    Go = 0x21,

    /// Writes up to 256 bytes to the RAM or Flash memory starting from an address specified by the application.
    WriteMemory = 0x31,

    /// Erases from one to all the Flash memory pages.
    Erase = 0x43,
}

impl Command {
    /// Opcode frame for this command
    pub fn frame(self) -> [u8; 2] {
        complement_pair(self as u8)
    }
}

/// Build a `byte, !byte` pair
pub fn complement_pair(b: u8) -> [u8; 2] {
    [b, !b]
}

/// XOR-fold a run of bytes
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Big-endian address followed by its checksum
pub fn address_frame(address: u32) -> [u8; 5] {
    let a = address.to_be_bytes();
    [a[0], a[1], a[2], a[3], xor_checksum(&a)]
}

/// Encode a transfer length (1..=256) as the `length - 1` byte the bootloader expects
pub fn length_byte(len: usize) -> Option<u8> {
    match len {
        1..=MAX_CHUNK => Some((len - 1) as u8),
        _ => None,
    }
}

/// Write payload frame: `len-1 || data || xor(len-1 || data)`
pub fn payload_frame(data: &[u8]) -> Option<Vec<u8>> {
    let n = length_byte(data.len())?;

    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.push(n);
    frame.extend_from_slice(data);
    frame.push(xor_checksum(&frame));

    Some(frame)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn complement_pair_sums_to_ff() {
        for b in 0..=255u8 {
            let [v, c] = complement_pair(b);
            assert_eq!(v, b);
            assert_eq!(c, 0xFF - b);
        }
    }

    #[test]
    fn command_frames() {
        assert_eq!(Command::ReadMemory.frame(), [0x11, 0xEE]);
        assert_eq!(Command::Go.frame(), [0x21, 0xDE]);
        assert_eq!(Command::WriteMemory.frame(), [0x31, 0xCE]);
        assert_eq!(Command::Erase.frame(), [0x43, 0xBC]);
    }

    #[test]
    fn xor_checksum_is_order_independent() {
        let s = [0x12, 0x34, 0x56, 0x78, 0x9a, 0x00, 0xff];
        let mut r = s;
        r.reverse();

        assert_eq!(xor_checksum(&s), xor_checksum(&r));
        assert_eq!(xor_checksum(&[]), 0);
    }

    #[test]
    fn xor_checksum_appended_cancels() {
        let mut s = b"gd32 isp".to_vec();
        s.push(xor_checksum(&s));
        assert_eq!(xor_checksum(&s), 0);
    }

    #[test]
    fn address_frame_flash_base() {
        assert_eq!(address_frame(FLASH_BASE), [0x08, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(
            address_frame(UNIQUE_ID_ADDR),
            [0x1F, 0xFF, 0xF7, 0xAC, 0x1F ^ 0xFF ^ 0xF7 ^ 0xAC]
        );
    }

    #[test]
    fn length_byte_bounds() {
        assert_eq!(length_byte(256), Some(0xFF));
        assert_eq!(length_byte(1), Some(0x00));
        assert_eq!(length_byte(0), None);
        assert_eq!(length_byte(257), None);
    }

    #[test]
    fn payload_frame_layout() {
        let frame = payload_frame(&[0xAB, 0xCD, 0xEF]).unwrap();
        assert_eq!(frame, vec![0x02, 0xAB, 0xCD, 0xEF, 0x02 ^ 0xAB ^ 0xCD ^ 0xEF]);
        assert_eq!(xor_checksum(&frame), 0);

        assert!(payload_frame(&[]).is_none());
    }
}
