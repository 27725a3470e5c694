//! Scripted serial device and delay for exercising the programmer without
//! hardware.

use std::collections::VecDeque;
use std::convert::Infallible;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::{Options, Programmer, UART_SYNC_ACK};

/// Records everything written and replays a fixed response queue,
/// reporting `WouldBlock` once the queue runs dry
#[derive(Debug, Default)]
pub struct MockPort {
    pub tx: Vec<u8>,
    pub rx: VecDeque<u8>,
}

impl MockPort {
    pub fn new(replies: &[u8]) -> Self {
        Self {
            tx: Vec::new(),
            rx: replies.iter().copied().collect(),
        }
    }
}

impl Read<u8> for MockPort {
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Infallible> {
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Write<u8> for MockPort {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        self.tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        Ok(())
    }
}

/// Accumulates requested delays instead of sleeping
#[derive(Debug, Default)]
pub struct MockDelay {
    pub elapsed_ms: u64,
}

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ms += u64::from(ms);
    }
}

pub type MockProgrammer = Programmer<MockPort, MockDelay, Infallible>;

pub fn programmer(replies: &[u8]) -> MockProgrammer {
    Programmer::new(
        MockPort::new(replies),
        MockDelay::default(),
        Options::default(),
    )
}

/// Programmer that has completed the handshake, with the sync traffic
/// cleared from the transmit log
pub fn synced(replies: &[u8]) -> MockProgrammer {
    let mut rx = vec![UART_SYNC_ACK];
    rx.extend_from_slice(replies);

    let mut p = programmer(&rx);
    p.init().expect("mock handshake");
    p.port.tx.clear();
    p
}
