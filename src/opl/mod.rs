//! OPL3 register interface and FM voice driver

pub mod driver;
pub mod instruments;
pub mod port;
pub mod synth;

pub use driver::{FmDriver, OutputLevel, Panning};
pub use instruments::{Instrument, Operator, INSTRUMENTS};
pub use port::PortSink;
pub use synth::Synth;

/// Number of two-operator voices on an OPL3
pub const VOICE_COUNT: usize = 18;

/// Conventional AdLib base port
pub const DEFAULT_BASE_PORT: u16 = 0x388;

/// Destination for OPL register writes
///
/// `port` is the register-select port of the bank being written: the base
/// port for voices 0..9 and `base + 2` for voices 9..18.
pub trait RegisterSink {
    fn write(&mut self, port: u16, register: u8, value: u8);
}

impl<S: RegisterSink + ?Sized> RegisterSink for &mut S {
    fn write(&mut self, port: u16, register: u8, value: u8) {
        (**self).write(port, register, value);
    }
}

impl<S: RegisterSink + ?Sized> RegisterSink for Box<S> {
    fn write(&mut self, port: u16, register: u8, value: u8) {
        (**self).write(port, register, value);
    }
}

/// A single recorded register write
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RegisterWrite {
    pub port: u16,
    pub register: u8,
    pub value: u8,
}

/// Sink that keeps every write, for tests and dumps
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub writes: Vec<RegisterWrite>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value written to `register` on `port`
    pub fn last_value(&self, port: u16, register: u8) -> Option<u8> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.port == port && w.register == register)
            .map(|w| w.value)
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }
}

impl RegisterSink for RecordingSink {
    fn write(&mut self, port: u16, register: u8, value: u8) {
        self.writes.push(RegisterWrite {
            port,
            register,
            value,
        });
    }
}

/// Sink that discards all writes
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RegisterSink for NullSink {
    fn write(&mut self, _port: u16, _register: u8, _value: u8) {}
}
