/*!
This is a device support layer for the [Hytec IP-ADC-8413](https://www.hytec-electronics.co.uk),
a 16-channel, 16-bit analog input IndustryPack module, usually installed on a VME carrier.

The driver is platform agnostic: every register access goes through the [`RegisterBus`] trait,
and module discovery goes through the [`Carrier`] trait, so the same code runs against real
carrier memory windows or an in-memory model of the module.

This crate allows you to:

- Register modules by name and location, validating the ID-PROM identifier and model. See: `Registry::add()`.
- Read raw or calibrated ADC counts for a channel. See: `Registry::read_raw_or_calibrated()`.
- Enable or disable the use of calibration data per channel. See: `Registry::set_calibration_enabled()`.
- Read and write the control/status and auxiliary control registers bit by bit. See: `Registry::read_bits()`, `Registry::write_bit()`.
- Select an ID-PROM page with read-back verification. See: `Hy8413::select_page()`.
- Load the per-channel calibration tables stored in the ID-PROM. See: `CalibrationTable::load()`.
- Produce a text report of a module at increasing levels of detail. See: `Registry::card_report()`.

# Calibration

The ID-PROM holds five reference readings per channel and per voltage range, taken at
negative full scale, negative half scale, zero, positive half scale and positive full scale.
The ID-PROM has room for only one 30-word window at a time, so the tables are spread over six
pages selected through the auxiliary control register (ACR):

| Page | Range  | Channels |
|-----:|:-------|:---------|
|    0 | -      | standard VITA4 identity |
|    1 | +/-10V | 0-5      |
|    2 | +/-10V | 6-11     |
|    3 | +/-10V | 12-15    |
|    4 | +/-5V  | 0-5      |
|    5 | +/-5V  | 6-11     |
|    6 | +/-5V  | 12-15    |

A raw count is corrected by linear interpolation between the two reference readings that
bracket it (3-point or 5-point, as advertised by the ID-PROM), and clipped to `0..=65535`.
Only the tables of the range selected at load time are held. After the range bit of the ACR
changes, reads are raw until `Registry::reload_calibration()` loads the other range.

# Usage

```ignore
use hy8413::*;

// 1. Provide a `Carrier` that maps (carrier, slot) to the module's register windows
let mut registry = Registry::new(carrier);

// 2. Register the module in carrier 0, slot 1, sample clock code 9 (1kHz)
let adc = registry.add("ADC1", 0, 1, HYTEC_IP8413_MODEL, 9 << 16, 0x80)?;

// 3. Read channel 3, calibrated when the ID-PROM holds calibration data
let counts = registry.read_raw_or_calibrated(adc, 3)?;

// 4. Fall back to raw counts for every channel
registry.set_calibration_enabled("ADC1", ChannelSelect::All, false)?;

// 5. Print everything known about the module
println!("{}", registry.card_report(adc, 3)?);
```

*/
#![deny(unsafe_code)]

extern crate bit_field;

mod calibration;
mod channel;
mod hy8413;
mod idprom;
mod registry;
mod report;
#[cfg(test)]
mod sim;

pub use calibration::{
    calibrate, CalibrationTable, CalibrationType, ChannelCalibration, ChannelSelect, Point,
    CAL_PAGE_WORDS, NUM_CAL_POINTS,
};
pub use channel::{ChannelKind, ChannelRef, Link, LinkError};
pub use hy8413::{
    acr, csr, io_register, RegisterBus, Space, ID_WORDS, IO_MAP, IO_WORDS, MAX_PAGE,
};
pub use idprom::{Identity, HYTEC_IP8413_MODEL};
pub use registry::{
    Card, CardHandle, Carrier, InitMask, ProbeError, Registry, ScanEvent, ScanSource,
};
pub use report::CardReport;

use thiserror::Error;

/// Number of ADC channels on an IP-ADC-8413
pub const NUM_CHANNELS: usize = 16;

/// Hytec IP-ADC-8413 register access
#[derive(Debug, Default)]
pub struct Hy8413<B> {
    /// The register windows of one module
    bus: B,
    /// Range, mode and data format, as last read from the ACR
    pub config: Config,
}

/// Registers of the IO space, as word offsets from the IO base
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    /// Control/status register
    Csr = 0x00,
    /// Number of samples stored per trigger, low word
    SamplesLow = 0x01,
    /// Number of samples stored per trigger, high word
    SamplesHigh = 0x02,
    /// Sample clock rate code (0-15)
    ClockRate = 0x03,
    /// Interrupt vector (0-255)
    Vector = 0x04,
    /// Pre-trigger FIFO readout
    PreTrigger = 0x05,
    /// Post-trigger FIFO readout
    PostTrigger = 0x06,
    /// FIFO fullness counters
    Fullness = 0x07,
    /// Last conversion of channel 0, channels 1-15 follow
    Data = 0x08,
    /// 0V reference conversion
    Reference0V = 0x18,
    /// 2.5V reference conversion
    Reference2V5 = 0x19,
    /// Auxiliary control register
    Acr = 0x1A,
}

/// ADC input voltage range (ACR bit 0)
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Range {
    /// +/-10V
    Bipolar10V = 0,
    /// +/-5V
    Bipolar5V = 1,
}

/// Operating mode (ACR bit 2)
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// The converters are idle
    Standby = 0,
    /// Normal operation
    Normal = 1,
}

/// ADC data format (ACR bit 3)
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// 0x8000 is negative full scale, 0x7FFF positive full scale
    TwosComplement = 0,
    /// 0x0000 is negative full scale, 0xFFFF positive full scale
    OffsetBinary = 1,
}

impl Format {
    /// Widen a data register word to a count in this format
    pub fn count(self, word: u16) -> i32 {
        match self {
            Format::TwosComplement => i32::from(word as i16),
            Format::OffsetBinary => i32::from(word),
        }
    }
}

/// Module configuration decoded from the ACR
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub range: Range,
    pub mode: Mode,
    pub format: Format,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            range: Range::Bipolar10V,
            mode: Mode::Standby,
            format: Format::TwosComplement,
        }
    }
}

/// Classes of faults, from the host's point of view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// Bad name, index, page or link; nothing was touched on the module
    Configuration,
    /// The module or the bus did not behave; the operation was aborted
    Hardware,
    /// The ID-PROM holds data the driver does not understand
    Data,
}

/// All possible errors in this crate
#[derive(Debug, Error)]
pub enum Error<E> {
    /// Register bus error
    #[error("register bus error: {0:?}")]
    BusError(E),
    /// Card name is empty
    #[error("card name is empty")]
    EmptyName,
    /// A card with this name is already registered
    #[error("card {0} is already registered")]
    DuplicateName(String),
    /// A card at this location is already registered
    #[error("a card is already registered at carrier {carrier} slot {slot}")]
    DuplicateLocation { carrier: u16, slot: u16 },
    /// No card registered with this name
    #[error("card {0} is not registered")]
    UnknownCard(String),
    /// The handle does not belong to this registry
    #[error("invalid card handle {0}")]
    InvalidHandle(usize),
    /// The carrier or slot number is illegal
    #[error("illegal carrier {carrier} or slot {slot}")]
    BadAddress { carrier: u16, slot: u16 },
    /// Nothing answers at this location
    #[error("no module installed at carrier {carrier} slot {slot}")]
    NoModule { carrier: u16, slot: u16 },
    /// The ID-PROM does not start with "VITA"
    #[error("no VITA identifier in the ID-PROM at carrier {carrier} slot {slot}")]
    NoIpacId { carrier: u16, slot: u16 },
    /// The ID-PROM holds a different model
    #[error("expected model {expected:#x}, found {found:#x}")]
    BadModel { expected: u16, found: u16 },
    /// The model is valid but has no initializer
    #[error("model {0:#x} is not supported")]
    UnsupportedModel(u16),
    /// Channel number is out of range
    #[error("invalid channel {0}")]
    InvalidChannel(u16),
    /// Bit number is out of range
    #[error("invalid bit number {0}")]
    InvalidBit(u16),
    /// A multi-bit access is empty, runs past the register or covers a protected field
    #[error("invalid {width} bit field at bit {start}")]
    InvalidField { start: u16, width: u16 },
    /// Word offset is out of range
    #[error("invalid word offset {0:#x}")]
    InvalidOffset(u16),
    /// ID-PROM page is out of range
    #[error("invalid ID-PROM page {0}")]
    InvalidPage(u16),
    /// The page field did not latch
    #[error("failed to set ID-PROM page {page}: wrote {written:#06x}, read back {readback:#06x}")]
    PageLatch {
        page: u16,
        written: u16,
        readback: u16,
    },
    /// Clock rate code is out of range
    #[error("invalid clock rate {0}")]
    InvalidClockRate(u16),
    /// The clock rate did not latch
    #[error("failed to set clock rate {written}, read back {readback}")]
    ClockRateLatch { written: u16, readback: u16 },
    /// Calibration type byte in the ID-PROM is unknown
    #[error("invalid calibration type {0}")]
    InvalidCalibrationType(u16),
    /// The module has no calibration data
    #[error("no calibration data available")]
    CalibrationUnavailable,
    /// The channel's calibration data was never loaded
    #[error("no calibration data loaded for channel {0}")]
    CalibrationNotLoaded(u16),
    /// Record link could not be parsed
    #[error("illegal link {0:?}")]
    InvalidLink(String),
    /// The channel kind cannot be written
    #[error("{0:?} channels are read-only")]
    ReadOnly(ChannelKind),
}

impl<E> Error<E> {
    /// The class of this fault
    pub fn kind(&self) -> FaultKind {
        match self {
            Error::BusError(_)
            | Error::NoModule { .. }
            | Error::NoIpacId { .. }
            | Error::BadModel { .. }
            | Error::PageLatch { .. }
            | Error::ClockRateLatch { .. } => FaultKind::Hardware,
            Error::InvalidCalibrationType(_) => FaultKind::Data,
            _ => FaultKind::Configuration,
        }
    }
}

type BusRes<E> = Result<(), Error<E>>;
