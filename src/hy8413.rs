use super::*;
use bit_field::BitField;

/// The two address windows of an IndustryPack module
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Space {
    /// Register space (A16)
    Io,
    /// ID-PROM space, showing the currently selected page
    Id,
}

/// Word access to the register windows of one module
pub trait RegisterBus {
    type Error;

    fn read_word(&mut self, space: Space, offset: u16) -> Result<u16, Self::Error>;
    fn write_word(&mut self, space: Space, offset: u16, value: u16) -> Result<(), Self::Error>;
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    type Error = T::Error;

    fn read_word(&mut self, space: Space, offset: u16) -> Result<u16, Self::Error> {
        (**self).read_word(space, offset)
    }

    fn write_word(&mut self, space: Space, offset: u16, value: u16) -> Result<(), Self::Error> {
        (**self).write_word(space, offset, value)
    }
}

/// Auxiliary control register bits
pub mod acr {
    use core::ops::Range;

    /// Bits the driver knows about
    pub const MASK: u16 = 0x07FF;
    /// Voltage range, 0 = +/-10V, 1 = +/-5V
    pub const RANGE: usize = 0;
    /// Hold the converters in reset
    pub const RESET: usize = 1;
    /// 0 = standby, 1 = normal operation
    pub const NORMAL: usize = 2;
    /// 0 = two's complement, 1 = offset binary
    pub const OFFSET_BINARY: usize = 3;
    /// ID-PROM page select
    pub const PAGE: Range<usize> = 4..7;
    /// Initialize the averager (pulsed)
    pub const AVERAGER_INIT: usize = 7;
    /// Enable the averager
    pub const AVERAGER_ENABLE: usize = 8;
    /// SAM readout mode
    pub const SAM: usize = 9;
    /// Read averaged data from the data registers
    pub const AVERAGED_READOUT: usize = 10;
}

/// Control/status register bits
pub mod csr {
    /// Pre-trigger FIFO full
    pub const FIFO_FULL: usize = 0;
    /// Post-trigger FIFO full
    pub const TRIGGER_FIFO_FULL: usize = 1;
    /// Pre-trigger FIFO empty
    pub const FIFO_EMPTY: usize = 2;
    /// Post-trigger FIFO half full
    pub const TRIGGER_FIFO_HALF: usize = 3;
    /// Reset the FIFOs
    pub const FIFO_RESET: usize = 4;
    /// Internal 10MHz clock
    pub const INTERNAL_CLOCK: usize = 5;
    /// Software trigger
    pub const SOFTWARE_TRIGGER: usize = 13;
    /// Enable triggers
    pub const ENABLE_TRIGGER: usize = 14;
    /// Sample at the clock rate
    pub const ARM: usize = 15;
}

/// Highest ID-PROM page
pub const MAX_PAGE: u16 = 6;
/// Words in the ID space
pub const ID_WORDS: u16 = 64;
/// Words in the IO space, up to the end of the last register of [`IO_MAP`]
pub const IO_WORDS: u16 = IO_MAP[IO_MAP.len() - 1].0 as u16 + IO_MAP[IO_MAP.len() - 1].1;
/// First ID word of the calibration window on pages 1-6
pub const CAL_WINDOW_BASE: u16 = 0x10;
/// Highest sample clock rate code
pub const MAX_CLOCK_RATE: u16 = 15;

/// IO register map: register, width in words, meaning
pub const IO_MAP: [(Register, u16, &str); 12] = [
    (Register::Csr, 1, "control/status"),
    (Register::SamplesLow, 1, "samples per trigger (LSW)"),
    (Register::SamplesHigh, 1, "samples per trigger (MSW)"),
    (Register::ClockRate, 1, "sample clock rate"),
    (Register::Vector, 1, "interrupt vector"),
    (Register::PreTrigger, 1, "pre-trigger FIFO"),
    (Register::PostTrigger, 1, "post-trigger FIFO"),
    (Register::Fullness, 1, "FIFO fullness"),
    (Register::Data, NUM_CHANNELS as u16, "ADC data"),
    (Register::Reference0V, 1, "0V reference"),
    (Register::Reference2V5, 1, "2.5V reference"),
    (Register::Acr, 1, "auxiliary control"),
];

/// The register an IO word belongs to, and what it holds
pub fn io_register(offset: u16) -> Option<(Register, &'static str)> {
    IO_MAP
        .iter()
        .find(|(reg, words, _)| (*reg as u16..*reg as u16 + words).contains(&offset))
        .map(|&(reg, _, name)| (reg, name))
}

impl<B, E> Hy8413<B>
where
    B: RegisterBus<Error = E>,
{
    /// Wrap the register windows of a module; nothing is written
    pub fn new(bus: B) -> Self {
        Hy8413 {
            bus,
            config: Config::default(),
        }
    }

    /// Put the module in normal mode with offset-binary data, arm sampling and program the vector
    pub fn init(&mut self, vector: u8) -> Result<u16, Error<E>> {
        let mut aux: u16 = 0;
        aux.set_bit(acr::NORMAL, true);
        aux.set_bit(acr::OFFSET_BINARY, true);
        self.write(Register::Acr, aux)?;
        let mut control: u16 = 0;
        control.set_bit(csr::ARM, true);
        self.write(Register::Csr, control)?;
        self.write(Register::Vector, u16::from(vector))?;
        self.read_config()?;
        self.read(Register::Vector)
    }

    fn read(&mut self, register: Register) -> Result<u16, Error<E>> {
        self.bus
            .read_word(Space::Io, register as u16)
            .map_err(Error::BusError)
    }

    fn write(&mut self, register: Register, value: u16) -> BusRes<E> {
        self.bus
            .write_word(Space::Io, register as u16, value)
            .map_err(Error::BusError)
    }

    /// Decode range, mode and data format from the ACR
    pub fn read_config(&mut self) -> Result<Config, Error<E>> {
        let aux = self.read_acr()?;
        self.config = Config {
            range: if aux.get_bit(acr::RANGE) {
                Range::Bipolar5V
            } else {
                Range::Bipolar10V
            },
            mode: if aux.get_bit(acr::NORMAL) {
                Mode::Normal
            } else {
                Mode::Standby
            },
            format: if aux.get_bit(acr::OFFSET_BINARY) {
                Format::OffsetBinary
            } else {
                Format::TwosComplement
            },
        };
        Ok(self.config)
    }

    /// Return the control/status register
    pub fn read_csr(&mut self) -> Result<u16, Error<E>> {
        self.read(Register::Csr)
    }

    /// Replace the bits of the control/status register selected by `mask`
    pub fn write_csr(&mut self, mask: u16, value: u16) -> BusRes<E> {
        let control = self.read_csr()?;
        self.write(Register::Csr, (control & !mask) | (value & mask))
    }

    /// Return the auxiliary control register
    pub fn read_acr(&mut self) -> Result<u16, Error<E>> {
        Ok(self.read(Register::Acr)? & acr::MASK)
    }

    /// Replace the bits of the auxiliary control register selected by `mask`, except the page field
    pub fn write_acr(&mut self, mask: u16, value: u16) -> BusRes<E> {
        let mut mask = mask & acr::MASK;
        mask.set_bits(acr::PAGE, 0);
        let aux = self.read(Register::Acr)?;
        self.write(Register::Acr, (aux & !mask) | (value & mask))?;
        self.read_config()?;
        Ok(())
    }

    /// Start or stop sampling at the clock rate
    pub fn arm(&mut self, enabled: bool) -> BusRes<E> {
        let bit = 1 << csr::ARM;
        self.write_csr(bit, if enabled { bit } else { 0 })
    }

    /// Set the sample clock rate code and verify that it latched
    pub fn write_clock_rate(&mut self, rate: u16) -> BusRes<E> {
        if rate > MAX_CLOCK_RATE {
            return Err(Error::InvalidClockRate(rate));
        }
        self.write(Register::ClockRate, rate)?;
        let readback = self.read_clock_rate()?;
        if readback != rate {
            log::error!("clock rate {} did not latch, read back {}", rate, readback);
            return Err(Error::ClockRateLatch {
                written: rate,
                readback,
            });
        }
        Ok(())
    }

    /// Return the sample clock rate code
    pub fn read_clock_rate(&mut self) -> Result<u16, Error<E>> {
        Ok(self.read(Register::ClockRate)?.get_bits(0..4))
    }

    /// Switch to SAM readout mode, reading averaged data from the data registers
    pub fn init_sam_mode(&mut self) -> BusRes<E> {
        self.arm(false)?;
        let bit = |n: usize| -> u16 { 1 << n };
        self.write_acr(bit(acr::AVERAGER_INIT), bit(acr::AVERAGER_INIT))?;
        self.write_acr(bit(acr::AVERAGER_INIT), 0)?;
        self.write_acr(bit(acr::AVERAGER_ENABLE), bit(acr::AVERAGER_ENABLE))?;
        self.write_acr(bit(acr::SAM), bit(acr::SAM))?;
        self.write_acr(bit(acr::NORMAL), bit(acr::NORMAL))?;
        self.arm(true)?;
        self.write_acr(bit(acr::AVERAGED_READOUT), bit(acr::AVERAGED_READOUT))
    }

    /// Select an ID-PROM page, keeping every other ACR bit, and verify that it latched
    pub fn select_page(&mut self, page: u16) -> BusRes<E> {
        if page > MAX_PAGE {
            log::error!("invalid ID-PROM page {} requested", page);
            return Err(Error::InvalidPage(page));
        }
        log::debug!("selecting ID-PROM page {}", page);
        let mut aux = self.read(Register::Acr)?;
        aux.set_bits(acr::PAGE, page);
        self.write(Register::Acr, aux)?;
        let readback = self.read(Register::Acr)?;
        if readback.get_bits(acr::PAGE) != page {
            log::error!(
                "failed to set ID-PROM page {}: wrote {:#06x}, read back {:#06x}",
                page,
                aux,
                readback
            );
            return Err(Error::PageLatch {
                page,
                written: aux,
                readback,
            });
        }
        Ok(())
    }

    /// Return the currently selected ID-PROM page
    pub fn page(&mut self) -> Result<u16, Error<E>> {
        Ok(self.read(Register::Acr)?.get_bits(acr::PAGE))
    }

    /// Read a word of the calibration window on the currently selected page
    pub fn read_id_window(&mut self, offset: u16) -> Result<u16, Error<E>> {
        if offset >= CAL_PAGE_WORDS {
            return Err(Error::InvalidOffset(offset));
        }
        self.read_id_word(CAL_WINDOW_BASE + offset)
    }

    /// Read a word of the ID space on the currently selected page
    pub fn read_id_word(&mut self, offset: u16) -> Result<u16, Error<E>> {
        if offset >= ID_WORDS {
            return Err(Error::InvalidOffset(offset));
        }
        self.bus
            .read_word(Space::Id, offset)
            .map_err(Error::BusError)
    }

    /// Read a word of the IO space
    pub fn read_io_word(&mut self, offset: u16) -> Result<u16, Error<E>> {
        let (_, name) = io_register(offset).ok_or(Error::InvalidOffset(offset))?;
        log::trace!("IO word {:#x} ({})", offset, name);
        self.bus
            .read_word(Space::Io, offset)
            .map_err(Error::BusError)
    }

    /// Return the last conversion of a channel
    pub fn read_channel(&mut self, chan: u16) -> Result<i16, Error<E>> {
        if usize::from(chan) >= NUM_CHANNELS {
            return Err(Error::InvalidChannel(chan));
        }
        self.bus
            .read_word(Space::Io, Register::Data as u16 + chan)
            .map(|word| word as i16)
            .map_err(Error::BusError)
    }

    /// Return the last conversion of every channel
    pub fn read_channels(&mut self) -> Result<[u16; NUM_CHANNELS], Error<E>> {
        let mut data = [0; NUM_CHANNELS];
        for (chan, word) in (0..).zip(data.iter_mut()) {
            *word = self.read_channel(chan)? as u16;
        }
        Ok(data)
    }

    /// Return the 0V and 2.5V reference conversions
    pub fn read_references(&mut self) -> Result<(u16, u16), Error<E>> {
        Ok((
            self.read(Register::Reference0V)?,
            self.read(Register::Reference2V5)?,
        ))
    }
}
