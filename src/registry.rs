//! The catalog of registered cards.
//!
//! Cards are appended once at discovery and never removed, so a [`CardHandle`] stays valid
//! for the lifetime of its [`Registry`]. Every register access of a card, including the
//! multi-step ID-PROM page protocol, runs under that card's lock.

use super::*;
use crate::channel::REGISTER_BITS;
use bit_field::BitField;
use core::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Why a carrier cannot hand out a module
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeError {
    /// The carrier or slot number does not exist
    BadAddress,
    /// The slot is empty
    NoModule,
}

/// The IndustryPack carriers of a crate
pub trait Carrier {
    type Bus: RegisterBus;

    /// Map the register windows of the module in `slot` of `carrier`
    fn module(&mut self, carrier: u16, slot: u16) -> Result<Self::Bus, ProbeError>;
}

/// Stable reference to a registered card
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CardHandle(usize);

impl CardHandle {
    /// Position in registration order
    pub fn index(self) -> usize {
        self.0
    }
}

/// Module setup requested at registration.
///
/// A zero mask leaves the sample clock and the readout mode as they are. Otherwise bits
/// 16..20 hold the sample clock rate code, and bit 0 selects SAM (averaged) readout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InitMask(pub u32);

impl InitMask {
    const SAM_MODE: usize = 0;
    const CLOCK_RATE: core::ops::Range<usize> = 16..20;

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn sam_mode(self) -> bool {
        self.0.get_bit(Self::SAM_MODE)
    }

    pub fn clock_rate(self) -> u16 {
        self.0.get_bits(Self::CLOCK_RATE) as u16
    }
}

/// Interrupt sources a record can be scanned on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScanSource {
    /// New ADC data in the FIFO
    Fifo,
    /// A bit of the control/status register changed
    Csr(u16),
    /// A bit of the auxiliary control register changed
    Acr(u16),
    /// A multi-bit field starting at this bit changed
    Word(u16),
    /// A calibration enable flag changed
    CalibrationEnable,
}

/// Identifies one scan list of one card
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScanEvent {
    pub card: CardHandle,
    pub source: ScanSource,
}

pub(crate) struct State<B> {
    pub(crate) hw: Hy8413<B>,
    pub(crate) table: CalibrationTable,
    /// Why the last calibration load failed
    pub(crate) fault: Option<String>,
}

/// One registered module
pub struct Card<B> {
    name: String,
    carrier: u16,
    slot: u16,
    identity: Identity,
    nchan: u16,
    vector: u16,
    mask: InitMask,
    state: Mutex<State<B>>,
}

impl<B> Card<B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Carrier and slot
    pub fn location(&self) -> (u16, u16) {
        (self.carrier, self.slot)
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn nchan(&self) -> u16 {
        self.nchan
    }

    /// Interrupt vector, as read back at init
    pub fn vector(&self) -> u16 {
        self.vector
    }

    pub fn init_mask(&self) -> InitMask {
        self.mask
    }

    /// Why the last calibration load, at registration or reload, failed
    pub fn calibration_fault(&self) -> Option<String> {
        self.lock().fault.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registered cards, in registration order
pub struct Registry<C: Carrier> {
    carrier: C,
    cards: Vec<Card<C::Bus>>,
}

impl<C, E> Registry<C>
where
    C: Carrier,
    C::Bus: RegisterBus<Error = E>,
    E: Debug,
{
    pub fn new(carrier: C) -> Self {
        Registry {
            carrier,
            cards: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn cards(&self) -> impl Iterator<Item = (CardHandle, &Card<C::Bus>)> {
        self.cards
            .iter()
            .enumerate()
            .map(|(i, card)| (CardHandle(i), card))
    }

    pub fn card(&self, handle: CardHandle) -> Result<&Card<C::Bus>, Error<E>> {
        self.cards
            .get(handle.0)
            .ok_or(Error::InvalidHandle(handle.0))
    }

    pub fn get_by_name(&self, name: &str) -> Option<CardHandle> {
        self.cards()
            .find(|(_, card)| card.name == name)
            .map(|(handle, _)| handle)
    }

    pub fn get_by_location(&self, carrier: u16, slot: u16) -> Option<CardHandle> {
        self.cards()
            .find(|(_, card)| card.location() == (carrier, slot))
            .map(|(handle, _)| handle)
    }

    /// Validate, initialize and register the module in `slot` of `carrier`.
    ///
    /// Nothing is registered unless the module answers with the expected model and
    /// initializes. A calibration table that cannot be loaded is recorded on the card,
    /// which then reads raw counts.
    pub fn add(
        &mut self,
        name: &str,
        carrier: u16,
        slot: u16,
        model: u16,
        mask: u32,
        vector: u8,
    ) -> Result<CardHandle, Error<E>> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        if self.get_by_name(name).is_some() {
            log::error!("card {} is already registered", name);
            return Err(Error::DuplicateName(name.to_string()));
        }
        if self.get_by_location(carrier, slot).is_some() {
            log::error!(
                "a card is already registered at carrier {} slot {}",
                carrier,
                slot
            );
            return Err(Error::DuplicateLocation { carrier, slot });
        }
        if model != HYTEC_IP8413_MODEL {
            return Err(Error::UnsupportedModel(model));
        }

        let card = self
            .probe(name, carrier, slot, model, InitMask(mask), vector)
            .map_err(|err| {
                log::error!("failed to initialize card {}: {}", name, err);
                err
            })?;
        log::info!(
            "card {} (model {:#x}, serial {}) initialized at carrier {} slot {}",
            name,
            card.identity.model,
            card.identity.serial_no,
            carrier,
            slot
        );
        let handle = CardHandle(self.cards.len());
        self.cards.push(card);
        Ok(handle)
    }

    fn probe(
        &mut self,
        name: &str,
        carrier: u16,
        slot: u16,
        model: u16,
        mask: InitMask,
        vector: u8,
    ) -> Result<Card<C::Bus>, Error<E>> {
        let bus = self
            .carrier
            .module(carrier, slot)
            .map_err(|err| match err {
                ProbeError::BadAddress => Error::BadAddress { carrier, slot },
                ProbeError::NoModule => Error::NoModule { carrier, slot },
            })?;
        let mut hw = Hy8413::new(bus);
        hw.select_page(0)?;
        let identity = Identity::validate(&mut hw, carrier, slot, model)?;
        let vector = hw.init(vector)?;

        let mut table = CalibrationTable::new(NUM_CHANNELS);
        let range = hw.config.range;
        let fault = load_fault(name, table.load(&mut hw, range));

        if !mask.is_empty() {
            hw.write_clock_rate(mask.clock_rate())?;
            if mask.sam_mode() {
                hw.init_sam_mode()?;
            }
        }

        Ok(Card {
            name: name.to_string(),
            carrier,
            slot,
            identity,
            nchan: NUM_CHANNELS as u16,
            vector,
            mask,
            state: Mutex::new(State { hw, table, fault }),
        })
    }

    /// Read the calibration tables of a card again, for its current voltage range.
    ///
    /// Every channel that loads is enabled again. Data of the previous load is dropped
    /// first, and the card's calibration fault is replaced by the outcome.
    pub fn reload_calibration(&self, handle: CardHandle) -> Result<(), Error<E>> {
        let card = self.card(handle)?;
        let mut state = card.lock();
        let State { hw, table, fault } = &mut *state;
        let range = hw.read_config()?.range;
        let res = table.load(hw, range);
        *fault = load_fault(&card.name, res.as_ref());
        res
    }

    /// Enable or disable the use of calibration data on one or all channels of a card
    pub fn set_calibration_enabled(
        &self,
        name: &str,
        select: ChannelSelect,
        enabled: bool,
    ) -> Result<(), Error<E>> {
        let handle = self
            .get_by_name(name)
            .ok_or_else(|| Error::UnknownCard(name.to_string()))?;
        self.card(handle)?.lock().table.set_enabled(select, enabled)
    }

    /// Read a channel, corrected when its calibration data is loaded and enabled
    pub fn read_raw_or_calibrated(&self, handle: CardHandle, chan: u16) -> Result<i32, Error<E>> {
        let card = self.card(handle)?;
        if chan >= card.nchan {
            return Err(Error::InvalidChannel(chan));
        }
        let mut state = card.lock();
        let word = state.hw.read_channel(chan)? as u16;
        let config = state.hw.config;
        Ok(state.table.apply(chan, config, config.format.count(word)))
    }

    /// Reference words of a channel in the card's current data format, empty when none
    /// were loaded for the current voltage range
    pub fn calibration_points(&self, handle: CardHandle, chan: u16) -> Result<Vec<u16>, Error<E>> {
        let card = self.card(handle)?;
        if chan >= card.nchan {
            return Err(Error::InvalidChannel(chan));
        }
        let state = card.lock();
        Ok(state.table.points(chan, state.hw.config))
    }

    /// Look up the card of a link and check its index
    pub fn resolve(&self, link: &Link) -> Result<ChannelRef, Error<E>> {
        let handle = self
            .get_by_name(&link.card)
            .ok_or_else(|| Error::UnknownCard(link.card.clone()))?;
        let chan = ChannelRef {
            card: handle,
            kind: link.kind,
            index: link.index,
        };
        self.checked(chan)?;
        Ok(chan)
    }

    fn checked(&self, chan: ChannelRef) -> Result<&Card<C::Bus>, Error<E>> {
        let card = self.card(chan.card)?;
        if chan.index >= chan.kind.limit(card.nchan) {
            return Err(chan.kind.out_of_range(chan.index));
        }
        Ok(card)
    }

    /// Read the word behind a channel.
    ///
    /// `Csr` and `Acr` return the whole register, `Calibration` returns 1 when enabled,
    /// `Data` returns the raw data register.
    pub fn read_word(&self, chan: ChannelRef) -> Result<u16, Error<E>> {
        let card = self.checked(chan)?;
        let mut state = card.lock();
        match chan.kind {
            ChannelKind::Csr => state.hw.read_csr(),
            ChannelKind::Acr => state.hw.read_acr(),
            ChannelKind::Io => state.hw.read_io_word(chan.index),
            ChannelKind::Id => state.hw.read_id_word(chan.index),
            ChannelKind::Calibration => Ok(u16::from(
                state
                    .table
                    .channel(chan.index)
                    .map_or(false, |cal| cal.enabled),
            )),
            ChannelKind::Data => state.hw.read_channel(chan.index).map(|word| word as u16),
        }
    }

    /// Read an `nbits` wide field: at the channel's bit for `Csr`/`Acr`, at bit 0 otherwise
    pub fn read_bits(&self, chan: ChannelRef, nbits: u16) -> Result<u16, Error<E>> {
        let field = field(chan, nbits)?;
        Ok(self.read_word(chan)?.get_bits(field))
    }

    /// Set or clear a CSR/ACR bit, or a calibration enable flag
    pub fn write_bit(&self, chan: ChannelRef, value: bool) -> Result<(), Error<E>> {
        self.write_bits(chan, 1, u16::from(value))
    }

    /// Write an `nbits` wide field of the CSR/ACR starting at the channel's bit.
    ///
    /// The ACR page field is not writable this way. For `Calibration`, any non-zero value
    /// enables the channel.
    pub fn write_bits(&self, chan: ChannelRef, nbits: u16, value: u16) -> Result<(), Error<E>> {
        if !chan.kind.is_writable() {
            return Err(Error::ReadOnly(chan.kind));
        }
        let card = self.checked(chan)?;
        let field = field(chan, nbits)?;
        if chan.kind == ChannelKind::Acr
            && field.start < acr::PAGE.end
            && acr::PAGE.start < field.end
        {
            return Err(Error::InvalidField {
                start: chan.index,
                width: nbits,
            });
        }
        let ones = ((1u32 << nbits) - 1) as u16;
        let mut mask: u16 = 0;
        mask.set_bits(field.clone(), ones);
        let mut bits: u16 = 0;
        bits.set_bits(field, value & ones);

        let mut state = card.lock();
        match chan.kind {
            ChannelKind::Csr => state.hw.write_csr(mask, bits),
            ChannelKind::Acr => state.hw.write_acr(mask, bits),
            _ => state
                .table
                .set_enabled(ChannelSelect::One(chan.index), value != 0),
        }
    }

    /// Identify the scan list a record on `source` of a card belongs to
    pub fn scan_event(&self, handle: CardHandle, source: ScanSource) -> Result<ScanEvent, Error<E>> {
        self.card(handle)?;
        match source {
            ScanSource::Csr(bit) | ScanSource::Acr(bit) | ScanSource::Word(bit)
                if bit >= REGISTER_BITS =>
            {
                Err(Error::InvalidBit(bit))
            }
            _ => Ok(ScanEvent {
                card: handle,
                source,
            }),
        }
    }
}

/// Fault text of a calibration load, logged when there is one
fn load_fault<T, F: core::fmt::Display>(name: &str, res: Result<T, F>) -> Option<String> {
    match res {
        Ok(_) => None,
        Err(err) => {
            log::warn!("card {}: calibration data not loaded: {}", name, err);
            Some(err.to_string())
        }
    }
}

/// Bits covered by an `nbits` wide access to a channel
fn field<E>(chan: ChannelRef, nbits: u16) -> Result<core::ops::Range<usize>, Error<E>> {
    let start = match chan.kind {
        ChannelKind::Csr | ChannelKind::Acr => chan.index,
        _ => 0,
    };
    if nbits == 0 || start + nbits > REGISTER_BITS {
        return Err(Error::InvalidField { start, width: nbits });
    }
    Ok(usize::from(start)..usize::from(start + nbits))
}
