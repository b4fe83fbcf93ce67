//! Decoding of the identity page (page 0) of the ID-PROM.
//!
//! Hytec does not follow the IPAC layout: the identifier is "VITA4 " instead of "IPAC",
//! the full 16-bit model id is used, and the CRC and manufacturer words are not set up.

use super::*;

/// Model id of the IP-ADC-8413
pub const HYTEC_IP8413_MODEL: u16 = 0x8413;

/// "VI", "TA" as big-endian words
const VITA: [u16; 2] = [0x5649, 0x5441];

/// Word offsets on page 0
#[repr(u16)]
#[derive(Clone, Copy, Debug)]
enum Word {
    AsciiVi = 0x00,
    AsciiTa = 0x01,
    ModelId = 0x05,
    Revision = 0x06,
    CalibrationType = 0x0C,
    SerialNo = 0x0D,
}

/// Identity of a module, read once at discovery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub model: u16,
    pub serial_no: u16,
    pub revision: u16,
}

fn word<B, E>(adc: &mut Hy8413<B>, word: Word) -> Result<u16, Error<E>>
where
    B: RegisterBus<Error = E>,
{
    adc.read_id_word(word as u16)
}

impl Identity {
    /// Read the identity words; page 0 must be selected
    pub fn read<B, E>(adc: &mut Hy8413<B>) -> Result<Identity, Error<E>>
    where
        B: RegisterBus<Error = E>,
    {
        Ok(Identity {
            model: word(adc, Word::ModelId)?,
            serial_no: word(adc, Word::SerialNo)?,
            revision: word(adc, Word::Revision)?,
        })
    }

    /// Check the identifier and the model, and return the identity
    pub fn validate<B, E>(
        adc: &mut Hy8413<B>,
        carrier: u16,
        slot: u16,
        expected: u16,
    ) -> Result<Identity, Error<E>>
    where
        B: RegisterBus<Error = E>,
    {
        let ident = [word(adc, Word::AsciiVi)?, word(adc, Word::AsciiTa)?];
        if ident != VITA {
            log::error!(
                "no VITA identifier at carrier {} slot {}: {:04x?}",
                carrier,
                slot,
                ident
            );
            return Err(Error::NoIpacId { carrier, slot });
        }
        let identity = Identity::read(adc)?;
        if identity.model != expected {
            log::error!(
                "carrier {} slot {} holds model {:#x}, expected {:#x}",
                carrier,
                slot,
                identity.model,
                expected
            );
            return Err(Error::BadModel {
                expected,
                found: identity.model,
            });
        }
        Ok(identity)
    }
}

/// Read the raw calibration type word; page 0 must be selected
pub(crate) fn calibration_type<B, E>(adc: &mut Hy8413<B>) -> Result<u16, Error<E>>
where
    B: RegisterBus<Error = E>,
{
    Ok(word(adc, Word::CalibrationType)? & 0x00FF)
}
