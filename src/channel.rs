//! Record links of the form `CARD:N:PARM` and the channel kinds they address.

use super::*;
use core::fmt;

/// What a record reads or writes on a card
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// A bit of the control/status register
    Csr,
    /// A bit of the auxiliary control register
    Acr,
    /// A word of the IO space
    Io,
    /// A word of the ID space on the selected page
    Id,
    /// The calibration enable flag of a channel
    Calibration,
    /// The ADC data of a channel
    Data,
}

const TOKENS: [(&str, ChannelKind); 6] = [
    ("CSR", ChannelKind::Csr),
    ("ACR", ChannelKind::Acr),
    ("IO", ChannelKind::Io),
    ("ID", ChannelKind::Id),
    ("CAL", ChannelKind::Calibration),
    ("DATA", ChannelKind::Data),
];

/// Bits in a register
pub(crate) const REGISTER_BITS: u16 = 16;

impl ChannelKind {
    pub fn from_token(token: &str) -> Option<ChannelKind> {
        TOKENS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, kind)| *kind)
    }

    pub fn token(self) -> &'static str {
        TOKENS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }

    /// Exclusive upper bound of the index on a card with `nchan` channels
    pub fn limit(self, nchan: u16) -> u16 {
        match self {
            ChannelKind::Csr | ChannelKind::Acr => REGISTER_BITS,
            ChannelKind::Io => IO_WORDS,
            ChannelKind::Id => ID_WORDS,
            ChannelKind::Calibration | ChannelKind::Data => nchan,
        }
    }

    /// The fault for an index at or above `limit`
    pub(crate) fn out_of_range<E>(self, index: u16) -> Error<E> {
        match self {
            ChannelKind::Csr | ChannelKind::Acr => Error::InvalidBit(index),
            ChannelKind::Io | ChannelKind::Id => Error::InvalidOffset(index),
            ChannelKind::Calibration | ChannelKind::Data => Error::InvalidChannel(index),
        }
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self,
            ChannelKind::Csr | ChannelKind::Acr | ChannelKind::Calibration
        )
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A record link that does not parse
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("illegal link {0:?}")]
pub struct LinkError(pub String);

impl<E> From<LinkError> for Error<E> {
    fn from(err: LinkError) -> Self {
        Error::InvalidLink(err.0)
    }
}

/// A parsed record link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    /// Registered card name
    pub card: String,
    /// Channel, bit number or word offset, depending on `kind`
    pub index: u16,
    pub kind: ChannelKind,
}

impl Link {
    /// Parse `CARD:N:PARM`, where PARM is one of `CSR ACR IO ID CAL DATA`
    pub fn parse(text: &str) -> Result<Link, LinkError> {
        let invalid = || LinkError(text.to_string());
        let mut fields = text.trim().splitn(3, ':');
        let card = fields
            .next()
            .map(str::trim)
            .filter(|card| !card.is_empty())
            .ok_or_else(invalid)?;
        let index = fields
            .next()
            .and_then(|n| n.trim().parse::<u16>().ok())
            .ok_or_else(invalid)?;
        let kind = fields
            .next()
            .and_then(|parm| ChannelKind::from_token(parm.trim()))
            .ok_or_else(invalid)?;
        Ok(Link {
            card: card.to_string(),
            index,
            kind,
        })
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.card, self.index, self.kind)
    }
}

/// A link resolved against a registered card; the index is known to be in range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub card: CardHandle,
    pub kind: ChannelKind,
    pub index: u16,
}
