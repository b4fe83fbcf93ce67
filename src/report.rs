//! Text reports of registered cards.
//!
//! | Level | Adds |
//! |------:|:-----|
//! | 0 | identity and location |
//! | 1 | channel count, mode, data format, CSR/ACR/vector, init status |
//! | 2 | last conversion of every channel |
//! | 3 | calibration table |

use super::*;
use core::fmt::{self, Debug};

const SCALES: [[&str; NUM_CAL_POINTS]; 2] = [
    ["-10V", "-5V", "0V", "+5V", "+10V"],
    ["-5V", "-2.5V", "0V", "+2.5V", "+5V"],
];

fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Standby => "Standby",
        Mode::Normal => "Normal",
    }
}

fn format_label(format: Format) -> &'static str {
    match format {
        Format::TwosComplement => "Two's Complement",
        Format::OffsetBinary => "Offset Binary",
    }
}

fn range_label(range: Range) -> &'static str {
    match range {
        Range::Bipolar10V => "+/-10V",
        Range::Bipolar5V => "+/-5V",
    }
}

fn type_label(cal_type: CalibrationType) -> &'static str {
    match cal_type {
        CalibrationType::None => "No Calibration",
        CalibrationType::ThreePoint => "3-Point",
        CalibrationType::FivePoint => "5-Point",
    }
}

/// Registers shown from level 1
#[derive(Clone, Copy, Debug)]
struct Registers {
    config: Config,
    csr: u16,
    acr: u16,
    vector: u16,
}

/// Snapshot of one card, displayed at the level it was taken for
#[derive(Clone, Debug)]
pub struct CardReport {
    name: String,
    location: (u16, u16),
    identity: Identity,
    nchan: u16,
    calibration_fault: Option<String>,
    registers: Option<Registers>,
    data: Option<[u16; NUM_CHANNELS]>,
    table: Option<CalibrationTable>,
}

impl<C, E> Registry<C>
where
    C: Carrier,
    C::Bus: RegisterBus<Error = E>,
    E: Debug,
{
    /// Card count, and from level 1 one line per card
    pub fn report(&self, level: u8) -> String {
        let mut lines = vec![format!("Card List: cnt is {}", self.len())];
        if level >= 1 {
            lines.extend(self.cards().map(|(_, card)| {
                let (carrier, slot) = card.location();
                format!(
                    "IP-ADC-{:x}:  carrier {}  slot {}  name: {}",
                    card.identity().model,
                    carrier,
                    slot,
                    card.name()
                )
            }));
        }
        lines.join("\n")
    }

    /// Take a snapshot of a card; registers are only read for levels that show them
    pub fn card_report(&self, handle: CardHandle, level: u8) -> Result<CardReport, Error<E>> {
        let card = self.card(handle)?;
        let mut report = CardReport {
            name: card.name().to_string(),
            location: card.location(),
            identity: card.identity(),
            nchan: card.nchan(),
            calibration_fault: card.calibration_fault(),
            registers: None,
            data: None,
            table: None,
        };
        if level == 0 {
            return Ok(report);
        }

        let mut state = card.lock();
        report.registers = Some(Registers {
            config: state.hw.read_config()?,
            csr: state.hw.read_csr()?,
            acr: state.hw.read_acr()?,
            vector: state.hw.read_io_word(Register::Vector as u16)?,
        });
        if level >= 2 {
            report.data = Some(state.hw.read_channels()?);
        }
        if level >= 3 {
            report.table = Some(state.table.clone());
        }
        Ok(report)
    }
}

impl fmt::Display for CardReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (carrier, slot) = self.location;
        write!(
            f,
            "\tModel Id={:x}  Serial No={}  Rev: {}  Card={} is installed on carrier {} slot {}",
            self.identity.model,
            self.identity.serial_no,
            self.identity.revision,
            self.name,
            carrier,
            slot
        )?;

        let regs = match self.registers {
            Some(regs) => regs,
            None => return Ok(()),
        };
        write!(
            f,
            "\n\tIn total {} channels\tOperating Mode: {}\tData Format: {}",
            self.nchan,
            mode_label(regs.config.mode),
            format_label(regs.config.format)
        )?;
        write!(
            f,
            "\n\tcsr: {:#x}  acr: {:#x}  vec: {:#x}",
            regs.csr, regs.acr, regs.vector
        )?;
        match &self.calibration_fault {
            None => write!(f, "\n\tInitialized Successfully")?,
            Some(fault) => write!(f, "\n\tInitialized, calibration data not loaded: {}", fault)?,
        }

        if let Some(data) = &self.data {
            write!(f, "\n\tADC Data:")?;
            for (chan, word) in data.iter().enumerate() {
                if chan % (NUM_CHANNELS / 2) == 0 {
                    writeln!(f)?;
                }
                write!(f, "\tch{:02}={:#06x}", chan, word)?;
            }
        }

        if let Some(table) = &self.table {
            let range = table.range().unwrap_or(regs.config.range);
            let format = regs.config.format;
            write!(f, "\n\n\tVoltage Range: {}", range_label(regs.config.range))?;
            write!(f, "\n\tCalibration Type: {}", type_label(table.cal_type()))?;
            if range != regs.config.range {
                write!(
                    f,
                    "\n\tCalibration data is for the {} range, not in use",
                    range_label(range)
                )?;
            }
            write!(f, "\n\tCalibration Data Format: {}", format_label(format))?;
            write!(f, "\n\tCalibration Data:")?;
            if table.is_available() {
                write!(f, "\n\t      ")?;
                for scale in SCALES[range as usize].iter() {
                    write!(f, "\t{}", scale)?;
                }
                write!(f, "\tCalibration Data")?;
                for (chan, cal) in table.channels().iter().enumerate() {
                    write!(f, "\n\tCh: {}", chan)?;
                    for word in cal.gain(format).iter() {
                        write!(f, "\t{:#x}", word)?;
                    }
                    let usage = if cal.enabled && range == regs.config.range {
                        "In-Use"
                    } else {
                        "NOT In-Use"
                    };
                    write!(f, "\tCalibration data {}", usage)?;
                }
            }
        }
        Ok(())
    }
}
