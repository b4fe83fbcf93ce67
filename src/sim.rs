//! In-memory model of an IP-ADC-8413 and its carrier, for tests.

use super::*;
use bit_field::BitField;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimError;

#[derive(Clone, Debug)]
pub struct SimModule {
    io: [u16; IO_WORDS as usize],
    id: [[u16; ID_WORDS as usize]; MAX_PAGE as usize + 1],
    stuck_low: u16,
    fail: bool,
    writes: usize,
}

impl SimModule {
    /// An IP-ADC-8413 without calibration data, in standby
    pub fn new() -> Self {
        let mut module = SimModule {
            io: [0; IO_WORDS as usize],
            id: [[0; ID_WORDS as usize]; MAX_PAGE as usize + 1],
            stuck_low: 0,
            fail: false,
            writes: 0,
        };
        module.id[0][0] = 0x5649;
        module.id[0][1] = 0x5441;
        module.id[0][2] = 0x3420;
        module.set_identity(HYTEC_IP8413_MODEL, 1, 1);
        module
    }

    pub fn set_identity(&mut self, model: u16, serial_no: u16, revision: u16) {
        self.id[0][0x05] = model;
        self.id[0][0x06] = revision;
        self.id[0][0x0D] = serial_no;
    }

    pub fn set_id_word(&mut self, page: usize, offset: u16, value: u16) {
        self.id[page][usize::from(offset)] = value;
    }

    pub fn set_calibration_type(&mut self, cal_type: u16) {
        self.id[0][0x0C] = cal_type;
    }

    pub fn set_calibration(&mut self, range: Range, chan: u16, words: [u16; NUM_CAL_POINTS]) {
        let first_page = match range {
            Range::Bipolar10V => 1,
            Range::Bipolar5V => 4,
        };
        let page = first_page + usize::from(chan / 6);
        let base = usize::from(0x10 + (chan % 6) * NUM_CAL_POINTS as u16);
        self.id[page][base..base + NUM_CAL_POINTS].copy_from_slice(&words);
    }

    pub fn set_channel(&mut self, chan: u16, value: u16) {
        self.io[usize::from(Register::Data as u16 + chan)] = value;
    }

    pub fn set_references(&mut self, zero: u16, half_scale: u16) {
        self.io[Register::Reference0V as usize] = zero;
        self.io[Register::Reference2V5 as usize] = half_scale;
    }

    pub fn set_acr(&mut self, value: u16) {
        self.io[Register::Acr as usize] = value & !self.stuck_low;
    }

    pub fn acr(&self) -> u16 {
        self.io[Register::Acr as usize]
    }

    pub fn csr(&self) -> u16 {
        self.io[Register::Csr as usize]
    }

    /// Bits of the ACR that read back as 0 whatever is written
    pub fn stick_acr_low(&mut self, mask: u16) {
        self.stuck_low = mask;
    }

    pub fn fail_bus(&mut self, fail: bool) {
        self.fail = fail;
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl RegisterBus for SimModule {
    type Error = SimError;

    fn read_word(&mut self, space: Space, offset: u16) -> Result<u16, SimError> {
        if self.fail {
            return Err(SimError);
        }
        match space {
            Space::Io => self.io.get(usize::from(offset)).copied().ok_or(SimError),
            Space::Id => {
                let page = usize::from(self.acr().get_bits(acr::PAGE));
                self.id
                    .get(page)
                    .and_then(|words| words.get(usize::from(offset)))
                    .copied()
                    .ok_or(SimError)
            }
        }
    }

    fn write_word(&mut self, space: Space, offset: u16, value: u16) -> Result<(), SimError> {
        if self.fail || space == Space::Id {
            return Err(SimError);
        }
        self.writes += 1;
        match offset {
            o if o == Register::Acr as u16 => self.set_acr(value),
            o if o == Register::ClockRate as u16 => self.io[usize::from(o)] = value & 0x000F,
            o => *self.io.get_mut(usize::from(o)).ok_or(SimError)? = value,
        }
        Ok(())
    }
}

pub type SharedModule = Arc<Mutex<SimModule>>;

impl RegisterBus for SharedModule {
    type Error = SimError;

    fn read_word(&mut self, space: Space, offset: u16) -> Result<u16, SimError> {
        self.lock().unwrap().read_word(space, offset)
    }

    fn write_word(&mut self, space: Space, offset: u16, value: u16) -> Result<(), SimError> {
        self.lock().unwrap().write_word(space, offset, value)
    }
}

/// A carrier with up to 4 slots per carrier index
#[derive(Default)]
pub struct SimCarrier {
    modules: Vec<((u16, u16), SharedModule)>,
}

impl SimCarrier {
    pub fn new() -> Self {
        SimCarrier::default()
    }

    pub fn install(&mut self, carrier: u16, slot: u16, module: SimModule) -> SharedModule {
        let shared = Arc::new(Mutex::new(module));
        self.modules.push(((carrier, slot), shared.clone()));
        shared
    }
}

impl Carrier for SimCarrier {
    type Bus = SharedModule;

    fn module(&mut self, carrier: u16, slot: u16) -> Result<SharedModule, ProbeError> {
        if slot > 3 {
            return Err(ProbeError::BadAddress);
        }
        self.modules
            .iter()
            .find(|(location, _)| *location == (carrier, slot))
            .map(|(_, module)| module.clone())
            .ok_or(ProbeError::NoModule)
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
