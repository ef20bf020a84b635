use crate::{
    consts::args::{CHECK_PATTERN, VHS_BIT},
    error::CodecError,
};

use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct R1(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
}

impl R1 {
    /// The seven defined flag bits.
    pub const MASK: u8 = 0x7F;
    /// No flags, the card is ready.
    pub const READY_STATE: R1 = R1(0x00);
    /// Only the idle flag.
    pub const IN_IDLE_STATE: R1 = R1(0x01);
    /// Only the illegal command flag.
    pub const ILLEGAL_COMMAND: R1 = R1(0x04);
    /// Idle and illegal command, the reply of SD v1 and MMC cards to CMD8.
    pub const IN_IDLE_AND_ILLEGAL: R1 = R1(0x05);

    /// Build from a raw response byte, dropping the start bit.
    pub fn from_byte(byte: u8) -> Self {
        R1(byte & Self::MASK)
    }

    /// Raw flag bits.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

bitfield! {
    /// Operation Conditions Register, carried by R3.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct Ocr(u32);
    impl Debug;
    pub u16, voltage_window, _: 23, 15;
    pub switch_to_1v8_accepted, _: 24;
    pub uhs2_card_status, _: 29;
    pub card_capacity_status_bit, _: 30;
    pub power_up_done, _: 31;
}

/// Response format, fixed per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    R1,
    R1b,
    R3,
    R7,
}

impl ResponseKind {
    /// Size on the wire, including the R1 byte.
    pub const fn size(&self) -> usize {
        match self {
            ResponseKind::R1 | ResponseKind::R1b => 1,
            ResponseKind::R3 | ResponseKind::R7 => 5,
        }
    }
}

/// Supported VDD window reported in the OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum VddVoltage {
    V27_28,
    V28_29,
    V29_30,
    V30_31,
    V31_32,
    V32_33,
    V33_34,
    V34_35,
    V35_36,
}

impl VddVoltage {
    const ASCENDING: [VddVoltage; 9] = [
        VddVoltage::V27_28,
        VddVoltage::V28_29,
        VddVoltage::V29_30,
        VddVoltage::V30_31,
        VddVoltage::V31_32,
        VddVoltage::V32_33,
        VddVoltage::V33_34,
        VddVoltage::V34_35,
        VddVoltage::V35_36,
    ];

    /// Lowest range whose bit is set in a 9-bit OCR window (bit 0 = 2.7-2.8V).
    pub fn lowest(window: u16) -> Option<Self> {
        Self::ASCENDING
            .iter()
            .enumerate()
            .find(|(bit, _)| window & (1 << bit) != 0)
            .map(|(_, voltage)| *voltage)
    }
}

/// Card capacity status (CCS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CapacityStatus {
    /// Byte addressed, block length set by CMD16.
    Sdsc,
    /// Block addressed, block length fixed to 512 bytes.
    SdhcSdxc,
}

impl Ocr {
    /// Capacity class from the CCS bit.
    pub fn card_capacity_status(&self) -> CapacityStatus {
        if self.card_capacity_status_bit() {
            CapacityStatus::SdhcSdxc
        } else {
            CapacityStatus::Sdsc
        }
    }

    pub fn vdd_voltage(&self) -> Option<VddVoltage> {
        VddVoltage::lowest(self.voltage_window())
    }
}

/// R7 payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfCond {
    /// Echo of the check pattern.
    pub pattern: u8,
    /// The card accepted the supplied voltage range.
    pub voltage_accepted: bool,
}

/// Typed payload, present only for R3/R7 replies to accepted commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    None,
    IfCond(IfCond),
    Ocr(Ocr),
}

/// Decoded command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub r1: R1,
    pub payload: Payload,
}

impl Response {
    /// CMD8 echo, for R7 responses.
    pub fn if_cond(&self) -> Option<IfCond> {
        match self.payload {
            Payload::IfCond(if_cond) => Some(if_cond),
            _ => None,
        }
    }

    /// Operating conditions, for R3 responses.
    pub fn ocr(&self) -> Option<Ocr> {
        match self.payload {
            Payload::Ocr(ocr) => Some(ocr),
            _ => None,
        }
    }
}

/// Decode a response frame of the given kind.
pub fn decode(bytes: &[u8], kind: ResponseKind) -> Result<Response, CodecError> {
    if bytes.len() < kind.size() {
        return Err(CodecError::ShortResponse(bytes.len()));
    }

    let r1 = R1::from_byte(bytes[0]);

    if kind.size() == 1 {
        return Ok(Response {
            r1,
            payload: Payload::None,
        });
    }

    let tail = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

    let payload = match kind {
        ResponseKind::R3 => Payload::Ocr(Ocr(tail)),
        ResponseKind::R7 => {
            let pattern = tail as u8;
            if pattern != CHECK_PATTERN {
                return Err(CodecError::PatternMismatch(pattern));
            }
            Payload::IfCond(IfCond {
                pattern,
                voltage_accepted: tail & VHS_BIT != 0,
            })
        }
        ResponseKind::R1 | ResponseKind::R1b => Payload::None,
    };

    Ok(Response { r1, payload })
}
