use crate::{
    consts::{
        args::{BLOCK_COUNT_MASK, CHECK_PATTERN, HCS_BIT, VHS_BIT},
        commands::*,
        FRAME_SIZE,
    },
    crc::crc7,
    error::CodecError,
    response::ResponseKind,
};

/// Host capacity support advertised with ACMD41.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hcs {
    /// Standard capacity host, SD v1 cards.
    Sdsc,
    /// Host supports SDHC/SDXC block addressing.
    SdhcSdxc,
}

/// Command request, one variant per supported command index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// CMD0.
    GoIdleState,
    /// CMD1.
    SendOpCond,
    /// CMD8.
    SendIfCond { vhs: bool },
    /// CMD9.
    SendCsd,
    /// CMD10.
    SendCid,
    /// CMD12.
    StopTransmission,
    /// CMD16.
    SetBlockLen { block_length: u32 },
    /// CMD17.
    ReadSingleBlock { address: u32 },
    /// CMD18.
    ReadMultipleBlock { address: u32 },
    /// CMD23, sent as ACMD23.
    SetBlockCount { blocks: u16 },
    /// CMD24.
    WriteBlock { address: u32 },
    /// CMD25.
    WriteMultipleBlock { address: u32 },
    /// CMD41, sent as ACMD41.
    AppSendOpCond { hcs: Hcs },
    /// CMD55.
    AppCmd,
    /// CMD58.
    ReadOcr,
}

impl Command {
    /// Command index.
    pub const fn index(&self) -> u8 {
        match self {
            Command::GoIdleState => CMD0,
            Command::SendOpCond => CMD1,
            Command::SendIfCond { .. } => CMD8,
            Command::SendCsd => CMD9,
            Command::SendCid => CMD10,
            Command::StopTransmission => CMD12,
            Command::SetBlockLen { .. } => CMD16,
            Command::ReadSingleBlock { .. } => CMD17,
            Command::ReadMultipleBlock { .. } => CMD18,
            Command::SetBlockCount { .. } => CMD23,
            Command::WriteBlock { .. } => CMD24,
            Command::WriteMultipleBlock { .. } => CMD25,
            Command::AppSendOpCond { .. } => CMD41,
            Command::AppCmd => CMD55,
            Command::ReadOcr => CMD58,
        }
    }

    /// Response format the card answers this command with.
    pub const fn response_kind(&self) -> ResponseKind {
        match self {
            Command::SendIfCond { .. } => ResponseKind::R7,
            Command::StopTransmission => ResponseKind::R1b,
            Command::ReadOcr => ResponseKind::R3,
            _ => ResponseKind::R1,
        }
    }

    /// 32-bit argument.
    pub fn argument(&self) -> u32 {
        match *self {
            Command::SendIfCond { vhs } => {
                let arg = u32::from(CHECK_PATTERN);
                if vhs {
                    arg | VHS_BIT
                } else {
                    arg
                }
            }
            Command::AppSendOpCond { hcs: Hcs::SdhcSdxc } => HCS_BIT,
            Command::SetBlockLen { block_length } => block_length,
            Command::ReadSingleBlock { address }
            | Command::ReadMultipleBlock { address }
            | Command::WriteBlock { address }
            | Command::WriteMultipleBlock { address } => address,
            Command::SetBlockCount { blocks } => u32::from(blocks),
            _ => 0x0000_0000,
        }
    }

    /// Builds a request from a raw index and argument.
    ///
    /// Fails only for an index outside the supported table.
    pub fn from_raw(index: u8, argument: u32) -> Result<Self, CodecError> {
        Ok(match index {
            CMD0 => Command::GoIdleState,
            CMD1 => Command::SendOpCond,
            CMD8 => Command::SendIfCond {
                vhs: argument & VHS_BIT != 0,
            },
            CMD9 => Command::SendCsd,
            CMD10 => Command::SendCid,
            CMD12 => Command::StopTransmission,
            CMD16 => Command::SetBlockLen {
                block_length: argument,
            },
            CMD17 => Command::ReadSingleBlock { address: argument },
            CMD18 => Command::ReadMultipleBlock { address: argument },
            CMD23 => Command::SetBlockCount {
                blocks: (argument & BLOCK_COUNT_MASK) as u16,
            },
            CMD24 => Command::WriteBlock { address: argument },
            CMD25 => Command::WriteMultipleBlock { address: argument },
            CMD41 => Command::AppSendOpCond {
                hcs: if argument & HCS_BIT != 0 {
                    Hcs::SdhcSdxc
                } else {
                    Hcs::Sdsc
                },
            },
            CMD55 => Command::AppCmd,
            CMD58 => Command::ReadOcr,
            index => return Err(CodecError::UnsupportedCommand(index)),
        })
    }

    /// Serialize into the 6-byte wire frame.
    pub fn encode(&self) -> Frame {
        let arg = self.argument();
        let mut buf = [
            CMD_BASE | self.index(),
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            0,
        ];
        let crc_index = buf.len() - 1;

        buf[crc_index] = (crc7(&buf[..crc_index]) << 1) | 0x01;

        Frame(buf)
    }
}

/// Encode a raw command index and argument.
pub fn encode(index: u8, argument: u32) -> Result<Frame, CodecError> {
    Command::from_raw(index, argument).map(|command| command.encode())
}

/// Command frame: command byte, big-endian argument, CRC7 byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_SIZE]);

impl Frame {
    /// Wrap raw frame bytes.
    pub fn from_bytes(bytes: [u8; FRAME_SIZE]) -> Self {
        Frame(bytes)
    }

    /// Bytes to send on the bus.
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }

    /// Command index without the start and transmission bits.
    pub fn index(&self) -> u8 {
        self.0[0] & CMD_INDEX_MASK
    }

    /// Argument carried in the frame.
    pub fn argument(&self) -> u32 {
        u32::from_be_bytes([self.0[1], self.0[2], self.0[3], self.0[4]])
    }

    /// The 7-bit CRC carried in the last byte.
    pub fn crc(&self) -> u8 {
        self.0[FRAME_SIZE - 1] >> 1
    }

    /// Transmission bits, end bit and CRC7 are all consistent.
    pub fn is_valid(&self) -> bool {
        self.0[0] & !CMD_INDEX_MASK == CMD_BASE
            && self.0[FRAME_SIZE - 1] & 0x01 == 0x01
            && crc7(&self.0[..FRAME_SIZE - 1]) == self.crc()
    }
}
