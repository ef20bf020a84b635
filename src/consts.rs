/// Block payload unit, bytes.
pub const BLOCK_SIZE: usize = 512;

/// Block size as u32, used for address conversion and CMD16.
pub const BLOCK_SIZE_U32: u32 = BLOCK_SIZE as u32;

/// Block size as u64, used for capacity calculation.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// Size of a command frame on the wire.
pub const FRAME_SIZE: usize = 6;

/// Size of a CSD/CID register payload.
pub const REGISTER_SIZE: usize = 16;

/// Size of a data packet CRC trailer.
pub const DATA_CRC_SIZE: usize = 2;

pub mod commands {
    /// Transmission bits of the command byte (start bit 0, transmission bit 1).
    pub const CMD_BASE: u8 = 0x40;
    /// Mask of the command index inside the command byte.
    pub const CMD_INDEX_MASK: u8 = 0x3F;
    /// GO_IDLE_STATE - software reset, enters SPI mode if CS is asserted.
    pub const CMD0: u8 = 0;
    /// SEND_OP_COND - MMC initialization process.
    pub const CMD1: u8 = 1;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = 8;
    /// SEND_CSD - read the Card Specific Data (CSD register).
    pub const CMD9: u8 = 9;
    /// SEND_CID - read the Card Identification register.
    pub const CMD10: u8 = 10;
    /// STOP_TRANSMISSION - end multiple block read sequence.
    pub const CMD12: u8 = 12;
    /// SET_BLOCKLEN - change R/W block size.
    pub const CMD16: u8 = 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = 17;
    /// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card.
    pub const CMD18: u8 = 18;
    /// SET_WR_BLOCK_ERASE_COUNT when preceded by APP_CMD.
    pub const CMD23: u8 = 23;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = 24;
    /// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRAN token.
    pub const CMD25: u8 = 25;
    /// SD_SEND_OP_COND when preceded by APP_CMD.
    pub const CMD41: u8 = 41;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = 55;
    /// READ_OCR - read the OCR register of a card.
    pub const CMD58: u8 = 58;
}

pub mod args {
    /// CMD8 check pattern.
    pub const CHECK_PATTERN: u8 = 0xAA;
    /// CMD8 voltage host supply (2.7-3.6V) bit.
    pub const VHS_BIT: u32 = 1 << 8;
    /// ACMD41 host capacity support bit.
    pub const HCS_BIT: u32 = 1 << 30;
    /// ACMD23 block count mask.
    pub const BLOCK_COUNT_MASK: u32 = 0xFFFF;
}

pub mod tokens {
    /// Value of an idle MISO line, also clocked out while receiving.
    pub const IDLE: u8 = 0xFF;
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Stop token for write multiple blocks.
    pub const STOP_TRAN: u8 = 0xFD;
    /// Start data token for write multiple blocks.
    pub const WRITE_MULTIPLE: u8 = 0xFC;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
    /// Write data rejected due to a CRC error.
    pub const DATA_RES_CRC_ERROR: u8 = 0x0B;
    /// Write data rejected due to a write error.
    pub const DATA_RES_WRITE_ERROR: u8 = 0x0D;
}
