use crate::{
    consts::{BLOCK_SIZE_U64, REGISTER_SIZE},
    init::CardVersion,
    response::CapacityStatus,
};

use bitfield::bitfield;
use size::{
    consts::{GiB, KiB, MiB},
    Size,
};

/// Card register block (CSD or CID).
pub type RegisterData = [u8; REGISTER_SIZE];

bitfield! {
    /// Card Specific Data, version 1.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct CsdV1(u128);
    impl Debug;
    pub u8, version, _: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub read_partial_blocks, _: 79;
    pub write_block_misalignment, _: 78;
    pub read_block_misalignment, _: 77;
    pub dsr_implemented, _: 76;
    pub u16, device_size, _: 73, 62;
    pub u8, max_read_current_vdd_min, _: 61, 59;
    pub u8, max_read_current_vdd_max, _: 58, 56;
    pub u8, max_write_current_vdd_min, _: 55, 53;
    pub u8, max_write_current_vdd_max, _: 52, 50;
    pub u8, device_size_multiplier, _: 49, 47;
    pub erase_single_block_enabled, _: 46;
    pub u8, erase_sector_size, _: 45, 39;
    pub u8, write_protect_group_size, _: 38, 32;
    pub write_protect_group_enable, _: 31;
    pub u8, write_speed_factor, _: 28, 26;
    pub u8, max_write_data_length, _: 25, 22;
    pub write_partial_blocks_allowed, _: 21;
    pub file_format_group, _: 15;
    pub copy_flag, _: 14;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, file_format, _: 11, 10;
    pub u8, crc, _: 7, 1;
}

bitfield! {
    /// Card Specific Data, version 2.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct CsdV2(u128);
    impl Debug;
    pub u8, version, _: 127, 126;
    pub u8, data_read_access_time1, _: 119, 112;
    pub u8, data_read_access_time2, _: 111, 104;
    pub u8, max_data_transfer_rate, _: 103, 96;
    pub u16, card_command_classes, _: 95, 84;
    pub u8, read_block_length, _: 83, 80;
    pub read_partial_blocks, _: 79;
    pub write_block_misalignment, _: 78;
    pub read_block_misalignment, _: 77;
    pub dsr_implemented, _: 76;
    pub u32, device_size, _: 69, 48;
    pub erase_single_block_enabled, _: 46;
    pub u8, erase_sector_size, _: 45, 39;
    pub u8, write_protect_group_size, _: 38, 32;
    pub write_protect_group_enable, _: 31;
    pub u8, write_speed_factor, _: 28, 26;
    pub u8, max_write_data_length, _: 25, 22;
    pub write_partial_blocks_allowed, _: 21;
    pub file_format_group, _: 15;
    pub copy_flag, _: 14;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, file_format, _: 11, 10;
    pub u8, crc, _: 7, 1;
}

/// Card Specific Data, generic container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

/// Represents capacity provider.
pub trait CapacityProvider {
    /// Returns the card capacity in bytes.
    fn card_capacity(&self) -> Size {
        Size::from_bytes(self.card_capacity_blocks() * BLOCK_SIZE_U64)
    }

    /// Returns the card capacity in 512-byte blocks.
    fn card_capacity_blocks(&self) -> u64;
}

impl From<RegisterData> for CsdV1 {
    fn from(data: RegisterData) -> Self {
        CsdV1(u128::from_be_bytes(data))
    }
}

impl From<RegisterData> for CsdV2 {
    fn from(data: RegisterData) -> Self {
        CsdV2(u128::from_be_bytes(data))
    }
}

impl From<RegisterData> for Csd {
    /// CSD structure 1 is the SDHC/SDXC layout, every other structure (SD 1.0, MMC) carries
    /// C_SIZE/C_SIZE_MULT.
    fn from(data: RegisterData) -> Self {
        let csd = CsdV1::from(data);
        match csd.version() {
            1 => Csd::V2(CsdV2::from(data)),
            _ => Csd::V1(csd),
        }
    }
}

impl CapacityProvider for CsdV1 {
    fn card_capacity_blocks(&self) -> u64 {
        let shift = u32::from(self.device_size_multiplier()) + u32::from(self.read_block_length())
            + 2;
        ((u64::from(self.device_size()) + 1) << shift) / BLOCK_SIZE_U64
    }
}

impl CapacityProvider for CsdV2 {
    fn card_capacity_blocks(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * (KiB as u64)
    }
}

impl CapacityProvider for Csd {
    fn card_capacity_blocks(&self) -> u64 {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }
}

bitfield! {
    /// Card Identification register.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Cid(u128);
    impl Debug;
    pub u8, manufacturer_id, _: 127, 120;
    pub u16, oem_id, _: 119, 104;
    pub u64, product_name_raw, _: 103, 64;
    pub u8, product_revision, _: 63, 56;
    pub u32, serial_number, _: 55, 24;
    pub u16, manufacturing_date, _: 19, 8;
    pub u8, crc, _: 7, 1;
}

impl From<RegisterData> for Cid {
    fn from(data: RegisterData) -> Self {
        Cid(u128::from_be_bytes(data))
    }
}

impl Cid {
    /// Five ASCII characters of the product name.
    pub fn product_name(&self) -> [u8; 5] {
        let raw = self.product_name_raw().to_be_bytes();
        [raw[3], raw[4], raw[5], raw[6], raw[7]]
    }

    /// Manufacturing year and month.
    pub fn manufacturing_year_month(&self) -> (u16, u8) {
        let date = self.manufacturing_date();
        (2000 + (date >> 4), (date & 0x0F) as u8)
    }
}

/// Capacity type reported by [`CardInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CapacityType {
    /// SDSC, SD v1 and MMC.
    Standard,
    /// SDHC, up to 32 GiB.
    High,
    /// SDXC.
    Extended,
}

/// Card meta information.
#[derive(Debug, Clone)]
pub struct CardInfo {
    pub version: CardVersion,
    pub capacity_type: CapacityType,
    pub capacity: Size,
    pub capacity_blocks: u64,
}

impl CardInfo {
    /// Build card info from bring-up results and the CSD register.
    pub fn new(version: CardVersion, capacity_status: CapacityStatus, csd: &Csd) -> Self {
        let capacity = csd.card_capacity();
        let capacity_type = match capacity_status {
            CapacityStatus::Sdsc => CapacityType::Standard,
            CapacityStatus::SdhcSdxc if capacity.bytes() > 32 * GiB => CapacityType::Extended,
            CapacityStatus::SdhcSdxc => CapacityType::High,
        };

        CardInfo {
            version,
            capacity_type,
            capacity,
            capacity_blocks: csd.card_capacity_blocks(),
        }
    }

    /// Capacity in MiB.
    pub fn capacity_mb(&self) -> u64 {
        self.capacity_blocks * BLOCK_SIZE_U64 / (MiB as u64)
    }
}
