//! SD/MMC SPI-mode protocol core written in Embedded Rust, inspired by [embedded-sdmmc](https://crates.io/crates/embedded-sdmmc).
//!
//! This crate brings up SD v1, SD v2+ (SDSC/SDHC/SDXC) and MMC cards over any byte transport
//! implementing [`Transport`] and gives block access to them, directly or through
//! [`DiskioDevice`].

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod block;
mod command;
mod config;
mod consts;
mod crc;
mod csd;
mod error;
mod init;
mod response;
mod trace;
mod transaction;
mod transport;

#[cfg(test)]
mod testutils;

pub use crate::{
    command::{encode, Command, Frame, Hcs},
    config::{DefaultSdSpiConfig, SdSpiConfig},
    consts::BLOCK_SIZE,
    crc::{crc16, crc7},
    csd::{CapacityProvider, CapacityType, CardInfo, Cid, Csd, CsdV1, CsdV2, RegisterData},
    error::{CodecError, Error},
    init::CardVersion,
    response::{
        decode, CapacityStatus, IfCond, Ocr, Payload, Response, ResponseKind, VddVoltage, R1,
    },
    trace::{Phase, Trace, TraceCode},
    transport::{BusClock, SpiTransport, SpiTransportError, Transport},
};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};

use crate::{
    consts::BLOCK_SIZE_U32,
    init::CardProperties,
    transaction::Engine,
};

use core::{
    cell::RefCell,
    marker::PhantomData,
};

/// Card session over a [`Transport`].
///
/// `T` - transport.
/// `C` - config implementation of driver config trait.
pub struct SdSpi<T: Transport, C: SdSpiConfig = DefaultSdSpiConfig> {
    transport: RefCell<T>,
    trace: RefCell<Trace>,
    status: Status,
    card: Option<CardProperties>,
    block_size: usize,
    config: PhantomData<C>,
}

impl<T: Transport, C: SdSpiConfig> SdSpi<T, C> {
    /// Creates a new [`SdSpi<T, C>`]. The card is not touched until [`init`](SdSpi::init).
    ///
    /// `transport` - transport capability set.
    pub fn new(mut transport: T) -> Self {
        let trace = match transport.allocate_scratch(C::TRACE_DEPTH) {
            Some(ring) => Trace::with_ring(ring),
            None => Trace::new(),
        };

        SdSpi {
            transport: RefCell::new(transport),
            trace: RefCell::new(trace),
            status: StatusFlag::NotInitialized.into(),
            card: None,
            block_size: BLOCK_SIZE,
            config: PhantomData::<C>,
        }
    }

    /// Releases the transport.
    pub fn free(self) -> T {
        self.transport.into_inner()
    }

    /// Run bring-up. On success the session is ready and the bus runs at the fast clock.
    pub fn init(&mut self) -> Result<(), Error<T::Error>> {
        info!("SD initialize started");

        self.card = None;
        self.status = StatusFlag::NotInitialized.into();

        let result = self.with_engine(|engine| {
            let card = engine.bring_up()?;
            engine.set_clock(true)?;
            Ok(card)
        });

        match result {
            Ok(card) => {
                info!(
                    "SD successfully initialized, version: {:?}, capacity: {:?}",
                    card.version, card.capacity
                );
                self.card = Some(card);
                self.block_size = BLOCK_SIZE;
                self.status = Status::default();
                Ok(())
            }
            Err(err) => {
                error!("Failed to initialize SD: {:?}", dbg_fmt!(&err));
                self.status = StatusFlag::ErrorOccured | StatusFlag::NotInitialized;
                Err(err)
            }
        }
    }

    fn with_engine<R, F>(&self, f: F) -> Result<R, Error<T::Error>>
    where
        F: FnOnce(&mut Engine<'_, T, C>) -> Result<R, Error<T::Error>>,
    {
        let mut transport = self.transport.borrow_mut();
        let mut trace = self.trace.borrow_mut();

        f(&mut Engine::new(&mut *transport, &mut *trace))
    }

    fn ready_card(&self) -> Result<CardProperties, Error<T::Error>> {
        self.card.ok_or(Error::NotInitialized)
    }

    /// Validate buffer for read/write.
    fn validate_buffer_len(buf_len: usize) -> Result<(), Error<T::Error>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(Error::InvalidBuffer(buf_len))
        } else {
            Ok(())
        }
    }

    /// Bring-up completed and no reset happened since.
    pub fn is_ready(&self) -> bool {
        self.card.is_some()
    }

    /// Card version detected by bring-up.
    pub fn card_version(&self) -> Option<CardVersion> {
        self.card.map(|card| card.version)
    }

    /// Capacity class reported in the OCR.
    pub fn capacity_status(&self) -> Option<CapacityStatus> {
        self.card.map(|card| card.capacity)
    }

    /// Logical block size, bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Address sent to the card for logical block `block`.
    pub fn card_address(&self, block: u32) -> Result<u32, Error<T::Error>> {
        match self.ready_card()?.capacity {
            CapacityStatus::SdhcSdxc => Ok(block),
            CapacityStatus::Sdsc => block
                .checked_mul(BLOCK_SIZE_U32)
                .ok_or(Error::AddressOverflow(block)),
        }
    }

    /// Read `buf.len() / 512` blocks starting at logical block `block`.
    pub fn read_blocks(&self, block: u32, buf: &mut [u8]) -> Result<(), Error<T::Error>> {
        Self::validate_buffer_len(buf.len())?;
        let address = self.card_address(block)?;

        self.with_engine(|engine| engine.read_blocks(address, buf))
            .map_err(|err| {
                error!("SD read at block {} failed: {:?}", block, dbg_fmt!(&err));
                err
            })
    }

    /// Write `buf.len() / 512` blocks starting at logical block `block`.
    pub fn write_blocks(&self, block: u32, buf: &[u8]) -> Result<(), Error<T::Error>> {
        Self::validate_buffer_len(buf.len())?;
        let address = self.card_address(block)?;

        self.with_engine(|engine| engine.write_blocks(address, buf))
            .map_err(|err| {
                error!("SD write at block {} failed: {:?}", block, dbg_fmt!(&err));
                err
            })
    }

    /// Wait until the card is not busy.
    pub fn sync(&self) -> Result<(), Error<T::Error>> {
        self.ready_card()?;
        self.with_engine(|engine| engine.sync())
    }

    /// Read the Card Specific Data register.
    pub fn read_csd(&self) -> Result<Csd, Error<T::Error>> {
        self.ready_card()?;
        self.with_engine(|engine| engine.read_register(Command::SendCsd))
            .map(Csd::from)
    }

    /// Read the Card Identification register.
    pub fn read_cid(&self) -> Result<Cid, Error<T::Error>> {
        self.ready_card()?;
        self.with_engine(|engine| engine.read_register(Command::SendCid))
            .map(Cid::from)
    }

    /// Version, capacity type and capacity of the card.
    pub fn card_info(&self) -> Result<CardInfo, Error<T::Error>> {
        let card = self.ready_card()?;
        let csd = self.read_csd()?;

        Ok(CardInfo::new(card.version, card.capacity, &csd))
    }

    /// Execute a single command by raw index, deasserting CS afterwards.
    pub fn send_command(&self, index: u8, argument: u32) -> Result<Response, Error<T::Error>> {
        self.with_engine(|engine| engine.execute_raw(index, argument, false))
    }

    /// Last internal status code.
    pub fn last_trace(&self) -> Option<TraceCode> {
        self.trace.borrow().last()
    }

    /// Phase in which the last failed transaction stopped.
    pub fn failed_phase(&self) -> Option<Phase> {
        self.trace.borrow().failed_phase()
    }

    /// Copy recent codes, oldest first, into `out`. Returns the number of codes written.
    pub fn trace_history(&self, out: &mut [TraceCode]) -> usize {
        self.trace.borrow().copy_history(out)
    }

    fn diskio_error(err: Error<T::Error>) -> DiskioError<Error<T::Error>> {
        match err {
            Error::InvalidBuffer(_) | Error::AddressOverflow(_) => DiskioError::InvalidArgument,
            Error::NotInitialized => DiskioError::NotInitialized,
            err => DiskioError::Hardware(err),
        }
    }
}

impl<T: Transport, C: SdSpiConfig> DiskioDevice for SdSpi<T, C> {
    type HardwareError = Error<T::Error>;

    fn status(&self) -> Status {
        self.status
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.status = StatusFlag::NotInitialized.into();
        self.card = None;
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if !self.status.contains(StatusFlag::NotInitialized) {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        self.init().map_err(DiskioError::Hardware)
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        let block = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;

        self.read_blocks(block, buf).map_err(Self::diskio_error)
    }

    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        let block = u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)?;

        self.write_blocks(block, buf).map_err(Self::diskio_error)
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        match cmd {
            IoctlCmd::CtrlSync => self.sync().map_err(Self::diskio_error),
            IoctlCmd::GetBlockSize(block_size) => {
                *block_size = self.block_size;
                Ok(())
            }
            _ => Err(DiskioError::NotSupported),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        consts::commands,
        testutils::{CardKind, Event, MockCard, MockError, TestConfig},
    };

    type Session = SdSpi<MockCard, TestConfig>;

    fn ready(kind: CardKind) -> Session {
        let mut sd = Session::new(MockCard::new(kind));
        sd.init().unwrap();
        sd.transport.borrow_mut().clear();
        sd
    }

    #[test]
    fn sdhc_end_to_end() {
        let mut sd = Session::new(MockCard::new(CardKind::Sdhc));

        assert!(!sd.is_ready());
        sd.init().unwrap();

        assert!(sd.is_ready());
        assert_eq!(sd.block_size(), 512);
        assert_eq!(sd.card_version(), Some(CardVersion::SdV2Plus));
        assert_eq!(sd.capacity_status(), Some(CapacityStatus::SdhcSdxc));
        assert!(!sd.status().contains(StatusFlag::NotInitialized));

        let card = sd.free();
        assert_eq!(card.count(16), 0);
        assert!(card.fast);
        assert_eq!(card.events.last(), Some(&Event::Clock(true)));
    }

    #[test]
    fn init_failure_leaves_session_unusable() {
        let mut card = MockCard::new(CardKind::Sdhc);
        card.card.idle_polls = usize::MAX;
        let mut sd = Session::new(card);

        assert_eq!(sd.init(), Err(Error::RunTimeout));
        assert!(!sd.is_ready());
        assert!(sd.status().contains(StatusFlag::ErrorOccured));
        assert_eq!(
            sd.read_blocks(0, &mut [0u8; BLOCK_SIZE]),
            Err(Error::NotInitialized)
        );
        assert_eq!(sd.last_trace(), Some(TraceCode::SdV2PlusInit));
        let mut history = [TraceCode::SetIdle; 8];
        let len = sd.trace_history(&mut history);
        assert!(history[..len].contains(&TraceCode::RunTimeout));

        let card = sd.free();
        assert!(!card.cs);
        assert!(!card.fast);
    }

    #[test]
    fn invalid_buffers_are_rejected_before_io() {
        let sd = ready(CardKind::Sdhc);

        assert_eq!(sd.read_blocks(0, &mut []), Err(Error::InvalidBuffer(0)));
        assert_eq!(
            sd.write_blocks(0, &[0u8; 100]),
            Err(Error::InvalidBuffer(100))
        );
        assert!(sd.free().events.is_empty());
    }

    #[test]
    fn sdsc_addresses_are_bytes() {
        let sd = ready(CardKind::SdV1);
        let mut buf = [0u8; BLOCK_SIZE];

        sd.read_blocks(3, &mut buf).unwrap();

        assert_eq!(sd.card_address(3), Ok(3 * 512));
        assert_eq!(
            sd.card_address(0x0080_0000),
            Err(Error::AddressOverflow(0x0080_0000))
        );
        let card = sd.free();
        assert!(card.events.contains(&Event::Command(17, 3 * 512)));
        assert_eq!(buf[..], *card.card.block(3));
    }

    #[test]
    fn sdhc_addresses_are_blocks() {
        let sd = ready(CardKind::Sdhc);

        assert_eq!(sd.card_address(0x0080_0000), Ok(0x0080_0000));
    }

    #[test]
    fn multi_block_read_sequence() {
        let sd = ready(CardKind::Sdhc);
        let mut buf = [0u8; 3 * BLOCK_SIZE];

        sd.read_blocks(0, &mut buf).unwrap();

        let card = sd.free();
        assert_eq!(card.commands(), [commands::CMD18, commands::CMD12]);
        assert_eq!(&buf[..], &card.card.storage[..3 * BLOCK_SIZE]);
    }

    #[test]
    fn write_then_read_back() {
        let sd = ready(CardKind::SdscV2);
        let data: Vec<u8> = (0..2 * BLOCK_SIZE).map(|i| (i * 7) as u8).collect();
        let mut buf = vec![0u8; 2 * BLOCK_SIZE];

        sd.write_blocks(5, &data).unwrap();
        sd.read_blocks(5, &mut buf).unwrap();

        assert_eq!(buf, data);
    }

    #[test]
    fn card_registers_and_info() {
        let sd = ready(CardKind::Sdhc);

        let info = sd.card_info().unwrap();
        assert_eq!(info.version, CardVersion::SdV2Plus);
        assert_eq!(info.capacity_type, CapacityType::High);
        assert_eq!(info.capacity_blocks, 7_710_720);

        let cid = sd.read_cid().unwrap();
        assert_eq!(&cid.product_name(), b"SU32G");
    }

    #[test]
    fn registers_require_ready_session() {
        let sd = Session::new(MockCard::new(CardKind::Sdhc));

        assert!(matches!(sd.read_csd(), Err(Error::NotInitialized)));
        assert!(matches!(sd.card_info(), Err(Error::NotInitialized)));
    }

    #[test]
    fn raw_commands() {
        let sd = ready(CardKind::Sdhc);

        assert_eq!(
            sd.send_command(13, 0),
            Err(Error::UnsupportedCommand(13))
        );
        assert_eq!(sd.last_trace(), Some(TraceCode::UnsupportedCommand));

        let response = sd.send_command(commands::CMD58, 0).unwrap();
        assert_eq!(response.r1, R1::READY_STATE);
        assert_eq!(
            response.ocr().map(|ocr| ocr.card_capacity_status()),
            Some(CapacityStatus::SdhcSdxc)
        );

        let card = sd.free();
        assert_eq!(card.commands(), [commands::CMD58]);
        assert!(!card.cs);
    }

    #[test]
    fn trace_without_scratch() {
        let mut card = MockCard::new(CardKind::Sdhc);
        card.scratch = false;
        card.fail_command = Some(commands::CMD8);
        let mut sd = Session::new(card);

        assert_eq!(sd.init(), Err(Error::Send(MockError)));
        assert_eq!(sd.trace_history(&mut [TraceCode::SetIdle; 4]), 0);
        assert_eq!(sd.failed_phase(), Some(Phase::CsAsserted));
    }

    #[test]
    fn trace_accessors_do_not_hold_session() {
        let sd = ready(CardKind::Sdhc);
        let _ = sd.send_command(13, 0);
        let _ = sd.send_command(14, 0);

        let last = sd.last_trace();
        let mut history = [TraceCode::SetIdle; 2];
        let len = sd.trace_history(&mut history);

        sd.read_blocks(0, &mut [0u8; BLOCK_SIZE]).unwrap();
        sd.write_blocks(0, &[0u8; BLOCK_SIZE]).unwrap();
        sd.sync().unwrap();

        assert_eq!(last, Some(TraceCode::UnsupportedCommand));
        assert_eq!(len, 2);
        assert_eq!(history[1], TraceCode::UnsupportedCommand);
    }

    #[test]
    fn diskio_device() {
        let mut sd = Session::new(MockCard::new(CardKind::Sdhc));
        let mut buf = [0u8; BLOCK_SIZE];

        assert!(sd.status().contains(StatusFlag::NotInitialized));
        assert!(matches!(
            sd.read(&mut buf, 0),
            Err(DiskioError::NotInitialized)
        ));

        sd.initialize().unwrap();
        assert!(matches!(
            sd.initialize(),
            Err(DiskioError::AlreadyInitialized)
        ));

        sd.write(&[0x11; BLOCK_SIZE], 1).unwrap();
        sd.read(&mut buf, 1).unwrap();
        assert_eq!(buf, [0x11; BLOCK_SIZE]);
        assert!(matches!(
            sd.read(&mut buf[..10], 1),
            Err(DiskioError::InvalidArgument)
        ));

        let mut block_size = 0;
        sd.ioctl(IoctlCmd::GetBlockSize(&mut block_size)).unwrap();
        assert_eq!(block_size, BLOCK_SIZE);
        sd.ioctl(IoctlCmd::CtrlSync).unwrap();

        sd.reset();
        assert!(!sd.is_ready());
        assert!(sd.status().contains(StatusFlag::NotInitialized));
    }

    #[test]
    fn hardware_errors_surface_through_diskio() {
        let sd = ready(CardKind::Sdhc);
        sd.transport.borrow_mut().fail_command = Some(commands::CMD17);

        assert!(matches!(
            sd.read(&mut [0u8; BLOCK_SIZE], 0),
            Err(DiskioError::Hardware(Error::Send(MockError)))
        ));
        assert!(!sd.free().cs);
    }
}
