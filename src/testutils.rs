//! Scripted card used by the unit tests.

use crate::{
    command::Frame,
    config::SdSpiConfig,
    consts::{tokens, BLOCK_SIZE, FRAME_SIZE},
    crc::crc16,
    csd::RegisterData,
    transport::Transport,
};

use hex_literal::hex;
use std::{cell::Cell, collections::VecDeque};

pub const CSD_V1: RegisterData = hex!("00 26 00 32 5F 59 83 C8 AD DB CF FF D2 40 40 A5");
pub const CSD_V2: RegisterData = hex!("40 0E 00 32 5B 59 00 00 1D 69 7F 80 0A 40 00 8B");
pub const CID: RegisterData = hex!("03 53 44 53 55 33 32 47 80 12 34 56 78 01 3A 01");

/// Data response "accepted" as sent on the wire.
const DATA_ACCEPTED: u8 = 0xE5;

/// Short timeouts and every CRC option enabled.
pub struct TestConfig;

impl SdSpiConfig for TestConfig {
    const RESPONSE_POLL_BYTES: usize = 10;
    const DATA_TOKEN_POLL_BYTES: usize = 16;
    const BUSY_TIMEOUT_MS: u32 = 50;
    const IDLE_EXIT_TIMEOUT_MS: u32 = 100;
    const POWER_UP_DELAY_MS: u32 = 1;
    const INIT_DUMMY_BYTES: usize = 10;
    const ENTER_SPI_MODE_ATTEMPTS: usize = 3;
    const VERIFY_READ_CRC: bool = true;
    const COMPUTE_WRITE_CRC: bool = true;
    const TRACE_DEPTH: usize = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

/// What the host put on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Cs(bool),
    Clock(bool),
    Command(u8, u32),
    Token(u8),
    Data(Vec<u8>),
    Dummy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Sdhc,
    SdscV2,
    SdV1,
    Mmc,
}

/// Minimal behavioural model of a card in SPI mode.
pub struct EmulatedCard {
    pub kind: CardKind,
    /// Op-cond replies with the idle flag before the card reports ready.
    pub idle_polls: usize,
    /// ACMD23 is accepted.
    pub pre_erase: bool,
    pub storage: Vec<u8>,
    idle: bool,
    app: bool,
    polls_left: usize,
    write_block: usize,
}

impl EmulatedCard {
    pub const BLOCKS: usize = 8;

    pub fn new(kind: CardKind) -> Self {
        EmulatedCard {
            kind,
            idle_polls: 2,
            pre_erase: true,
            storage: (0..Self::BLOCKS * BLOCK_SIZE)
                .map(|i| (i % 251) as u8)
                .collect(),
            idle: true,
            app: false,
            polls_left: 2,
            write_block: 0,
        }
    }

    pub fn block(&self, index: usize) -> &[u8] {
        &self.storage[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE]
    }

    fn block_index(&self, argument: u32) -> usize {
        match self.kind {
            CardKind::Sdhc => argument as usize,
            _ => argument as usize / BLOCK_SIZE,
        }
    }

    fn op_cond(&mut self) -> Vec<u8> {
        if self.polls_left == 0 {
            self.idle = false;
            vec![0x00]
        } else {
            self.polls_left -= 1;
            vec![0x01]
        }
    }

    fn command(&mut self, index: u8, argument: u32) -> Vec<u8> {
        let app = core::mem::replace(&mut self.app, false);
        let r1 = u8::from(self.idle);

        match index {
            0 => {
                self.idle = true;
                self.polls_left = self.idle_polls;
                vec![0xFF, 0x01]
            }
            8 => match self.kind {
                CardKind::Sdhc | CardKind::SdscV2 => {
                    let arg = argument.to_be_bytes();
                    vec![0x01, 0x00, 0x00, arg[2] & 0x0F, arg[3]]
                }
                CardKind::SdV1 | CardKind::Mmc => vec![0x05],
            },
            55 if self.kind == CardKind::Mmc => vec![r1 | 0x04],
            55 => {
                self.app = true;
                vec![r1]
            }
            41 if app => self.op_cond(),
            1 if self.kind == CardKind::Mmc => self.op_cond(),
            58 => {
                let ocr: u32 = match self.kind {
                    CardKind::Sdhc => 0xC0FF_8000,
                    _ => 0x80FF_8000,
                };
                let mut reply = vec![r1];
                reply.extend_from_slice(&ocr.to_be_bytes());
                reply
            }
            16 if argument == BLOCK_SIZE as u32 => vec![r1],
            16 => vec![r1 | 0x40],
            9 => {
                let csd = match self.kind {
                    CardKind::Sdhc => CSD_V2,
                    _ => CSD_V1,
                };
                let mut reply = vec![0x00, 0xFF];
                reply.extend(packet(&csd));
                reply
            }
            10 => {
                let mut reply = vec![0x00, 0xFF];
                reply.extend(packet(&CID));
                reply
            }
            17 => {
                let block = self.block_index(argument);
                let mut reply = vec![0x00, 0xFF];
                reply.extend(packet(self.block(block)));
                reply
            }
            18 => {
                let mut reply = vec![0x00];
                for block in self.block_index(argument)..Self::BLOCKS {
                    reply.push(0xFF);
                    reply.extend(packet(self.block(block)));
                }
                reply
            }
            12 => vec![0xFF, 0x00, 0x00, 0xFF],
            23 if app && self.pre_erase => vec![0x00],
            24 | 25 => {
                self.write_block = self.block_index(argument);
                vec![0x00]
            }
            _ => vec![r1 | 0x04],
        }
    }

    pub fn respond(&mut self, event: &Event) -> Vec<u8> {
        match event {
            Event::Command(index, argument) => self.command(*index, *argument),
            Event::Data(data) if data.len() == BLOCK_SIZE => {
                let start = self.write_block * BLOCK_SIZE;
                self.storage[start..start + BLOCK_SIZE].copy_from_slice(data);
                self.write_block += 1;
                Vec::new()
            }
            Event::Data(data) if data.len() == 2 => vec![0xFF, DATA_ACCEPTED, 0x00, 0xFF],
            Event::Token(tokens::STOP_TRAN) => vec![0xFF, 0x00, 0xFF],
            _ => Vec::new(),
        }
    }
}

/// Data packet: start token, payload and its CRC16.
pub fn packet(data: &[u8]) -> Vec<u8> {
    let mut packet = vec![tokens::DATA_START_BLOCK];
    packet.extend_from_slice(data);
    packet.extend_from_slice(&crc16(data).to_be_bytes());
    packet
}

type Script = Box<dyn FnMut(&EmulatedCard, &Event) -> Option<Vec<u8>>>;

/// [`Transport`] backed by an [`EmulatedCard`] and an optional per-test script that may override
/// any reply.
pub struct MockCard {
    pub events: Vec<Event>,
    pub cs: bool,
    pub fast: bool,
    pub card: EmulatedCard,
    /// Value clocked in when the card has nothing queued.
    pub idle_byte: u8,
    /// Fail the send of this command index.
    pub fail_command: Option<u8>,
    /// Grant scratch memory to the trace.
    pub scratch: bool,
    now: Cell<u32>,
    replies: VecDeque<u8>,
    script: Option<Script>,
}

impl MockCard {
    pub fn new(kind: CardKind) -> Self {
        MockCard {
            events: Vec::new(),
            cs: false,
            fast: false,
            card: EmulatedCard::new(kind),
            idle_byte: tokens::IDLE,
            fail_command: None,
            scratch: true,
            now: Cell::new(0),
            replies: VecDeque::new(),
            script: None,
        }
    }

    pub fn with_script<F>(mut self, script: F) -> Self
    where
        F: FnMut(&EmulatedCard, &Event) -> Option<Vec<u8>> + 'static,
    {
        self.script = Some(Box::new(script));
        self
    }

    pub fn with_time(self, now: u32) -> Self {
        self.now.set(now);
        self
    }

    /// Indices of the commands sent so far.
    pub fn commands(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Command(index, _) => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, index: u8) -> usize {
        self.commands().iter().filter(|i| **i == index).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn classify(data: &[u8]) -> Event {
        match data {
            [tokens::IDLE] => Event::Dummy,
            [token] => Event::Token(*token),
            _ => {
                let frame = <[u8; FRAME_SIZE]>::try_from(data)
                    .map(Frame::from_bytes)
                    .ok()
                    .filter(|frame| frame.is_valid());

                match frame {
                    Some(frame) => Event::Command(frame.index(), frame.argument()),
                    None => Event::Data(data.to_vec()),
                }
            }
        }
    }
}

impl Transport for MockCard {
    type Error = MockError;

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let event = Self::classify(data);

        if let Event::Command(index, _) = event {
            self.replies.clear();
            if self.fail_command == Some(index) {
                self.events.push(event);
                return Err(MockError);
            }
        }

        let card = &mut self.card;
        let reply = match self.script.as_mut().and_then(|script| script(&*card, &event)) {
            Some(reply) => reply,
            None => card.respond(&event),
        };

        self.replies.extend(reply);
        self.events.push(event);

        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        for byte in buf.iter_mut() {
            *byte = self.replies.pop_front().unwrap_or(self.idle_byte);
        }

        Ok(())
    }

    fn set_cs(&mut self, asserted: bool) -> Result<(), Self::Error> {
        if self.cs != asserted {
            self.cs = asserted;
            self.events.push(Event::Cs(asserted));
        }

        Ok(())
    }

    fn set_clock(&mut self, fast: bool) -> Result<(), Self::Error> {
        self.fast = fast;
        self.events.push(Event::Clock(fast));

        Ok(())
    }

    fn now_ms(&self) -> u32 {
        let now = self.now.get().wrapping_add(1);
        self.now.set(now);
        now
    }

    fn allocate_scratch(&mut self, size: usize) -> Option<&'static mut [u8]> {
        self.scratch
            .then(|| Box::leak(vec![0u8; size].into_boxed_slice()) as &'static mut [u8])
    }
}
