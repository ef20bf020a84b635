//! Block and register transfers.

use crate::{
    command::Command,
    config::SdSpiConfig,
    consts::{tokens, BLOCK_SIZE, DATA_CRC_SIZE},
    crc::crc16,
    csd::RegisterData,
    error::Error,
    response::R1,
    transaction::Engine,
    transport::Transport,
};

/// Multi-block write strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// CMD24.
    Single,
    /// ACMD23 announced the block count, then CMD25.
    MultiplePreErased,
    /// CMD25 alone, used when ACMD23 is rejected.
    MultipleWithoutPreErase,
}

impl<'a, T: Transport, C: SdSpiConfig> Engine<'a, T, C> {
    /// Read `buf.len() / 512` blocks starting at the card address `address`.
    pub fn read_blocks(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error<T::Error>> {
        let block_count = buf.len() / BLOCK_SIZE;
        let command = if block_count > 1 {
            Command::ReadMultipleBlock { address }
        } else {
            Command::ReadSingleBlock { address }
        };

        let mut scope = self.select()?;

        let response = scope.execute(command, true)?;
        if response.r1 != R1::READY_STATE {
            return Err(Error::ResponseError {
                command: command.index(),
                r1: response.r1.bits(),
            });
        }

        let mut result = Ok(());
        for chunk in buf.chunks_mut(BLOCK_SIZE) {
            result = scope.read_data(chunk);
            if result.is_err() {
                break;
            }
        }

        if block_count > 1 {
            let stop = scope.execute(Command::StopTransmission, true);
            result = result.and(stop.map(|_| ()));
        }

        result?;
        scope.release()
    }

    /// Write `buf.len() / 512` blocks starting at the card address `address`.
    ///
    /// CS stays asserted for the whole sequence and is released on every exit path.
    pub fn write_blocks(&mut self, address: u32, buf: &[u8]) -> Result<(), Error<T::Error>> {
        let mut scope = self.select()?;

        scope.write_sequence(address, buf)?;
        scope.release()
    }

    /// Read a 16-byte register (CSD or CID) sent as a data packet.
    pub fn read_register(&mut self, command: Command) -> Result<RegisterData, Error<T::Error>> {
        let mut data = RegisterData::default();
        let mut scope = self.select()?;

        let response = scope.execute(command, true)?;
        if response.r1 != R1::READY_STATE {
            return Err(Error::ResponseError {
                command: command.index(),
                r1: response.r1.bits(),
            });
        }

        scope.read_data(&mut data)?;
        scope.release()?;

        Ok(data)
    }

    /// Wait until the card releases the busy line.
    pub fn sync(&mut self) -> Result<(), Error<T::Error>> {
        let mut scope = self.select()?;

        scope.wait_not_busy()?;
        scope.release()
    }

    fn write_sequence(&mut self, address: u32, buf: &[u8]) -> Result<(), Error<T::Error>> {
        let block_count = buf.len() / BLOCK_SIZE;
        let mode = if block_count > 1 {
            self.announce_block_count(block_count)?
        } else {
            WriteMode::Single
        };

        let (command, token) = match mode {
            WriteMode::Single => (Command::WriteBlock { address }, tokens::DATA_START_BLOCK),
            WriteMode::MultiplePreErased | WriteMode::MultipleWithoutPreErase => (
                Command::WriteMultipleBlock { address },
                tokens::WRITE_MULTIPLE,
            ),
        };

        let response = self.execute(command, true)?;
        if response.r1 != R1::READY_STATE {
            return Err(Error::ResponseError {
                command: command.index(),
                r1: response.r1.bits(),
            });
        }

        // Nwr
        self.send(&[tokens::IDLE])?;

        for block in buf.chunks(BLOCK_SIZE) {
            self.write_data(token, block)?;

            if mode != WriteMode::MultiplePreErased {
                self.wait_data_response()?;
            }
        }

        if mode != WriteMode::Single {
            self.send(&[tokens::IDLE])?;
            self.send(&[tokens::STOP_TRAN])?;
            // Stuff byte before busy.
            self.receive_byte()?;
            self.wait_not_busy()?;
        }

        Ok(())
    }

    /// Pre-erase with CMD55 + ACMD23, falling back to a plain multi-block write when the card
    /// rejects it.
    fn announce_block_count(&mut self, block_count: usize) -> Result<WriteMode, Error<T::Error>> {
        let Ok(blocks) = u16::try_from(block_count) else {
            debug!("{} blocks exceed ACMD23, writing without pre-erase", block_count);
            return Ok(WriteMode::MultipleWithoutPreErase);
        };

        for command in [Command::AppCmd, Command::SetBlockCount { blocks }] {
            let response = self.execute(command, true)?;

            if response.r1.illegal_command() {
                warn!(
                    "CMD{} rejected, writing without pre-erase",
                    command.index()
                );
                return Ok(WriteMode::MultipleWithoutPreErase);
            }

            if response.r1 != R1::READY_STATE {
                return Err(Error::ResponseError {
                    command: command.index(),
                    r1: response.r1.bits(),
                });
            }
        }

        Ok(WriteMode::MultiplePreErased)
    }

    /// Receive one data packet into `data`.
    pub fn read_data(&mut self, data: &mut [u8]) -> Result<(), Error<T::Error>> {
        self.wait_start_token()?;
        self.receive(data)?;

        let mut crc = [0u8; DATA_CRC_SIZE];
        self.receive(&mut crc)?;

        if C::VERIFY_READ_CRC {
            let card_crc = u16::from_be_bytes(crc);
            let host_crc = crc16(data);

            if card_crc != host_crc {
                return Err(Error::CrcError(card_crc, host_crc));
            }
        }

        Ok(())
    }

    fn wait_start_token(&mut self) -> Result<(), Error<T::Error>> {
        for _ in 0..C::DATA_TOKEN_POLL_BYTES {
            let token = self.receive_byte()?;

            if token == tokens::DATA_START_BLOCK {
                return Ok(());
            }

            // Data error token: 0b000x_xxxx.
            if token >> 5 == 0 {
                return Err(Error::ReceiveError(token));
            }
        }

        Err(Error::NoResponse)
    }

    fn write_data(&mut self, token: u8, data: &[u8]) -> Result<(), Error<T::Error>> {
        let crc = if C::COMPUTE_WRITE_CRC {
            crc16(data)
        } else {
            0x0000
        };

        self.send(&[token])?;
        self.send(data)?;
        self.send(&crc.to_be_bytes())
    }

    /// Poll for the data response token, then wait for programming to finish.
    fn wait_data_response(&mut self) -> Result<(), Error<T::Error>> {
        for _ in 0..C::DATA_TOKEN_POLL_BYTES {
            let status = self.receive_byte()? & tokens::DATA_RES_MASK;

            match status {
                tokens::DATA_RES_ACCEPTED => return self.wait_not_busy(),
                tokens::DATA_RES_CRC_ERROR | tokens::DATA_RES_WRITE_ERROR => {
                    return Err(Error::WriteError(status))
                }
                _ => {}
            }
        }

        Err(Error::NoResponse)
    }
}
