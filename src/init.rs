//! Card bring-up: reset, version detection, idle exit and block length negotiation.

use crate::{
    command::{Command, Hcs},
    config::SdSpiConfig,
    consts::{commands, tokens, BLOCK_SIZE_U32},
    error::Error,
    response::{CapacityStatus, R1},
    trace::TraceCode,
    transaction::Engine,
    transport::Transport,
};

/// Card version detected during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CardVersion {
    /// SD physical layer 1.x, always standard capacity.
    SdV1,
    /// SD physical layer 2.0 or later (SDSC, SDHC or SDXC).
    SdV2Plus,
    /// MultiMediaCard.
    Mmc,
}

/// Properties negotiated by a successful bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CardProperties {
    pub version: CardVersion,
    pub capacity: CapacityStatus,
}

/// Command that takes the card out of the idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpCond {
    /// CMD55 + ACMD41 with the given host capacity support.
    App(Hcs),
    /// CMD1.
    Mmc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reset,
    CheckVoltage,
    RunAcmd41SdV2,
    ReadOcr,
    RunAcmd41SdV1,
    RunCmd1Mmc,
    NegotiateBlockLength(CardVersion),
    Ready(CardProperties),
}

impl<'a, T: Transport, C: SdSpiConfig> Engine<'a, T, C> {
    /// Runs the bring-up state machine until the card is ready or a transition fails.
    ///
    /// CS is deasserted on return.
    pub fn bring_up(&mut self) -> Result<CardProperties, Error<T::Error>> {
        let result = self.run_states();

        if result.is_err() {
            let _ = self.set_cs(false);
        }

        result
    }

    fn run_states(&mut self) -> Result<CardProperties, Error<T::Error>> {
        let mut state = State::Reset;

        loop {
            state = match state {
                State::Reset => {
                    self.power_up()?;
                    self.enter_idle()?;
                    State::CheckVoltage
                }
                State::CheckVoltage => self.check_voltage()?,
                State::RunAcmd41SdV2 => match self.exit_idle(OpCond::App(Hcs::SdhcSdxc)) {
                    Ok(()) => State::ReadOcr,
                    Err(err) => {
                        self.record(TraceCode::SdV2PlusInit);
                        return Err(err);
                    }
                },
                State::ReadOcr => match self.read_ocr()? {
                    CapacityStatus::Sdsc => State::NegotiateBlockLength(CardVersion::SdV2Plus),
                    CapacityStatus::SdhcSdxc => State::Ready(CardProperties {
                        version: CardVersion::SdV2Plus,
                        capacity: CapacityStatus::SdhcSdxc,
                    }),
                },
                State::RunAcmd41SdV1 => match self.exit_idle(OpCond::App(Hcs::Sdsc)) {
                    Ok(()) => State::NegotiateBlockLength(CardVersion::SdV1),
                    Err(err) if err.is_transport() => return Err(err),
                    Err(_) => {
                        info!("ACMD41 failed, retrying as MMC");
                        State::RunCmd1Mmc
                    }
                },
                State::RunCmd1Mmc => {
                    self.exit_idle(OpCond::Mmc)?;
                    State::NegotiateBlockLength(CardVersion::Mmc)
                }
                State::NegotiateBlockLength(version) => {
                    self.set_block_length()?;
                    State::Ready(CardProperties {
                        version,
                        capacity: CapacityStatus::Sdsc,
                    })
                }
                State::Ready(card) => return Ok(card),
            };
        }
    }

    /// Deselect, slow clock, power stabilisation and at least 74 dummy clocks.
    fn power_up(&mut self) -> Result<(), Error<T::Error>> {
        self.set_cs(false)?;
        self.set_clock(false)?;
        self.delay_ms(C::POWER_UP_DELAY_MS);

        for _ in 0..C::INIT_DUMMY_BYTES {
            self.send(&[tokens::IDLE])?;
        }

        Ok(())
    }

    /// Enter SPI mode with CMD0.
    fn enter_idle(&mut self) -> Result<(), Error<T::Error>> {
        let mut last = tokens::IDLE;

        for i in 0..C::ENTER_SPI_MODE_ATTEMPTS {
            info!("Enter to SPI mode for SD, attempt: {}", i + 1);

            match self.execute(Command::GoIdleState, false) {
                Ok(response) if response.r1 == R1::IN_IDLE_STATE => return Ok(()),
                Ok(response) => {
                    last = response.r1.bits();
                    warn!("Wrong response from CMD{}: 0x{:02X}", commands::CMD0, last);
                }
                Err(Error::NoResponse) => {}
                Err(err) => return Err(err),
            }
        }

        self.record(TraceCode::SetIdle);
        Err(Error::SetIdleFailed(last))
    }

    /// Classify the card with CMD8.
    fn check_voltage(&mut self) -> Result<State, Error<T::Error>> {
        match self.execute(Command::SendIfCond { vhs: true }, false) {
            Ok(response)
                if response.r1 == R1::IN_IDLE_STATE
                    && response
                        .if_cond()
                        .map_or(false, |if_cond| if_cond.voltage_accepted) =>
            {
                info!("SD v2+ card detected");
                Ok(State::RunAcmd41SdV2)
            }
            Ok(response) if response.r1 == R1::IN_IDLE_AND_ILLEGAL => {
                info!("SD v1 or MMC card detected");
                Ok(State::RunAcmd41SdV1)
            }
            Err(Error::NoResponse) => {
                info!("No response from CMD8, SD v1 or MMC card assumed");
                Ok(State::RunAcmd41SdV1)
            }
            Err(err) if err.is_transport() => Err(err),
            Ok(response) => {
                error!("Unknown card type, CMD8 R1: 0x{:02X}", response.r1.bits());
                Err(Error::UnknownCardType)
            }
            Err(_) => {
                error!("Unknown card type, bad CMD8 response");
                Err(Error::UnknownCardType)
            }
        }
    }

    /// Poll the op-cond command until the card leaves the idle state or the timeout elapses.
    fn exit_idle(&mut self, op_cond: OpCond) -> Result<(), Error<T::Error>> {
        let start = self.now_ms();

        loop {
            let command = match op_cond {
                OpCond::App(hcs) => {
                    let response = self.execute(Command::AppCmd, true)?;

                    if response.r1 != R1::IN_IDLE_STATE {
                        self.set_cs(false)?;
                        self.record(TraceCode::AppCmdReply);
                        return Err(Error::ResponseError {
                            command: commands::CMD55,
                            r1: response.r1.bits(),
                        });
                    }

                    Command::AppSendOpCond { hcs }
                }
                OpCond::Mmc => Command::SendOpCond,
            };

            let response = self.execute(command, false)?;

            if response.r1 == R1::READY_STATE {
                return Ok(());
            }

            if response.r1 != R1::IN_IDLE_STATE {
                self.record(TraceCode::OpCondReply);
                return Err(Error::ResponseError {
                    command: command.index(),
                    r1: response.r1.bits(),
                });
            }

            if self.elapsed_ms(start) >= C::IDLE_EXIT_TIMEOUT_MS {
                warn!("CMD{} still idle after {} ms", command.index(), C::IDLE_EXIT_TIMEOUT_MS);
                self.record(TraceCode::RunTimeout);
                return Err(Error::RunTimeout);
            }
        }
    }

    /// READ_OCR, reporting the card capacity status.
    fn read_ocr(&mut self) -> Result<CapacityStatus, Error<T::Error>> {
        let response = match self.execute(Command::ReadOcr, false) {
            Ok(response) => response,
            Err(err) => {
                self.record(TraceCode::CheckBlockSize);
                return Err(err);
            }
        };

        match response.ocr() {
            Some(ocr) if response.r1 == R1::READY_STATE => {
                info!(
                    "OCR: capacity {:?}, voltage {:?}",
                    ocr.card_capacity_status(),
                    ocr.vdd_voltage()
                );
                Ok(ocr.card_capacity_status())
            }
            _ => {
                self.record(TraceCode::CheckBlockSize);
                Err(Error::ReadOcrFailed(response.r1.bits()))
            }
        }
    }

    /// Force the block length to 512 bytes with CMD16.
    fn set_block_length(&mut self) -> Result<(), Error<T::Error>> {
        info!("Setting block length to {}", BLOCK_SIZE_U32);

        let r1 = match self.execute(
            Command::SetBlockLen {
                block_length: BLOCK_SIZE_U32,
            },
            false,
        ) {
            Ok(response) if response.r1 == R1::READY_STATE => return Ok(()),
            Ok(response) => response.r1.bits(),
            Err(err) if err.is_transport() => return Err(err),
            Err(_) => tokens::IDLE,
        };

        self.record(TraceCode::SetBlockSize);
        Err(Error::SetBlockLengthFailed(r1))
    }
}
