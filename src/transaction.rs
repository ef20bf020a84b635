//! Single command/response exchange over a [`Transport`].

use crate::{
    command::Command,
    config::SdSpiConfig,
    consts::tokens,
    error::Error,
    response::{decode, Response, ResponseKind, R1},
    trace::{Phase, Trace, TraceCode},
    transport::Transport,
};

use core::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

/// Transaction engine bound to a transport and a trace for the duration of one operation.
pub(crate) struct Engine<'a, T: Transport, C: SdSpiConfig> {
    transport: &'a mut T,
    trace: &'a mut Trace,
    config: PhantomData<C>,
}

impl<'a, T: Transport, C: SdSpiConfig> Engine<'a, T, C> {
    pub fn new(transport: &'a mut T, trace: &'a mut Trace) -> Self {
        Engine {
            transport,
            trace,
            config: PhantomData::<C>,
        }
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), Error<T::Error>> {
        self.transport.send(data).map_err(Error::Send)
    }

    pub fn receive(&mut self, buf: &mut [u8]) -> Result<(), Error<T::Error>> {
        self.transport.receive(buf).map_err(Error::Receive)
    }

    pub fn receive_byte(&mut self) -> Result<u8, Error<T::Error>> {
        let mut byte = [tokens::IDLE];
        self.receive(&mut byte)?;
        Ok(byte[0])
    }

    pub fn set_cs(&mut self, asserted: bool) -> Result<(), Error<T::Error>> {
        self.transport.set_cs(asserted).map_err(Error::SetCs)
    }

    pub fn set_clock(&mut self, fast: bool) -> Result<(), Error<T::Error>> {
        self.transport.set_clock(fast).map_err(Error::SetClock)
    }

    pub fn now_ms(&self) -> u32 {
        self.transport.now_ms()
    }

    /// Milliseconds since `start`, robust to wrap-around.
    pub fn elapsed_ms(&self, start: u32) -> u32 {
        self.now_ms().wrapping_sub(start)
    }

    /// Spin for at least `ms` milliseconds.
    pub fn delay_ms(&self, ms: u32) {
        let start = self.now_ms();
        while self.elapsed_ms(start) <= ms {}
    }

    pub fn record(&mut self, code: TraceCode) {
        self.trace.record(code);
    }

    /// Asserts CS and returns a scope that deasserts it on every exit path.
    pub fn select(&mut self) -> Result<Selected<'_, 'a, T, C>, Error<T::Error>> {
        self.set_cs(true)?;

        Ok(Selected {
            engine: self,
            released: false,
        })
    }

    /// Executes a raw command index, rejecting indices outside the command table.
    pub fn execute_raw(
        &mut self,
        index: u8,
        argument: u32,
        keep_cs: bool,
    ) -> Result<Response, Error<T::Error>> {
        match Command::from_raw(index, argument) {
            Ok(command) => self.execute(command, keep_cs),
            Err(err) => {
                self.record(TraceCode::UnsupportedCommand);
                Err(err.into())
            }
        }
    }

    /// Executes one command/response exchange.
    ///
    /// CS ends in the `keep_cs` state. A failed exchange that was not asked to keep CS asserted
    /// still deasserts it.
    pub fn execute(
        &mut self,
        command: Command,
        keep_cs: bool,
    ) -> Result<Response, Error<T::Error>> {
        let mut phase = Phase::Idle;
        let result = self.exchange(command, keep_cs, &mut phase);

        if let Err(err) = &result {
            self.trace.record_failure(phase);
            if let Error::PatternMismatch(_) = err {
                self.record(TraceCode::R7Pattern);
            }
            if !keep_cs {
                let _ = self.transport.set_cs(false);
            }
        }

        result
    }

    fn exchange(
        &mut self,
        command: Command,
        keep_cs: bool,
        phase: &mut Phase,
    ) -> Result<Response, Error<T::Error>> {
        let frame = command.encode();
        let kind = command.response_kind();

        self.set_cs(true)?;
        *phase = Phase::CsAsserted;

        self.send(frame.as_bytes())?;
        *phase = Phase::FrameSent;

        // The byte following CMD12 is a stuff byte.
        if command == Command::StopTransmission {
            self.receive_byte()?;
        }

        *phase = Phase::AwaitingR1;
        let mut buf = [tokens::IDLE; 5];
        buf[0] = self.wait_response()?;

        // A card rejecting the command replies with the R1 byte only.
        let kind = if R1::from_byte(buf[0]).illegal_command() {
            ResponseKind::R1
        } else {
            kind
        };

        *phase = Phase::ReceivingTail;
        if kind.size() > 1 {
            self.receive(&mut buf[1..kind.size()])?;
        }

        self.set_cs(keep_cs)?;

        let response = decode(&buf, kind).map_err(Error::<T::Error>::from)?;

        if kind == ResponseKind::R1b {
            *phase = Phase::Busy;
            self.wait_not_busy()?;
        }

        *phase = Phase::Done;

        Ok(response)
    }

    /// Poll for the first byte that is not an idle line.
    fn wait_response(&mut self) -> Result<u8, Error<T::Error>> {
        for _ in 0..C::RESPONSE_POLL_BYTES {
            let byte = self.receive_byte()?;

            if byte != tokens::IDLE {
                return Ok(byte);
            }
        }

        Err(Error::NoResponse)
    }

    /// Poll while the card holds the line low, bounded by the busy timeout.
    pub fn wait_not_busy(&mut self) -> Result<(), Error<T::Error>> {
        let start = self.now_ms();

        loop {
            if self.receive_byte()? != 0x00 {
                return Ok(());
            }

            if self.elapsed_ms(start) >= C::BUSY_TIMEOUT_MS {
                self.record(TraceCode::BusyTimeout);
                return Err(Error::BusyTimeout);
            }
        }
    }
}

/// Chip select scope. Deasserts CS when dropped unless [`release`](Selected::release) already
/// did.
pub(crate) struct Selected<'e, 'a, T: Transport, C: SdSpiConfig> {
    engine: &'e mut Engine<'a, T, C>,
    released: bool,
}

impl<'e, 'a, T: Transport, C: SdSpiConfig> Selected<'e, 'a, T, C> {
    /// Deasserts CS, reporting a transport failure.
    pub fn release(mut self) -> Result<(), Error<T::Error>> {
        self.released = true;
        self.engine.set_cs(false)
    }
}

impl<'e, 'a, T: Transport, C: SdSpiConfig> Deref for Selected<'e, 'a, T, C> {
    type Target = Engine<'a, T, C>;

    fn deref(&self) -> &Self::Target {
        &*self.engine
    }
}

impl<'e, 'a, T: Transport, C: SdSpiConfig> DerefMut for Selected<'e, 'a, T, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.engine
    }
}

impl<'e, 'a, T: Transport, C: SdSpiConfig> Drop for Selected<'e, 'a, T, C> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.engine.transport.set_cs(false);
        }
    }
}
