use crate::consts::tokens;

use core::fmt::Debug;
use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Hardware capabilities consumed by the protocol core.
///
/// Every call blocks until the physical operation completes.
pub trait Transport {
    /// Transport error type.
    type Error: Debug;

    /// Clock out `data`.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Clock in `buf.len()` bytes while keeping MOSI high.
    fn receive(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Assert (`true`) or deassert chip select.
    fn set_cs(&mut self, asserted: bool) -> Result<(), Self::Error>;

    /// Switch between the slow init clock and the fast data clock.
    fn set_clock(&mut self, fast: bool) -> Result<(), Self::Error>;

    /// Monotonic time, ms. Allowed to wrap.
    fn now_ms(&self) -> u32;

    /// Scratch memory for the internal trace. `None` disables the trace history.
    fn allocate_scratch(&mut self, _size: usize) -> Option<&'static mut [u8]> {
        None
    }
}

/// Time source and bus speed control for [`SpiTransport`].
pub trait BusClock {
    /// Clock error type.
    type Error: Debug;

    /// Monotonic time, ms.
    fn now_ms(&self) -> u32;

    /// Switch SCK between init (100-400 kHz) and full speed.
    fn set_fast(&mut self, fast: bool) -> Result<(), Self::Error>;
}

/// [`SpiTransport`] error.
///
/// `T` - SPI error type.
/// `S` - select switch error type.
/// `C` - bus clock error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiTransportError<T, S, C> {
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't set a select.
    SelectError(S),
    /// Couldn't change the bus speed.
    ClockError(C),
}

/// [`Transport`] over an embedded-hal SPI bus and a chip select switch.
///
/// `Spi` - SPI.
/// `Cs` - Chip select output switch, active state selects the card.
/// `Clk` - time source and bus speed control.
pub struct SpiTransport<Spi, Cs, Clk> {
    spi: Spi,
    cs: Cs,
    clock: Clk,
}

impl<Spi, Cs, Clk> SpiTransport<Spi, Cs, Clk>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Clk: BusClock,
{
    /// Creates a new [`SpiTransport<Spi, Cs, Clk>`].
    pub fn new(spi: Spi, cs: Cs, clock: Clk) -> Self {
        SpiTransport { spi, cs, clock }
    }

    /// Releases the peripherals.
    pub fn free(self) -> (Spi, Cs, Clk) {
        (self.spi, self.cs, self.clock)
    }

    /// Send one byte and receive one byte.
    fn transfer(
        &mut self,
        data: u8,
    ) -> Result<u8, SpiTransportError<Spi::Error, Cs::Error, Clk::Error>> {
        self.spi
            .transfer(&mut [data])
            .map(|b| b[0])
            .map_err(SpiTransportError::Transport)
    }
}

impl<Spi, Cs, Clk> Transport for SpiTransport<Spi, Cs, Clk>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Clk: BusClock,
    Spi::Error: Debug,
    Cs::Error: Debug,
{
    type Error = SpiTransportError<Spi::Error, Cs::Error, Clk::Error>;

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        for byte in data.iter() {
            self.transfer(*byte)?;
        }

        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        for byte in buf.iter_mut() {
            *byte = self.transfer(tokens::IDLE)?;
        }

        Ok(())
    }

    fn set_cs(&mut self, asserted: bool) -> Result<(), Self::Error> {
        let result = if asserted {
            self.cs.on()
        } else {
            self.cs.off()
        };

        result.map_err(SpiTransportError::SelectError)
    }

    fn set_clock(&mut self, fast: bool) -> Result<(), Self::Error> {
        self.clock
            .set_fast(fast)
            .map_err(SpiTransportError::ClockError)
    }

    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }
}
