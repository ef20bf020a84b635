/// Represents config for [`SdSpi`](crate::SdSpi).
pub trait SdSpiConfig {
    /// Max single-byte receives while searching for a response byte.
    ///
    /// Ncr is at most 8 bytes for SD and MMC cards, plus margin.
    const RESPONSE_POLL_BYTES: usize;
    /// Max single-byte receives while waiting for a data start token or a data response.
    const DATA_TOKEN_POLL_BYTES: usize;
    /// Busy-wait window after R1b responses and accepted writes, ms.
    const BUSY_TIMEOUT_MS: u32;
    /// Wall-clock bound of the idle-exit loop, ms.
    const IDLE_EXIT_TIMEOUT_MS: u32;
    /// Power stabilisation wait before the dummy clocks, ms.
    const POWER_UP_DELAY_MS: u32;
    /// Count of 0xFF bytes clocked with CS deselected (8 clocks each).
    const INIT_DUMMY_BYTES: usize;
    /// Max attempts to enter SPI mode with CMD0.
    const ENTER_SPI_MODE_ATTEMPTS: usize;
    /// Check the CRC16 trailer of received data packets.
    const VERIFY_READ_CRC: bool;
    /// Send a computed CRC16 trailer instead of a zero placeholder.
    const COMPUTE_WRITE_CRC: bool;
    /// Count of trace codes kept in the scratch ring.
    const TRACE_DEPTH: usize;
}

/// Default implementation of [`SdSpiConfig`](crate::SdSpiConfig).
pub struct DefaultSdSpiConfig;

impl SdSpiConfig for DefaultSdSpiConfig {
    const RESPONSE_POLL_BYTES: usize = 10;
    const DATA_TOKEN_POLL_BYTES: usize = 1000;
    const BUSY_TIMEOUT_MS: u32 = 500;
    const IDLE_EXIT_TIMEOUT_MS: u32 = 1000;
    const POWER_UP_DELAY_MS: u32 = 2;
    const INIT_DUMMY_BYTES: usize = 10;
    const ENTER_SPI_MODE_ATTEMPTS: usize = 10;
    const VERIFY_READ_CRC: bool = false;
    const COMPUTE_WRITE_CRC: bool = false;
    const TRACE_DEPTH: usize = 16;
}
