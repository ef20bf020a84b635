/// Wire codec error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Command index outside the supported command table.
    UnsupportedCommand(u8),
    /// R7 echoed a pattern other than the one sent with CMD8.
    PatternMismatch(u8),
    /// Fewer bytes than the response kind requires.
    ShortResponse(usize),
}

/// [`SdSpi`](crate::SdSpi) result error.
///
/// `E` - transport error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Buffer is empty or not a whole multiple of the block size.
    InvalidBuffer(usize),
    /// Block I/O requested on a session that did not reach the ready state.
    NotInitialized,
    /// Command index outside the supported command table.
    UnsupportedCommand(u8),
    /// Block address does not fit the card's byte addressing.
    AddressOverflow(u32),
    /// Transport failed to send.
    Send(E),
    /// Transport failed to receive.
    Receive(E),
    /// Transport failed to change chip select.
    SetCs(E),
    /// Transport failed to change the bus clock.
    SetClock(E),
    /// No response byte within the response search budget.
    NoResponse,
    /// R7 check pattern mismatch.
    PatternMismatch(u8),
    /// Response shorter than its kind requires.
    ShortResponse(usize),
    /// Unexpected R1 flags for this command.
    ResponseError { command: u8, r1: u8 },
    /// Error token received instead of a data start token.
    ReceiveError(u8),
    /// Data response token reported a CRC or write error.
    WriteError(u8),
    /// CRC mismatch of a data packet (card, host).
    CrcError(u16, u16),
    /// The card kept the line busy past the busy timeout.
    BusyTimeout,
    /// CMD0 did not put the card in the idle state.
    SetIdleFailed(u8),
    /// CMD8 reply does not match any known card type.
    UnknownCardType,
    /// The idle-exit loop exceeded its timeout.
    RunTimeout,
    /// READ_OCR failed after idle exit.
    ReadOcrFailed(u8),
    /// SET_BLOCKLEN was rejected.
    SetBlockLengthFailed(u8),
}

impl<E> From<CodecError> for Error<E> {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedCommand(index) => Error::UnsupportedCommand(index),
            CodecError::PatternMismatch(pattern) => Error::PatternMismatch(pattern),
            CodecError::ShortResponse(len) => Error::ShortResponse(len),
        }
    }
}

impl<E> Error<E> {
    /// The error came from the transport rather than the card.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Send(_) | Error::Receive(_) | Error::SetCs(_) | Error::SetClock(_)
        )
    }
}
