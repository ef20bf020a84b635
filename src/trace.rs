//! Post-mortem trace of internal status codes.
//!
//! The trace is diagnostic only: protocol results are always carried by [`Error`](crate::Error).

/// Fine-grained internal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[repr(u8)]
pub enum TraceCode {
    UnsupportedCommand = 1,
    SetIdle,
    R7Pattern,
    AppCmdReply,
    OpCondReply,
    SdV2PlusInit,
    RunTimeout,
    BusyTimeout,
    SetBlockSize,
    CheckBlockSize,
}

impl TraceCode {
    const ALL: [TraceCode; 10] = [
        TraceCode::UnsupportedCommand,
        TraceCode::SetIdle,
        TraceCode::R7Pattern,
        TraceCode::AppCmdReply,
        TraceCode::OpCondReply,
        TraceCode::SdV2PlusInit,
        TraceCode::RunTimeout,
        TraceCode::BusyTimeout,
        TraceCode::SetBlockSize,
        TraceCode::CheckBlockSize,
    ];

    fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| *code as u8 == raw)
    }
}

/// Transaction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Phase {
    Idle,
    CsAsserted,
    FrameSent,
    AwaitingR1,
    ReceivingTail,
    Busy,
    Done,
}

/// Last internal status, the phase of the last failed transaction and an optional ring of
/// recent codes kept in scratch memory.
#[derive(Debug, Default)]
pub struct Trace {
    last: Option<TraceCode>,
    failed_phase: Option<Phase>,
    ring: Option<&'static mut [u8]>,
    head: usize,
    len: usize,
}

impl Trace {
    /// Trace without history.
    pub const fn new() -> Self {
        Trace {
            last: None,
            failed_phase: None,
            ring: None,
            head: 0,
            len: 0,
        }
    }

    /// Trace keeping history in `ring`.
    pub fn with_ring(ring: &'static mut [u8]) -> Self {
        Trace {
            ring: Some(ring),
            ..Self::new()
        }
    }

    pub fn record(&mut self, code: TraceCode) {
        self.last = Some(code);

        if let Some(ring) = self.ring.as_deref_mut() {
            if ring.is_empty() {
                return;
            }
            ring[self.head] = code as u8;
            self.head = (self.head + 1) % ring.len();
            self.len = (self.len + 1).min(ring.len());
        }
    }

    pub fn record_failure(&mut self, phase: Phase) {
        self.failed_phase = Some(phase);
    }

    /// Last recorded code.
    pub fn last(&self) -> Option<TraceCode> {
        self.last
    }

    /// Phase in which the last failed transaction stopped.
    pub fn failed_phase(&self) -> Option<Phase> {
        self.failed_phase
    }

    /// Recorded codes, oldest first.
    pub fn history(&self) -> impl Iterator<Item = TraceCode> + '_ {
        let ring: &[u8] = self.ring.as_deref().unwrap_or(&[]);
        let capacity = ring.len();
        let start = if capacity == 0 {
            0
        } else {
            (self.head + capacity - self.len) % capacity
        };

        (0..self.len).filter_map(move |i| TraceCode::from_u8(ring[(start + i) % capacity]))
    }

    /// Copy recorded codes, oldest first, into `out`, keeping the most recent ones when `out`
    /// is shorter than the history.
    pub fn copy_history(&self, out: &mut [TraceCode]) -> usize {
        let skip = self.len.saturating_sub(out.len());
        let mut written = 0;

        for (slot, code) in out.iter_mut().zip(self.history().skip(skip)) {
            *slot = code;
            written += 1;
        }

        written
    }

    pub fn clear(&mut self) {
        self.last = None;
        self.failed_phase = None;
        self.head = 0;
        self.len = 0;
    }
}
