//! Logging front-end.
//!
//! Log lines go to `defmt` with the `defmt-log` feature and to the `log` facade with the `log`
//! feature. With neither feature the macros only type-check their arguments.

#![allow(unused_macros)]

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::debug!($($arg)*);
        #[cfg(feature = "defmt-log")]
        ::defmt::debug!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt-log")))]
        let _ = ($($arg)*);
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::info!($($arg)*);
        #[cfg(feature = "defmt-log")]
        ::defmt::info!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt-log")))]
        let _ = ($($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::warn!($($arg)*);
        #[cfg(feature = "defmt-log")]
        ::defmt::warn!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt-log")))]
        let _ = ($($arg)*);
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::error!($($arg)*);
        #[cfg(feature = "defmt-log")]
        ::defmt::error!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt-log")))]
        let _ = ($($arg)*);
    }};
}

/// Wraps a `Debug`-only value for the active logger.
#[cfg(feature = "defmt-log")]
macro_rules! dbg_fmt {
    ($arg:expr) => {
        ::defmt::Debug2Format($arg)
    };
}

#[cfg(not(feature = "defmt-log"))]
macro_rules! dbg_fmt {
    ($arg:expr) => {
        $arg
    };
}
