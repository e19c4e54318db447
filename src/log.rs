//! Conditional logging.
//!
//! When the `log` feature is enabled these forward to the `log` crate;
//! otherwise they compile to nothing (the arguments are still
//! type-checked).

#[cfg(feature = "log")]
macro_rules! trace {
    ($($t:tt)*) => { log::trace!($($t)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($t:tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}

#[cfg(feature = "log")]
macro_rules! debug {
    ($($t:tt)*) => { log::debug!($($t)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($t:tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}

#[cfg(feature = "log")]
macro_rules! info {
    ($($t:tt)*) => { log::info!($($t)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($t:tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}
