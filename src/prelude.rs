//! Crate prelude, exporting the traits anonymously.

pub use crate::{ImageSource as _, SwdPins as _, WriteSink as _};
