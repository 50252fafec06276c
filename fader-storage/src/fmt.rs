//! Logging shims
//!
//! Forward to `defmt` when the `defmt` feature is enabled. Otherwise the
//! arguments are only borrowed, so host builds need no global logger and
//! values used solely for logging do not trip unused-variable lints.
//!
//! The `log_` prefix keeps the names clear of the built-in `warn` attribute.

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug as log_debug, info as log_info, warn as log_warn};

#[cfg(not(feature = "defmt"))]
macro_rules! log_debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}

#[cfg(not(feature = "defmt"))]
macro_rules! log_info {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}

#[cfg(not(feature = "defmt"))]
macro_rules! log_warn {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}

#[cfg(not(feature = "defmt"))]
pub(crate) use {log_debug, log_info, log_warn};

#[cfg(all(test, not(feature = "defmt")))]
mod tests {
    use super::*;

    #[test]
    fn test_shims_borrow_arguments() {
        let value = 0x2001u16;
        let name = "segment";
        log_debug!("value {=u16:#x}", value);
        log_info!("{} ready", name);
        log_warn!("{} {}", name, value);
        // Still usable after logging
        assert_eq!(value, 0x2001);
        assert_eq!(name, "segment");
    }
}
