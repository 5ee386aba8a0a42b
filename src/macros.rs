#[cfg(feature = "debug")]
#[macro_export]
macro_rules! debugln {
    ($($rest:tt)*) => {
        std::println!($($rest)*)
    }
}

#[cfg(not(feature = "debug"))]
#[macro_export]
macro_rules! debugln {
    ($($rest:tt)*) => {
        ()
    };
}

/// Emits a warning to stderr. Unlike `debugln!` this is always active —
/// it's meant for conditions that are recoverable but smell like a bug
/// in the ROM or in this core (unmapped register access, and so on).
#[macro_export]
macro_rules! warnln {
    ($($rest:tt)*) => {
        std::eprintln!($($rest)*)
    }
}

/// Panics with a formatted message, gated so that `pedantic` builds can
/// be stricter than release builds that would rather limp along.
#[cfg(feature = "pedantic")]
#[macro_export]
macro_rules! panic_gb {
    ($($rest:tt)*) => {
        std::panic!($($rest)*)
    }
}

#[cfg(not(feature = "pedantic"))]
#[macro_export]
macro_rules! panic_gb {
    ($($rest:tt)*) => {
        $crate::warnln!($($rest)*)
    }
}

/// Asserts only in `pedantic` builds. Used for invariants that are
/// expensive or noisy to check on every instruction.
#[cfg(feature = "pedantic")]
#[macro_export]
macro_rules! assert_gb {
    ($cond:expr, $($rest:tt)*) => {
        std::assert!($cond, $($rest)*)
    }
}

#[cfg(not(feature = "pedantic"))]
#[macro_export]
macro_rules! assert_gb {
    ($cond:expr, $($rest:tt)*) => {
        ()
    };
}
