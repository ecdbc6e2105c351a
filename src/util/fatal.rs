//! Protocol violations are not recoverable. Once the suspend invariant or the
//! forwarding invariant is broken, the rest of the collector cannot trust the heap,
//! so we report what we know and abort the process without unwinding.

use std::fmt;

#[cold]
#[inline(never)]
pub fn gc_abort(args: fmt::Arguments) -> ! {
    error!("{}", args);
    eprintln!("===== Internal Error in the GC =====");
    eprintln!("{}", args);
    eprintln!("The stop-the-world or forwarding protocol was violated. Aborting.");
    std::process::abort()
}

/// Abort the process with a GC-internal diagnostic. Used the same way as `panic!`.
macro_rules! gc_fatal {
    ($($arg:tt)+) => {
        $crate::util::fatal::gc_abort(format_args!($($arg)+))
    };
}
