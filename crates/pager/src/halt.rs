//! Stopping the system on broken invariants.

/// Stops the system after an invariant violation.
///
/// The reason is logged at error level before the panic.
#[cold]
#[track_caller]
pub(crate) fn halt(reason: core::fmt::Arguments<'_>) -> ! {
    log::error!("invariant violated: {reason}");
    panic!("invariant violated: {reason}");
}
