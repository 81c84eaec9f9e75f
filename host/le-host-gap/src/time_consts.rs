//! Time constants
//!
//! These are the GAP timer durations from Vol. 3, Part C, Appendix A.

/// The time spent advertising at a fast interval (`TGAP(adv_fast_period)`)
///
/// Once the time elapses advertising is restarted with the slow interval.
pub const FAST_ADVERTISING_PERIOD: core::time::Duration = core::time::Duration::from_secs(30);

/// The maximum time in limited discoverable mode (`TGAP(lim_adv_timeout)`)
pub const LIMITED_DISCOVERABLE_TIMEOUT: core::time::Duration = core::time::Duration::from_secs(180);
