//! Estimated progress while the upstream job runs.
//!
//! The upstream reports no percentage, so the bar chases a time-based curve
//! that climbs quickly to the mid seventies and then creeps toward a ceiling
//! it never passes until the image actually arrives.

/// Highest value the estimate may show before the job is done.
pub const PROGRESS_CEILING: f64 = 92.0;

/// Share of the remaining distance to the target covered per tick.
pub const EASING_FACTOR: f64 = 0.12;

/// Where the bar should be `elapsed_secs` after the job started running.
pub fn target_progress(elapsed_secs: f64) -> f64 {
    if elapsed_secs < 8.0 {
        10.0 + elapsed_secs * 8.0
    } else if elapsed_secs < 25.0 {
        74.0 + (elapsed_secs - 8.0)
    } else {
        PROGRESS_CEILING
    }
}

/// One easing tick from `current` toward the target curve.
pub fn eased_progress(current: f64, elapsed_secs: f64) -> f64 {
    let target = target_progress(elapsed_secs);
    let next = current + (target - current) * EASING_FACTOR;
    next.clamp(0.0, PROGRESS_CEILING)
}
