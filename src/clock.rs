//! Monotonic host clock used for callback load measurement.
use once_cell::sync::Lazy;

#[cfg(target_os = "macos")]
use mach::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

#[cfg(target_os = "macos")]
fn timebase() -> (u64, u64) {
    static TIMEBASE: Lazy<(u64, u64)> = Lazy::new(|| unsafe {
        let mut info = mach_timebase_info_data_t::default();
        mach_timebase_info(&mut info);
        (info.numer as u64, info.denom.max(1) as u64)
    });
    *TIMEBASE
}

/// Convert a host time tick count into nanoseconds.
///
/// On non-Apple targets host ticks already are nanoseconds.
pub fn host_time_to_ns(host_time: u64) -> u64 {
    #[cfg(target_os = "macos")]
    {
        let (numer, denom) = timebase();
        ((host_time as u128 * numer as u128) / denom as u128) as u64
    }
    #[cfg(not(target_os = "macos"))]
    {
        host_time
    }
}

/// Monotonic timestamp in nanoseconds. Does not allocate or lock after first use.
pub fn monotonic_timestamp_ns() -> u64 {
    #[cfg(target_os = "macos")]
    {
        let host_time = unsafe { mach_absolute_time() };
        host_time_to_ns(host_time)
    }
    #[cfg(not(target_os = "macos"))]
    {
        static START: Lazy<std::time::Instant> = Lazy::new(std::time::Instant::now);
        START.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_goes_backwards() {
        let mut last = monotonic_timestamp_ns();
        for _ in 0..1_000 {
            let now = monotonic_timestamp_ns();
            assert!(now >= last);
            last = now;
        }
    }
}
