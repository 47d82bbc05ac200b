//! The standard SECoP status enum alphabet (spec §3, `StatusType`).
//!
//! `StatusType` itself is just `Tuple(Enum, String)` (spec.md); this module
//! only carries the standard status code constants and the `isBusy`/
//! `isError` predicates used by Drivable modules (spec §3 I6).

/// Standard SECoP status codes. Sub-codes (1xx-4xx) are represented as the
/// base code plus an offset and are not separately enumerated here — modules
/// are free to report e.g. `304` (`BUSY` sub-code 4) as a raw `i64`.
pub const IDLE: i64 = 100;
pub const WARN: i64 = 200;
pub const BUSY: i64 = 300;
pub const ERROR: i64 = 400;

pub fn is_busy(code: i64) -> bool {
    (BUSY..ERROR).contains(&code)
}

pub fn is_error(code: i64) -> bool {
    code >= ERROR
}

/// Human-readable name for the status' major group, used by `format_value`
/// on the standard status enum (e.g. `"BUSY<304>"`).
pub fn group_name(code: i64) -> &'static str {
    match code {
        IDLE..WARN => "IDLE",
        WARN..BUSY => "WARN",
        BUSY..ERROR => "BUSY",
        _ if code >= ERROR => "ERROR",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_range_is_exclusive_of_error() {
        assert!(is_busy(300));
        assert!(is_busy(304));
        assert!(!is_busy(400));
        assert!(!is_busy(299));
    }

    #[test]
    fn status_transition_to_error_disables_busy() {
        assert!(is_busy(BUSY));
        assert!(!is_busy(ERROR));
        assert!(is_error(ERROR));
    }
}
