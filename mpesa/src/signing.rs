//! Request signing: the STK timestamp and password.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};

/// East Africa Time offset from UTC, in hours
const EAT_OFFSET_HOURS: i64 = 3;

/// `YYYYMMDDHHMMSS` in East Africa Time.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use rsvp_mpesa::signing::timestamp;
///
/// let at = Utc.with_ymd_and_hms(2024, 12, 31, 22, 15, 9).unwrap();
/// assert_eq!(timestamp(at), "20250101011509");
/// ```
#[must_use]
pub fn timestamp(at: DateTime<Utc>) -> String {
    (at.naive_utc() + Duration::hours(EAT_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// `base64(shortcode ‖ passkey ‖ timestamp)`
#[must_use]
pub fn password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}
