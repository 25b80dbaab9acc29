//! Phone number normalisation

use crate::error::MpesaError;

/// Normalise a Kenyan mobile number to `254XXXXXXXXX`.
///
/// Non-digits are stripped, then one leading `0` or `254` is dropped and
/// `254` prepended. The result must be `254` followed by exactly nine digits.
///
/// # Errors
///
/// Returns [`MpesaError::InvalidPhone`] if the digits do not form a
/// nine-digit subscriber number.
///
/// # Examples
///
/// ```
/// use rsvp_mpesa::normalize_phone;
///
/// assert_eq!(normalize_phone("0712 345 678").unwrap(), "254712345678");
/// assert_eq!(normalize_phone("+254712345678").unwrap(), "254712345678");
/// assert!(normalize_phone("12345").is_err());
/// ```
pub fn normalize_phone(raw: &str) -> Result<String, MpesaError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    let subscriber = digits
        .strip_prefix("254")
        .or_else(|| digits.strip_prefix('0'))
        .unwrap_or(&digits);

    if subscriber.len() != 9 {
        return Err(MpesaError::InvalidPhone(raw.to_string()));
    }

    Ok(format!("254{subscriber}"))
}
