use crate::payments::error::{PaymentError, PaymentResult};
use regex::Regex;

/// A mobile-money carrier, identified by the prefix of the subscriber's
/// E.164 number. The `code` doubles as the gateway routing/switch code.
#[derive(Debug, Clone)]
pub struct MobileIssuer {
    pub code: &'static str,
    pub display_name: &'static str,
    pattern: Regex,
}

impl MobileIssuer {
    fn new(code: &'static str, display_name: &'static str, pattern: &str) -> Self {
        Self {
            code,
            display_name,
            // Patterns are compile-time literals; a failure here is a build defect.
            pattern: Regex::new(pattern).expect("static issuer pattern"),
        }
    }

    pub fn matches(&self, phone: &str) -> bool {
        self.pattern.is_match(phone)
    }
}

/// Carrier table with prefix patterns over country code + national number.
///
/// Owned explicitly by the services that need it rather than held in a
/// process-wide static, so tests can construct their own instance.
#[derive(Debug, Clone)]
pub struct IssuerDirectory {
    issuers: Vec<MobileIssuer>,
}

impl IssuerDirectory {
    pub fn new() -> Self {
        // Order matters: the first matching pattern wins.
        Self {
            issuers: vec![
                MobileIssuer::new(
                    "MTN",
                    "MTN Mobile Money",
                    r"^\+?233(24|25|53|54|55|59)\d{7}$",
                ),
                MobileIssuer::new("VDF", "Telecel Cash", r"^\+?233(20|50)\d{7}$"),
                MobileIssuer::new("ATL", "AT Money", r"^\+?233(26|27|56|57)\d{7}$"),
            ],
        }
    }

    pub fn all(&self) -> &[MobileIssuer] {
        &self.issuers
    }

    /// Resolve the carrier serving `phone` (already E.164-normalized).
    /// An unmatched number is a hard validation failure.
    pub fn resolve(&self, phone: &str) -> PaymentResult<&MobileIssuer> {
        self.issuers
            .iter()
            .find(|issuer| issuer.matches(phone))
            .ok_or_else(|| PaymentError::UnsupportedIssuer {
                phone: phone.to_string(),
            })
    }
}

impl Default for IssuerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize user-supplied phone input to E.164 (`+` followed by digits).
pub fn normalize_phone(raw: &str) -> PaymentResult<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect();

    let digits = match stripped.as_str() {
        s if s.starts_with("00") => &s[2..],
        s if s.starts_with('+') => &s[1..],
        s => s,
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PaymentError::Validation {
            message: format!("malformed phone number: {}", raw),
            field: Some("phone".to_string()),
        });
    }
    if digits.len() < 8 || digits.len() > 15 {
        return Err(PaymentError::Validation {
            message: format!("phone number has invalid length: {}", raw),
            field: Some("phone".to_string()),
        });
    }

    Ok(format!("+{}", digits))
}
