//! Client identifier extraction from proxy headers.
//!
//! The identifier is whatever the fronting proxy says the client address
//! is. Nothing here validates the value or authenticates the proxy: deploy
//! behind infrastructure that overwrites these headers, or any client can
//! pick its own bucket.

use std::collections::HashMap;

/// Header carrying the proxy chain, original client first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Header carrying a single client address set by the proxy.
pub const REAL_IP: &str = "x-real-ip";
/// Identifier used when no proxy header is present.
///
/// Every such client shares this one bucket, so one of them can exhaust
/// the quota for all the others.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Read-only access to request headers by case-insensitive name.
pub trait HeaderSource {
    /// The value of the first header named `name`, if any.
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> HeaderSource for [(K, V)] {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.as_ref().eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> HeaderSource for Vec<(K, V)> {
    fn header(&self, name: &str) -> Option<&str> {
        self.as_slice().header(name)
    }
}

/// Derive the rate limit identifier for a request.
///
/// Precedence: the first `X-Forwarded-For` entry (trimmed), then
/// `X-Real-IP` verbatim, then [`UNKNOWN_CLIENT`]. A header whose selected
/// value is empty counts as missing.
pub fn client_identifier<H: HeaderSource + ?Sized>(headers: &H) -> String {
    if let Some(first) = headers
        .header(FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = headers.header(REAL_IP).filter(|v| !v.is_empty()) {
        return real_ip.to_string();
    }

    UNKNOWN_CLIENT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let h = headers(&[("x-forwarded-for", "203.0.113.5, 70.41.3.18")]);
        assert_eq!(client_identifier(&h), "203.0.113.5");
    }

    #[test]
    fn test_forwarded_for_is_trimmed() {
        let h = headers(&[("x-forwarded-for", "  203.0.113.5  ,10.0.0.1")]);
        assert_eq!(client_identifier(&h), "203.0.113.5");
    }

    #[test]
    fn test_real_ip_fallback() {
        let h = headers(&[("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_identifier(&h), "198.51.100.7");
    }

    #[test]
    fn test_forwarded_for_wins_over_real_ip() {
        let h = headers(&[
            ("x-real-ip", "198.51.100.7"),
            ("x-forwarded-for", "203.0.113.5"),
        ]);
        assert_eq!(client_identifier(&h), "203.0.113.5");
    }

    #[test]
    fn test_no_headers_is_unknown() {
        let h = headers(&[("user-agent", "curl/8.0")]);
        assert_eq!(client_identifier(&h), UNKNOWN_CLIENT);
        assert_eq!(client_identifier(&HashMap::new()), "unknown");
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let h = headers(&[("X-Forwarded-For", "203.0.113.5")]);
        assert_eq!(client_identifier(&h), "203.0.113.5");

        let pairs = vec![("X-Real-IP", "198.51.100.7")];
        assert_eq!(client_identifier(&pairs), "198.51.100.7");
    }

    #[test]
    fn test_empty_forwarded_for_falls_through() {
        let h = headers(&[("x-forwarded-for", " , 70.41.3.18"), ("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_identifier(&h), "198.51.100.7");

        let h = headers(&[("x-forwarded-for", ""), ("x-real-ip", "")]);
        assert_eq!(client_identifier(&h), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_real_ip_used_verbatim() {
        let h = headers(&[("x-real-ip", " 198.51.100.7 ")]);
        assert_eq!(client_identifier(&h), " 198.51.100.7 ");
    }
}
