//! Correlation identifiers and their propagation headers.
//!
//! A correlation id links every log line, span and metric produced on
//! behalf of one logical request, across service boundaries. Ids are v4
//! UUIDs, optionally namespaced with a caller-supplied prefix
//! (`prefix_<uuid>`).

use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Canonical header names. Extraction is case-insensitive; these are the
/// forms written on outbound requests.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Mint a new correlation id, optionally namespaced.
pub fn generate(prefix: Option<&str>) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}_{}", p, Uuid::new_v4()),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Check that an id is a v4-style UUID in the hyphenated 8-4-4-4-12 hex
/// grouping, with or without a namespace prefix. The simple 32-hex,
/// braced and urn forms are rejected: ids must round-trip verbatim across
/// service boundaries, so only the canonical layout is accepted.
pub fn validate(id: &str) -> Result<()> {
    let uuid_part = match id.rsplit_once('_') {
        Some((prefix, rest)) if !prefix.is_empty() => rest,
        _ => id,
    };
    if is_hyphenated_uuid(uuid_part) && Uuid::parse_str(uuid_part).is_ok() {
        Ok(())
    } else {
        Err(CoreError::InvalidCorrelationId(id.to_string()))
    }
}

fn is_hyphenated_uuid(s: &str) -> bool {
    s.len() == 36
        && s.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

pub fn is_valid(id: &str) -> bool {
    validate(id).is_ok()
}

/// Extract the correlation id from an inbound header map, accepting
/// `x-correlation-id` or `x-request-id` in any casing. Mints a fresh id
/// when neither is present.
pub fn extract_or_generate(headers: &HashMap<String, String>) -> String {
    extract(headers).unwrap_or_else(|| generate(None))
}

/// Extract the correlation id if one was propagated.
pub fn extract(headers: &HashMap<String, String>) -> Option<String> {
    lookup(headers, CORRELATION_ID_HEADER)
        .or_else(|| lookup(headers, REQUEST_ID_HEADER))
        .filter(|id| is_valid(id))
}

/// Extract the propagated trace id, if any.
pub fn extract_trace_id(headers: &HashMap<String, String>) -> Option<Uuid> {
    lookup(headers, TRACE_ID_HEADER).and_then(|v| Uuid::parse_str(&v).ok())
}

/// Write the propagation headers onto an outbound header map. The
/// correlation id is mirrored into both header names so either convention
/// on the receiving side picks it up.
pub fn inject(headers: &mut HashMap<String, String>, correlation_id: &str, trace_id: Uuid) {
    headers.insert(CORRELATION_ID_HEADER.to_string(), correlation_id.to_string());
    headers.insert(REQUEST_ID_HEADER.to_string(), correlation_id.to_string());
    headers.insert(TRACE_ID_HEADER.to_string(), trace_id.to_string());
}

fn lookup(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers.iter().find_map(|(k, v)| {
        if k.eq_ignore_ascii_case(name) && !v.is_empty() {
            Some(v.clone())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_bare_id_is_valid_uuid() {
        let id = generate(None);
        assert!(is_valid(&id));
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_generate_prefixed_id() {
        let id = generate(Some("checkout"));
        assert!(id.starts_with("checkout_"));
        assert!(is_valid(&id));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(validate("not-a-uuid").is_err());
        assert!(validate("checkout_not-a-uuid").is_err());
        assert!(validate("").is_err());
    }

    #[test]
    fn test_validate_requires_hyphen_grouping() {
        assert!(validate("936da01f-9abd-4d9d-80c7-02af85c822a8").is_ok());
        assert!(validate("checkout_936da01f-9abd-4d9d-80c7-02af85c822a8").is_ok());

        // Alternate UUID encodings are rejected: only the canonical
        // 8-4-4-4-12 layout travels on the wire
        assert!(validate("936da01f9abd4d9d80c702af85c822a8").is_err());
        assert!(validate("{936da01f-9abd-4d9d-80c7-02af85c822a8}").is_err());
        assert!(validate("urn:uuid:936da01f-9abd-4d9d-80c7-02af85c822a8").is_err());
        assert!(validate("checkout_936da01f9abd4d9d80c702af85c822a8").is_err());
    }

    #[test]
    fn test_extract_is_case_insensitive() {
        let id = generate(None);
        let mut headers = HashMap::new();
        headers.insert("X-Correlation-ID".to_string(), id.clone());
        assert_eq!(extract(&headers), Some(id));
    }

    #[test]
    fn test_extract_falls_back_to_request_id() {
        let id = generate(Some("api"));
        let mut headers = HashMap::new();
        headers.insert("X-Request-Id".to_string(), id.clone());
        assert_eq!(extract(&headers), Some(id));
    }

    #[test]
    fn test_extract_or_generate_mints_when_absent() {
        let headers = HashMap::new();
        let id = extract_or_generate(&headers);
        assert!(is_valid(&id));
    }

    #[test]
    fn test_extract_ignores_invalid_propagated_id() {
        let mut headers = HashMap::new();
        headers.insert("x-correlation-id".to_string(), "bogus".to_string());
        assert_eq!(extract(&headers), None);
        assert!(is_valid(&extract_or_generate(&headers)));
    }

    #[test]
    fn test_inject_round_trip() {
        let trace_id = Uuid::new_v4();
        let correlation_id = generate(None);
        let mut headers = HashMap::new();
        inject(&mut headers, &correlation_id, trace_id);

        assert_eq!(extract(&headers), Some(correlation_id.clone()));
        assert_eq!(headers.get(REQUEST_ID_HEADER), Some(&correlation_id));
        assert_eq!(extract_trace_id(&headers), Some(trace_id));
    }
}
