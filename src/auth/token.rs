//! Offline bearer-token claim decoding.
//!
//! Tokens are dot-delimited; the second segment is base64url-encoded JSON
//! carrying an `exp` claim in epoch seconds. The signature is never checked
//! here: the server is the only party that can validate a token, the client
//! only needs the expiry to avoid presenting a credential it knows is dead.

use crate::error::DecodeError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// `exp` claim, seconds since the Unix epoch.
    #[serde(rename = "exp")]
    pub expires_at_epoch_seconds: i64,
    /// Every other claim, untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Decode the claims of `token` without touching the network.
pub fn decode(token: &str) -> Result<Claims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() < 2 {
        return Err(DecodeError::SegmentCount {
            found: segments.len(),
        });
    }

    // Issuers differ on padding; accept both forms.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Payload(e.to_string()))?;
    let mut map = match value {
        serde_json::Value::Object(map) => map,
        other => return Err(DecodeError::Payload(format!("expected object, got {other}"))),
    };

    let exp = map
        .remove("exp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64)))
        .ok_or(DecodeError::MissingExpiry)?;

    Ok(Claims {
        expires_at_epoch_seconds: exp,
        extra: map,
    })
}

/// True iff `exp * 1000 <= now_millis`.
pub fn is_expired(claims: &Claims, now_millis: i64) -> bool {
    claims.expires_at_epoch_seconds.saturating_mul(1000) <= now_millis
}

/// Build an unsigned token with the given claims. Only meant for tests and
/// local simulations; the real issuer lives server-side.
pub fn encode_unsigned(claims: &Claims) -> Result<String, serde_json::Error> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = serde_json::to_vec(claims)?;
    Ok(format!("{header}.{}.", URL_SAFE_NO_PAD.encode(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn claims_with_exp(exp: i64) -> Claims {
        Claims {
            expires_at_epoch_seconds: exp,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn fresh_token_is_not_expired() {
        let token = encode_unsigned(&claims_with_exp(NOW / 1000 + 3600)).unwrap();
        let claims = decode(&token).unwrap();
        assert_eq!(claims.expires_at_epoch_seconds, NOW / 1000 + 3600);
        assert!(!is_expired(&claims, NOW));
    }

    #[test]
    fn stale_token_is_expired() {
        let token = encode_unsigned(&claims_with_exp(NOW / 1000 - 1)).unwrap();
        let claims = decode(&token).unwrap();
        assert!(is_expired(&claims, NOW));
    }

    #[test]
    fn expiry_boundary_counts_as_expired() {
        assert!(is_expired(&claims_with_exp(NOW / 1000), NOW));
        assert!(!is_expired(&claims_with_exp(NOW / 1000), NOW - 1));
    }

    #[test]
    fn extra_claims_are_kept() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"exp":10,"sub":"42","role":"secretary"}"#);
        let claims = decode(&format!("h.{payload}.s")).unwrap();
        assert_eq!(claims.extra["sub"], "42");
        assert_eq!(claims.extra["role"], "secretary");
        assert!(!claims.extra.contains_key("exp"));
    }

    #[test]
    fn padded_payload_is_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":10}"#);
        assert!(payload.ends_with('='));
        assert_eq!(decode(&format!("h.{payload}")).unwrap().expires_at_epoch_seconds, 10);
    }

    #[test]
    fn single_segment_is_rejected() {
        assert_eq!(
            decode("opaque-token"),
            Err(DecodeError::SegmentCount { found: 1 })
        );
    }

    #[test]
    fn bad_base64_is_rejected() {
        assert!(matches!(decode("h.!!!.s"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let payload = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        assert!(matches!(
            decode(&format!("h.{payload}.s")),
            Err(DecodeError::Payload(_))
        ));
    }

    #[test]
    fn missing_or_textual_exp_is_rejected() {
        let none = URL_SAFE_NO_PAD.encode(br#"{"sub":"1"}"#);
        assert_eq!(decode(&format!("h.{none}.s")), Err(DecodeError::MissingExpiry));

        let text = URL_SAFE_NO_PAD.encode(br#"{"exp":"tomorrow"}"#);
        assert_eq!(decode(&format!("h.{text}.s")), Err(DecodeError::MissingExpiry));
    }
}
