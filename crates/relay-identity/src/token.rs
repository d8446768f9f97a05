use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use relay_core::config::AuthConfig;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{IdentityError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Claims embedded in a bearer token.
///
/// Wire shape: `v<key-id>.<base64url(claims json)>.<base64url(hmac)>`.
/// The signature covers everything before the final dot, so the key id is
/// authenticated too, so a forged key id cannot redirect verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Session UUID.
    pub sid: String,
    /// User UUID.
    pub uid: String,
    /// Unix seconds.
    pub iat: i64,
    pub exp: i64,
}

/// Sign claims under the config's active key.
pub fn sign(claims: &Claims, auth: &AuthConfig) -> Result<String> {
    let secret = auth
        .key_secret(auth.active_key_id)
        .ok_or(IdentityError::TokenInvalid)?;
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).map_err(|_| {
        IdentityError::Hash("claims serialization failed".to_string())
    })?);
    let signing_input = format!("v{}.{}", auth.active_key_id, payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| IdentityError::Hash(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, sig))
}

/// Verify a bearer token and return its claims.
///
/// Only the key named in the envelope is tried; an unknown key id fails
/// closed. Signature comparison is constant-time (`Mac::verify_slice`),
/// and expiry is only checked after the signature holds so the two failure
/// modes are not distinguishable by timing before authentication.
pub fn verify(token: &str, auth: &AuthConfig, now_unix: i64) -> Result<Claims> {
    let mut parts = token.splitn(3, '.');
    let (version, payload, sig) = match (parts.next(), parts.next(), parts.next()) {
        (Some(v), Some(p), Some(s)) => (v, p, s),
        _ => return Err(IdentityError::TokenInvalid),
    };

    let key_id: u32 = version
        .strip_prefix('v')
        .and_then(|s| s.parse().ok())
        .ok_or(IdentityError::TokenInvalid)?;
    let secret = auth.key_secret(key_id).ok_or(IdentityError::TokenInvalid)?;

    let signing_input = format!("{}.{}", version, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| IdentityError::Hash(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|_| IdentityError::TokenInvalid)?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| IdentityError::TokenInvalid)?;

    let claims: Claims = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| IdentityError::TokenInvalid)?,
    )
    .map_err(|_| IdentityError::TokenInvalid)?;

    if claims.exp <= now_unix {
        return Err(IdentityError::TokenExpired);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::config::SigningKey;

    fn auth() -> AuthConfig {
        AuthConfig {
            signing_keys: vec![
                SigningKey { id: 1, secret: "old-secret-0123456789abcdef".into() },
                SigningKey { id: 2, secret: "new-secret-fedcba9876543210".into() },
            ],
            active_key_id: 2,
            ..Default::default()
        }
    }

    fn claims(exp: i64) -> Claims {
        Claims {
            sid: "s-1".into(),
            uid: "u-1".into(),
            iat: 1_000,
            exp,
        }
    }

    #[test]
    fn sign_verify_round_trip() {
        let auth = auth();
        let token = sign(&claims(2_000), &auth).unwrap();
        assert!(token.starts_with("v2."));
        let got = verify(&token, &auth, 1_500).unwrap();
        assert_eq!(got, claims(2_000));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let auth = auth();
        let token = sign(&claims(2_000), &auth).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sid":"s-1","uid":"u-999","iat":1000,"exp":2000}"#);
        parts[1] = &forged;
        let forged_token = parts.join(".");
        assert!(matches!(
            verify(&forged_token, &auth, 1_500),
            Err(IdentityError::TokenInvalid)
        ));
    }

    #[test]
    fn old_key_still_verifies_until_dropped() {
        let mut issue_auth = auth();
        issue_auth.active_key_id = 1;
        let token = sign(&claims(2_000), &issue_auth).unwrap();

        // Verifier runs with key 2 active but key 1 still in the table.
        let got = verify(&token, &auth(), 1_500).unwrap();
        assert_eq!(got.sid, "s-1");

        // Once key 1 is dropped from the table the token dies.
        let mut rotated = auth();
        rotated.signing_keys.retain(|k| k.id != 1);
        assert!(matches!(
            verify(&token, &rotated, 1_500),
            Err(IdentityError::TokenInvalid)
        ));
    }

    #[test]
    fn expiry_checked_after_signature() {
        let auth = auth();
        let token = sign(&claims(1_400), &auth).unwrap();
        assert!(matches!(
            verify(&token, &auth, 1_500),
            Err(IdentityError::TokenExpired)
        ));
        // Same token with a bad signature reports invalid, not expired.
        let broken = format!("{}x", token);
        assert!(matches!(
            verify(&broken, &auth, 1_500),
            Err(IdentityError::TokenInvalid)
        ));
    }
}
