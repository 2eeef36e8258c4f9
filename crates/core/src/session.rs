//! Signed bearer tokens binding an actor id to an expiry.
//!
//! Token layout: `<actor_id>.<expires_unix>.<hmac_sha256_hex>`, where the MAC
//! covers `<actor_id>.<expires_unix>`.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session token is malformed")]
    Malformed,
    #[error("session token signature does not match")]
    BadSignature,
    #[error("session token expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("session signing key is unusable")]
    InvalidKey,
    #[error("session lifetime does not fit in a timestamp")]
    LifetimeOverflow,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionClaims {
    pub actor_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionIssuer {
    secret: SecretString,
    ttl: Duration,
}

impl std::fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIssuer").field("secret", &"[redacted]").field("ttl", &self.ttl).finish()
    }
}

impl SessionIssuer {
    pub fn new(secret: SecretString, ttl_secs: u64) -> Self {
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self { secret, ttl }
    }

    pub fn issue(&self, actor_id: &str, now: DateTime<Utc>) -> Result<String, SessionError> {
        if actor_id.is_empty() {
            return Err(SessionError::Malformed);
        }
        let expires_at =
            now.checked_add_signed(self.ttl).ok_or(SessionError::LifetimeOverflow)?;
        let material = format!("{actor_id}.{}", expires_at.timestamp());
        let signature = encode_hex(&self.mac(material.as_bytes())?.finalize().into_bytes());
        Ok(format!("{material}.{signature}"))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let mut parts = token.trim().rsplitn(3, '.');
        let signature = parts.next().ok_or(SessionError::Malformed)?;
        let expires = parts.next().ok_or(SessionError::Malformed)?;
        let actor_id = parts.next().filter(|id| !id.is_empty()).ok_or(SessionError::Malformed)?;

        let signature = decode_hex(signature).ok_or(SessionError::Malformed)?;
        let material = format!("{actor_id}.{expires}");
        self.mac(material.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        let expires_unix: i64 = expires.parse().map_err(|_| SessionError::Malformed)?;
        let expires_at =
            DateTime::<Utc>::from_timestamp(expires_unix, 0).ok_or(SessionError::Malformed)?;
        if expires_at <= now {
            return Err(SessionError::Expired(expires_at));
        }

        Ok(SessionClaims { actor_id: actor_id.to_owned(), expires_at })
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256, SessionError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| SessionError::InvalidKey)?;
        mac.update(payload);
        Ok(mac)
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 || !value.is_ascii() {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&value[index..index + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use secrecy::SecretString;

    use super::{SessionError, SessionIssuer};

    fn issuer() -> SessionIssuer {
        SessionIssuer::new(SecretString::from("0123456789abcdef0123456789abcdef".to_owned()), 3600)
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn issued_token_verifies_until_expiry() {
        let token = issuer().issue("adv.kumar", now()).expect("token issues");

        let claims = issuer().verify(&token, now() + Duration::minutes(59)).expect("token verifies");
        assert_eq!(claims.actor_id, "adv.kumar");

        let expired = issuer().verify(&token, now() + Duration::hours(2)).expect_err("expired");
        assert!(matches!(expired, SessionError::Expired(_)));
    }

    #[test]
    fn tampered_actor_id_fails_signature_check() {
        let token = issuer().issue("stu-1", now()).expect("token issues");
        let forged = token.replacen("stu-1", "hod-1", 1);

        assert_eq!(issuer().verify(&forged, now()), Err(SessionError::BadSignature));
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let other = SessionIssuer::new(SecretString::from("ffffffffffffffffffffffffffffffff".to_owned()), 3600);
        let token = other.issue("stu-1", now()).expect("token issues");

        assert_eq!(issuer().verify(&token, now()), Err(SessionError::BadSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(issuer().verify("not-a-token", now()), Err(SessionError::Malformed));
        assert_eq!(issuer().verify("a.b.zz", now()), Err(SessionError::Malformed));
    }

    #[test]
    fn oversized_lifetime_is_an_error_not_a_panic() {
        let issuer = SessionIssuer::new(
            SecretString::from("0123456789abcdef0123456789abcdef".to_owned()),
            1_000_000_000_000_000,
        );

        assert_eq!(issuer.issue("stu-1", now()), Err(SessionError::LifetimeOverflow));

        let forever = SessionIssuer::new(
            SecretString::from("0123456789abcdef0123456789abcdef".to_owned()),
            u64::MAX,
        );
        assert_eq!(forever.issue("stu-1", now()), Err(SessionError::LifetimeOverflow));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", issuer());
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
