//! Upstream identity (spec §4.10, §9 "Keypair vs. token auth"). Selection
//! is driven by `TOKEN_SECRET`'s presence: both paths produce the same
//! `identity` envelope shape downstream of this module.

use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct BoatClaims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// Issues a short-lived HS256 token identifying this boat server to the
/// cloud relay (used to build `?token=` on the upstream WebSocket URL).
pub fn issue_jwt(secret: &str, boat_id: &str, expiry: std::time::Duration) -> Result<String> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = BoatClaims { sub: boat_id.to_string(), iat: now, exp: now + expiry.as_secs() };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| RelayError::AuthFailed(e.to_string()))
}

pub fn verify_jwt(secret: &str, token: &str) -> Result<BoatClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    decode::<BoatClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| RelayError::AuthFailed(e.to_string()))
}

/// Produces `signature = base64(RSA-SHA256(privateKey, boatId + ":" + timestamp))`
/// for the keypair-auth `identity` envelope (spec §4.10 step 3).
pub fn sign_identity(private_key_pem: &str, boat_id: &str, timestamp_ms: i64) -> Result<String> {
    use ring::rand::SystemRandom;
    use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};

    let der = pem_to_der(private_key_pem, "PRIVATE KEY")
        .ok_or_else(|| RelayError::AuthFailed("malformed PEM private key".into()))?;
    let key_pair =
        RsaKeyPair::from_pkcs8(&der).map_err(|e| RelayError::AuthFailed(format!("invalid private key: {e}")))?;

    let message = format!("{boat_id}:{timestamp_ms}");
    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(&RSA_PKCS1_SHA256, &SystemRandom::new(), message.as_bytes(), &mut signature)
        .map_err(|e| RelayError::AuthFailed(format!("signing failed: {e}")))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(signature))
}

/// Verifies an identity signature against a PEM public key, for operators
/// who terminate the upstream relay themselves in tests.
pub fn verify_identity(public_key_pem: &str, boat_id: &str, timestamp_ms: i64, signature_b64: &str) -> Result<()> {
    use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};

    let der = pem_to_der(public_key_pem, "PUBLIC KEY")
        .ok_or_else(|| RelayError::AuthFailed("malformed PEM public key".into()))?;
    let signature = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|e| RelayError::AuthFailed(e.to_string()))?;
    let message = format!("{boat_id}:{timestamp_ms}");

    let key = UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, &der);
    key.verify(message.as_bytes(), &signature).map_err(|_| RelayError::AuthFailed("signature mismatch".into()))
}

fn pem_to_der(pem: &str, label: &str) -> Option<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let body: String = pem
        .lines()
        .skip_while(|l| !l.contains(&begin))
        .skip(1)
        .take_while(|l| !l.contains(&end))
        .collect();
    base64::engine::general_purpose::STANDARD.decode(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trips() {
        let token = issue_jwt("shared-secret", "boat-1", std::time::Duration::from_secs(60)).unwrap();
        let claims = verify_jwt("shared-secret", &token).unwrap();
        assert_eq!(claims.sub, "boat-1");
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let token = issue_jwt("shared-secret", "boat-1", std::time::Duration::from_secs(60)).unwrap();
        assert!(verify_jwt("other-secret", &token).is_err());
    }
}
