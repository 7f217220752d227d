//! Offline Verifier (§4.5): the seven-step, order-sensitive check that turns
//! a cached `OfflineToken` into a `ValidationResult` without contacting the
//! server.
//!
//! Pure function of its inputs — no Cache Store access here, the Session
//! Core resolves the license/token/public-key/clock-anchor from the cache
//! and passes them in. That keeps the hardest algorithm in the codebase
//! independently testable against the literal scenarios in the spec (S2-S4, S7).

use base64::engine::general_purpose::{STANDARD as B64_STD, URL_SAFE_NO_PAD as B64_URL};
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use subtle::ConstantTimeEq;

use crate::errors::{CryptoError, Error, Result};
use crate::model::{ClockAnchor, Entitlement, License, OfflineToken, PublicKey, ValidationResult};

/// Inputs the verifier needs; all resolved ahead of time by the caller.
pub struct VerifyInputs<'a> {
    pub license: Option<&'a License>,
    pub token: Option<&'a OfflineToken>,
    pub public_key: Option<&'a PublicKey>,
    pub clock_anchor: Option<ClockAnchor>,
    pub max_offline_days: u32,
    pub max_clock_skew_secs: i64,
    pub now_unix: i64,
}

/// Outcome of a verification pass: the verdict, plus an updated clock anchor
/// when verification reached step 7 (commit).
pub struct VerifyOutcome {
    pub result: ValidationResult,
    pub new_clock_anchor: Option<ClockAnchor>,
}

fn failure(reason_code: &str) -> VerifyOutcome {
    VerifyOutcome {
        result: ValidationResult {
            valid: false,
            offline: true,
            reason_code: Some(reason_code.to_string()),
            ..ValidationResult::default()
        },
        new_clock_anchor: None,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Run the seven-step offline verification algorithm.
///
/// Ordinary failures (absence, mismatch, expiry, tamper) are returned as an
/// `Ok` outcome carrying `valid=false` and a `reason_code` — they are
/// expected verdicts, not exceptional conditions. Only malformed signature
/// material or a library-level crypto failure is returned as `Err`.
pub fn verify(inputs: VerifyInputs<'_>) -> Result<VerifyOutcome> {
    // 1. Presence
    let license = match inputs.license {
        Some(license) => license,
        None => return Ok(failure("no_license")),
    };
    let token = match inputs.token {
        Some(token) => token,
        None => return Ok(failure("no_offline_token")),
    };

    // 2. Binding
    if !constant_time_eq(&token.token.license_key, &license.key) {
        return Ok(failure("license_mismatch"));
    }

    // 3. Expiry / grace period
    if token.token.exp > 0 && token.token.exp < inputs.now_unix {
        return Ok(failure("expired"));
    }
    if token.token.exp == 0 && inputs.max_offline_days > 0 {
        let anchor = license.grace_anchor().timestamp();
        let age_days = (inputs.now_unix - anchor) / 86_400;
        if age_days > inputs.max_offline_days as i64 {
            return Ok(failure("grace_period_expired"));
        }
    }

    // 4. Not-yet-valid
    if token.token.nbf > 0 && token.token.nbf > inputs.now_unix {
        return Ok(failure("not_yet_valid"));
    }

    // 5. Clock tamper
    if let Some(anchor) = inputs.clock_anchor {
        if inputs.now_unix + inputs.max_clock_skew_secs < anchor.last_seen_unix {
            return Ok(failure("clock_tamper"));
        }
    }

    // 6. Signature
    let key_id = if token.token.kid.is_empty() { &token.signature.key_id } else { &token.token.kid };
    match inputs.public_key {
        None => {
            tracing::warn!(key_id = %key_id, "no pinned public key, skipping signature check");
        }
        Some(public_key) => {
            verify_signature(token, public_key)?;
        }
    }

    // 7. Commit
    let active_entitlements = token.token.entitlements.as_ref().map(|entitlements| {
        entitlements
            .iter()
            .filter(|e| !e.key.is_empty())
            .map(|e| Entitlement {
                key: e.key.clone(),
                name: None,
                expires_at: e.expires_at.and_then(|secs| {
                    chrono::DateTime::from_timestamp(secs, 0)
                }),
                metadata: None,
            })
            .collect::<Vec<_>>()
    });

    Ok(VerifyOutcome {
        result: ValidationResult {
            valid: true,
            offline: true,
            active_entitlements,
            ..ValidationResult::default()
        },
        new_clock_anchor: Some(ClockAnchor { last_seen_unix: inputs.now_unix }),
    })
}

fn verify_signature(token: &OfflineToken, public_key: &PublicKey) -> Result<()> {
    let signature_bytes = B64_URL
        .decode(token.signature.value.as_bytes())
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let signature_bytes: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&signature_bytes);

    let key_bytes = B64_STD
        .decode(public_key.public_key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    verifying_key
        .verify(token.canonical.as_bytes(), &signature)
        .map_err(|_| Error::Crypto(CryptoError::SignatureInvalid))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LicenseStatus, OfflineTokenBody, OfflineTokenSignature};
    use chrono::Utc;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use rand::TryRngCore;

    fn test_license(key: &str) -> License {
        License {
            key: key.to_string(),
            device_id: "dev".to_string(),
            status: LicenseStatus::Active,
            plan_key: None,
            seat_limit: None,
            active_seats: None,
            starts_at: None,
            ends_at: None,
            mode: None,
            active_entitlements: vec![],
            activated_at: Utc::now(),
            last_validated: Some(Utc::now()),
            validation: None,
        }
    }

    fn signed_token(license_key: &str, exp: i64, nbf: i64, signing_key: &SigningKey) -> OfflineToken {
        let body = OfflineTokenBody {
            license_key: license_key.to_string(),
            product_slug: "p".to_string(),
            iat: Utc::now().timestamp(),
            exp,
            nbf,
            kid: "kid1".to_string(),
            schema_version: 1,
            mode: None,
            plan_key: None,
            entitlements: None,
        };
        let canonical = serde_json::to_string(&body).unwrap();
        let signature = signing_key.sign(canonical.as_bytes());
        OfflineToken {
            token: body,
            signature: OfflineTokenSignature {
                algorithm: "ed25519".to_string(),
                key_id: "kid1".to_string(),
                value: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature.to_bytes()),
            },
            canonical,
        }
    }

    fn keypair() -> SigningKey {
        let mut seed = [0u8; 32];
        OsRng.try_fill_bytes(&mut seed).unwrap();
        SigningKey::from_bytes(&seed)
    }

    fn pinned_key(signing_key: &SigningKey) -> PublicKey {
        PublicKey {
            key_id: "kid1".to_string(),
            public_key: base64::engine::general_purpose::STANDARD
                .encode(signing_key.verifying_key().to_bytes()),
            algorithm: "ed25519".to_string(),
        }
    }

    #[test]
    fn s2_valid_offline_token_verifies_and_advances_clock_anchor() {
        let signing_key = keypair();
        let license = test_license("K");
        let now = Utc::now().timestamp();
        let token = signed_token("K", now + 3600, now - 60, &signing_key);
        let public_key = pinned_key(&signing_key);

        let outcome = verify(VerifyInputs {
            license: Some(&license),
            token: Some(&token),
            public_key: Some(&public_key),
            clock_anchor: None,
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            now_unix: now,
        })
        .unwrap();

        assert!(outcome.result.valid);
        assert!(outcome.result.offline);
        assert_eq!(outcome.new_clock_anchor.unwrap().last_seen_unix, now);
    }

    #[test]
    fn s3_tampered_canonical_fails_signature_check() {
        let signing_key = keypair();
        let license = test_license("K");
        let now = Utc::now().timestamp();
        let mut token = signed_token("K", now + 3600, now - 60, &signing_key);
        token.canonical = token.canonical.replace("\"K\"", "\"X\"");
        let public_key = pinned_key(&signing_key);

        let err = verify(VerifyInputs {
            license: Some(&license),
            token: Some(&token),
            public_key: Some(&public_key),
            clock_anchor: None,
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            now_unix: now,
        })
        .unwrap_err();

        assert_eq!(err.reason_code(), "signature_invalid");
    }

    #[test]
    fn s4_clock_rollback_is_detected_as_tamper() {
        let signing_key = keypair();
        let license = test_license("K");
        let now = Utc::now().timestamp();
        let token = signed_token("K", now + 3600, 0, &signing_key);
        let public_key = pinned_key(&signing_key);
        let anchor = ClockAnchor { last_seen_unix: now };
        let rolled_back_now = now - 7 * 86_400;

        let outcome = verify(VerifyInputs {
            license: Some(&license),
            token: Some(&token),
            public_key: Some(&public_key),
            clock_anchor: Some(anchor),
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            now_unix: rolled_back_now,
        })
        .unwrap();

        assert_eq!(outcome.result.reason_code.as_deref(), Some("clock_tamper"));
    }

    #[test]
    fn s7_grace_period_expiry_without_explicit_exp() {
        let signing_key = keypair();
        let mut license = test_license("K");
        let now = Utc::now();
        license.last_validated = Some(now - chrono::Duration::days(10));
        let token = signed_token("K", 0, 0, &signing_key);
        let public_key = pinned_key(&signing_key);

        let outcome = verify(VerifyInputs {
            license: Some(&license),
            token: Some(&token),
            public_key: Some(&public_key),
            clock_anchor: None,
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            now_unix: now.timestamp(),
        })
        .unwrap();

        assert_eq!(outcome.result.reason_code.as_deref(), Some("grace_period_expired"));
    }

    #[test]
    fn missing_license_fails_presence_check() {
        let signing_key = keypair();
        let token = signed_token("K", 0, 0, &signing_key);
        let outcome = verify(VerifyInputs {
            license: None,
            token: Some(&token),
            public_key: None,
            clock_anchor: None,
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            now_unix: Utc::now().timestamp(),
        })
        .unwrap();
        assert_eq!(outcome.result.reason_code.as_deref(), Some("no_license"));
    }

    #[test]
    fn missing_token_fails_presence_check() {
        let license = test_license("K");
        let outcome = verify(VerifyInputs {
            license: Some(&license),
            token: None,
            public_key: None,
            clock_anchor: None,
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            now_unix: Utc::now().timestamp(),
        })
        .unwrap();
        assert_eq!(outcome.result.reason_code.as_deref(), Some("no_offline_token"));
    }

    #[test]
    fn mismatched_license_key_fails_binding_check() {
        let signing_key = keypair();
        let license = test_license("OTHER");
        let token = signed_token("K", 0, 0, &signing_key);
        let outcome = verify(VerifyInputs {
            license: Some(&license),
            token: Some(&token),
            public_key: None,
            clock_anchor: None,
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            now_unix: Utc::now().timestamp(),
        })
        .unwrap();
        assert_eq!(outcome.result.reason_code.as_deref(), Some("license_mismatch"));
    }

    #[test]
    fn missing_pinned_key_skips_signature_check_without_failing() {
        let signing_key = keypair();
        let license = test_license("K");
        let now = Utc::now().timestamp();
        let token = signed_token("K", now + 3600, 0, &signing_key);

        let outcome = verify(VerifyInputs {
            license: Some(&license),
            token: Some(&token),
            public_key: None,
            clock_anchor: None,
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            now_unix: now,
        })
        .unwrap();

        assert!(outcome.result.valid);
    }
}
