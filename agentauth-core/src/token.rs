//! Agent Authorization Tokens (AAT)
//!
//! A compact, self-contained credential binding an agent identity, its
//! delegator, an audience, a scope set, and an embedded delegation chain.
//!
//! Wire format (ASCII, four dot-joined base64url segments):
//!
//! ```text
//! base64url(JSON header) . base64url(JSON claims) . base64url(JSON chain) . base64url(signature)
//! ```
//!
//! The signature covers the UTF-8 bytes of the first three encoded
//! segments joined by dots. Verification is a strictly ordered gate:
//! the signature is checked before any other claim is trusted.

use crate::delegation::DelegationChain;
use crate::error::{AgentAuthError, Result};
use crate::identity::{did_to_public_key, Identity};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use ed25519_compact::Signature;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};

/// Signing algorithm tag carried in the token header
pub const AAT_ALG: &str = "EdDSA";

/// Token type tag carried in the token header
pub const AAT_TYP: &str = "AAT";

/// Default token lifetime when the caller does not pick one
pub const DEFAULT_TOKEN_TTL: &str = "1h";

/// Replay-nonce entropy (bytes, before hex encoding)
const NONCE_BYTES: usize = 16;

/// Token header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AatHeader {
    /// Signing algorithm tag
    pub alg: String,

    /// Token type tag
    pub typ: String,

    /// Key identifier, `<issuer did>#keys-1`
    pub kid: String,
}

/// The `act` sub-claim restating the acting agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActClaim {
    /// Acting agent DID (duplicate of `iss`)
    pub sub: String,
}

/// Token claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AatClaims {
    /// Issuer: the acting agent's DID
    pub iss: String,

    /// Subject: the delegator principal's DID
    pub sub: String,

    /// Audience the token is bound to
    pub aud: String,

    /// Issued-at, Unix seconds
    pub iat: i64,

    /// Expiry, Unix seconds
    pub exp: i64,

    /// Hex-encoded replay nonce
    pub nonce: String,

    /// Granted scope strings
    pub scope: Vec<String>,

    /// Actor sub-claim
    pub act: ActClaim,
}

/// Options for base token verification
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Require exact equality with the token's `aud` claim
    pub audience: Option<String>,

    /// Require every listed scope to be granted (exact string membership)
    pub required_scopes: Option<Vec<String>>,
}

impl VerifyOptions {
    /// Options with no audience or scope requirement
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an audience
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Require scopes
    pub fn with_required_scopes(mut self, scopes: Vec<String>) -> Self {
        self.required_scopes = Some(scopes);
        self
    }
}

/// A decoded, signature-checked token
///
/// Self-contained: holds only serialized claim data, no live reference to
/// the identity or delegations that produced it. Base verification
/// guarantees the token's own signature, expiry, audience and scope claims;
/// delegation-chain proofs and constraints are enforced separately by the
/// [`crate::verification`] layer.
#[derive(Debug, Clone)]
pub struct Aat {
    header: AatHeader,
    claims: AatClaims,
    delegation_chain: DelegationChain,
    raw: String,
}

impl Aat {
    /// The acting agent's DID (`iss`)
    pub fn agent(&self) -> &str {
        &self.claims.iss
    }

    /// The delegator principal's DID (`sub`)
    pub fn delegator(&self) -> &str {
        &self.claims.sub
    }

    /// The audience the token is bound to (`aud`)
    pub fn audience(&self) -> &str {
        &self.claims.aud
    }

    /// Granted scopes
    pub fn scopes(&self) -> &[String] {
        &self.claims.scope
    }

    /// Whether a scope was granted (exact string membership)
    pub fn has_scope(&self, scope: &str) -> bool {
        self.claims.scope.iter().any(|s| s == scope)
    }

    /// Embedded delegation chain, root grant first
    pub fn delegation_chain(&self) -> &DelegationChain {
        &self.delegation_chain
    }

    /// Decoded header
    pub fn header(&self) -> &AatHeader {
        &self.header
    }

    /// Decoded claims
    pub fn claims(&self) -> &AatClaims {
        &self.claims
    }

    /// The encoded form this token was verified from
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Parse a token lifetime of the form `<count><unit>`
///
/// Unit is one of `s`, `m`, `h`, `d`; the count is a positive integer.
/// Returns the lifetime in seconds.
pub fn parse_duration(input: &str) -> Result<i64> {
    let bad = || AgentAuthError::InvalidDurationFormat(input.to_string());

    if input.len() < 2 {
        return Err(bad());
    }

    let (count_str, unit) = input.split_at(input.len() - 1);
    let multiplier: i64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(bad()),
    };

    if !count_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }

    let count: i64 = count_str.parse().map_err(|_| bad())?;
    if count == 0 {
        return Err(bad());
    }

    count.checked_mul(multiplier).ok_or_else(bad)
}

/// Issue a signed token
///
/// The identity is the acting agent; `delegator_did` is the principal the
/// agent acts for; the chain embeds the delegations backing that claim
/// (may be empty when policy does not require one).
pub fn issue(
    identity: &Identity,
    delegator_did: &str,
    audience: &str,
    scopes: Vec<String>,
    delegation_chain: &DelegationChain,
    expires_in: &str,
) -> Result<String> {
    let lifetime = parse_duration(expires_in)?;
    let iat = Utc::now().timestamp();

    let header = AatHeader {
        alg: AAT_ALG.to_string(),
        typ: AAT_TYP.to_string(),
        kid: format!("{}#keys-1", identity.did()),
    };

    let claims = AatClaims {
        iss: identity.did().to_string(),
        sub: delegator_did.to_string(),
        aud: audience.to_string(),
        iat,
        exp: iat + lifetime,
        nonce: fresh_nonce()?,
        scope: scopes,
        act: ActClaim {
            sub: identity.did().to_string(),
        },
    };

    let signing_input = format!(
        "{}.{}.{}",
        encode_segment(&header)?,
        encode_segment(&claims)?,
        encode_segment(delegation_chain)?
    );

    let signature = identity.sign(signing_input.as_bytes());

    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature.as_ref())
    ))
}

/// Verify a token string
///
/// Sequential gate, short-circuits on the first failure:
/// segment count, segment decoding, signature (against the key recovered
/// from the claimed issuer DID), expiry, audience, required scopes.
pub fn verify(raw: &str, options: &VerifyOptions) -> Result<Aat> {
    let segments: Vec<&str> = raw.split('.').collect();

    let [header_b64, claims_b64, chain_b64, sig_b64] = segments.as_slice() else {
        return Err(AgentAuthError::MalformedToken(format!(
            "expected 4 segments, got {}",
            segments.len()
        )));
    };

    let header: AatHeader = decode_segment(header_b64, "header")?;
    let claims: AatClaims = decode_segment(claims_b64, "claims")?;
    let delegation_chain: DelegationChain = decode_segment(chain_b64, "delegation chain")?;

    // Signature gate: nothing beyond this point runs until the token is
    // proven to come from the claimed issuer.
    let public_key = did_to_public_key(&claims.iss)?;

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|e| AgentAuthError::MalformedToken(format!("signature base64: {}", e)))?;
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| AgentAuthError::InvalidSignature)?;

    let signing_input = format!("{}.{}.{}", header_b64, claims_b64, chain_b64);
    public_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| AgentAuthError::InvalidSignature)?;

    let now = Utc::now().timestamp();
    if claims.exp < now {
        return Err(AgentAuthError::TokenExpired {
            expired_at: claims.exp,
        });
    }

    if let Some(expected) = options.audience.as_deref() {
        if claims.aud != expected {
            return Err(AgentAuthError::AudienceMismatch {
                expected: expected.to_string(),
                actual: claims.aud.clone(),
            });
        }
    }

    if let Some(required) = options.required_scopes.as_deref() {
        for scope in required {
            if !claims.scope.iter().any(|s| s == scope) {
                return Err(AgentAuthError::InsufficientScope {
                    missing: scope.clone(),
                });
            }
        }
    }

    Ok(Aat {
        header,
        claims,
        delegation_chain,
        raw: raw.to_string(),
    })
}

fn fresh_nonce() -> Result<String> {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AgentAuthError::EntropyError(e.to_string()))?;
    Ok(hex::encode(bytes))
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| AgentAuthError::MalformedToken(format!("serialization failed: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AgentAuthError::MalformedToken(format!("{} base64: {}", what, e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AgentAuthError::MalformedToken(format!("{} JSON: {}", what, e)))
}
