//! Agent Identity
//!
//! An Ed25519 keypair plus the self-certifying DID derived from its public
//! key. Identities sign raw byte buffers; anyone holding the DID can verify.

use crate::error::{AgentAuthError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_compact::{KeyPair, PublicKey, Seed, Signature};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};

/// DID method segments: `did:agentauth:ed25519:<base64url public key>`
const DID_SCHEME: &str = "did";
const DID_METHOD: &str = "agentauth";
const DID_KEY_TYPE: &str = "ed25519";

/// Agent Identity
///
/// Owns its private key exclusively. Immutable after construction.
#[derive(Clone)]
pub struct Identity {
    /// DID derived from the public key
    did: String,

    /// Ed25519 keypair
    keypair: KeyPair,

    /// Optional free-form metadata
    metadata: Option<serde_json::Map<String, serde_json::Value>>,

    /// Creation timestamp
    created_at: DateTime<Utc>,
}

// Private key material must never reach logs.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("did", &self.did)
            .field("private_key", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Identity {
    /// Generate a fresh identity from the OS random source
    pub fn generate(
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Self> {
        let mut seed_bytes = [0u8; Seed::BYTES];
        rand::rngs::OsRng
            .try_fill_bytes(&mut seed_bytes)
            .map_err(|e| AgentAuthError::EntropyError(e.to_string()))?;

        let keypair = KeyPair::from_seed(Seed::new(seed_bytes));
        let did = public_key_to_did(&keypair.pk);

        Ok(Self {
            did,
            keypair,
            metadata,
            created_at: Utc::now(),
        })
    }

    /// Reconstruct an identity from a hex-encoded private key seed
    pub fn from_private_key(
        private_key_hex: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Self> {
        let bytes = hex::decode(private_key_hex)
            .map_err(|e| AgentAuthError::InvalidKeyFormat(format!("invalid hex: {}", e)))?;

        let seed = Seed::from_slice(&bytes).map_err(|_| {
            AgentAuthError::InvalidKeyFormat(format!(
                "expected {} key bytes, got {}",
                Seed::BYTES,
                bytes.len()
            ))
        })?;

        let keypair = KeyPair::from_seed(seed);
        let did = public_key_to_did(&keypair.pk);

        Ok(Self {
            did,
            keypair,
            metadata,
            created_at: Utc::now(),
        })
    }

    /// The identity's DID
    pub fn did(&self) -> &str {
        &self.did
    }

    /// The identity's public key
    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.pk
    }

    /// Optional metadata attached at construction
    pub fn metadata(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.metadata.as_ref()
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sign a message with the owned private key
    ///
    /// Deterministic Ed25519: the same message always yields the same
    /// signature under the same key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sk.sign(message, None)
    }

    /// Verify a signature against the public key recovered from a DID
    ///
    /// Returns `Ok(false)` on any cryptographic mismatch, including
    /// undecodable signature bytes. Fails only when the DID itself is
    /// malformed.
    pub fn verify(signature: &[u8], message: &[u8], did: &str) -> Result<bool> {
        let public_key = did_to_public_key(did)?;

        let sig = match Signature::from_slice(signature) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };

        Ok(public_key.verify(message, &sig).is_ok())
    }

    /// Export the private key seed as hex
    pub fn export_private_key(&self) -> String {
        hex::encode(self.keypair.sk.seed().as_ref())
    }

    /// Serialize to a lossless JSON record
    pub fn to_json(&self) -> Result<String> {
        let record = IdentityRecord {
            did: self.did.clone(),
            private_key: self.export_private_key(),
            public_key: hex::encode(self.keypair.pk.as_ref()),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        };

        serde_json::to_string(&record)
            .map_err(|e| AgentAuthError::InvalidKeyFormat(format!("serialization failed: {}", e)))
    }

    /// Reconstruct from a JSON record produced by [`Identity::to_json`]
    ///
    /// The recorded DID must match the one re-derived from the private key.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: IdentityRecord = serde_json::from_str(json)
            .map_err(|e| AgentAuthError::InvalidKeyFormat(format!("invalid record: {}", e)))?;

        let mut identity = Self::from_private_key(&record.private_key, record.metadata)?;

        if identity.did != record.did {
            return Err(AgentAuthError::InvalidKeyFormat(format!(
                "record DID {} does not match key-derived DID {}",
                record.did, identity.did
            )));
        }

        identity.created_at = record.created_at;
        Ok(identity)
    }
}

/// Stored identity record (interchange format for `to_json`/`from_json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityRecord {
    did: String,
    private_key: String,
    public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
    created_at: DateTime<Utc>,
}

/// Encode a public key as a `did:agentauth:ed25519:` DID
pub fn public_key_to_did(public_key: &PublicKey) -> String {
    format!(
        "{}:{}:{}:{}",
        DID_SCHEME,
        DID_METHOD,
        DID_KEY_TYPE,
        URL_SAFE_NO_PAD.encode(public_key.as_ref())
    )
}

/// Recover the public key encoded in a `did:agentauth:ed25519:` DID
pub fn did_to_public_key(did: &str) -> Result<PublicKey> {
    let segments: Vec<&str> = did.split(':').collect();

    let [scheme, method, key_type, encoded] = segments.as_slice() else {
        return Err(AgentAuthError::InvalidDIDFormat(format!(
            "expected 4 colon-separated segments, got {}",
            segments.len()
        )));
    };

    if *scheme != DID_SCHEME || *method != DID_METHOD || *key_type != DID_KEY_TYPE {
        return Err(AgentAuthError::InvalidDIDFormat(format!(
            "expected '{}:{}:{}:' prefix in '{}'",
            DID_SCHEME, DID_METHOD, DID_KEY_TYPE, did
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| AgentAuthError::InvalidDIDFormat(format!("invalid key encoding: {}", e)))?;

    PublicKey::from_slice(&bytes)
        .map_err(|_| AgentAuthError::InvalidDIDFormat(format!("invalid key length in '{}'", did)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_did_round_trip() {
        let identity = Identity::generate(None).unwrap();
        let recovered = did_to_public_key(identity.did()).unwrap();
        assert_eq!(recovered.as_ref(), identity.public_key().as_ref());
    }

    #[test]
    fn test_did_format() {
        let identity = Identity::generate(None).unwrap();
        assert!(identity.did().starts_with("did:agentauth:ed25519:"));
        assert_eq!(identity.did().split(':').count(), 4);
    }

    #[test]
    fn test_did_rejects_malformed() {
        assert!(matches!(
            did_to_public_key("did:agentauth:ed25519"),
            Err(AgentAuthError::InvalidDIDFormat(_))
        ));
        assert!(matches!(
            did_to_public_key("did:web:example.com:user"),
            Err(AgentAuthError::InvalidDIDFormat(_))
        ));
        assert!(matches!(
            did_to_public_key("did:agentauth:ed25519:!!!not-base64!!!"),
            Err(AgentAuthError::InvalidDIDFormat(_))
        ));
    }

    #[test]
    fn test_sign_verify() {
        let identity = Identity::generate(None).unwrap();
        let message = b"authorize: mail.read";
        let signature = identity.sign(message);

        assert!(Identity::verify(signature.as_ref(), message, identity.did()).unwrap());

        // Different message
        assert!(!Identity::verify(signature.as_ref(), b"other message", identity.did()).unwrap());

        // Different identity
        let other = Identity::generate(None).unwrap();
        assert!(!Identity::verify(signature.as_ref(), message, other.did()).unwrap());

        // Garbage signature bytes return false rather than erroring
        assert!(!Identity::verify(&[0u8; 7], message, identity.did()).unwrap());
    }

    #[test]
    fn test_from_private_key_round_trip() {
        let identity = Identity::generate(None).unwrap();
        let exported = identity.export_private_key();

        let restored = Identity::from_private_key(&exported, None).unwrap();
        assert_eq!(restored.did(), identity.did());

        let message = b"same key, same signature";
        assert_eq!(
            identity.sign(message).as_ref(),
            restored.sign(message).as_ref()
        );
    }

    #[test]
    fn test_from_private_key_rejects_bad_material() {
        assert!(matches!(
            Identity::from_private_key("not hex", None),
            Err(AgentAuthError::InvalidKeyFormat(_))
        ));
        assert!(matches!(
            Identity::from_private_key("deadbeef", None),
            Err(AgentAuthError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("name".into(), serde_json::json!("mail agent"));

        let identity = Identity::generate(Some(metadata)).unwrap();
        let json = identity.to_json().unwrap();
        let restored = Identity::from_json(&json).unwrap();

        assert_eq!(restored.did(), identity.did());
        assert_eq!(restored.created_at(), identity.created_at());
        assert_eq!(restored.metadata(), identity.metadata());

        let message = b"capability preserved";
        let signature = restored.sign(message);
        assert!(Identity::verify(signature.as_ref(), message, identity.did()).unwrap());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let identity = Identity::generate(None).unwrap();
        let debug = format!("{:?}", identity);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&identity.export_private_key()));
    }
}
