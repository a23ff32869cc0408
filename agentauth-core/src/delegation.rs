//! Delegation
//!
//! A delegation is an immutable grant of scoped, constrained authority from
//! a delegator principal (human or agent) to a delegate agent identity.
//!
//! The unsigned state is a distinct type: [`DelegationRequest`] carries the
//! same data but no proof signature, and only becomes a [`Delegation`]
//! through a caller-supplied [`DelegationSigner`] capability (or an
//! externally produced signature). A `Delegation` therefore always has a
//! complete proof.

use crate::error::{AgentAuthError, Result};
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use ed25519_compact::{PublicKey, Signature};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Proof type tag for Ed25519 delegation proofs
pub const PROOF_TYPE_ED25519: &str = "Ed25519Signature2020";

/// Proof purpose tag for delegation grants
pub const PROOF_PURPOSE_DELEGATION: &str = "capabilityDelegation";

/// Capability for signing canonical delegation bytes
///
/// Supplied by the caller at issuance time. For agent-to-agent grants this
/// is the delegating [`Identity`]; for human grants it may wrap an external
/// wallet or approval flow.
pub trait DelegationSigner {
    /// Sign the canonical delegation bytes
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

impl DelegationSigner for Identity {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(Identity::sign(self, message).as_ref().to_vec())
    }
}

/// Delegator principal reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DelegatorRef {
    /// Principal DID (need not be an agentauth DID, e.g. `did:web:`)
    #[validate(length(min = 1, max = 255))]
    pub did: String,

    /// Optional human-comprehensible proof string (e.g. a consent receipt)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_hint: Option<String>,
}

/// Delegate agent reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DelegateRef {
    /// Agent DID
    #[validate(length(min = 1, max = 255))]
    pub did: String,

    /// Platform identifier, e.g. "anthropic/claude"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Display name shown in approval flows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Scope of a delegation
///
/// Exact string membership only; no wildcard expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DelegationScope {
    /// Permitted action strings
    #[validate(length(min = 1))]
    pub actions: Vec<String>,

    /// Excluded action strings (take precedence over `actions`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<String>,

    /// Audience restriction; empty means any audience
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

impl DelegationScope {
    /// Check whether an action is permitted by this scope
    pub fn permits(&self, action: &str) -> bool {
        if self.excluded.iter().any(|e| e == action) {
            return false;
        }
        self.actions.iter().any(|a| a == action)
    }

    /// Check whether an audience is permitted by this scope
    pub fn permits_audience(&self, audience: &str) -> bool {
        self.audiences.is_empty() || self.audiences.iter().any(|a| a == audience)
    }
}

/// Constraints narrowing when and how a delegation may be exercised
///
/// Closed structure: unknown keys are rejected at the deserialization
/// boundary instead of being passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Constraints {
    /// Not valid before this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Not valid after this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,

    /// Lifetime use cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<u64>,

    /// Rolling one-hour use cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_uses_per_hour: Option<u64>,

    /// Cap on the declared numeric value of a single action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value_per_use: Option<f64>,

    /// Require an MFA proof in the request context
    pub require_mfa: bool,

    /// Permit chains longer than one hop
    pub allow_subdelegation: bool,

    /// Permitted source IPs or CIDR blocks; empty means any
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_allowlist: Vec<String>,

    /// Permitted wall-clock windows; empty means always.
    /// The request passes if it falls in ANY window.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub time_windows: Vec<TimeWindow>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            not_before: None,
            not_after: None,
            max_uses: None,
            max_uses_per_hour: None,
            max_value_per_use: None,
            require_mfa: false,
            allow_subdelegation: true,
            ip_allowlist: Vec::new(),
            time_windows: Vec::new(),
        }
    }
}

impl Constraints {
    /// Validate internal consistency
    ///
    /// Checked at delegation creation; enforcement assumes these hold.
    pub fn check(&self) -> Result<()> {
        if let (Some(nbf), Some(naf)) = (self.not_before, self.not_after) {
            if nbf > naf {
                return Err(AgentAuthError::InvalidConstraint(format!(
                    "notBefore {} is after notAfter {}",
                    nbf, naf
                )));
            }
        }

        for entry in &self.ip_allowlist {
            let as_net = entry.parse::<ipnet::IpNet>().is_ok();
            let as_addr = entry.parse::<std::net::IpAddr>().is_ok();
            if !as_net && !as_addr {
                return Err(AgentAuthError::InvalidConstraint(format!(
                    "'{}' is neither an IP address nor a CIDR block",
                    entry
                )));
            }
        }

        for window in &self.time_windows {
            window.check()?;
        }

        Ok(())
    }
}

/// A wall-clock window in which a delegation may be exercised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimeWindow {
    /// Permitted weekdays, 0 = Sunday through 6 = Saturday
    pub days: Vec<u8>,

    /// First permitted hour (inclusive, 0-23)
    pub start_hour: u8,

    /// First hour past the window (exclusive, 1-24)
    pub end_hour: u8,

    /// IANA time zone the hours are evaluated in, e.g. "America/New_York"
    pub timezone: String,
}

impl TimeWindow {
    fn check(&self) -> Result<()> {
        if self.days.is_empty() || self.days.iter().any(|d| *d > 6) {
            return Err(AgentAuthError::InvalidConstraint(format!(
                "time window days must be 0-6, got {:?}",
                self.days
            )));
        }

        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(AgentAuthError::InvalidConstraint(format!(
                "time window hours must satisfy start < end <= 24, got {}..{}",
                self.start_hour, self.end_hour
            )));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(AgentAuthError::InvalidConstraint(format!(
                "unknown timezone '{}'",
                self.timezone
            )));
        }

        Ok(())
    }
}

/// Revocation-status endpoint descriptor
///
/// Consumed by an external revocation service; the core only carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationEndpoint {
    /// Status URL
    pub endpoint: String,

    /// HTTP method the status check uses
    pub method: String,

    /// How long a verifier may cache the status (seconds)
    pub cache_ttl_seconds: u64,
}

/// Signature metadata attached to a finalized delegation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationProof {
    /// Proof type tag
    #[serde(rename = "type")]
    pub proof_type: String,

    /// When the proof was created
    pub created: DateTime<Utc>,

    /// Key reference, `<delegator did>#keys-1`
    pub verification_method: String,

    /// Purpose tag
    pub proof_purpose: String,

    /// Hex-encoded Ed25519 signature over the canonical delegation bytes
    pub signature: String,
}

/// Pre-issuance delegation: all grant data, no proof signature
///
/// Does not satisfy the `Delegation` contract used at verification time;
/// it must be signed first.
#[derive(Debug, Clone, Validate)]
pub struct DelegationRequest {
    id: Uuid,
    #[validate(nested)]
    delegator: DelegatorRef,
    #[validate(nested)]
    delegate: DelegateRef,
    #[validate(nested)]
    scope: DelegationScope,
    constraints: Constraints,
    revocation: Option<RevocationEndpoint>,
    proof_created: DateTime<Utc>,
}

impl DelegationRequest {
    /// Start a delegation grant from a delegator to a delegate agent
    ///
    /// Generates the fresh unique id and stamps the proof creation time.
    pub fn new(
        delegator_did: impl Into<String>,
        delegate_did: impl Into<String>,
        actions: Vec<String>,
    ) -> Result<Self> {
        let request = Self {
            id: Uuid::new_v4(),
            delegator: DelegatorRef {
                did: delegator_did.into(),
                proof_hint: None,
            },
            delegate: DelegateRef {
                did: delegate_did.into(),
                platform: None,
                name: None,
            },
            scope: DelegationScope {
                actions,
                excluded: Vec::new(),
                audiences: Vec::new(),
            },
            constraints: Constraints::default(),
            revocation: None,
            proof_created: Utc::now(),
        };

        request
            .validate()
            .map_err(|e| AgentAuthError::InvalidConstraint(format!("invalid delegation: {}", e)))?;

        Ok(request)
    }

    /// Restrict the audiences the delegation may be used against
    pub fn with_audiences(mut self, audiences: Vec<String>) -> Self {
        self.scope.audiences = audiences;
        self
    }

    /// Exclude specific actions from the granted scope
    pub fn with_excluded(mut self, excluded: Vec<String>) -> Self {
        self.scope.excluded = excluded;
        self
    }

    /// Record the delegate's platform identifier
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.delegate.platform = Some(platform.into());
        self
    }

    /// Record the delegate's display name
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.delegate.name = Some(name.into());
        self
    }

    /// Attach a human-comprehensible proof hint for the delegator
    pub fn with_proof_hint(mut self, hint: impl Into<String>) -> Self {
        self.delegator.proof_hint = Some(hint.into());
        self
    }

    /// Attach constraints; rejects inconsistent ones at creation
    pub fn with_constraints(mut self, constraints: Constraints) -> Result<Self> {
        constraints.check()?;
        self.constraints = constraints;
        Ok(self)
    }

    /// Attach a revocation-status endpoint descriptor
    pub fn with_revocation(mut self, revocation: RevocationEndpoint) -> Self {
        self.revocation = Some(revocation);
        self
    }

    /// The id the finalized delegation will carry
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Canonical bytes the delegator signs
    pub fn signing_data(&self) -> Result<Vec<u8>> {
        proof_signing_data(
            &self.id,
            &self.delegator,
            &self.delegate,
            &self.scope,
            &self.constraints,
            &self.revocation,
            self.proof_created,
        )
    }

    /// Finalize by signing with the delegator's signer capability
    pub fn sign_with(self, signer: &dyn DelegationSigner) -> Result<Delegation> {
        let signature = signer.sign(&self.signing_data()?)?;
        self.into_signed(&signature)
    }

    /// Finalize with a signature produced externally (e.g. an approval UI)
    pub fn into_signed(self, signature: &[u8]) -> Result<Delegation> {
        Signature::from_slice(signature).map_err(|_| {
            AgentAuthError::SigningFailed(format!(
                "expected {} signature bytes, got {}",
                Signature::BYTES,
                signature.len()
            ))
        })?;

        let verification_method = format!("{}#keys-1", self.delegator.did);

        Ok(Delegation {
            id: self.id,
            delegator: self.delegator,
            delegate: self.delegate,
            scope: self.scope,
            constraints: self.constraints,
            revocation: self.revocation,
            proof: DelegationProof {
                proof_type: PROOF_TYPE_ED25519.to_string(),
                created: self.proof_created,
                verification_method,
                proof_purpose: PROOF_PURPOSE_DELEGATION.to_string(),
                signature: hex::encode(signature),
            },
        })
    }
}

/// A signed, immutable grant of scoped authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    /// Globally unique grant id
    pub id: Uuid,

    /// Granting principal
    pub delegator: DelegatorRef,

    /// Receiving agent
    pub delegate: DelegateRef,

    /// Granted scope
    pub scope: DelegationScope,

    /// Constraints on exercise
    #[serde(default)]
    pub constraints: Constraints,

    /// Revocation-status endpoint, if the delegator operates one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation: Option<RevocationEndpoint>,

    /// Delegator's proof over the canonical delegation bytes
    pub proof: DelegationProof,
}

impl Delegation {
    /// Check the static time bounds against a given instant
    pub fn check_time_bounds(&self, now: DateTime<Utc>) -> Result<()> {
        if let Some(not_after) = self.constraints.not_after {
            if now > not_after {
                return Err(AgentAuthError::DelegationExpired);
            }
        }

        if let Some(not_before) = self.constraints.not_before {
            if now < not_before {
                return Err(AgentAuthError::DelegationNotYetValid);
            }
        }

        Ok(())
    }

    /// Whether the time bounds hold right now
    ///
    /// Necessary but not sufficient: full verification additionally needs
    /// [`Delegation::verify_proof`] and a revocation-status lookup.
    pub fn is_currently_valid(&self) -> bool {
        self.check_time_bounds(Utc::now()).is_ok()
    }

    /// Canonical bytes the proof signature covers
    pub fn signing_data(&self) -> Result<Vec<u8>> {
        proof_signing_data(
            &self.id,
            &self.delegator,
            &self.delegate,
            &self.scope,
            &self.constraints,
            &self.revocation,
            self.proof.created,
        )
    }

    /// Verify the proof signature
    ///
    /// `resolve` maps the delegator DID to raw public key bytes. Resolution
    /// is pluggable because the delegator DID may not be self-certifying
    /// (e.g. `did:web:`).
    pub fn verify_proof<F>(&self, resolve: F) -> Result<()>
    where
        F: Fn(&str) -> Result<Vec<u8>>,
    {
        let key_bytes = resolve(&self.delegator.did)?;
        let public_key = PublicKey::from_slice(&key_bytes)
            .map_err(|e| AgentAuthError::InvalidKeyFormat(format!("delegator key: {}", e)))?;

        let sig_bytes =
            hex::decode(&self.proof.signature).map_err(|_| AgentAuthError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| AgentAuthError::InvalidSignature)?;

        public_key
            .verify(&self.signing_data()?, &signature)
            .map_err(|_| AgentAuthError::InvalidSignature)
    }
}

/// Deterministic signing input shared by request signing and proof
/// verification. Uuid and timestamp as raw bytes, composite fields as
/// canonical JSON, matching the credential signing discipline used across
/// the gateway.
fn proof_signing_data(
    id: &Uuid,
    delegator: &DelegatorRef,
    delegate: &DelegateRef,
    scope: &DelegationScope,
    constraints: &Constraints,
    revocation: &Option<RevocationEndpoint>,
    proof_created: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let mut data = Vec::new();

    data.extend_from_slice(id.as_bytes());
    data.extend_from_slice(&proof_created.timestamp().to_le_bytes());

    let canonical = serde_json::to_vec(&(delegator, delegate, scope, constraints, revocation))
        .map_err(|e| AgentAuthError::InvalidConstraint(format!("serialization failed: {}", e)))?;
    data.extend_from_slice(&canonical);

    Ok(data)
}

/// Ordered delegation chain, root principal grant first
///
/// A single-element chain is the common human→agent case; longer chains
/// represent agent-of-agent delegation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DelegationChain {
    /// Delegations ordered root → immediate issuer
    pub delegations: Vec<Delegation>,
}

impl DelegationChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain holding a single root grant
    pub fn single(delegation: Delegation) -> Self {
        Self {
            delegations: vec![delegation],
        }
    }

    /// Append a hop to the chain
    pub fn push(&mut self, delegation: Delegation) {
        self.delegations.push(delegation);
    }

    /// Number of hops
    pub fn depth(&self) -> usize {
        self.delegations.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }

    /// The root grant (human → agent), if any
    pub fn root(&self) -> Option<&Delegation> {
        self.delegations.first()
    }

    /// Verify every proof in the chain
    pub fn verify_proofs<F>(&self, resolve: F) -> Result<()>
    where
        F: Fn(&str) -> Result<Vec<u8>>,
    {
        for delegation in &self.delegations {
            delegation.verify_proof(&resolve)?;
        }

        Ok(())
    }

    /// Audit trail, oldest grant first
    pub fn audit_trail(&self) -> Vec<String> {
        self.delegations
            .iter()
            .map(|d| format!("{} -> {}", d.delegator.did, d.delegate.did))
            .collect()
    }
}
