//! Error types for the AAT protocol

/// Result type for AAT protocol operations
pub type Result<T> = std::result::Result<T, AgentAuthError>;

/// AAT protocol errors
#[derive(Debug, thiserror::Error)]
pub enum AgentAuthError {
    /// System random source unavailable
    #[error("Entropy source unavailable: {0}")]
    EntropyError(String),

    /// Malformed or wrong-length key material
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// DID does not parse as `did:agentauth:ed25519:<key>`
    #[error("Invalid DID format: {0}")]
    InvalidDIDFormat(String),

    /// Wrong segment count, or undecodable base64/JSON segment
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Signature does not verify against the recovered public key
    #[error("Invalid signature")]
    InvalidSignature,

    /// Token `exp` claim is in the past
    #[error("Token expired at {expired_at}")]
    TokenExpired {
        /// Expiry as Unix seconds
        expired_at: i64,
    },

    /// Token `aud` claim does not match the expected audience
    #[error("Audience mismatch: token is for '{actual}', expected '{expected}'")]
    AudienceMismatch {
        /// Audience the verifier required
        expected: String,
        /// Audience the token carries
        actual: String,
    },

    /// Token does not grant a required scope
    #[error("Insufficient scope: missing '{missing}'")]
    InsufficientScope {
        /// First required scope absent from the token
        missing: String,
    },

    /// Expiry duration string does not parse
    #[error("Invalid duration format: '{0}' (expected <count><unit>, unit one of s/m/h/d)")]
    InvalidDurationFormat(String),

    /// Delegation constraints are inconsistent
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// Delegation `notAfter` bound has passed
    #[error("Delegation expired")]
    DelegationExpired,

    /// Delegation `notBefore` bound is in the future
    #[error("Delegation not yet valid")]
    DelegationNotYetValid,

    /// Delegation was revoked by an external state change
    #[error("Delegation {0} has been revoked")]
    DelegationRevoked(uuid::Uuid),

    /// Delegation requires an MFA proof the request did not present
    #[error("MFA proof required")]
    MFARequired,

    /// Delegation prohibits sub-delegation but the chain has more than one hop
    #[error("Subdelegation not allowed: chain depth {depth}")]
    SubdelegationNotAllowed {
        /// Observed chain depth
        depth: usize,
    },

    /// Request source IP is outside the delegation allowlist
    #[error("IP '{ip}' not in allowlist")]
    IPNotAllowed {
        /// Source IP of the rejected request
        ip: String,
    },

    /// Current time falls in none of the delegation's time windows
    #[error("Outside permitted time windows")]
    OutsideTimeWindow,

    /// Usage counter reports the delegation over its cap
    #[error("Usage limit exceeded: {used}/{max} uses")]
    UsageLimitExceeded {
        /// Uses recorded by the counter service
        used: u64,
        /// Cap from the delegation constraints
        max: u64,
    },

    /// Action value exceeds the per-use cap
    #[error("Value {value} exceeds per-use limit {limit}")]
    ValueExceedsLimit {
        /// Declared value of the attempted action
        value: f64,
        /// Cap from the delegation constraints
        limit: f64,
    },

    /// Policy requires a delegation chain but the token embeds none
    #[error("Token carries no delegation")]
    NoDelegation,

    /// Signer capability failed to produce a signature
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

impl AgentAuthError {
    /// Get HTTP status code for this error
    ///
    /// The core never produces a network response itself; this is the
    /// mapping a transport layer would apply.
    pub fn status_code(&self) -> u16 {
        match self {
            AgentAuthError::EntropyError(_) => 500,
            AgentAuthError::InvalidKeyFormat(_) => 400,
            AgentAuthError::InvalidDIDFormat(_) => 400,
            AgentAuthError::MalformedToken(_) => 400,
            AgentAuthError::InvalidSignature => 401,
            AgentAuthError::TokenExpired { .. } => 401,
            AgentAuthError::AudienceMismatch { .. } => 403,
            AgentAuthError::InsufficientScope { .. } => 403,
            AgentAuthError::InvalidDurationFormat(_) => 400,
            AgentAuthError::InvalidConstraint(_) => 400,
            AgentAuthError::DelegationExpired => 401,
            AgentAuthError::DelegationNotYetValid => 401,
            AgentAuthError::DelegationRevoked(_) => 401,
            AgentAuthError::MFARequired => 403,
            AgentAuthError::SubdelegationNotAllowed { .. } => 403,
            AgentAuthError::IPNotAllowed { .. } => 403,
            AgentAuthError::OutsideTimeWindow => 403,
            AgentAuthError::UsageLimitExceeded { .. } => 429,
            AgentAuthError::ValueExceedsLimit { .. } => 403,
            AgentAuthError::NoDelegation => 403,
            AgentAuthError::SigningFailed(_) => 500,
        }
    }

    /// Check if the failure denies authorization (as opposed to bad input)
    pub fn is_denial(&self) -> bool {
        matches!(self.status_code(), 401 | 403 | 429)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AgentAuthError::InvalidSignature.status_code(), 401);
        assert_eq!(
            AgentAuthError::MalformedToken("bad json".into()).status_code(),
            400
        );
        assert_eq!(AgentAuthError::MFARequired.status_code(), 403);
        assert_eq!(
            AgentAuthError::UsageLimitExceeded { used: 5, max: 3 }.status_code(),
            429
        );
    }

    #[test]
    fn test_denial_classification() {
        assert!(AgentAuthError::TokenExpired { expired_at: 0 }.is_denial());
        assert!(!AgentAuthError::InvalidDurationFormat("1y".into()).is_denial());
    }
}
