//! # agentauth-core: Agent Authorization Token (AAT) protocol
//!
//! Issues and verifies signed authorization tokens that let an autonomous
//! agent act on behalf of a human or organizational principal, with
//! cryptographically provable, constrained, and revocable delegation.
//!
//! ## Features
//!
//! - **Self-certifying identities**: Ed25519 keypairs encoded as
//!   `did:agentauth:ed25519:` DIDs
//! - **Signed delegations**: scoped, constrained grants with a mandatory
//!   proof signature and a distinct pre-issuance builder type
//! - **Compact tokens**: four-segment base64url credentials embedding the
//!   delegation chain, verifiable offline from the issuer DID alone
//! - **Constraint enforcement**: MFA, sub-delegation, IP allowlists,
//!   time-zone windows, usage caps, per-use value caps
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │           PRINCIPAL (Alice)                             │
//! │  Approves a scoped, constrained delegation              │
//! └─────────────────────────────────────────────────────────┘
//!                       ↓
//!         ┌─────────────────────────────┐
//!         │   DELEGATION                │
//!         │   signed grant:             │
//!         │   Alice → agent DID         │
//!         └─────────────────────────────┘
//!                       ↓
//!         ┌─────────────────────────────┐
//!         │   AGENT IDENTITY            │
//!         │   issues AAT embedding      │
//!         │   the delegation chain      │
//!         └─────────────────────────────┘
//!                       ↓
//!         ┌─────────────────────────────┐
//!         │   RELYING SERVICE           │
//!         │   verifies token, enforces  │
//!         │   constraints per request   │
//!         └─────────────────────────────┘
//! ```
//!
//! All operations are synchronous and free of shared mutable state; the OS
//! random source is the only implicit shared resource. Revocation status
//! and usage counters are caller-supplied capabilities.

#![warn(missing_docs)]

pub mod delegation;
pub mod error;
pub mod identity;
pub mod token;
pub mod verification;

// Re-exports for convenience
pub use delegation::{
    Constraints, Delegation, DelegationChain, DelegationProof, DelegationRequest,
    DelegationScope, DelegationSigner, DelegateRef, DelegatorRef, RevocationEndpoint, TimeWindow,
};
pub use error::{AgentAuthError, Result};
pub use identity::{did_to_public_key, public_key_to_did, Identity};
pub use token::{issue, parse_duration, verify, Aat, AatClaims, AatHeader, VerifyOptions};
pub use verification::{
    ConstraintEnforcer, EnforcementOptions, RequestContext, RevocationProbe, UsageCounter,
};

/// Protocol version
pub const AAT_VERSION: &str = "AAT/1.0";

/// Default token lifetime
pub const DEFAULT_TOKEN_TTL: &str = token::DEFAULT_TOKEN_TTL;
