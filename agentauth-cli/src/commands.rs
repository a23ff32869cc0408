//! CLI command implementations
//!
//! File-shuffling glue around `agentauth-core`; all protocol logic lives
//! in the library.

use agentauth_core::{
    Constraints, Delegation, DelegationChain, DelegationRequest, Identity, VerifyOptions,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info};

/// Arguments for the `delegate` subcommand
pub struct DelegateArgs {
    pub identity: PathBuf,
    pub delegate_did: String,
    pub scopes: Vec<String>,
    pub audiences: Vec<String>,
    pub agent_name: Option<String>,
    pub not_after: Option<String>,
    pub not_before: Option<String>,
    pub max_uses: Option<u64>,
    pub max_uses_per_hour: Option<u64>,
    pub require_mfa: bool,
    pub no_subdelegation: bool,
    pub ip_allowlist: Vec<String>,
    pub out: Option<PathBuf>,
}

/// Generate an identity and write its JSON record
pub fn keygen(out: Option<PathBuf>, name: Option<String>) -> Result<()> {
    let metadata = name.map(|n| {
        let mut map = serde_json::Map::new();
        map.insert("name".to_string(), serde_json::Value::String(n));
        map
    });

    let identity = Identity::generate(metadata).context("Failed to generate identity")?;
    info!("Generated identity {}", identity.did());

    let json = identity.to_json().context("Failed to serialize identity")?;
    write_output(out, &json)
}

/// Create and sign a delegation with a stored identity
pub fn delegate(args: DelegateArgs) -> Result<()> {
    let delegator = load_identity(&args.identity)?;

    let mut request = DelegationRequest::new(delegator.did(), &args.delegate_did, args.scopes)
        .context("Failed to build delegation")?;

    if !args.audiences.is_empty() {
        request = request.with_audiences(args.audiences);
    }
    if let Some(name) = args.agent_name {
        request = request.with_agent_name(name);
    }

    let constraints = Constraints {
        not_before: parse_timestamp(args.not_before.as_deref())?,
        not_after: parse_timestamp(args.not_after.as_deref())?,
        max_uses: args.max_uses,
        max_uses_per_hour: args.max_uses_per_hour,
        require_mfa: args.require_mfa,
        allow_subdelegation: !args.no_subdelegation,
        ip_allowlist: args.ip_allowlist,
        ..Default::default()
    };
    request = request
        .with_constraints(constraints)
        .context("Invalid constraints")?;

    let delegation = request
        .sign_with(&delegator)
        .context("Failed to sign delegation")?;
    info!(
        "Delegated {:?} from {} to {}",
        delegation.scope.actions, delegation.delegator.did, delegation.delegate.did
    );

    let json =
        serde_json::to_string_pretty(&delegation).context("Failed to serialize delegation")?;
    write_output(args.out, &json)
}

/// Issue a token from a stored identity and delegation files
pub fn issue(
    identity: PathBuf,
    delegator: String,
    audience: String,
    scopes: Vec<String>,
    delegations: Vec<PathBuf>,
    expires_in: String,
) -> Result<()> {
    let agent = load_identity(&identity)?;

    let mut chain = DelegationChain::new();
    for path in &delegations {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read delegation file {}", path.display()))?;
        let delegation: Delegation = serde_json::from_str(&json)
            .with_context(|| format!("Invalid delegation file {}", path.display()))?;
        debug!("Embedding delegation {}", delegation.id);
        chain.push(delegation);
    }

    let token = agentauth_core::issue(&agent, &delegator, &audience, scopes, &chain, &expires_in)
        .context("Failed to issue token")?;
    info!("Issued token for audience {}", audience);

    println!("{}", token);
    Ok(())
}

/// Verify a token and print the decoded claims
pub fn verify(token: String, audience: Option<String>, scopes: Vec<String>) -> Result<()> {
    let mut options = VerifyOptions::new();
    if let Some(audience) = audience {
        options = options.with_audience(audience);
    }
    if !scopes.is_empty() {
        options = options.with_required_scopes(scopes);
    }

    let verified = agentauth_core::verify(&token, &options)
        .map_err(|e| anyhow::anyhow!("Verification failed ({}): {}", e.status_code(), e))?;

    info!("Token verified");
    println!(
        "{}",
        serde_json::to_string_pretty(verified.claims()).context("Failed to render claims")?
    );
    for line in verified.delegation_chain().audit_trail() {
        println!("delegation: {}", line);
    }

    Ok(())
}

fn load_identity(path: &PathBuf) -> Result<Identity> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read identity file {}", path.display()))?;
    Identity::from_json(&json).context("Invalid identity file")
}

fn parse_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw)
                .with_context(|| format!("Invalid RFC 3339 timestamp '{}'", raw))?;
            Ok(Some(parsed.with_timezone(&Utc)))
        }
    }
}

fn write_output(out: Option<PathBuf>, content: &str) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}
