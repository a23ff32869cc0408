//! Constraint Enforcement
//!
//! Enforces a verified token's delegation chain against a concrete request:
//! time bounds, revocation status, MFA, sub-delegation, IP allowlists, time
//! windows, usage caps, and per-use value caps.
//!
//! All checks are pure predicates over (delegation, context). The two
//! stateful collaborators — revocation status and usage counters — are
//! caller-supplied capabilities, never ambient state; the owning service
//! must serialize counter increments itself.

use crate::delegation::{Constraints, Delegation, TimeWindow};
use crate::error::{AgentAuthError, Result};
use crate::token::Aat;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::net::IpAddr;
use tracing::debug;
use uuid::Uuid;

/// The request a token is being exercised for
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Evaluation instant
    pub now: DateTime<Utc>,

    /// Source IP of the request, if the transport knows it
    pub source_ip: Option<IpAddr>,

    /// Whether the request carried an MFA proof
    pub mfa_presented: bool,

    /// Declared numeric value of the action (e.g. a payment amount)
    pub action_value: Option<f64>,
}

impl RequestContext {
    /// Context for the current instant with nothing else known
    pub fn now() -> Self {
        Self {
            now: Utc::now(),
            source_ip: None,
            mfa_presented: false,
            action_value: None,
        }
    }

    /// Record the request's source IP
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// Record that an MFA proof was presented
    pub fn with_mfa_presented(mut self) -> Self {
        self.mfa_presented = true;
        self
    }

    /// Record the declared value of the action
    pub fn with_action_value(mut self, value: f64) -> Self {
        self.action_value = Some(value);
        self
    }
}

/// Usage-counter lookup owned by the calling service
///
/// `None` means the service has no record for the delegation; the
/// corresponding cap is then treated as unconstrained (fail-open, a
/// documented policy choice).
pub trait UsageCounter {
    /// Lifetime use count for a delegation
    fn uses_total(&self, delegation_id: Uuid) -> Option<u64>;

    /// Use count within the last rolling hour
    fn uses_in_hour(&self, delegation_id: Uuid) -> Option<u64>;
}

/// Revocation-status lookup owned by the calling service
pub trait RevocationProbe {
    /// Whether the delegation has been revoked
    fn is_revoked(&self, delegation: &Delegation) -> bool;
}

/// What the enforcer requires of a token
#[derive(Debug, Clone)]
pub struct EnforcementOptions {
    /// Reject tokens with an empty delegation chain
    pub require_delegation: bool,

    /// Evaluate the root delegation's constraints
    pub enforce_constraints: bool,
}

impl Default for EnforcementOptions {
    fn default() -> Self {
        Self {
            require_delegation: true,
            enforce_constraints: true,
        }
    }
}

/// Enforces delegation constraints for verified tokens
///
/// Holds only policy and capabilities; every [`ConstraintEnforcer::enforce`]
/// call is independent, so one enforcer serves concurrent requests.
#[derive(Default)]
pub struct ConstraintEnforcer<'a> {
    options: EnforcementOptions,
    usage: Option<&'a dyn UsageCounter>,
    revocation: Option<&'a dyn RevocationProbe>,
}

impl<'a> ConstraintEnforcer<'a> {
    /// Enforcer with default options and no external capabilities
    pub fn new() -> Self {
        Self::default()
    }

    /// Override enforcement options
    pub fn with_options(mut self, options: EnforcementOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a usage-counter capability
    pub fn with_usage_counter(mut self, usage: &'a dyn UsageCounter) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach a revocation-status capability
    pub fn with_revocation_probe(mut self, revocation: &'a dyn RevocationProbe) -> Self {
        self.revocation = Some(revocation);
        self
    }

    /// Enforce the token's root delegation against a request
    ///
    /// The token must already have passed base verification
    /// ([`crate::token::verify`]); this layer assumes its signature,
    /// expiry, audience, and scope claims hold.
    pub fn enforce(&self, token: &Aat, context: &RequestContext) -> Result<()> {
        let Some(delegation) = token.delegation_chain().root() else {
            if self.options.require_delegation {
                return Err(AgentAuthError::NoDelegation);
            }
            return Ok(());
        };

        delegation.check_time_bounds(context.now)?;

        if let Some(probe) = self.revocation {
            if probe.is_revoked(delegation) {
                debug!(delegation_id = %delegation.id, "delegation revoked");
                return Err(AgentAuthError::DelegationRevoked(delegation.id));
            }
        }

        if !self.options.enforce_constraints {
            return Ok(());
        }

        let result = self.check_constraints(delegation, token.delegation_chain().depth(), context);
        if let Err(ref e) = result {
            debug!(delegation_id = %delegation.id, error = %e, "constraint rejected request");
        }
        result
    }

    fn check_constraints(
        &self,
        delegation: &Delegation,
        chain_depth: usize,
        context: &RequestContext,
    ) -> Result<()> {
        let constraints = &delegation.constraints;

        if constraints.require_mfa && !context.mfa_presented {
            return Err(AgentAuthError::MFARequired);
        }

        if !constraints.allow_subdelegation && chain_depth != 1 {
            return Err(AgentAuthError::SubdelegationNotAllowed { depth: chain_depth });
        }

        check_ip_allowlist(constraints, context)?;
        check_time_windows(constraints, context.now)?;
        self.check_usage(constraints, delegation.id)?;
        check_action_value(constraints, context)?;

        Ok(())
    }

    fn check_usage(&self, constraints: &Constraints, delegation_id: Uuid) -> Result<()> {
        let Some(counter) = self.usage else {
            // No counter deployed: usage caps are unconstrained.
            return Ok(());
        };

        if let Some(max) = constraints.max_uses {
            if let Some(used) = counter.uses_total(delegation_id) {
                if used > max {
                    return Err(AgentAuthError::UsageLimitExceeded { used, max });
                }
            }
        }

        if let Some(max) = constraints.max_uses_per_hour {
            if let Some(used) = counter.uses_in_hour(delegation_id) {
                if used > max {
                    return Err(AgentAuthError::UsageLimitExceeded { used, max });
                }
            }
        }

        Ok(())
    }
}

fn check_ip_allowlist(constraints: &Constraints, context: &RequestContext) -> Result<()> {
    if constraints.ip_allowlist.is_empty() {
        return Ok(());
    }

    let Some(ip) = context.source_ip else {
        return Err(AgentAuthError::IPNotAllowed {
            ip: "unknown".to_string(),
        });
    };

    let allowed = constraints.ip_allowlist.iter().any(|entry| {
        if let Ok(net) = entry.parse::<ipnet::IpNet>() {
            net.contains(&ip)
        } else if let Ok(addr) = entry.parse::<IpAddr>() {
            addr == ip
        } else {
            // Unparseable entries are rejected at delegation creation;
            // one reached here means the delegation bypassed that path.
            false
        }
    });

    if !allowed {
        return Err(AgentAuthError::IPNotAllowed { ip: ip.to_string() });
    }

    Ok(())
}

fn check_time_windows(constraints: &Constraints, now: DateTime<Utc>) -> Result<()> {
    if constraints.time_windows.is_empty() {
        return Ok(());
    }

    if constraints.time_windows.iter().any(|w| window_contains(w, now)) {
        Ok(())
    } else {
        Err(AgentAuthError::OutsideTimeWindow)
    }
}

/// Evaluate one window in its declared zone. Unknown zones fail closed.
fn window_contains(window: &TimeWindow, now: DateTime<Utc>) -> bool {
    let Ok(tz) = window.timezone.parse::<chrono_tz::Tz>() else {
        return false;
    };

    let local = now.with_timezone(&tz);
    let day = local.weekday().num_days_from_sunday() as u8;
    let hour = local.hour() as u8;

    window.days.contains(&day) && hour >= window.start_hour && hour < window.end_hour
}

fn check_action_value(constraints: &Constraints, context: &RequestContext) -> Result<()> {
    let Some(limit) = constraints.max_value_per_use else {
        return Ok(());
    };

    // An action that declares no value is not value-bearing.
    let Some(value) = context.action_value else {
        return Ok(());
    };

    if value > limit {
        return Err(AgentAuthError::ValueExceedsLimit { value, limit });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::{DelegationChain, DelegationRequest};
    use crate::identity::Identity;
    use crate::token::{issue, verify, VerifyOptions};
    use std::collections::HashMap;

    struct FixedCounter {
        total: HashMap<Uuid, u64>,
        hourly: HashMap<Uuid, u64>,
    }

    impl UsageCounter for FixedCounter {
        fn uses_total(&self, delegation_id: Uuid) -> Option<u64> {
            self.total.get(&delegation_id).copied()
        }

        fn uses_in_hour(&self, delegation_id: Uuid) -> Option<u64> {
            self.hourly.get(&delegation_id).copied()
        }
    }

    struct RevokeAll;

    impl RevocationProbe for RevokeAll {
        fn is_revoked(&self, _delegation: &Delegation) -> bool {
            true
        }
    }

    fn token_with_constraints(constraints: Constraints) -> (Aat, Uuid) {
        let alice = Identity::generate(None).unwrap();
        let agent = Identity::generate(None).unwrap();

        let delegation =
            DelegationRequest::new(alice.did(), agent.did(), vec!["mail.read".to_string()])
                .unwrap()
                .with_constraints(constraints)
                .unwrap()
                .sign_with(&alice)
                .unwrap();
        let delegation_id = delegation.id;

        let raw = issue(
            &agent,
            alice.did(),
            "https://api.example.com",
            vec!["mail.read".to_string()],
            &DelegationChain::single(delegation),
            "1h",
        )
        .unwrap();

        (verify(&raw, &VerifyOptions::new()).unwrap(), delegation_id)
    }

    #[test]
    fn test_no_delegation_policy() {
        let agent = Identity::generate(None).unwrap();
        let raw = issue(
            &agent,
            "did:web:alice.example.com",
            "https://api.example.com",
            vec!["mail.read".to_string()],
            &DelegationChain::new(),
            "1h",
        )
        .unwrap();
        let token = verify(&raw, &VerifyOptions::new()).unwrap();

        assert!(matches!(
            ConstraintEnforcer::new().enforce(&token, &RequestContext::now()),
            Err(AgentAuthError::NoDelegation)
        ));

        ConstraintEnforcer::new()
            .with_options(EnforcementOptions {
                require_delegation: false,
                enforce_constraints: true,
            })
            .enforce(&token, &RequestContext::now())
            .unwrap();
    }

    #[test]
    fn test_unconstrained_delegation_passes() {
        let (token, _) = token_with_constraints(Constraints::default());
        ConstraintEnforcer::new()
            .enforce(&token, &RequestContext::now())
            .unwrap();
    }

    #[test]
    fn test_mfa_constraint() {
        let (token, _) = token_with_constraints(Constraints {
            require_mfa: true,
            ..Default::default()
        });

        let enforcer = ConstraintEnforcer::new();
        assert!(matches!(
            enforcer.enforce(&token, &RequestContext::now()),
            Err(AgentAuthError::MFARequired)
        ));

        enforcer
            .enforce(&token, &RequestContext::now().with_mfa_presented())
            .unwrap();
    }

    #[test]
    fn test_subdelegation_constraint() {
        let alice = Identity::generate(None).unwrap();
        let agent_a = Identity::generate(None).unwrap();
        let agent_b = Identity::generate(None).unwrap();

        let root = DelegationRequest::new(alice.did(), agent_a.did(), vec!["mail.read".into()])
            .unwrap()
            .with_constraints(Constraints {
                allow_subdelegation: false,
                ..Default::default()
            })
            .unwrap()
            .sign_with(&alice)
            .unwrap();
        let hop = DelegationRequest::new(agent_a.did(), agent_b.did(), vec!["mail.read".into()])
            .unwrap()
            .sign_with(&agent_a)
            .unwrap();

        let mut chain = DelegationChain::single(root);
        chain.push(hop);

        let raw = issue(
            &agent_b,
            alice.did(),
            "https://api.example.com",
            vec!["mail.read".to_string()],
            &chain,
            "1h",
        )
        .unwrap();
        let token = verify(&raw, &VerifyOptions::new()).unwrap();

        assert!(matches!(
            ConstraintEnforcer::new().enforce(&token, &RequestContext::now()),
            Err(AgentAuthError::SubdelegationNotAllowed { depth: 2 })
        ));
    }

    #[test]
    fn test_ip_allowlist_constraint() {
        let (token, _) = token_with_constraints(Constraints {
            ip_allowlist: vec!["10.0.0.0/8".to_string(), "192.168.1.5".to_string()],
            ..Default::default()
        });
        let enforcer = ConstraintEnforcer::new();

        // CIDR containment
        enforcer
            .enforce(
                &token,
                &RequestContext::now().with_source_ip("10.1.2.3".parse().unwrap()),
            )
            .unwrap();

        // Exact entry
        enforcer
            .enforce(
                &token,
                &RequestContext::now().with_source_ip("192.168.1.5".parse().unwrap()),
            )
            .unwrap();

        // Outside both
        assert!(matches!(
            enforcer.enforce(
                &token,
                &RequestContext::now().with_source_ip("203.0.113.9".parse().unwrap()),
            ),
            Err(AgentAuthError::IPNotAllowed { .. })
        ));

        // Allowlist present but transport gave no IP
        assert!(matches!(
            enforcer.enforce(&token, &RequestContext::now()),
            Err(AgentAuthError::IPNotAllowed { .. })
        ));
    }

    #[test]
    fn test_time_window_constraint() {
        // All-week full-day UTC window always matches
        let (token, _) = token_with_constraints(Constraints {
            time_windows: vec![TimeWindow {
                days: vec![0, 1, 2, 3, 4, 5, 6],
                start_hour: 0,
                end_hour: 24,
                timezone: "UTC".to_string(),
            }],
            ..Default::default()
        });
        ConstraintEnforcer::new()
            .enforce(&token, &RequestContext::now())
            .unwrap();

        // A window on a fixed instant: 2026-01-07 is a Wednesday (day 3)
        let wednesday_noon: DateTime<Utc> = "2026-01-07T12:00:00Z".parse().unwrap();
        let (token, _) = token_with_constraints(Constraints {
            time_windows: vec![TimeWindow {
                days: vec![3],
                start_hour: 9,
                end_hour: 17,
                timezone: "UTC".to_string(),
            }],
            ..Default::default()
        });
        let mut context = RequestContext::now();
        context.now = wednesday_noon;
        ConstraintEnforcer::new().enforce(&token, &context).unwrap();

        // Same instant in a zone where it is outside business hours
        let (token, _) = token_with_constraints(Constraints {
            time_windows: vec![TimeWindow {
                days: vec![3],
                start_hour: 9,
                end_hour: 11,
                timezone: "Asia/Tokyo".to_string(), // 21:00 local
            }],
            ..Default::default()
        });
        assert!(matches!(
            ConstraintEnforcer::new().enforce(&token, &context),
            Err(AgentAuthError::OutsideTimeWindow)
        ));
    }

    #[test]
    fn test_usage_caps() {
        let (token, delegation_id) = token_with_constraints(Constraints {
            max_uses: Some(100),
            max_uses_per_hour: Some(10),
            ..Default::default()
        });

        // No counter capability: fail open
        ConstraintEnforcer::new()
            .enforce(&token, &RequestContext::now())
            .unwrap();

        // Counter with no record for this delegation: fail open
        let empty = FixedCounter {
            total: HashMap::new(),
            hourly: HashMap::new(),
        };
        ConstraintEnforcer::new()
            .with_usage_counter(&empty)
            .enforce(&token, &RequestContext::now())
            .unwrap();

        // Under both caps
        let under = FixedCounter {
            total: HashMap::from([(delegation_id, 50)]),
            hourly: HashMap::from([(delegation_id, 10)]),
        };
        ConstraintEnforcer::new()
            .with_usage_counter(&under)
            .enforce(&token, &RequestContext::now())
            .unwrap();

        // Over the hourly cap
        let over = FixedCounter {
            total: HashMap::from([(delegation_id, 50)]),
            hourly: HashMap::from([(delegation_id, 11)]),
        };
        assert!(matches!(
            ConstraintEnforcer::new()
                .with_usage_counter(&over)
                .enforce(&token, &RequestContext::now()),
            Err(AgentAuthError::UsageLimitExceeded { used: 11, max: 10 })
        ));
    }

    #[test]
    fn test_value_cap() {
        let (token, _) = token_with_constraints(Constraints {
            max_value_per_use: Some(250.0),
            ..Default::default()
        });
        let enforcer = ConstraintEnforcer::new();

        enforcer
            .enforce(&token, &RequestContext::now().with_action_value(100.0))
            .unwrap();
        enforcer
            .enforce(&token, &RequestContext::now().with_action_value(250.0))
            .unwrap();

        // Actions without a declared value are not value-bearing
        enforcer.enforce(&token, &RequestContext::now()).unwrap();

        assert!(matches!(
            enforcer.enforce(&token, &RequestContext::now().with_action_value(250.01)),
            Err(AgentAuthError::ValueExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_revocation_probe() {
        let (token, _) = token_with_constraints(Constraints::default());

        assert!(matches!(
            ConstraintEnforcer::new()
                .with_revocation_probe(&RevokeAll)
                .enforce(&token, &RequestContext::now()),
            Err(AgentAuthError::DelegationRevoked(_))
        ));
    }

    #[test]
    fn test_expired_delegation_rejected_before_constraints() {
        let now = Utc::now();
        let (token, _) = token_with_constraints(Constraints {
            not_after: Some(now - chrono::Duration::hours(1)),
            require_mfa: true,
            ..Default::default()
        });

        // Time bounds fire before the MFA constraint
        assert!(matches!(
            ConstraintEnforcer::new().enforce(&token, &RequestContext::now()),
            Err(AgentAuthError::DelegationExpired)
        ));
    }
}
