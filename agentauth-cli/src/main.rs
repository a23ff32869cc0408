mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agentauth")]
#[command(about = "Issue and verify agent authorization tokens")]
#[command(version)]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a fresh agent identity
    Keygen {
        /// Write the identity record to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Display name stored in the identity metadata
        #[arg(long)]
        name: Option<String>,
    },
    /// Create and sign a delegation to an agent
    Delegate {
        /// Identity file of the signing delegator
        #[arg(short, long)]
        identity: PathBuf,

        /// DID of the delegate agent
        #[arg(long)]
        delegate_did: String,

        /// Granted action scopes (repeatable)
        #[arg(short, long = "scope", required = true)]
        scopes: Vec<String>,

        /// Audience restriction (repeatable; default: any audience)
        #[arg(long = "audience")]
        audiences: Vec<String>,

        /// Delegate display name
        #[arg(long)]
        agent_name: Option<String>,

        /// Not valid after (RFC 3339)
        #[arg(long)]
        not_after: Option<String>,

        /// Not valid before (RFC 3339)
        #[arg(long)]
        not_before: Option<String>,

        /// Lifetime use cap
        #[arg(long)]
        max_uses: Option<u64>,

        /// Rolling one-hour use cap
        #[arg(long)]
        max_uses_per_hour: Option<u64>,

        /// Require an MFA proof at enforcement time
        #[arg(long)]
        require_mfa: bool,

        /// Forbid chains longer than one hop
        #[arg(long)]
        no_subdelegation: bool,

        /// Permitted source IPs or CIDR blocks (repeatable)
        #[arg(long = "allow-ip")]
        ip_allowlist: Vec<String>,

        /// Write the delegation JSON to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Issue a signed token
    Issue {
        /// Identity file of the acting agent
        #[arg(short, long)]
        identity: PathBuf,

        /// DID of the delegator principal
        #[arg(long)]
        delegator: String,

        /// Audience the token is bound to
        #[arg(long)]
        audience: String,

        /// Granted scopes (repeatable)
        #[arg(short, long = "scope", required = true)]
        scopes: Vec<String>,

        /// Delegation JSON files to embed, root grant first (repeatable)
        #[arg(short, long = "delegation")]
        delegations: Vec<PathBuf>,

        /// Token lifetime, e.g. 30s, 15m, 1h, 7d
        #[arg(long, default_value = agentauth_core::DEFAULT_TOKEN_TTL)]
        expires_in: String,
    },
    /// Verify a token and print its claims
    Verify {
        /// The encoded token
        token: String,

        /// Require this audience
        #[arg(long)]
        audience: Option<String>,

        /// Require these scopes (repeatable)
        #[arg(short, long = "scope")]
        scopes: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Keygen { out, name } => commands::keygen(out, name),
        Commands::Delegate {
            identity,
            delegate_did,
            scopes,
            audiences,
            agent_name,
            not_after,
            not_before,
            max_uses,
            max_uses_per_hour,
            require_mfa,
            no_subdelegation,
            ip_allowlist,
            out,
        } => commands::delegate(commands::DelegateArgs {
            identity,
            delegate_did,
            scopes,
            audiences,
            agent_name,
            not_after,
            not_before,
            max_uses,
            max_uses_per_hour,
            require_mfa,
            no_subdelegation,
            ip_allowlist,
            out,
        }),
        Commands::Issue {
            identity,
            delegator,
            audience,
            scopes,
            delegations,
            expires_in,
        } => commands::issue(identity, delegator, audience, scopes, delegations, expires_in),
        Commands::Verify {
            token,
            audience,
            scopes,
        } => commands::verify(token, audience, scopes),
    }
}
