use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use p256::ecdsa::VerifyingKey;
use secrecy::SecretString;
use tokio::io::AsyncReadExt as _;
use tracing::info;

use memberid_core::{
    config::{KeyConfig, LoggingConfig, MemberIdConfig},
    ledger::RegisteredScan,
    payload::{CredentialClass, CredentialPayload},
    policy::Policy,
    session::ScanSession,
    signing::{self, PublicKey},
    util,
    verifier::Verifier,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "memberid",
    version = util::VERSION,
    about = "Offline verifier for member-ID QR credentials"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Args, Debug, Clone)]
struct ScanArgs {
    /// Verification key as hex; skips the key endpoint.
    #[arg(long)]
    key_hex: Option<String>,
    /// Accept only app-issued credentials.
    #[arg(long)]
    restrict_app: bool,
    /// Enable strict temporal checks.
    #[arg(long)]
    strict: bool,
    /// One JSON object per scan instead of text lines.
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify one or more scanned QR texts in a single session.
    Verify {
        #[arg(required = true)]
        texts: Vec<String>,
        #[command(flatten)]
        args: ScanArgs,
    },

    /// Verify every non-empty line of a file (`-` for stdin) in one session.
    Session {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        args: ScanArgs,
    },

    /// Generate a P-256 key pair for local testing (dev/POC).
    Keygen,

    /// Mint a QR text signed with a local key (dev/POC).
    Mint {
        #[arg(long)]
        sub: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "app")]
        class: CredentialClass,
        #[arg(long, default_value_t = 86_400)]
        ttl_secs: i64,
        /// Read the hex private key from this environment variable.
        #[arg(long, default_value = "MEMBERID_SIGNING_KEY")]
        key_env: String,
    },

    /// Print version information.
    Version,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut cfg = MemberIdConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env();

    init_logging(&cfg.logging)?;

    match cli.cmd {
        Commands::Verify { texts, args } => {
            let all_ok = run_session(&cfg, &args, &texts).await?;
            if !all_ok {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Session { input, args } => {
            let text = if input.as_os_str() == "-" {
                let mut buf = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut buf)
                    .await
                    .context("read stdin")?;
                buf
            } else {
                tokio::fs::read_to_string(&input)
                    .await
                    .with_context(|| format!("read {}", input.display()))?
            };
            let lines: Vec<String> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect();
            anyhow::ensure!(!lines.is_empty(), "no QR texts in {}", input.display());

            let all_ok = run_session(&cfg, &args, &lines).await?;
            if !all_ok {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Keygen => {
            let sk = signing::generate_keypair();
            let pk = PublicKey::from(VerifyingKey::from(&sk));
            println!("private_key_hex: {}", hex::encode(sk.to_bytes()));
            println!("public_key_hex:  {}", pk.to_hex());
            println!("fingerprint:     {}", pk.fingerprint());
        }

        Commands::Mint {
            sub,
            name,
            class,
            ttl_secs,
            key_env,
        } => {
            let secret = std::env::var(&key_env)
                .map(|s| SecretString::new(s.into()))
                .with_context(|| format!("environment variable {key_env} is not set"))?;
            let sk = signing::signing_key_from_hex(&secret).context("load signing key")?;

            let now = util::now_unix();
            let payload = CredentialPayload {
                subject: sub,
                display_name: name,
                issued_at: now,
                expires_at: now.saturating_add(ttl_secs),
                class,
            };
            let text = signing::mint_credential(&sk, &payload).context("mint credential")?;
            println!("{text}");
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load the key, run `texts` through one session and print the results.
/// Returns whether every scan verified.
async fn run_session(cfg: &MemberIdConfig, args: &ScanArgs, texts: &[String]) -> Result<bool> {
    let key_cfg = KeyConfig {
        hex: args.key_hex.clone().or_else(|| cfg.key.hex.clone()),
        ..cfg.key.clone()
    };
    let keys = Arc::new(key_cfg.provider());
    keys.ensure_key_loaded().await.context("load verification key")?;

    let policy = Policy {
        restrict_to_app_issued: args.restrict_app || cfg.policy.restrict_to_app_issued,
        strict: args.strict || cfg.policy.strict,
    };
    let session = ScanSession::new(Verifier::new(keys));

    let mut all_ok = true;
    for (i, text) in texts.iter().enumerate() {
        let scan = session.scan(text, &policy);
        all_ok &= scan.record.outcome.success;
        if args.json {
            println!("{}", serde_json::to_string(&scan).context("serialize scan")?);
        } else {
            println!("[{}] {}", i + 1, describe(&scan));
        }
    }

    let stats = session.stats();
    if args.json {
        println!("{}", serde_json::to_string(&stats).context("serialize stats")?);
    } else {
        println!(
            "total={} valid={} invalid={} repeats={} unique={}",
            stats.total, stats.valid_count, stats.invalid_count, stats.repeat_count, stats.unique_count
        );
    }
    info!(total = stats.total, invalid = stats.invalid_count, "session finished");
    Ok(all_ok)
}

fn describe(scan: &RegisteredScan) -> String {
    let outcome = &scan.record.outcome;
    match (&outcome.payload, outcome.success) {
        (Some(p), true) => {
            let mut line = format!(
                "VALID   {} ({}) sub={} expires={}",
                p.display_name,
                p.class.display_name(),
                p.subject,
                p.expires_at
            );
            if let Some(original) = &scan.original {
                line.push_str(&format!(" REPEAT of {}", original.id));
            }
            line
        }
        (payload, _) => {
            let reason = outcome.error.as_deref().unwrap_or("unknown error");
            match payload {
                Some(p) => format!("INVALID {reason} (untrusted sub={})", p.subject),
                None => format!("INVALID {reason}"),
            }
        }
    }
}

fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .with_context(|| format!("open json log file {}", cfg.json_log_file))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    } else {
        // Human-readable output on stderr; stdout carries scan results.
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}
