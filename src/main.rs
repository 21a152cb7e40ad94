use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use pharmachain_core::{
    chain::Chain,
    config::{LoggingConfig, PharmaConfig},
    controller::{Registration, StatusPolicy},
    identity::Identity,
    product::Status,
    roles::Capability,
    signing::{self, P256PemSigner, Signer as _},
    util,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pharmachain",
    version = util::VERSION,
    about = "Pharmaceutical supply-chain provenance ledger"
)]
struct Cli {
    /// Path to the ledger database.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy a new ledger; the deployer becomes the admin.
    InitLedger {
        #[arg(long)]
        deployer_key: PathBuf,
        /// Override `[policy] status_policy` for this ledger.
        #[arg(long)]
        status_policy: Option<StatusPolicy>,
        /// Gate registration on the manufacturer role.
        #[arg(long)]
        require_manufacturer_role: bool,
    },

    /// Generate a P-256 caller key and its identity file.
    Keygen {
        #[arg(long)]
        name: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Print the identity of a key file.
    Identity {
        #[arg(long)]
        key: PathBuf,
    },

    /// Grant a capability (admin only).
    GrantRole {
        #[arg(long)]
        key: PathBuf,
        /// Identity hex, or a `.id` / `.pem` file.
        #[arg(long)]
        identity: String,
        #[arg(long)]
        role: Capability,
    },

    /// Revoke a capability (admin only).
    RevokeRole {
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        identity: String,
        #[arg(long)]
        role: Capability,
    },

    /// List roles of one identity, or every holder of one role.
    Roles {
        #[arg(long, conflicts_with = "role")]
        identity: Option<String>,
        #[arg(long)]
        role: Option<Capability>,
    },

    RegisterProduct {
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        batch: String,
        /// Unix seconds or RFC 3339.
        #[arg(long)]
        expiry: String,
        #[arg(long, default_value = "")]
        certificate: String,
    },

    ScanProduct {
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        id: u64,
        /// Status code (0-3) or name.
        #[arg(long)]
        status: Status,
    },

    TransferOwnership {
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        to: String,
    },

    VerifyProduct {
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        id: u64,
    },

    GetProduct {
        #[arg(long)]
        id: u64,
    },

    GetProductOwner {
        #[arg(long)]
        id: u64,
    },

    /// Print the ledger entries touching one product.
    History {
        #[arg(long)]
        id: u64,
    },

    /// Verify the entire ledger hash-chain and signatures, then replay it.
    VerifyLedger,

    /// Export the ledger to a JSON backup file.
    ExportLedger {
        #[arg(long)]
        out: PathBuf,
    },

    /// Import a ledger from a JSON backup into a new database.
    ImportLedger {
        #[arg(long)]
        json: PathBuf,
        /// Path for the new database (must not already exist).
        #[arg(long)]
        target_db: PathBuf,
    },

    /// Print version information.
    Version,
}

#[derive(Debug, Serialize)]
struct RoleListing {
    identity: Identity,
    roles: Vec<Capability>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = PharmaConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env().context("apply environment overrides")?;

    init_logging(&cfg.logging)?;

    let db_path = cli.db.unwrap_or(cfg.paths.db.clone());
    util::validate_path(&db_path, "db")?;

    match cli.cmd {
        Commands::InitLedger {
            deployer_key,
            status_policy,
            require_manufacturer_role,
        } => {
            let deployer = load_signer(&deployer_key)?;
            let mut policy = cfg.policy;
            if let Some(sp) = status_policy {
                policy.status_policy = sp;
            }
            policy.require_manufacturer_role |= require_manufacturer_role;
            let chain = Chain::create(&db_path, &deployer, policy).context("create ledger")?;
            info!(ledger_id = %chain.meta().ledger_id, db = %db_path.display(), "ledger initialized");
            print_json(chain.meta())?;
        }

        Commands::Keygen { name, out_dir } => {
            util::validate_required(&name, "key name")?;
            let out_dir = out_dir.unwrap_or(cfg.paths.keys_dir.clone());
            let id = signing::keygen_p256(&out_dir, &name).context("keygen")?;
            info!(out_dir = %out_dir.display(), identity = %id.short(), "generated {name}.pem and {name}.id");
            println!("{id}");
        }

        Commands::Identity { key } => {
            println!("{}", load_signer(&key)?.identity());
        }

        Commands::GrantRole { key, identity, role } => {
            let signer = load_signer(&key)?;
            let target = resolve_identity(&identity)?;
            let mut chain = open_chain(&db_path)?;
            let receipt = chain.grant_role(&signer, target, role).context("grant role")?;
            print_json(&receipt)?;
        }

        Commands::RevokeRole { key, identity, role } => {
            let signer = load_signer(&key)?;
            let target = resolve_identity(&identity)?;
            let mut chain = open_chain(&db_path)?;
            let receipt = chain.revoke_role(&signer, target, role).context("revoke role")?;
            print_json(&receipt)?;
        }

        Commands::Roles { identity, role } => {
            let chain = open_chain(&db_path)?;
            let roles = chain.state().roles();
            let listing: Vec<RoleListing> = match (identity, role) {
                (Some(id), _) => {
                    let id = resolve_identity(&id)?;
                    vec![RoleListing {
                        identity: id,
                        roles: roles.capabilities(&id).iter().collect(),
                    }]
                }
                (None, Some(cap)) => roles
                    .holders(cap)
                    .into_iter()
                    .map(|id| RoleListing {
                        identity: id,
                        roles: roles.capabilities(&id).iter().collect(),
                    })
                    .collect(),
                (None, None) => {
                    let mut all: Vec<Identity> =
                        Capability::ALL.iter().flat_map(|c| roles.holders(*c)).collect();
                    all.sort();
                    all.dedup();
                    all.into_iter()
                        .map(|id| RoleListing {
                            identity: id,
                            roles: roles.capabilities(&id).iter().collect(),
                        })
                        .collect()
                }
            };
            print_json(&listing)?;
        }

        Commands::RegisterProduct {
            key,
            name,
            batch,
            expiry,
            certificate,
        } => {
            let signer = load_signer(&key)?;
            let expiry_date = util::parse_timestamp(&expiry).context("parse expiry")?;
            let mut chain = open_chain(&db_path)?;
            let id = chain
                .register_product(
                    &signer,
                    Registration {
                        name,
                        batch_number: batch,
                        expiry_date,
                        certificate_ref: certificate,
                    },
                )
                .context("register product")?;
            println!("{id}");
        }

        Commands::ScanProduct { key, id, status } => {
            let signer = load_signer(&key)?;
            let mut chain = open_chain(&db_path)?;
            let receipt = chain.scan_product(&signer, id, status).context("scan product")?;
            print_json(&receipt)?;
        }

        Commands::TransferOwnership { key, id, to } => {
            let signer = load_signer(&key)?;
            let new_owner = resolve_identity(&to)?;
            let mut chain = open_chain(&db_path)?;
            let receipt = chain
                .transfer_ownership(&signer, id, new_owner)
                .context("transfer ownership")?;
            print_json(&receipt)?;
        }

        Commands::VerifyProduct { key, id } => {
            let signer = load_signer(&key)?;
            let mut chain = open_chain(&db_path)?;
            let receipt = chain.verify_product(&signer, id).context("verify product")?;
            print_json(&receipt)?;
        }

        Commands::GetProduct { id } => {
            print_json(&open_chain(&db_path)?.get_product(id))?;
        }

        Commands::GetProductOwner { id } => {
            println!("{}", open_chain(&db_path)?.get_product_owner(id));
        }

        Commands::History { id } => {
            let chain = open_chain(&db_path)?;
            print_json(&chain.history(id).context("read history")?)?;
        }

        Commands::VerifyLedger => {
            // Opening verifies every hash and signature and replays all calls.
            let chain = open_chain(&db_path)?;
            let meta = chain.meta();
            info!(
                ledger_id = %meta.ledger_id,
                schema_version = meta.schema_version,
                products = chain.state().products().product_count(),
                "ledger verification passed"
            );
        }

        Commands::ExportLedger { out } => {
            let chain = open_chain(&db_path)?;
            chain.export(&out).context("export ledger")?;
            info!(out = %out.display(), "ledger exported");
        }

        Commands::ImportLedger { json, target_db } => {
            util::validate_path(&target_db, "target db")?;
            anyhow::ensure!(
                !target_db.exists(),
                "target database {} already exists -- will not overwrite",
                target_db.display()
            );
            let imported = Chain::import(&json, &target_db).context("import ledger")?;
            info!(
                ledger_id = %imported.meta().ledger_id,
                "ledger imported to {}",
                target_db.display()
            );
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_chain(db_path: &Path) -> Result<Chain> {
    Chain::open(db_path).with_context(|| format!("open ledger {}", db_path.display()))
}

fn load_signer(key: &Path) -> Result<P256PemSigner> {
    util::validate_path(key, "key")?;
    let key = util::canonicalize_if_exists(key, "key")?;
    P256PemSigner::from_key_pem(&key).context("load signer")
}

/// Accept an identity as hex, a `.id` file or a `.pem` key file.
fn resolve_identity(arg: &str) -> Result<Identity> {
    let path = Path::new(arg);
    if !path.is_file() {
        return arg.parse().context("parse identity");
    }
    if path.extension().is_some_and(|e| e == "pem") {
        return Ok(load_signer(path)?.identity());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    text.trim().parse().context("parse identity file")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    Ok(())
}

fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    // Console logs go to stderr.  `json_stdout` puts JSON logs on stdout
    // next to command output, for pipelines that split the streams by line.
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
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}
