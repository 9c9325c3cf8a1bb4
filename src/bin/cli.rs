use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use town_perms::errors::PermsResult;
use town_perms::jwt::JwtConfig;
use town_perms::perms::{
    InMemoryBackend, PermissionService, PermissionStore, Principal, PrincipalDirectory, RankRegistry, RankScope,
    RegisteredPermission, DEFAULT_POLICY,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "town-perms policy tool", long_about = None)]
struct Cli {
    /// Policy document to operate on
    #[arg(long, env = "PERMS_FILE", default_value = "townyperms.yml")]
    file: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the bundled default policy
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Load and validate the policy
    Check,
    /// List every group path
    Groups,
    /// Print a group's nodes
    Show { group: String },
    /// List the ranks of a scope (town or nation)
    Ranks { scope: RankScope },
    AddRank { scope: RankScope, name: String },
    RemoveRank { scope: RankScope, name: String },
    AddNode { group: String, node: String },
    RemoveNode { group: String, node: String },
    /// Compute a resident's effective permissions
    Resolve {
        /// JSON file describing the resident
        #[arg(long)]
        principal: PathBuf,
        /// JSON file with the registered permission catalog
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Mint an admin token for the HTTP API
    Token {
        #[arg(long, default_value = "admin")]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD, falling back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            if cli.file.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", cli.file.display());
            }
            std::fs::write(&cli.file, DEFAULT_POLICY)
                .with_context(|| format!("failed to write {}", cli.file.display()))?;
            let store = open(&cli.file)?;
            println!("Wrote {} ({})", cli.file.display(), store.fingerprint());
        }
        Commands::Check => {
            let store = Arc::new(open(&cli.file)?);
            println!("{}: {} groups, fingerprint {}", cli.file.display(), store.document().len(), store.fingerprint());
            let registry = RankRegistry::new(store);
            for scope in [RankScope::Town, RankScope::Nation] {
                println!("{scope} ranks: {}", registry.ranks(scope).join(", "));
            }
        }
        Commands::Groups => {
            for group in open(&cli.file)?.group_names() {
                println!("{group}");
            }
        }
        Commands::Show { group } => {
            let store = open(&cli.file)?;
            if !store.has_group(&group) {
                anyhow::bail!("group not found: {group}");
            }
            for node in store.group_nodes(&group) {
                println!("{node}");
            }
        }
        Commands::Ranks { scope } => {
            let registry = RankRegistry::new(Arc::new(open(&cli.file)?));
            for rank in registry.ranks(scope) {
                println!("{rank}");
            }
        }
        Commands::AddRank { scope, name } => {
            let registry = RankRegistry::new(Arc::new(open(&cli.file)?));
            let rank = registry.create_rank(scope, &name)?;
            println!("Created {scope} rank {rank}");
        }
        Commands::RemoveRank { scope, name } => {
            let registry = RankRegistry::new(Arc::new(open(&cli.file)?));
            let rank = registry.delete_rank(scope, &name)?;
            println!("Removed {scope} rank {rank}");
        }
        Commands::AddNode { group, node } => {
            open(&cli.file)?.add_node(&group, &node)?;
            println!("Added {node} to {group}");
        }
        Commands::RemoveNode { group, node } => {
            open(&cli.file)?.remove_node(&group, &node)?;
            println!("Removed {node} from {group}");
        }
        Commands::Resolve { principal, catalog } => {
            let principal: Principal = read_json(&principal)?;
            let catalog: Vec<RegisteredPermission> = match catalog {
                Some(path) => read_json(&path)?,
                None => Vec::new(),
            };

            let store = Arc::new(open(&cli.file)?);
            let backend = Arc::new(InMemoryBackend::with_catalog(catalog));
            let id = principal.id;
            let service = PermissionService::new(store, backend, Arc::new(SingleResident(principal)));
            service.register_rank_permissions();

            let permissions = service
                .effective_permissions(id)
                .await?
                .context("resident disappeared while resolving")?;
            println!("{}", serde_json::to_string_pretty(&permissions)?);
        }
        Commands::Token { subject } => {
            let jwt = JwtConfig::from_env()?;
            println!("{}", jwt.encode(&subject)?);
        }
    }

    Ok(())
}

fn open(path: &Path) -> anyhow::Result<PermissionStore> {
    PermissionStore::open(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Parse a JSON file, naming the offending field on failure.
fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let de = &mut serde_json::Deserializer::from_str(&text);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let field = err.path().to_string();
        anyhow::anyhow!("{}: invalid value at {field}: {}", path.display(), err.into_inner())
    })
}

/// Directory holding the one resident being resolved
struct SingleResident(Principal);

#[async_trait]
impl PrincipalDirectory for SingleResident {
    async fn principal(&self, id: Uuid) -> PermsResult<Option<Principal>> {
        Ok((self.0.id == id).then(|| self.0.clone()))
    }

    async fn online_principals(&self) -> PermsResult<Vec<Principal>> {
        Ok(Vec::new())
    }

    async fn town_residents(&self, _town: &str) -> PermsResult<Vec<Principal>> {
        Ok(Vec::new())
    }

    async fn nation_residents(&self, _nation: &str) -> PermsResult<Vec<Principal>> {
        Ok(Vec::new())
    }
}
