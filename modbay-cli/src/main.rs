//! modbay - module publishing and rendering pipeline
//!
//! Command-line front end over modbay-core: author sources, publish them
//! into the catalog, install them per site, and render a site's page.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use modbay_core::{
    Catalog, DeployPipeline, InstallationManager, ModuleSource, MountStatus, NewModuleSource,
    RenderLoader, SandboxEngine, Store, SyncEngine,
};

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "modbay",
    about = "Module publishing and dynamic rendering pipeline",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Path to the module database
    #[clap(long, default_value = "modbay.db", global = true)]
    db: PathBuf,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,
}

#[derive(Parser, Debug)]
enum Command {
    /// Register a draft module source from a JSON manifest
    Import {
        /// Manifest file (slug, name, render_code, settings_schema, ...)
        manifest: PathBuf,
    },

    /// List module sources and their lifecycle status
    Sources,

    /// Publish a source: record a version and project it into the catalog
    Deploy {
        /// Source id or slug
        source: String,

        /// Version label for the ledger entry
        #[clap(long)]
        version: String,

        /// Changelog recorded with the version
        #[clap(long, default_value = "")]
        changelog: String,
    },

    /// Withdraw a source from the catalog
    Unpublish {
        /// Source id or slug
        source: String,
    },

    /// Reconcile catalog projections with published sources
    Sync {
        /// Sync a single source instead of all published ones
        #[clap(long)]
        source: Option<String>,
    },

    /// Inspect the discoverable module catalog
    Catalog {
        #[clap(subcommand)]
        command: CatalogCommand,
    },

    /// Install a module onto a site
    Install {
        site: String,

        /// Module id or slug
        module: String,

        /// Settings overrides as inline JSON
        #[clap(long)]
        settings: Option<String>,
    },

    /// Remove a module from a site
    Uninstall {
        site: String,

        /// Module id or slug
        module: String,
    },

    /// Render every enabled module for a site and print the page fragment
    Render {
        site: String,
    },
}

#[derive(Parser, Debug)]
enum CatalogCommand {
    /// List all discoverable modules
    List,

    /// Show one catalog entry in full
    Show {
        /// Module id or slug
        module: String,
    },
}

fn initialize_tracing(log_level: &LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level.to_filter_directive()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let store = Arc::new(Store::open(&cli.db).with_context(|| {
        format!("failed to open module database at {:?}", cli.db)
    })?);
    debug!("Opened module database at {:?}", cli.db);

    match cli.command {
        Command::Import { manifest } => import_command(store, manifest),
        Command::Sources => sources_command(store),
        Command::Deploy {
            source,
            version,
            changelog,
        } => deploy_command(store, &source, &version, &changelog),
        Command::Unpublish { source } => unpublish_command(store, &source),
        Command::Sync { source } => sync_command(store, source.as_deref()),
        Command::Catalog { command } => match command {
            CatalogCommand::List => catalog_list_command(store),
            CatalogCommand::Show { module } => catalog_show_command(store, &module),
        },
        Command::Install {
            site,
            module,
            settings,
        } => install_command(store, &site, &module, settings.as_deref()),
        Command::Uninstall { site, module } => uninstall_command(store, &site, &module),
        Command::Render { site } => render_command(store, &site).await,
    }
}

/// Accepts either a source id or its slug
fn resolve_source(store: &Store, key: &str) -> Result<ModuleSource> {
    if let Some(source) = store.source(key)? {
        return Ok(source);
    }
    if let Some(source) = store.source_by_slug(key)? {
        return Ok(source);
    }
    bail!("no module source matches '{key}'");
}

fn import_command(store: Arc<Store>, manifest: PathBuf) -> Result<()> {
    let raw = fs::read_to_string(&manifest)
        .with_context(|| format!("failed to read manifest {manifest:?}"))?;
    let new: NewModuleSource =
        serde_json::from_str(&raw).with_context(|| format!("invalid manifest {manifest:?}"))?;

    let source = store.insert_source(new)?;
    println!("Registered draft '{}' ({})", source.slug, source.id);
    Ok(())
}

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Tier")]
    tier: u32,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

fn sources_command(store: Arc<Store>) -> Result<()> {
    let sources = store.sources()?;
    if sources.is_empty() {
        println!("No module sources registered.");
        return Ok(());
    }

    let rows: Vec<SourceRow> = sources
        .into_iter()
        .map(|s| SourceRow {
            id: s.id,
            slug: s.slug,
            name: s.name,
            status: s.status.to_string(),
            tier: s.pricing_tier,
            updated_at: s.updated_at,
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    Ok(())
}

fn deploy_command(store: Arc<Store>, source: &str, version: &str, changelog: &str) -> Result<()> {
    let source = resolve_source(&store, source)?;
    let pipeline = DeployPipeline::new(store);

    let outcome = pipeline.deploy(&source.id, version, changelog)?;
    println!("Deployed '{}' version {}", source.slug, version);
    if let Some(sync) = &outcome.sync {
        println!("Catalog sync: {:?}", sync.action);
    }
    if let Some(warning) = &outcome.warning {
        eprintln!("Warning: {warning}");
    }
    Ok(())
}

fn unpublish_command(store: Arc<Store>, source: &str) -> Result<()> {
    let source = resolve_source(&store, source)?;
    let pipeline = DeployPipeline::new(store);

    let outcome = pipeline.unpublish(&source.id)?;
    if outcome.unsynced {
        println!("Unpublished '{}' and deactivated its catalog entry", source.slug);
    } else {
        println!("Unpublished '{}' (no active catalog entry)", source.slug);
    }
    if let Some(warning) = &outcome.warning {
        eprintln!("Warning: {warning}");
    }
    Ok(())
}

fn sync_command(store: Arc<Store>, source: Option<&str>) -> Result<()> {
    let engine = SyncEngine::new(store.clone());

    match source {
        Some(key) => {
            let source = resolve_source(&store, key)?;
            let outcome = engine.sync_one(&source.id)?;
            match outcome.reason {
                Some(reason) => println!("Skipped '{}': {reason}", source.slug),
                None => println!("{:?} catalog entry for '{}'", outcome.action, source.slug),
            }
        }
        None => {
            let report = engine.sync_all()?;
            println!("{report}");
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct CatalogRow {
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Price")]
    price: String,
    #[tabled(rename = "Source")]
    source_type: String,
}

fn catalog_list_command(store: Arc<Store>) -> Result<()> {
    let entries = Catalog::new(store).list()?;
    if entries.is_empty() {
        println!("Catalog is empty.");
        return Ok(());
    }

    let rows: Vec<CatalogRow> = entries
        .into_iter()
        .map(|e| CatalogRow {
            slug: e.slug,
            name: e.name,
            version: e.version,
            price: if e.retail_price == 0.0 {
                "free".to_string()
            } else {
                format!("${:.2}/{}", e.retail_price, e.billing_cycle)
            },
            source_type: format!("{:?}", e.source_type).to_lowercase(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    Ok(())
}

fn catalog_show_command(store: Arc<Store>, module: &str) -> Result<()> {
    let Some(entry) = Catalog::new(store).resolve(module)? else {
        bail!("no catalog entry matches '{module}'");
    };
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

fn install_command(
    store: Arc<Store>,
    site: &str,
    module: &str,
    settings: Option<&str>,
) -> Result<()> {
    let overrides = settings
        .map(serde_json::from_str)
        .transpose()
        .context("--settings is not valid JSON")?;

    let manager = InstallationManager::new(store);
    let outcome = manager.install(site, module, overrides)?;
    println!(
        "Installed '{}' on site {} ({})",
        module, site, outcome.installation.id
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome.merged_settings)?
    );
    Ok(())
}

fn uninstall_command(store: Arc<Store>, site: &str, module: &str) -> Result<()> {
    let manager = InstallationManager::new(store);
    manager.uninstall(site, module)?;
    println!("Uninstalled '{module}' from site {site}");
    Ok(())
}

async fn render_command(store: Arc<Store>, site: &str) -> Result<()> {
    let modules = RenderLoader::new(store).load_for_site(site)?;
    if modules.is_empty() {
        println!("Site {site} has no enabled modules.");
        return Ok(());
    }

    info!(site, modules = modules.len(), "Rendering site modules");
    let engine = SandboxEngine::new();
    let outcomes = engine.mount_all(&modules).await;

    let mut styles = String::new();
    for outcome in &outcomes {
        if outcome.status == MountStatus::Failed {
            eprintln!(
                "Warning: module '{}' failed to mount: {}",
                outcome.name,
                outcome.failure.as_deref().unwrap_or("unknown")
            );
        }
        if !outcome.styles.is_empty() {
            styles.push_str(&outcome.styles);
            styles.push('\n');
        }
        println!("{}", outcome.html);
    }
    if !styles.is_empty() {
        println!("<style>\n{styles}</style>");
    }
    Ok(())
}
