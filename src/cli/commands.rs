//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;

use crate::config::{load_settings, Settings};
use crate::models::{Portal, PortalSelectors, WorkflowStatus};
use crate::repository::{
    NotificationRepository, PortalRepository, RfpRepository, WorkflowRepository,
};
use crate::scan::{HttpFetcher, PortalScanExecutor, ScanRegistry};

#[derive(Parser)]
#[command(name = "rfpscout")]
#[command(about = "Procurement portal scanning and RFP discovery system")]
#[command(version)]
pub struct Cli {
    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Manage procurement portals
    Portal {
        #[command(subcommand)]
        command: PortalCommands,
    },

    /// Scan one or more portals now
    Scan {
        /// Portal IDs to scan (or use --all)
        portal_ids: Vec<String>,
        /// Scan all active portals sequentially
        #[arg(short, long)]
        all: bool,
    },

    /// Start the web server and scheduler
    Serve {
        /// Address to bind to: HOST:PORT (default: 127.0.0.1:5001)
        #[arg(default_value = "127.0.0.1:5001")]
        bind: String,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum PortalCommands {
    /// Add a portal
    Add {
        /// Unique portal ID
        id: String,
        /// Human-readable name
        name: String,
        /// Listing page URL
        base_url: String,
        /// CSS selector matching one listing item
        #[arg(long)]
        item: String,
        /// Title selector, relative to the item
        #[arg(long)]
        title: String,
        /// Link selector whose href becomes the RFP source URL
        #[arg(long)]
        link: Option<String>,
        /// Scan frequency in hours
        #[arg(long, default_value = "24")]
        frequency: u32,
    },
    /// List configured portals
    List,
    /// Show one portal's configuration and scan telemetry
    Show {
        /// Portal ID
        id: String,
    },
    /// Remove a portal
    Remove {
        /// Portal ID
        id: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.data_dir.clone())?;

    match cli.command {
        Commands::Init => {
            println!(
                "{} data directory at {}",
                style("Initialized").green(),
                settings.data_dir.display()
            );
            // Touching each repository creates the schema.
            PortalRepository::new(&settings.db_path())?;
            RfpRepository::new(&settings.db_path())?;
            WorkflowRepository::new(&settings.db_path())?;
            NotificationRepository::new(&settings.db_path())?;
            Ok(())
        }
        Commands::Portal { command } => run_portal(&settings, command),
        Commands::Scan { portal_ids, all } => run_scan(&settings, portal_ids, all).await,
        Commands::Serve { bind } => {
            let (host, port) = parse_bind(&bind)?;
            crate::server::serve(&settings, &host, port).await
        }
        Commands::Status => run_status(&settings),
    }
}

fn run_portal(settings: &Settings, command: PortalCommands) -> anyhow::Result<()> {
    let repo = PortalRepository::new(&settings.db_path())?;
    match command {
        PortalCommands::Add {
            id,
            name,
            base_url,
            item,
            title,
            link,
            frequency,
        } => {
            let mut portal = Portal::new(
                id.clone(),
                name,
                base_url,
                PortalSelectors {
                    item,
                    title,
                    link,
                    ..Default::default()
                },
            );
            portal.scan_frequency_hours = frequency;
            repo.save(&portal)?;
            println!("{} portal {}", style("Added").green(), style(id).bold());
        }
        PortalCommands::List => {
            let portals = repo.get_all()?;
            if portals.is_empty() {
                println!("No portals configured.");
            }
            for portal in portals {
                println!(
                    "{}  {}  every {}h  [{}]",
                    style(&portal.id).bold(),
                    portal.base_url,
                    portal.scan_frequency_hours,
                    portal.status.as_str(),
                );
            }
        }
        PortalCommands::Show { id } => match repo.get(&id)? {
            Some(portal) => print!("{}", portal_details(&portal)),
            None => println!("{} portal not found: {}", style("error").red(), id),
        },
        PortalCommands::Remove { id } => {
            if repo.delete(&id)? {
                println!("{} portal {}", style("Removed").green(), style(id).bold());
            } else {
                println!("{} portal not found: {}", style("error").red(), id);
            }
        }
    }
    Ok(())
}

fn portal_details(portal: &Portal) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "{}", style(&portal.name).bold());
    let _ = writeln!(out, "  id:             {}", portal.id);
    let _ = writeln!(out, "  url:            {}", portal.base_url);
    let _ = writeln!(out, "  status:         {}", portal.status.as_str());
    let _ = writeln!(out, "  active:         {}", portal.is_active);
    let _ = writeln!(out, "  frequency:      every {}h", portal.scan_frequency_hours);
    let _ = writeln!(out, "  max per scan:   {}", portal.max_rfps_per_scan);
    let _ = writeln!(out, "  item selector:  {}", portal.selectors.item);
    let _ = writeln!(out, "  title selector: {}", portal.selectors.title);
    if let Some(link) = &portal.selectors.link {
        let _ = writeln!(out, "  link selector:  {}", link);
    }
    if let Some(min) = portal.filters.min_value {
        let _ = writeln!(out, "  min value:      {}", min);
    }
    if let Some(max) = portal.filters.max_value {
        let _ = writeln!(out, "  max value:      {}", max);
    }
    if !portal.filters.include_keywords.is_empty() {
        let _ = writeln!(
            out,
            "  include:        {}",
            portal.filters.include_keywords.join(", ")
        );
    }
    if !portal.filters.exclude_keywords.is_empty() {
        let _ = writeln!(
            out,
            "  exclude:        {}",
            portal.filters.exclude_keywords.join(", ")
        );
    }
    let last = portal
        .last_scanned
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    let _ = writeln!(out, "  last scanned:   {}", last);
    let _ = writeln!(out, "  error count:    {}", portal.error_count);
    if let Some(err) = &portal.last_error {
        let _ = writeln!(out, "  last error:     {}", style(err).red());
    }
    out
}

async fn run_scan(settings: &Settings, portal_ids: Vec<String>, all: bool) -> anyhow::Result<()> {
    let db = settings.db_path();
    let registry = Arc::new(ScanRegistry::new(settings.config.history_cap));
    let executor = PortalScanExecutor::new(
        registry,
        Arc::new(PortalRepository::new(&db)?),
        Arc::new(RfpRepository::new(&db)?),
        Arc::new(NotificationRepository::new(&db)?),
        Arc::new(HttpFetcher::new(settings.request_timeout())?),
        settings.inter_scan_delay(),
        settings.config.max_pages_per_scan,
    );

    let outcomes = if all {
        executor.scan_all().await?
    } else {
        if portal_ids.is_empty() {
            anyhow::bail!("specify portal IDs or use --all");
        }
        let mut outcomes = Vec::new();
        for portal_id in &portal_ids {
            outcomes.push(executor.scan(portal_id).await?);
        }
        outcomes
    };

    for outcome in outcomes {
        let marker = if outcome.success {
            style("ok").green()
        } else {
            style("failed").red()
        };
        println!(
            "{}  {} new RFPs, {} errors, {}ms",
            marker,
            outcome.discovered.len(),
            outcome.errors.len(),
            outcome.duration_ms,
        );
        for error in outcome.errors {
            println!("    {}", style(error).red());
        }
    }
    Ok(())
}

fn run_status(settings: &Settings) -> anyhow::Result<()> {
    let db = settings.db_path();
    let portals = PortalRepository::new(&db)?.get_all()?;
    let rfps = RfpRepository::new(&db)?.count()?;
    let suspended = WorkflowRepository::new(&db)?.count_by_status(WorkflowStatus::Suspended)?;

    println!("{}", style("rfpscout status").bold());
    println!("  portals:             {}", portals.len());
    println!("  rfps discovered:     {}", rfps);
    println!("  suspended workflows: {}", suspended);
    for portal in portals {
        let last = portal
            .last_scanned
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {}  [{}] last scanned {}  errors {}",
            style(&portal.id).bold(),
            portal.status.as_str(),
            last,
            portal.error_count,
        );
    }
    Ok(())
}

fn parse_bind(bind: &str) -> anyhow::Result<(String, u16)> {
    match bind.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), port.parse()?)),
        None => match bind.parse::<u16>() {
            Ok(port) => Ok(("127.0.0.1".to_string(), port)),
            Err(_) => Ok((bind.to_string(), 5001)),
        },
    }
}
