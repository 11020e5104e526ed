use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use storysnap::{
    build_registry, candidates, discover_mirrors, metadata_client, ApplyTarget, Config,
    NodeLayout, ProviderListing, PruningMode, Resolver, Session, Systemctl, Transport,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "storysnap")]
#[command(about = "Resolve, download and apply Story node chain snapshots", long_about = None)]
#[command(version)]
struct Cli {
    /// Extra configuration file, applied over ~/.config/storysnap/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot commands
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    /// Download a snapshot and apply it to the node, or save it to a directory
    Download(DownloadArgs),
    /// List snapshots offered by every provider
    Providers,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Home directory containing the node's .story folder
    #[arg(long)]
    home: Option<PathBuf>,

    /// Save the snapshot here instead of applying it to the node
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Pruning mode (pruned or archive); prompted for when omitted
    #[arg(long)]
    mode: Option<PruningMode>,

    /// Provider name; prompted for when omitted
    #[arg(long)]
    provider: Option<String>,

    /// Also extract archives saved with --output-path
    #[arg(long, requires = "output_path")]
    extract: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins when set
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("storysnap={}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let result = match cli.command {
        Command::Snapshot(SnapshotCommand::Providers) => list_providers(&config).await,
        Command::Snapshot(SnapshotCommand::Download(args)) => download(&config, args).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn build_resolver(config: &Config) -> anyhow::Result<Resolver> {
    let client = metadata_client(&config.http)?;
    let mirrors = discover_mirrors(&client, &config.providers.mirrored).await;
    Ok(Resolver::new(build_registry(config, mirrors, client)))
}

fn is_interactive() -> bool {
    atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout)
}

async fn list_providers(config: &Config) -> anyhow::Result<()> {
    use prettytable::{format, Cell, Row, Table};

    let resolver = build_resolver(config).await?;
    info!("🔎 Fetching snapshot info from {} providers", resolver.adapters().len());
    let listing = resolver.resolve_for_modes(&PruningMode::ALL).await;

    for mode in PruningMode::ALL {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BOX_CHARS);
        table.set_titles(Row::new(
            ["Provider", "Total Size", "Block Height", "Time Ago"]
                .iter()
                .map(|h| Cell::new(h).style_spec("Fb"))
                .collect(),
        ));
        for row in listing.iter().filter(|l| l.mode == mode) {
            table.add_row(Row::new(vec![
                Cell::new(&row.provider),
                Cell::new(row.total_size()).style_spec("r"),
                Cell::new(&row.block_height()).style_spec("r"),
                Cell::new(&row.age()),
            ]));
        }
        let title = match mode {
            PruningMode::Pruned => "Pruned Snapshots",
            PruningMode::Archive => "Archive Snapshots",
        };
        println!("\n{}", title);
        table.printstd();
    }
    Ok(())
}

fn print_mode_info() {
    println!("Pruning modes:");
    println!("  pruned   keeps only recent chain state; smaller and faster to apply, enough for validators");
    println!("  archive  keeps the full chain history; large, needed for RPC and indexing nodes");
}

fn prompt_mode() -> anyhow::Result<PruningMode> {
    use dialoguer::{theme::ColorfulTheme, Select};

    print_mode_info();
    let labels: Vec<&str> = PruningMode::ALL.iter().map(|m| m.as_str()).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select pruning mode")
        .items(&labels)
        .default(0)
        .interact()?;
    Ok(PruningMode::ALL[selection])
}

fn prompt_provider(listing: &[ProviderListing]) -> anyhow::Result<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let usable = candidates(listing);
    if usable.is_empty() {
        // Session::select_provider reports the empty candidate set
        return Ok(String::new());
    }
    let labels: Vec<String> = usable
        .iter()
        .map(|l| format!("{} {}", l.provider, l.summary()))
        .collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select snapshot provider")
        .items(&labels)
        .default(0)
        .interact()?;
    Ok(usable[selection].provider.clone())
}

fn confirm_apply(layout: &NodeLayout, services: &[String]) -> anyhow::Result<bool> {
    use dialoguer::{theme::ColorfulTheme, Confirm};

    let prompt = format!(
        "This stops {} and replaces the chain data in {}. Continue?",
        services.join(", "),
        layout.node_home.display()
    );
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

async fn download(config: &Config, args: DownloadArgs) -> anyhow::Result<()> {
    let interactive = is_interactive();
    let resolver = build_resolver(config).await?;
    let mut session = Session::new();

    let mode = match args.mode {
        Some(mode) => mode,
        None if interactive => prompt_mode()?,
        None => bail!("--mode is required when not running in a terminal"),
    };
    session.select_mode(mode);

    info!("🔎 Fetching {} snapshot info", mode);
    let listing = resolver.resolve_for_mode(mode).await;
    let name = match args.provider {
        Some(name) => name,
        None if interactive => prompt_provider(&listing)?,
        None => bail!("--provider is required when not running in a terminal"),
    };
    session.select_provider(&resolver, &listing, &name)?;

    let target = match args.output_path {
        Some(dir) => ApplyTarget::Export {
            dir,
            extract: args.extract,
        },
        None => {
            let home = args
                .home
                .or_else(|| config.node.home.clone())
                .or_else(dirs::home_dir)
                .context("could not determine the home directory; pass --home")?;
            let layout = NodeLayout::from_config(&home, &config.node);
            if interactive && !confirm_apply(&layout, &config.node.services)? {
                info!("Aborted, nothing was changed");
                return Ok(());
            }
            ApplyTarget::Node {
                layout,
                services: config.node.services.clone(),
            }
        }
    };

    let transport = Transport::new(config)?;
    let manager = Systemctl::new(config.node.use_sudo);
    session.apply(&target, &transport, &manager).await?;
    Ok(())
}
