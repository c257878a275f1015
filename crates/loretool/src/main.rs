use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use loretool_core::config::{DEFAULT_CONFIG_FILENAME, load_config};
use loretool_core::hierarchy::render_hierarchy;
use loretool_core::migrate::run_sql_file;
use loretool_core::slug::{BackfillOptions, backfill_slugs, verify_slugs};
use loretool_core::store::{RecordStoreRead, SupabaseClient};
use loretool_core::universe::{
    UniverseSummary, fetch_content_records, find_universe, list_universes, universe_diagnostics,
};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(
    name = "loretool",
    version,
    about = "Administration CLI for the hosted universe content store"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Path to loretool.toml")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Emit reports as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Slug backfill and verification")]
    Slugs(SlugsArgs),
    #[command(about = "Print one universe's content tree and diagnostics")]
    Inspect(InspectArgs),
    #[command(about = "Replay a SQL file through the store's exec_sql RPC")]
    Migrate(MigrateArgs),
}

#[derive(Debug, Args)]
struct SlugsArgs {
    #[command(subcommand)]
    command: SlugsSubcommand,
}

#[derive(Debug, Subcommand)]
enum SlugsSubcommand {
    #[command(about = "Assign slugs to content records that lack one")]
    Assign(AssignArgs),
    #[command(about = "List title -> slug pairs and flag duplicates")]
    Verify,
}

#[derive(Debug, Args)]
struct AssignArgs {
    #[arg(long, help = "Plan slugs without writing")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    universe_slug: String,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    path: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Slugs(SlugsArgs { command })) => match command {
            SlugsSubcommand::Assign(args) => run_slugs_assign(&runtime, args),
            SlugsSubcommand::Verify => run_slugs_verify(&runtime),
        },
        Some(Commands::Inspect(InspectArgs { universe_slug })) => {
            run_inspect(&runtime, &universe_slug)
        }
        Some(Commands::Migrate(MigrateArgs { path })) => run_migrate(&runtime, &path),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_slugs_assign(runtime: &RuntimeOptions, args: AssignArgs) -> Result<()> {
    let mut store = connect(runtime)?;
    let report = backfill_slugs(
        &mut store,
        &BackfillOptions {
            dry_run: args.dry_run,
        },
    )?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("slug backfill");
        println!("dry_run: {}", report.dry_run);
        println!("records_seen: {}", report.records_seen);
        println!("planned: {}", report.planned);
        println!("updated: {}", report.updated);
        for item in &report.items {
            match item.detail.as_deref() {
                Some(detail) => println!(
                    "  - {} -> {} [{}: {detail}]",
                    item.title, item.slug, item.action
                ),
                None => println!("  - {} -> {}", item.title, item.slug),
            }
        }
        if !report.errors.is_empty() {
            println!("errors:");
            for error in &report.errors {
                println!("  - {error}");
            }
        }
        println!("request_count: {}", report.request_count);
    }

    if !report.success {
        bail!(
            "slug backfill completed with {} write failure(s); re-run to retry the records still missing a slug",
            report.errors.len()
        );
    }
    Ok(())
}

fn run_slugs_verify(runtime: &RuntimeOptions) -> Result<()> {
    let mut store = connect(runtime)?;
    let report = verify_slugs(&mut store)?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("slug verification");
        println!("total: {}", report.total);
        println!("missing: {}", report.missing);
        for entry in &report.entries {
            println!(
                "  - {} -> {}",
                entry.title,
                entry.slug.as_deref().unwrap_or("<none>")
            );
        }
        if report.duplicates.is_empty() {
            println!("duplicates: <none>");
        } else {
            println!("duplicates:");
            for duplicate in &report.duplicates {
                println!("  - {duplicate}");
            }
        }
        println!("request_count: {}", report.request_count);
    }

    if !report.duplicates.is_empty() {
        bail!("{} duplicate slug(s) found", report.duplicates.len());
    }
    Ok(())
}

fn run_inspect(runtime: &RuntimeOptions, universe_slug: &str) -> Result<()> {
    let mut store = connect(runtime)?;

    let universe = match find_universe(&mut store, universe_slug)? {
        Some(universe) => universe,
        None => {
            println!("universe not found: {universe_slug}");
            let universes = list_universes(&mut store)?;
            if universes.is_empty() {
                println!("universes: <none>");
            } else {
                println!("universes: {}", universes.len());
                for universe in &universes {
                    println!(
                        "  - {} (slug: {})",
                        universe.name,
                        universe.slug.as_deref().unwrap_or("<none>")
                    );
                }
            }
            return Ok(());
        }
    };

    let records = fetch_content_records(&mut store, &universe.id)?;
    let render = render_hierarchy(&records);
    let diagnostics = universe_diagnostics(&mut store, &universe.id)?;

    if runtime.json {
        let payload = json!({
            "universe": universe,
            "content_items": records.len(),
            "tree": render,
            "diagnostics": diagnostics,
            "request_count": store.request_count(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    print_universe_header(&universe);
    println!("content_items: {}", records.len());
    for line in &render.lines {
        println!("{line}");
    }
    if !render.warnings.is_empty() {
        println!("warnings:");
        for warning in &render.warnings {
            println!("  - {warning}");
        }
    }
    for (item_type, count) in &render.type_counts {
        println!("content_by_type.{item_type}: {count}");
    }

    if !diagnostics.custom_types.is_empty() {
        println!("custom_content_types: {}", diagnostics.custom_types.len());
        for custom in &diagnostics.custom_types {
            match custom.emoji.as_deref() {
                Some(emoji) => println!("  - {emoji} {}", custom.name),
                None => println!("  - {}", custom.name),
            }
        }
    }
    if !diagnostics.disabled_types.is_empty() {
        println!(
            "disabled_content_types: {}",
            diagnostics.disabled_types.len()
        );
        for disabled in &diagnostics.disabled_types {
            println!("  - {disabled}");
        }
    }
    if !diagnostics.versions.is_empty() {
        println!("universe_versions: {}", diagnostics.versions.len());
        for version in &diagnostics.versions {
            let current = if version.is_current { " (CURRENT)" } else { "" };
            println!(
                "  - v{}: {}{current}",
                version.version_number,
                version.commit_message.as_deref().unwrap_or("<no message>")
            );
        }
    }
    println!("request_count: {}", store.request_count());

    Ok(())
}

fn run_migrate(runtime: &RuntimeOptions, path: &Path) -> Result<()> {
    let mut store = connect(runtime)?;
    let report = run_sql_file(&mut store, path)?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("sql migration");
    println!("file: {}", path.display());
    println!("statements: {}", report.statements);
    println!("executed: {}", report.executed);
    for result in &report.results {
        println!(
            "  - {}/{}: {}",
            result.index, report.statements, result.preview
        );
    }
    println!("request_count: {}", report.request_count);
    Ok(())
}

fn print_universe_header(universe: &UniverseSummary) {
    println!("universe: {}", universe.name);
    println!("id: {}", universe.id);
    println!(
        "user: {}",
        universe.user_id.as_deref().unwrap_or("<unknown>")
    );
    println!(
        "created: {}",
        universe.created_at.as_deref().unwrap_or("<unknown>")
    );
    println!(
        "description: {}",
        universe.description.as_deref().unwrap_or("<none>")
    );
}

/// Load `.env.local` (the file the companion web app also reads) then `.env`,
/// resolve the config file, and build the store client.
fn connect(runtime: &RuntimeOptions) -> Result<SupabaseClient> {
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    let config_path = runtime
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let config = load_config(&config_path)?;
    SupabaseClient::from_config(&config)
}
