use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use tierank::config;
use tierank::engine::{Engine, ImportEntry, OutcomeEffect};
use tierank::error::{RankError, Result};
use tierank::insertion::{InsertionSession, SessionPurpose, SessionState};
use tierank::model::{Item, MediaType, Payload, Tier};
use tierank::registry::Registry;
use tierank::store;
use tracing_subscriber::EnvFilter;

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const INVARIANT_VIOLATION: i32 = 2;
}

#[derive(Parser)]
#[command(
    name = "tierank",
    version,
    about = "Tierank: rank a media collection by tier and pairwise comparison"
)]
struct Cli {
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Directory holding .tierank/ (default: current directory)
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create .tierank/ in the collection directory
    Init,
    /// Classify a new item and start placing it
    Add {
        /// Catalog key, e.g. an IMDb id
        key: String,
        #[arg(short, long)]
        tier: Tier,
        #[arg(short, long = "media", default_value = "movie")]
        media_type: MediaType,
        /// Display title (defaults to the key)
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        poster: Option<String>,
        #[arg(long)]
        release_date: Option<String>,
    },
    /// Answer the pending comparison of a session
    Answer {
        session: String,
        /// `new` for the item being placed, `other` for its opponent, or an id
        winner: String,
    },
    /// Show sessions waiting for an answer
    Pending,
    /// Drop a session without placing its item
    Abandon { session: String },
    /// Suggest two neighbours worth comparing
    Pair {
        #[arg(short, long)]
        tier: Option<Tier>,
        #[arg(short, long = "media")]
        media_type: Option<MediaType>,
    },
    /// Record that one placed item beat another
    Record { winner: String, loser: String },
    /// Remove an item from the collection
    Remove { id: String },
    /// Move an item to another tier and place it there
    Retier { id: String, tier: Tier },
    /// Print one item's score
    Score { id: String },
    /// Print every item's score
    Scores {
        #[arg(long)]
        json: bool,
    },
    /// List placed items by rank
    List {
        #[arg(short, long)]
        tier: Option<Tier>,
        #[arg(short, long = "media")]
        media_type: Option<MediaType>,
    },
    /// Show item details
    Show { id: String },
    /// Append already-classified items from a JSON file
    Import { file: PathBuf },
    /// Verify the stored ranks
    Check,
    /// Print shell completions
    Completions { shell: Shell },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    let code = match run(cli) {
        Ok(()) => exit_code::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if e.is_fatal() {
                exit_code::INVARIANT_VIOLATION
            } else {
                exit_code::FAILURE
            }
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tierank={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// A collection directory with its engine opened through the registry.
/// Every write is saved before the engine lock is released.
struct Workspace {
    root: PathBuf,
    registry: Registry,
}

impl Workspace {
    fn open(root: PathBuf) -> Result<Self> {
        let policy = config::load_config(&root)?.selection_policy()?;
        Ok(Self {
            root,
            registry: Registry::new(policy),
        })
    }

    fn key(&self) -> String {
        self.root.display().to_string()
    }

    fn read<T>(&self, f: impl FnOnce(&Engine) -> Result<T>) -> Result<T> {
        let root = &self.root;
        self.registry.read(&self.key(), || store::load(root), f)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
        let root = &self.root;
        self.registry.write(
            &self.key(),
            || store::load(root),
            |engine| {
                let out = f(&mut *engine)?;
                store::save(root, engine.collection())?;
                Ok(out)
            },
        )
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    match cli.command {
        Cmd::Init => {
            store::init(&root)?;
            println!("initialized {}/", store::DATA_DIR);
            Ok(())
        }
        Cmd::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "tierank", &mut std::io::stdout());
            Ok(())
        }
        command => run_in(&Workspace::open(root)?, command),
    }
}

fn run_in(ws: &Workspace, command: Cmd) -> Result<()> {
    match command {
        Cmd::Init | Cmd::Completions { .. } => Ok(()),
        Cmd::Add {
            key,
            tier,
            media_type,
            title,
            poster,
            release_date,
        } => ws.write(|engine| {
            let payload = Payload {
                title: title.unwrap_or_else(|| key.clone()),
                poster,
                release_date,
            };
            let session = engine.classify_new_item(&key, tier, media_type, payload)?;
            println!("added {} (session {})", session.item_id, session.id);
            print_session(engine, &session);
            Ok(())
        }),
        Cmd::Answer { session, winner } => ws.write(|engine| {
            let sid = store::resolve_session(engine.collection(), &session)?;
            let current = engine.session(&sid)?;
            let winner = match winner.as_str() {
                "new" => current.item_id.clone(),
                "other" => current
                    .opponent()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        RankError::InvalidOperation(format!("session '{sid}' has already converged"))
                    })?,
                prefix => store::resolve_id(engine.collection(), prefix)?,
            };
            engine.answer_comparison(&sid, &winner)?;
            print_session(&*engine, engine.session(&sid)?);
            Ok(())
        }),
        Cmd::Pending => ws.write(|engine| {
            let ids: Vec<String> = engine.active_sessions().map(|s| s.id.clone()).collect();
            if ids.is_empty() {
                println!("no pending sessions");
            }
            for sid in ids {
                engine.resume_session(&sid)?;
                let session = engine.session(&sid)?;
                println!(
                    "{} {} {} {} ({} comparisons)",
                    session.id, session.item_id, session.tier, session.media_type, session.comparisons
                );
                print_session(engine, session);
            }
            Ok(())
        }),
        Cmd::Abandon { session } => ws.write(|engine| {
            let sid = store::resolve_session(engine.collection(), &session)?;
            let dropped = engine.abandon_session(&sid)?;
            println!("abandoned {} ({})", dropped.id, dropped.item_id);
            if dropped.purpose == SessionPurpose::Retier {
                tracing::warn!(
                    item = %dropped.item_id,
                    "re-tier abandoned; the item has been removed from the collection"
                );
            }
            Ok(())
        }),
        Cmd::Pair { tier, media_type } => ws.read(|engine| {
            match engine.request_comparison_pair(tier, media_type) {
                Some((a, b)) => println!(
                    "compare {a} vs {b}: \"{}\" vs \"{}\"",
                    title(engine, &a),
                    title(engine, &b)
                ),
                None => println!("no pair to compare"),
            }
            Ok(())
        }),
        Cmd::Record { winner, loser } => ws.write(|engine| {
            let winner = store::resolve_id(engine.collection(), &winner)?;
            let loser = store::resolve_id(engine.collection(), &loser)?;
            match engine.record_comparison_outcome(&winner, &loser)? {
                OutcomeEffect::Confirmed => println!("confirmed {winner} over {loser}"),
                OutcomeEffect::Swapped => println!("swapped {winner} above {loser}"),
                OutcomeEffect::Moved { rank, refinement } => {
                    println!("moved {winner} to rank {rank}");
                    if let Some(sid) = refinement {
                        println!("refine with session {sid}");
                        print_session(&*engine, engine.session(&sid)?);
                    }
                }
                OutcomeEffect::Dropped { rank } => {
                    println!("dropped {loser} to rank {rank}, below {winner}")
                }
            }
            Ok(())
        }),
        Cmd::Remove { id } => ws.write(|engine| {
            let id = store::resolve_id(engine.collection(), &id)?;
            let removed = engine.remove_item(&id)?;
            println!("removed {} ({})", removed.id, removed.payload.title);
            Ok(())
        }),
        Cmd::Retier { id, tier } => ws.write(|engine| {
            let id = store::resolve_id(engine.collection(), &id)?;
            let session = engine.retier_item(&id, tier)?;
            println!("retiered {id} to {tier} (session {})", session.id);
            print_session(engine, &session);
            Ok(())
        }),
        Cmd::Score { id } => ws.read(|engine| {
            let id = store::resolve_id(engine.collection(), &id)?;
            println!("{:.1}", engine.score_of(&id)?);
            Ok(())
        }),
        Cmd::Scores { json } => ws.read(|engine| {
            let scores = engine.score_all();
            if json {
                println!("{}", serde_json::to_string_pretty(&scores)?);
                return Ok(());
            }
            for item in engine.items_by_rank() {
                if let Some(score) = scores.get(&item.id) {
                    println!("{:<10} {score:>4.1}  {}", item.id, item.payload.title);
                }
            }
            Ok(())
        }),
        Cmd::List { tier, media_type } => ws.read(|engine| {
            let scores = engine.score_all();
            let items: Vec<&Item> = engine
                .items_by_rank()
                .into_iter()
                .filter(|item| should_show(item, tier, media_type))
                .collect();
            if items.is_empty() {
                println!("no items");
                return Ok(());
            }
            print_list_header();
            for item in items {
                print_list_row(item, scores.get(&item.id).copied().unwrap_or_default());
            }
            Ok(())
        }),
        Cmd::Show { id } => ws.read(|engine| {
            let id = store::resolve_id(engine.collection(), &id)?;
            let item = engine.item(&id)?;
            println!("  ID: {}", item.id);
            println!("  Key: {}", item.external_key);
            println!("  Title: {}", item.payload.title);
            println!("  Type: {}", item.media_type);
            println!("  Tier: {}", item.tier);
            println!("  Rank: {}", item.rank);
            println!("  Score: {:.1}", engine.score_of(&id)?);
            println!("  Comparisons: {}", item.comparison_count);
            if let Some(ref date) = item.payload.release_date {
                println!("  Released: {date}");
            }
            if let Some(ref poster) = item.payload.poster {
                println!("  Poster: {poster}");
            }
            println!("  Created: {}", item.created_at.format("%Y-%m-%d %H:%M"));
            println!("  Updated: {}", item.updated_at.format("%Y-%m-%d %H:%M"));
            Ok(())
        }),
        Cmd::Import { file } => {
            let entries = read_import(&file)?;
            ws.write(|engine| {
                let report = engine.import_batch(entries)?;
                println!(
                    "imported {} items, skipped {}",
                    report.added.len(),
                    report.skipped.len()
                );
                for key in &report.skipped {
                    println!("  skipped {key}");
                }
                Ok(())
            })
        }
        Cmd::Check => ws.read(|engine| {
            let pending = engine.active_sessions().count();
            println!(
                "ok: {} items, {pending} pending sessions",
                engine.collection().items.len()
            );
            Ok(())
        }),
    }
}

fn read_import(path: &Path) -> Result<Vec<ImportEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn title<'a>(engine: &'a Engine, id: &str) -> &'a str {
    engine
        .item(id)
        .map(|item| item.payload.title.as_str())
        .unwrap_or("?")
}

fn print_session(engine: &Engine, session: &InsertionSession) {
    match &session.state {
        SessionState::Converged { rank, .. } => {
            println!("placed {} at rank {rank}", session.item_id);
        }
        SessionState::Searching { opponent, .. } => {
            let subject = session
                .pending
                .as_ref()
                .map(|item| item.payload.title.as_str())
                .unwrap_or_else(|| title(engine, &session.item_id));
            println!(
                "compare {} vs {opponent}: \"{subject}\" vs \"{}\"",
                session.item_id,
                title(engine, opponent)
            );
        }
    }
}

fn should_show(item: &Item, tier: Option<Tier>, media_type: Option<MediaType>) -> bool {
    if let Some(t) = tier {
        if item.tier != t {
            return false;
        }
    }
    if let Some(m) = media_type {
        if item.media_type != m {
            return false;
        }
    }
    true
}

fn print_list_header() {
    println!(
        "{:<5} {:<10} {:<7} {:<6} {:<5} {:<4} {}",
        "RANK", "ID", "TIER", "TYPE", "SCORE", "CMP", "TITLE"
    );
    println!("{}", "-".repeat(60));
}

fn print_list_row(item: &Item, score: f64) {
    println!(
        "{:<5} {:<10} {:<7} {:<6} {:<5.1} {:<4} {}",
        item.rank,
        item.id,
        item.tier,
        item.media_type,
        score,
        item.comparison_count,
        item.payload.title
    );
}
