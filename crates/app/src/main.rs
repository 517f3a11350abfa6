use std::fmt;

use kasten_core::model::{DeckId, NewProgress, Progress, UserId};
use services::ProgressService;
use storage::{Storage, StoreConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw:?}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  app start       --user <id> --deck <id> --cards <n>");
    eprintln!("  app answer      --user <id> --deck <id> --card <index> (--success | --failure)");
    eprintln!("  app show        --user <id> --deck <id>");
    eprintln!("  app subject     --user <id> --deck <id> --card <index>");
    eprintln!("  app list-user   --user <id>");
    eprintln!("  app list-deck   --deck <id>");
    eprintln!("  app delete-deck --deck <id>");
    eprintln!();
    eprintln!("Every command accepts --db <sqlite_url> (default: sqlite://kasten.sqlite3).");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  KASTEN_DB_URL, KASTEN_DB_MAX_CONNECTIONS, KASTEN_DB_ACQUIRE_TIMEOUT_SECS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Answer,
    Show,
    Subject,
    ListUser,
    ListDeck,
    DeleteDeck,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "start" => Some(Self::Start),
            "answer" => Some(Self::Answer),
            "show" => Some(Self::Show),
            "subject" => Some(Self::Subject),
            "list-user" => Some(Self::ListUser),
            "list-deck" => Some(Self::ListDeck),
            "delete-deck" => Some(Self::DeleteDeck),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Answer => "answer",
            Self::Show => "show",
            Self::Subject => "subject",
            Self::ListUser => "list-user",
            Self::ListDeck => "list-deck",
            Self::DeleteDeck => "delete-deck",
        }
    }
}

/// Flags shared by all commands; each command checks the ones it needs.
#[derive(Debug, Default)]
struct Args {
    db_url: Option<String>,
    user: Option<UserId>,
    deck: Option<DeckId>,
    card: Option<i64>,
    cards: Option<usize>,
    success: Option<bool>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = Some(normalize_sqlite_url(value));
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    parsed.user = Some(value.parse().map_err(|_| ArgsError::InvalidId {
                        flag: "--user",
                        raw: value.clone(),
                    })?);
                }
                "--deck" => {
                    let value = require_value(args, "--deck")?;
                    parsed.deck = Some(value.parse().map_err(|_| ArgsError::InvalidId {
                        flag: "--deck",
                        raw: value.clone(),
                    })?);
                }
                "--card" => {
                    let value = require_value(args, "--card")?;
                    parsed.card = Some(value.parse().map_err(|_| ArgsError::InvalidNumber {
                        flag: "--card",
                        raw: value.clone(),
                    })?);
                }
                "--cards" => {
                    let value = require_value(args, "--cards")?;
                    parsed.cards = Some(value.parse().map_err(|_| ArgsError::InvalidNumber {
                        flag: "--cards",
                        raw: value.clone(),
                    })?);
                }
                "--success" => parsed.success = Some(true),
                "--failure" => parsed.success = Some(false),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }

    fn user(&self) -> Result<&UserId, ArgsError> {
        self.user.as_ref().ok_or(ArgsError::MissingFlag { flag: "--user" })
    }

    fn deck(&self) -> Result<&DeckId, ArgsError> {
        self.deck.as_ref().ok_or(ArgsError::MissingFlag { flag: "--deck" })
    }

    fn card(&self) -> Result<i64, ArgsError> {
        self.card.ok_or(ArgsError::MissingFlag { flag: "--card" })
    }

    fn cards(&self) -> Result<usize, ArgsError> {
        self.cards.ok_or(ArgsError::MissingFlag { flag: "--cards" })
    }

    fn success(&self) -> Result<bool, ArgsError> {
        self.success
            .ok_or(ArgsError::MissingFlag { flag: "--success or --failure" })
    }

    fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::from_env();
        config.database_url = match &self.db_url {
            Some(url) => url.clone(),
            None => normalize_sqlite_url(config.database_url),
        };
        config
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") || raw.contains("mode=memory") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn format_progress(progress: &Progress) -> String {
    let levels: Vec<String> = progress
        .card_levels()
        .iter()
        .map(ToString::to_string)
        .collect();
    format!(
        "{}\tuser={}\tdeck={}\tlevels=[{}]\tmastered={}/{}",
        progress.id(),
        progress.user(),
        progress.deck(),
        levels.join(","),
        progress.mastered_count(),
        progress.card_count(),
    )
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            print_usage();
            ArgsError::UnknownCommand(first)
        })?,
    };

    let args = Args::parse(&mut argv).inspect_err(|_| print_usage())?;

    let config = args.store_config();
    tracing::debug!(
        command = cmd.name(),
        db = %config.database_url,
        max_connections = config.max_connections,
        "resolved store config"
    );
    if !config.is_memory() {
        prepare_sqlite_file(&config.database_url)?;
    }
    let storage = Storage::sqlite(&config).await?;
    let service = ProgressService::from_storage(&storage);

    match cmd {
        Command::Start => {
            let progress =
                NewProgress::fresh(args.user()?.clone(), args.deck()?.clone(), args.cards()?);
            let id = service.create(&progress).await?;
            println!("{id}");
        }
        Command::Answer => {
            let level = service
                .record_answer(args.user()?, args.deck()?, args.card()?, args.success()?)
                .await?;
            println!("{level}");
        }
        Command::Show => {
            let progress = service
                .fetch_by_user_and_deck(args.user()?, args.deck()?)
                .await?;
            println!("{}", format_progress(&progress));
        }
        Command::Subject => {
            let raw = args.card()?;
            let card = usize::try_from(raw).map_err(|_| ArgsError::InvalidNumber {
                flag: "--card",
                raw: raw.to_string(),
            })?;
            let subject = service
                .fetch_card_subject(args.user()?, args.deck()?, card)
                .await?;
            println!("{subject}");
        }
        Command::ListUser => {
            for progress in service.fetch_all_by_user(args.user()?).await? {
                println!("{}", format_progress(&progress));
            }
        }
        Command::ListDeck => {
            for progress in service.fetch_all_by_deck(args.deck()?).await? {
                println!("{}", format_progress(&progress));
            }
        }
        Command::DeleteDeck => {
            let deleted = service.delete_all_by_deck(args.deck()?).await?;
            println!("{deleted}");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("kasten_core=info,storage=info,services=info,app=info")
            }),
        )
        .init();

    if let Err(err) = run().await {
        tracing::debug!(error = %err, "command failed");
        eprintln!("{err}");
        std::process::exit(2);
    }
}
