mod repl;

use std::fmt;

use room_core::model::{StageCatalog, StageKey, StageKind};
use sandbox::{Sandbox, SandboxLimits, Submission, Verifier};
use services::{AppServices, Clock, RoomConfig};
use storage::http::HttpProgressConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::repl::Repl;

const DEFAULT_DB_URL: &str = "sqlite://escape-room.sqlite3";

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidMinutes { raw: String },
    MissingStage,
    MissingInput,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidMinutes { raw } => {
                write!(f, "invalid --minutes value (positive whole minutes): {raw}")
            }
            ArgsError::MissingStage => write!(f, "check requires --stage <key>"),
            ArgsError::MissingInput => {
                write!(f, "check requires a program file (or a hotspot id)")
            }
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
    eprintln!("  escape-room [play] [--db <sqlite_url>] [--progress-url <http_base>]");
    eprintln!("                     [--minutes <n>] [--guest]");
    eprintln!("  escape-room check --stage <key> <program_file | hotspot_id>");
    eprintln!();
    eprintln!("Defaults for play:");
    eprintln!("  --db {DEFAULT_DB_URL}");
    eprintln!("  --minutes 10");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  ESCAPE_DB_URL, ESCAPE_PROGRESS_URL, ESCAPE_MINUTES, ESCAPE_LOG");
    eprintln!("  ESCAPE_SANDBOX_INSTRUCTIONS, ESCAPE_SANDBOX_TIMEOUT_MS,");
    eprintln!("  ESCAPE_SANDBOX_MEMORY_BYTES, ESCAPE_SANDBOX_MAX_OUTPUT");
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlayArgs {
    db_url: String,
    progress_url: Option<String>,
    minutes: u32,
    guest: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CheckArgs {
    stage: StageKey,
    input: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Play(PlayArgs),
    Check(CheckArgs),
}

impl PlayArgs {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("ESCAPE_DB_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| DEFAULT_DB_URL.into(), normalize_sqlite_url);
        let mut progress_url = HttpProgressConfig::from_env().map(|config| config.base_url);
        let mut minutes = match std::env::var("ESCAPE_MINUTES") {
            Ok(raw) => parse_minutes(raw)?,
            Err(_) => room_core::DEFAULT_MINUTES,
        };
        let mut guest = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--progress-url" => {
                    let value = require_value(args, "--progress-url")?;
                    progress_url = Some(value).filter(|value| !value.trim().is_empty());
                }
                "--minutes" => minutes = parse_minutes(require_value(args, "--minutes")?)?,
                "--guest" => guest = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            progress_url,
            minutes,
            guest,
        })
    }
}

impl CheckArgs {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut stage = None;
        let mut input = None;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--stage" => stage = Some(StageKey::new(require_value(args, "--stage")?)),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ if input.is_none() => input = Some(arg),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(Self {
            stage: stage.ok_or(ArgsError::MissingStage)?,
            input: input.ok_or(ArgsError::MissingInput)?,
        })
    }
}

fn parse_minutes(raw: String) -> Result<u32, ArgsError> {
    match raw.trim().parse::<u32>() {
        Ok(minutes) if minutes > 0 => Ok(minutes),
        _ => Err(ArgsError::InvalidMinutes { raw }),
    }
}

fn parse_command(argv: Vec<String>) -> Result<Command, ArgsError> {
    let mut iter = argv.into_iter().peekable();
    match iter.peek().map(String::as_str) {
        Some("check") => {
            iter.next();
            CheckArgs::parse(&mut iter).map(Command::Check)
        }
        Some("play") => {
            iter.next();
            PlayArgs::parse(&mut iter).map(Command::Play)
        }
        // No subcommand: play.
        _ => PlayArgs::parse(&mut iter).map(Command::Play),
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
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
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

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

async fn play(args: PlayArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&args.db_url)?;
    let config = RoomConfig {
        minutes: args.minutes,
        guest: args.guest,
        limits: SandboxLimits::from_env(),
        clock: Clock::wall(),
        remote_progress: args.progress_url.map(HttpProgressConfig::new),
    };
    info!(db = %args.db_url, minutes = config.minutes, guest = config.guest, "opening room");
    let services = AppServices::new_sqlite(&args.db_url, config).await?;
    Repl::new(services).run().await?;
    Ok(())
}

/// Verify one submission without a session. `Ok(true)` when it passes.
fn check(args: &CheckArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let catalog = StageCatalog::standard();
    let stage = catalog.by_key(&args.stage)?;
    let verifier = Verifier::new(Sandbox::new(SandboxLimits::from_env()));
    let verdict = match stage.kind() {
        StageKind::CodeChallenge => {
            let text = std::fs::read_to_string(&args.input)?;
            verifier.verify(stage, Submission::Code(&text))
        }
        StageKind::InteractionChallenge => verifier.verify(stage, Submission::Hotspot(&args.input)),
    };
    let label = if verdict.passed { "PASS" } else { "FAIL" };
    println!("{label} [{}]: {}", stage.key(), verdict.message);
    Ok(verdict.passed)
}

async fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if matches!(argv.first().map(String::as_str), Some("--help" | "-h")) {
        print_usage();
        return Ok(0);
    }

    let command = parse_command(argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    match command {
        Command::Play(args) => {
            play(args).await?;
            Ok(0)
        }
        Command::Check(args) => Ok(if check(&args)? { 0 } else { 1 }),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ESCAPE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    match run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            // At this layer (binary glue), printing once is fine.
            eprintln!("{err}");
            std::process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn check_requires_stage_and_input() {
        assert!(matches!(
            parse_command(argv(&["check", "answer.lua"])),
            Err(ArgsError::MissingStage)
        ));
        assert!(matches!(
            parse_command(argv(&["check", "--stage", "format"])),
            Err(ArgsError::MissingInput)
        ));
        assert_eq!(
            parse_command(argv(&["check", "--stage", "escape", "loose-brick"])).unwrap(),
            Command::Check(CheckArgs {
                stage: StageKey::new("escape"),
                input: "loose-brick".into(),
            })
        );
    }

    #[test]
    fn play_flags_override_defaults() {
        let Command::Play(args) = parse_command(argv(&[
            "play",
            "--db",
            "sqlite::memory:",
            "--minutes",
            "3",
            "--guest",
            "--progress-url",
            "http://localhost:3000",
        ]))
        .unwrap() else {
            panic!("expected play");
        };
        assert_eq!(args.db_url, "sqlite::memory:");
        assert_eq!(args.minutes, 3);
        assert!(args.guest);
        assert_eq!(args.progress_url.as_deref(), Some("http://localhost:3000"));
    }

    #[test]
    fn zero_minutes_are_rejected() {
        assert!(matches!(
            parse_command(argv(&["--minutes", "0"])),
            Err(ArgsError::InvalidMinutes { .. })
        ));
        assert!(matches!(
            parse_command(argv(&["play", "--minutes"])),
            Err(ArgsError::MissingValue { flag: "--minutes" })
        ));
    }

    #[test]
    fn relative_sqlite_paths_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/room.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/room.sqlite3"));
        assert_eq!(
            normalize_sqlite_url("sqlite::memory:".into()),
            "sqlite::memory:"
        );
    }

    #[test]
    fn check_judges_a_hotspot_without_a_session() {
        let args = CheckArgs {
            stage: StageKey::new("escape"),
            input: "rug".into(),
        };
        assert!(!check(&args).unwrap());
        let args = CheckArgs {
            input: "loose-brick".into(),
            ..args
        };
        assert!(check(&args).unwrap());
    }
}
