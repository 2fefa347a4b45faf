use std::fmt;
use std::path::PathBuf;

use room_core::model::StageKind;
use sandbox::Verdict;
use services::{AppServices, SessionError, StageView, SyncOutcome, SyncTicket};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::debug;

const HELP: &str = "\
Commands:
  stages               list all stages
  show                 show the current stage
  next | prev          move between stages
  goto <n>             jump to stage n (1-based)
  edit                 replace the program text; finish with a line containing only `.`
  load-file <path>     replace the program text with a file's contents
  run                  verify the current code stage
  click <hotspot>      pick a hotspot on the current interaction stage
  start | pause        run or pause the countdown
  reset                stop the countdown and unlock the room
  minutes <n>          countdown length (only while the timer is idle)
  time                 show the countdown
  bg <reference>       set the background image reference
  save | checkpoint    store progress (checkpoint only updates stage and time)
  load | clear         restore or delete stored progress
  status               solved stages and lock state
  restart              start over from the first stage
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Stages,
    Show,
    Next,
    Previous,
    GoTo(usize),
    Edit,
    LoadFile(PathBuf),
    Run,
    Click(String),
    Start,
    Pause,
    Reset,
    Minutes(u32),
    Time,
    Background(String),
    Save,
    Checkpoint,
    Load,
    Clear,
    Status,
    Restart,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
enum CommandError {
    Unknown(String),
    MissingArgument { command: &'static str, what: &'static str },
    InvalidNumber { command: &'static str, raw: String },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(word) => write!(f, "unknown command `{word}` (try `help`)"),
            CommandError::MissingArgument { command, what } => {
                write!(f, "`{command}` needs {what}")
            }
            CommandError::InvalidNumber { command, raw } => {
                write!(f, "`{command}` expects a positive number, got `{raw}`")
            }
        }
    }
}

impl Command {
    fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(word, rest)| (word, rest.trim()));
        let command = match word {
            "" => return Ok(None),
            "stages" => Self::Stages,
            "show" => Self::Show,
            "next" => Self::Next,
            "prev" | "previous" => Self::Previous,
            "goto" => Self::GoTo(positive(rest, "goto")?),
            "edit" => Self::Edit,
            "load-file" => Self::LoadFile(PathBuf::from(required(rest, "load-file", "a path")?)),
            "run" => Self::Run,
            "click" => Self::Click(required(rest, "click", "a hotspot id")?.to_string()),
            "start" => Self::Start,
            "pause" => Self::Pause,
            "reset" => Self::Reset,
            "minutes" => Self::Minutes(positive(rest, "minutes")?),
            "time" => Self::Time,
            "bg" => Self::Background(rest.to_string()),
            "save" => Self::Save,
            "checkpoint" => Self::Checkpoint,
            "load" => Self::Load,
            "clear" => Self::Clear,
            "status" => Self::Status,
            "restart" => Self::Restart,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn required<'a>(
    rest: &'a str,
    command: &'static str,
    what: &'static str,
) -> Result<&'a str, CommandError> {
    if rest.is_empty() {
        Err(CommandError::MissingArgument { command, what })
    } else {
        Ok(rest)
    }
}

fn positive<T>(rest: &str, command: &'static str) -> Result<T, CommandError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = required(rest, command, "a number")?;
    raw.parse::<T>()
        .ok()
        .filter(|value| *value > T::default())
        .ok_or_else(|| CommandError::InvalidNumber {
            command,
            raw: raw.to_string(),
        })
}

//
// ─── LOOP ──────────────────────────────────────────────────────────────────────
//

/// Terminal front end over one play session.
pub struct Repl {
    services: AppServices,
    input: Lines<BufReader<Stdin>>,
}

impl Repl {
    #[must_use]
    pub fn new(services: AppServices) -> Self {
        Self {
            services,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Read and run commands until `quit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if stdin cannot be read.
    pub async fn run(mut self) -> std::io::Result<()> {
        match self.services.identity() {
            Some(identity) => println!("Learner {identity}. Type `help` for commands."),
            None => println!("Guest mode: progress sync is off. Type `help` for commands."),
        }
        self.show().await;

        while let Some(line) = self.input.next_line().await? {
            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(err) => {
                    println!("{err}");
                    continue;
                }
            };
            debug!(?command, "repl command");
            if command == Command::Quit {
                break;
            }
            self.dispatch(command).await?;
        }

        self.services.timer().stop().await;
        Ok(())
    }

    async fn dispatch(&mut self, command: Command) -> std::io::Result<()> {
        let session = self.services.session();
        let timer = self.services.timer();
        let sync = self.services.sync();
        match command {
            Command::Stages => self.stages().await,
            Command::Show => self.show().await,
            Command::Next => {
                let moved = session.lock().await.next().map(|_| ());
                self.after_move(moved).await;
            }
            Command::Previous => {
                let moved = session.lock().await.previous().map(|_| ());
                self.after_move(moved).await;
            }
            Command::GoTo(number) => {
                let moved = session.lock().await.go_to(number - 1);
                self.after_move(moved).await;
            }
            Command::Edit => {
                let text = self.read_block().await?;
                notice(session.lock().await.edit_source(text), "program text updated");
            }
            Command::LoadFile(path) => match tokio::fs::read_to_string(&path).await {
                Ok(text) => notice(
                    session.lock().await.edit_source(text),
                    &format!("loaded {}", path.display()),
                ),
                Err(err) => println!("cannot read {}: {err}", path.display()),
            },
            Command::Run => verdict(services::room::run_current(&session).await),
            Command::Click(id) => verdict(session.lock().await.choose_hotspot(&id)),
            Command::Start => {
                if timer.start().await {
                    self.time().await;
                } else {
                    println!("the countdown is already running or has run out");
                }
            }
            Command::Pause => {
                if timer.pause().await {
                    self.time().await;
                } else {
                    println!("the countdown is not running");
                }
            }
            Command::Reset => {
                timer.reset().await;
                println!("countdown reset; the room is unlocked");
            }
            Command::Minutes(minutes) => notice(
                session.lock().await.set_configured_minutes(minutes),
                &format!("countdown set to {minutes} min"),
            ),
            Command::Time => self.time().await,
            Command::Background(reference) => {
                session.lock().await.set_background(reference);
                println!("background updated");
            }
            Command::Save => report("save", sync.save().await),
            Command::Checkpoint => report("checkpoint", sync.checkpoint().await),
            Command::Load => report("load", sync.load().await),
            Command::Clear => report("clear", sync.clear().await),
            Command::Status => self.status().await,
            Command::Restart => {
                session.lock().await.reset_progress();
                timer.resync().await;
                println!("progress reset");
                self.show().await;
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    async fn read_block(&mut self) -> std::io::Result<String> {
        println!("enter program text; finish with a line containing only `.`");
        let mut lines = Vec::new();
        while let Some(line) = self.input.next_line().await? {
            if line.trim_end() == "." {
                break;
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    async fn after_move(&self, moved: Result<(), SessionError>) {
        match moved {
            Ok(()) => self.show().await,
            Err(err) => println!("{err}"),
        }
    }

    async fn show(&self) {
        let view = self.services.session().lock().await.current_view();
        if let Some(view) = view {
            print_view(&view);
        }
    }

    async fn stages(&self) {
        let session = self.services.session();
        let session = session.lock().await;
        let current = session.state().current_stage_index();
        for (index, stage) in session.catalog().iter().enumerate() {
            let marker = if index == current { ">" } else { " " };
            let solved = if session.state().is_solved(stage.key()) {
                "x"
            } else {
                " "
            };
            println!("{marker} {}. [{solved}] {}", index + 1, stage.title());
        }
    }

    async fn time(&self) {
        let session = self.services.session();
        let session = session.lock().await;
        let timer = session.state().timer();
        println!("{} ({:?})", timer.remaining_label(), timer.phase());
    }

    async fn status(&self) {
        let progress = self.services.session().lock().await.progress();
        println!(
            "stage {}/{}, solved {}/{}{}{}",
            progress.current_stage + 1,
            progress.total,
            progress.solved,
            progress.total,
            if progress.escaped { ", escaped!" } else { "" },
            if progress.locked { ", locked" } else { "" },
        );
    }
}

fn print_view(view: &StageView) {
    let solved = if view.solved { " (solved)" } else { "" };
    println!();
    println!("Stage {}/{}: {}{solved}", view.index + 1, view.total, view.title);
    println!("{}", view.prompt);
    match view.kind {
        StageKind::CodeChallenge => {
            println!("--- program ---");
            println!("{}", view.source.as_deref().unwrap_or_default());
            println!("---------------");
        }
        StageKind::InteractionChallenge => {
            for hotspot in &view.hotspots {
                println!("  [{}] {}", hotspot.id, hotspot.label);
            }
        }
    }
    if view.read_only {
        println!("Time is up: `reset` to keep playing.");
    }
}

fn notice(result: Result<(), SessionError>, ok: &str) {
    match result {
        Ok(()) => println!("{ok}"),
        Err(err) => println!("{err}"),
    }
}

fn verdict(result: Result<Verdict, SessionError>) {
    match result {
        Ok(verdict) if verdict.passed => println!("PASS: {}", verdict.message),
        Ok(verdict) => println!("FAIL: {}", verdict.message),
        Err(err) => println!("{err}"),
    }
}

/// Print the outcome whenever it arrives; the prompt stays usable meanwhile.
fn report(op: &'static str, ticket: SyncTicket) {
    tokio::spawn(async move {
        match ticket.wait().await {
            Ok(outcome) => println!("[{op}] {}", describe(outcome)),
            Err(err) => println!("[{op}] {err}"),
        }
    });
}

fn describe(outcome: SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Saved => "progress saved",
        SyncOutcome::Checkpointed => "stage and time saved",
        SyncOutcome::Loaded {
            timer_preserved: true,
        } => "progress loaded; the running countdown was kept",
        SyncOutcome::Loaded {
            timer_preserved: false,
        } => "progress loaded",
        SyncOutcome::Cleared => "saved progress deleted",
        SyncOutcome::NoSavedProgress => "no saved progress",
        SyncOutcome::Discarded => "load skipped: the room changed while it was in flight",
    }
}
