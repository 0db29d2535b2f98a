//! REPL – interactive operator shell over a running [`KernelService`].
//!
//! Supported slash-commands:
//!   /help                        – show this list
//!   /submit <sev> <lik> <text>   – submit an intent, print its run id
//!   /emergency <sev> <lik> <text> – same, with the emergency flag set
//!   /status <run-id>             – current snapshot of a run
//!   /wait <run-id>               – block until the run is terminal
//!   /runs                        – every run, most recent first
//!   /journal                     – the audit journal
//!   /reputation                  – agent reputation counters
//!   /reset                       – clear every agent's reputation
//!   /replay                      – retry deferred notarizations
//!   /schema                      – JSON schema of an intent request
//!   /policy                      – the active policy as TOML
//!   /quit | /exit                – leave the shell

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Runtime;
use uuid::Uuid;

use warden_runtime::KernelService;
use warden_types::IntentRequest;

use crate::render;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Submit(IntentLine),
    Status(Uuid),
    Wait(Uuid),
    Runs,
    Journal,
    Reputation,
    Reset,
    Replay,
    Schema,
    Policy,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentLine {
    pub severity: u8,
    pub likelihood: u8,
    pub emergency: bool,
    pub payload: String,
}

impl IntentLine {
    fn into_request(self) -> IntentRequest {
        IntentRequest {
            payload: self.payload,
            domain: None,
            requester: "operator".to_string(),
            severity: Some(self.severity),
            likelihood: Some(self.likelihood),
            emergency: self.emergency,
            constraints: vec![],
        }
    }
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match head {
        "/help" => Ok(Command::Help),
        "/submit" => parse_intent(rest, false).map(Command::Submit),
        "/emergency" => parse_intent(rest, true).map(Command::Submit),
        "/status" => parse_id(rest).map(Command::Status),
        "/wait" => parse_id(rest).map(Command::Wait),
        "/runs" => Ok(Command::Runs),
        "/journal" => Ok(Command::Journal),
        "/reputation" => Ok(Command::Reputation),
        "/reset" => Ok(Command::Reset),
        "/replay" => Ok(Command::Replay),
        "/schema" => Ok(Command::Schema),
        "/policy" => Ok(Command::Policy),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_intent(rest: &str, emergency: bool) -> Result<IntentLine, String> {
    let mut parts = rest.splitn(3, char::is_whitespace);
    let tier = |name: &str, raw: Option<&str>| -> Result<u8, String> {
        raw.and_then(|t| t.parse::<u8>().ok())
            .ok_or_else(|| format!("expected a numeric {name} tier"))
    };
    let severity = tier("severity", parts.next())?;
    let likelihood = tier("likelihood", parts.next())?;
    let payload = parts.next().map(str::trim).unwrap_or_default();
    if payload.is_empty() {
        return Err("expected an intent payload after the tiers".to_string());
    }
    Ok(IntentLine {
        severity,
        likelihood,
        emergency,
        payload: payload.to_string(),
    })
}

fn parse_id(rest: &str) -> Result<Uuid, String> {
    Uuid::parse_str(rest).map_err(|e| format!("invalid run id '{rest}': {e}"))
}

/// Entry point for the interactive shell.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(service: &KernelService, rt: &Runtime, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };

    // Incidents and escalations are printed as they happen.
    let mut alerts = service.bus().subscribe_all();
    rt.spawn(async move {
        while let Some(event) = alerts.next().await {
            if let Some(line) = render::alert_line(&event) {
                println!("\n{line}");
            }
        }
    });

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let line = match editor.readline(&format!("{} ", "warden>".bold().cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line.as_str());

        match parse(&line) {
            Ok(Command::Quit) => break,
            Ok(cmd) => execute(service, rt, cmd),
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e,
                "/help".bold()
            ),
        }
    }
    println!("{}", "Goodbye.".green());
}

fn execute(service: &KernelService, rt: &Runtime, cmd: Command) {
    match cmd {
        Command::Help => cmd_help(),
        Command::Submit(intent) => match service.submit(intent.into_request()) {
            Ok(id) => println!("  {} {}", "submitted".green(), id.to_string().bold()),
            Err(e) => println!("{}: {}", "Submit failed".red(), e),
        },
        Command::Status(id) => match service.status(id) {
            Some(snapshot) => render::print_snapshot(&snapshot),
            None => println!("{} {}", "Unknown run".red(), id),
        },
        Command::Wait(id) => match rt.block_on(service.wait(id)) {
            Ok(snapshot) => render::print_snapshot(&snapshot),
            Err(e) => println!("{}: {}", "Wait failed".red(), e),
        },
        Command::Runs => {
            let runs = service.runs();
            if runs.is_empty() {
                println!("  {}", "no runs yet".dimmed());
            }
            for s in &runs {
                println!("{}", render::summary_line(s));
            }
        }
        Command::Journal => render::print_journal(&service.journal()),
        Command::Reputation => match service.reputation() {
            Ok(records) => render::print_reputation(&records),
            Err(e) => println!("{}: {}", "Reputation unavailable".red(), e),
        },
        Command::Reset => match service.reset_reputation() {
            Ok(()) => println!("  {}", "✓ reputation cleared".green()),
            Err(e) => println!("{}: {}", "Reset failed".red(), e),
        },
        Command::Replay => match rt.block_on(service.replay_deferred()) {
            Ok(report) => println!(
                "  {} anchored, {} still pending",
                report.anchored.to_string().green(),
                report.still_pending.to_string().yellow()
            ),
            Err(e) => println!("{}: {}", "Replay failed".red(), e),
        },
        Command::Schema => {
            let schema = KernelService::intent_schema();
            println!(
                "{}",
                serde_json::to_string_pretty(&schema).unwrap_or_else(|e| e.to_string())
            );
        }
        Command::Policy => match toml::to_string_pretty(service.policy()) {
            Ok(raw) => println!("{raw}"),
            Err(e) => println!("{}: {}", "Policy render failed".red(), e),
        },
        Command::Quit => {}
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Warden Commands".bold().underline());
    for (cmd, what) in [
        ("/submit <sev> <lik> <text>", "submit an intent"),
        ("/emergency <sev> <lik> <text>", "submit with the emergency flag"),
        ("/status <run-id>", "current snapshot of a run"),
        ("/wait <run-id>", "block until the run finishes"),
        ("/runs", "list runs"),
        ("/journal", "audit journal"),
        ("/reputation", "agent reputation counters"),
        ("/reset", "clear agent reputation"),
        ("/replay", "retry deferred notarizations"),
        ("/schema", "intent request JSON schema"),
        ("/policy", "active policy"),
        ("/quit  /exit", "leave the shell"),
    ] {
        println!("  {:<32} – {}", cmd.bold().cyan(), what);
    }
    println!();
}
