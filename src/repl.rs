//! Terminal console.
//!
//! Reads one line at a time from stdin. Lines starting with `:` (or `!n`) are
//! console commands; everything else is sent to the server. Transcript lines
//! are printed by a separate task as they are appended, so delayed replies
//! show up without blocking the prompt.

use colored::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::error::Result;
use crate::session::{LineKind, OutputLine};
use crate::ClientHub;

pub const REPL_HELP: &str = "\
Console commands:
  :connect [address]           connect (defaults to the configured address)
  :disconnect                  disconnect from the server
  :history                     list command history, newest first
  !<n>                         resend history entry n
  :older / :newer              walk history into the input buffer
  :send                        send the input buffer
  :presets                     list saved presets
  :preset add <name> = <cmd>   save a preset
  :preset rm <id>              delete a preset
  :preset run <n>              send preset n
  :format <line>               AI-format transcript line <line>
  :help                        show this help
  :quit                        exit
Anything else is sent to the server as a command.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Submit(String),
    Connect(Option<String>),
    Disconnect,
    History,
    /// 1-based history index, as printed by `:history`.
    Resend(usize),
    Older,
    Newer,
    Send,
    Presets,
    PresetAdd { name: String, command: String },
    PresetRemove(String),
    /// 1-based preset index, as printed by `:presets`.
    PresetRun(usize),
    Format(u64),
    Help,
    Quit,
}

/// Parse one input line.
pub fn parse_line(line: &str) -> std::result::Result<ReplCommand, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ReplCommand::Empty);
    }
    if let Some(n) = trimmed.strip_prefix('!') {
        return parse_index(n).map(ReplCommand::Resend);
    }
    let Some(meta) = trimmed.strip_prefix(':') else {
        return Ok(ReplCommand::Submit(line.trim_end_matches(['\r', '\n']).to_string()));
    };

    let (verb, rest) = match meta.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (meta, ""),
    };
    match verb {
        "connect" => Ok(ReplCommand::Connect(
            (!rest.is_empty()).then(|| rest.to_string()),
        )),
        "disconnect" => Ok(ReplCommand::Disconnect),
        "history" => Ok(ReplCommand::History),
        "older" => Ok(ReplCommand::Older),
        "newer" => Ok(ReplCommand::Newer),
        "send" => Ok(ReplCommand::Send),
        "presets" => Ok(ReplCommand::Presets),
        "preset" => parse_preset(rest),
        "format" => rest
            .parse::<u64>()
            .map(ReplCommand::Format)
            .map_err(|_| format!("expected a line number, got '{rest}'")),
        "help" => Ok(ReplCommand::Help),
        "quit" | "exit" => Ok(ReplCommand::Quit),
        other => Err(format!("unknown console command ':{other}' (try :help)")),
    }
}

fn parse_preset(rest: &str) -> std::result::Result<ReplCommand, String> {
    let (sub, args) = match rest.split_once(char::is_whitespace) {
        Some((s, a)) => (s, a.trim()),
        None => (rest, ""),
    };
    match sub {
        "add" => {
            let (name, command) = args
                .split_once('=')
                .ok_or_else(|| "usage: :preset add <name> = <command>".to_string())?;
            Ok(ReplCommand::PresetAdd {
                name: name.trim().to_string(),
                command: command.trim().to_string(),
            })
        }
        "rm" | "remove" if !args.is_empty() => Ok(ReplCommand::PresetRemove(args.to_string())),
        "run" => parse_index(args).map(ReplCommand::PresetRun),
        _ => Err("usage: :preset add|rm|run ...".to_string()),
    }
}

fn parse_index(s: &str) -> std::result::Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("expected a number starting at 1, got '{}'", s.trim())),
    }
}

/// One transcript line as printed in the terminal.
pub fn render_line(line: &OutputLine) -> String {
    let (marker, body) = match line.kind {
        LineKind::Outbound => ("›".bright_cyan().bold(), line.text.bright_white()),
        LineKind::Inbound => ("‹".bright_green().bold(), line.text.normal()),
        LineKind::System => ("•".bright_blue(), line.text.bright_blue()),
    };
    format!("{} {} {}", format!("[{:>3}]", line.id).dimmed(), marker, body)
}

fn notice(msg: impl std::fmt::Display) {
    println!("{} {}", "!".bright_yellow().bold(), msg.to_string().bright_yellow());
}

/// Run the console on stdin until `:quit` or end of input.
pub async fn run(hub: ClientHub, auto_connect: bool) -> Result<()> {
    run_with_input(hub, BufReader::new(tokio::io::stdin()), auto_connect).await
}

/// Run the console over any line source. A line that is not valid UTF-8 is
/// reported and skipped.
pub async fn run_with_input<R>(hub: ClientHub, input: R, auto_connect: bool) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    println!("{}", "CLIENT HUB".bright_cyan().bold());
    match hub.formatter_label() {
        Some(label) => println!("{}: {}", "Formatter".bright_yellow(), label),
        None => println!("{}: {}", "Formatter".bright_yellow(), "unavailable".dimmed()),
    }
    println!("{}", "Type :help for console commands.".dimmed());

    let mut rx = hub.session.subscribe();
    for line in hub.session.transcript() {
        println!("{}", render_line(&line));
    }
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(line) => println!("{}", render_line(&line)),
                Err(RecvError::Lagged(n)) => notice(format!("{n} lines skipped")),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if auto_connect {
        if let Err(e) = hub.session.request_connect(&hub.default_address) {
            notice(e);
        }
    }

    let mut segments = input.split(b'\n');
    while let Some(raw) = segments.next_segment().await? {
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(_) => {
                notice("input line is not valid UTF-8; ignored");
                continue;
            }
        };
        match parse_line(&line) {
            Ok(ReplCommand::Quit) => break,
            Ok(cmd) => dispatch(&hub, cmd).await,
            Err(msg) => notice(msg),
        }
    }

    printer.abort();
    Ok(())
}

async fn dispatch(hub: &ClientHub, cmd: ReplCommand) {
    let session = &hub.session;
    let outcome = match cmd {
        ReplCommand::Empty | ReplCommand::Quit => Ok(()),
        ReplCommand::Submit(text) => session.submit_command(&text).map(|_| ()),
        ReplCommand::Connect(address) => {
            session.request_connect(address.as_deref().unwrap_or(&hub.default_address))
        }
        ReplCommand::Disconnect => session.request_disconnect(),
        ReplCommand::History => {
            let history = session.history();
            if history.is_empty() {
                println!("{}", "No commands in history.".dimmed());
            }
            for (i, cmd) in history.iter().enumerate() {
                println!("{:>3}  {}", (i + 1).to_string().bright_yellow(), cmd);
            }
            Ok(())
        }
        ReplCommand::Resend(n) => session
            .recall_history(n - 1)
            .and_then(|_| session.submit_input())
            .map(|_| ()),
        ReplCommand::Older => {
            match session.history_older() {
                Some(entry) => println!("{} {}", "input:".dimmed(), entry),
                None => notice("history is empty"),
            }
            Ok(())
        }
        ReplCommand::Newer => {
            if let Some(entry) = session.history_newer() {
                println!("{} {}", "input:".dimmed(), entry);
            }
            Ok(())
        }
        ReplCommand::Send => session.submit_input().map(|_| ()),
        ReplCommand::Presets => {
            let presets = hub.presets();
            if presets.is_empty() {
                println!("{}", "No saved presets.".dimmed());
            }
            for (i, p) in presets.iter().enumerate() {
                println!(
                    "{:>3}  {}  {}  {}",
                    (i + 1).to_string().bright_yellow(),
                    p.name.bright_white(),
                    p.command,
                    p.id.dimmed()
                );
            }
            Ok(())
        }
        ReplCommand::PresetAdd { name, command } => hub.add_preset(&name, &command).map(|p| {
            println!("{} '{}'", "Preset saved:".bright_green(), p.name);
        }),
        ReplCommand::PresetRemove(id) => {
            match hub.remove_preset(&id) {
                Some(p) => println!("{} '{}'", "Preset removed:".bright_green(), p.name),
                None => notice(format!("no preset with id {id}")),
            }
            Ok(())
        }
        ReplCommand::PresetRun(n) => match hub.presets().get(n - 1) {
            Some(p) => hub
                .apply_preset(&p.id)
                .and_then(|_| session.submit_input())
                .map(|_| ()),
            None => {
                notice(format!("no preset #{n}"));
                Ok(())
            }
        },
        ReplCommand::Format(id) => hub.format_line(id).await.map(|text| {
            println!("{}", format!("── formatted [{id}] ──").bright_magenta());
            println!("{text}");
        }),
        ReplCommand::Help => {
            println!("{REPL_HELP}");
            Ok(())
        }
    };
    if let Err(e) = outcome {
        notice(e);
    }
}
