//! REPL – Read-Eval-Print Loop for the chatmem shell.
//!
//! Every memory command goes through the same [`Dispatcher`] a model would
//! use, so two-step confirmation and status events behave identically.

use colored::Colorize;
use std::io::{self, BufRead, Write};

use chatmem_runtime::{Dispatcher, parse_tool_calls, tool_schema};
use chatmem_types::{MemoryCommand, ReplyStatus, StatusKind, ToolReply};
use tokio::runtime::Runtime;

use crate::config::{self, Config};

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Quit,
    Settings,
    Schema,
    /// Show one memo by index.
    Get(i64),
    /// Raw JSON tool call(s).
    Tool(String),
    Memory(MemoryCommand),
}

/// Entry point for the interactive REPL.  Returns when the user quits or
/// stdin closes.
pub fn run(runtime: &Runtime, dispatcher: &Dispatcher, session: &str) {
    spawn_event_printer(runtime, dispatcher, session);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "chatmem>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(ReplCommand::Help) => cmd_help(),
            Ok(ReplCommand::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Ok(ReplCommand::Settings) => cmd_settings(),
            Ok(ReplCommand::Schema) => cmd_schema(),
            Ok(ReplCommand::Get(index)) => cmd_get(runtime, dispatcher, session, index),
            Ok(ReplCommand::Tool(raw)) => cmd_tool(runtime, dispatcher, session, &raw),
            Ok(ReplCommand::Memory(command)) => {
                let reply = runtime.block_on(dispatcher.dispatch(session, command));
                print_reply(&reply);
            }
            Err(message) => {
                println!("{} Type {} for available commands.", message.red(), "/help".bold())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse one input line into a [`ReplCommand`].
pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    let (head, rest) = split_word(line);

    let command = match head {
        "/help" => ReplCommand::Help,
        "/quit" | "/exit" => ReplCommand::Quit,
        "/settings" => ReplCommand::Settings,
        "/schema" => ReplCommand::Schema,
        "/list" => ReplCommand::Memory(MemoryCommand::RecallMemories {}),
        "/files" => ReplCommand::Memory(MemoryCommand::ListMemoryFiles {}),
        "/current" => ReplCommand::Memory(MemoryCommand::CurrentMemoryFile {}),
        "/refresh" => ReplCommand::Memory(MemoryCommand::RefreshMemory {}),
        "/get" => ReplCommand::Get(parse_index(rest, "/get <n>")?),
        "/add" => {
            let (tag, memo) = split_word(rest);
            if memo.is_empty() {
                return Err("Usage: /add <tag> <memo>".to_string());
            }
            ReplCommand::Memory(MemoryCommand::HandleInput {
                input_text: memo.to_string(),
                tag: tag.to_string(),
                user_wants_to_add: true,
                llm_wants_to_add: false,
            })
        }
        "/update" => {
            let usage = "Usage: /update <n> <tag> <memo>";
            let (index, rest) = split_word(rest);
            let (tag, memo) = split_word(rest);
            if memo.is_empty() {
                return Err(usage.to_string());
            }
            ReplCommand::Memory(MemoryCommand::UpdateMemoryEntry {
                index: parse_index(index, "/update <n> <tag> <memo>")?,
                tag: tag.to_string(),
                memo: memo.to_string(),
                by: chatmem_types::AUTHOR_USER.to_string(),
            })
        }
        "/delete" => ReplCommand::Memory(MemoryCommand::DeleteMemoryEntry {
            index: parse_index(rest, "/delete <n>")?,
            llm_wants_to_delete: true,
        }),
        "/clear" => {
            let user_confirmation = match rest {
                "" => false,
                "confirm" => true,
                _ => return Err("Usage: /clear [confirm]".to_string()),
            };
            ReplCommand::Memory(MemoryCommand::ClearMemories { user_confirmation })
        }
        "/switch" => {
            if rest.is_empty() {
                return Err("Usage: /switch <name>".to_string());
            }
            ReplCommand::Memory(MemoryCommand::CreateOrSwitchMemoryFile {
                new_file_name: rest.to_string(),
            })
        }
        "/rmfile" => {
            let (name, confirmed) = match rest.rsplit_once(char::is_whitespace) {
                Some((name, "confirm")) => (name.trim(), true),
                _ => (rest, false),
            };
            if name.is_empty() {
                return Err("Usage: /rmfile <name> [confirm]".to_string());
            }
            ReplCommand::Memory(MemoryCommand::DeleteMemoryFile {
                file_to_delete: name.to_string(),
                user_confirmation: confirmed,
            })
        }
        "/download" => match rest {
            "" => return Err("Usage: /download <name> | /download --all".to_string()),
            "--all" => ReplCommand::Memory(MemoryCommand::DownloadMemory {
                memory_file_name: String::new(),
                download_all: true,
            }),
            name => ReplCommand::Memory(MemoryCommand::DownloadMemory {
                memory_file_name: name.to_string(),
                download_all: false,
            }),
        },
        "/tool" => {
            if rest.is_empty() {
                return Err("Usage: /tool <json>".to_string());
            }
            ReplCommand::Tool(rest.to_string())
        }
        other => return Err(format!("Unknown command: '{other}'.")),
    };
    Ok(command)
}

/// Split off the first whitespace-delimited word; the remainder is trimmed.
fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (s, ""),
    }
}

fn parse_index(raw: &str, usage: &str) -> Result<i64, String> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("Usage: {usage} (n is a memory index)"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "chatmem Commands".bold().underline());
    let rows = [
        ("/add <tag> <memo>", "store a memo written by you"),
        ("/list", "show every memo in the active file"),
        ("/get <n>", "show one memo"),
        ("/update <n> <tag> <memo>", "rewrite a memo"),
        ("/delete <n>", "delete a memo"),
        ("/clear [confirm]", "delete every memo (asks first)"),
        ("/switch <name>", "switch to, or create, a memory file"),
        ("/files", "list memory files"),
        ("/current", "show the active memory file"),
        ("/rmfile <name> [confirm]", "delete a memory file (asks first)"),
        ("/download <name> | --all", "serve a file or an archive for a short time"),
        ("/refresh", "run the maintenance pass now"),
        ("/tool <json>", "run a raw tool call or an array of them"),
        ("/schema", "print the tool-call JSON schema"),
        ("/settings", "edit ~/.chatmem/config.toml"),
        ("/quit  /exit", "exit the shell"),
    ];
    for (command, what) in rows {
        println!("  {} – {}", format!("{command:<26}").bold().cyan(), what);
    }
    println!("  Tags: {}", chatmem_types::Tag::ALL.map(|t| t.as_str()).join(", ").dimmed());
    println!();
}

fn cmd_get(runtime: &Runtime, dispatcher: &Dispatcher, session: &str, index: i64) {
    match runtime.block_on(dispatcher.fetch(session, index)) {
        Ok(Some(record)) => match serde_json::to_string_pretty(&record) {
            Ok(json) => println!("{json}"),
            Err(e) => println!("{}: {}", "Error".red(), e),
        },
        Ok(None) => println!("{}", format!("Memory index {index} does not exist.").yellow()),
        Err(e) => println!("{}: {}", "Storage error".red(), e),
    }
}

fn cmd_tool(runtime: &Runtime, dispatcher: &Dispatcher, session: &str, raw: &str) {
    let calls = match parse_tool_calls(raw) {
        Ok(calls) => calls,
        Err(e) => {
            println!("{}", e.to_string().red());
            return;
        }
    };
    for (name, reply) in runtime.block_on(dispatcher.execute_sequence(session, calls)) {
        println!("{}", name.bold());
        print_reply(&reply);
    }
}

fn cmd_schema() {
    match serde_json::to_string_pretty(&tool_schema()) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn cmd_settings() {
    let mut cfg = match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {}", "Error loading config".red(), e);
            return;
        }
    };

    println!("{}", "Settings Editor".bold().underline());
    println!("  Press Enter to keep the current value.  Changes apply on the next start.");
    cfg.memory_dir = prompt_setting("Memory directory", &cfg.memory_dir);
    cfg.default_file = prompt_setting("Default file", &cfg.default_file);
    let use_memory = prompt_setting("Use memory", &cfg.use_memory.to_string());
    cfg.use_memory = !matches!(use_memory.to_lowercase().as_str(), "false" | "no" | "off" | "0");
    cfg.refresh_interval_minutes = prompt_u64(
        &format!("  Refresh (minutes)  [{}]: ", cfg.refresh_interval_minutes),
        cfg.refresh_interval_minutes,
    );
    cfg.download_window_secs = prompt_u64(
        &format!("  Download window (s)[{}]: ", cfg.download_window_secs),
        cfg.download_window_secs,
    );
    cfg.download_host = prompt_setting("Download host", &cfg.download_host);
    cfg.log_level = prompt_setting("Log level", &cfg.log_level);

    match config::save(&cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_reply(reply: &ToolReply) {
    let text = match reply.status {
        ReplyStatus::Ok => reply.message.green(),
        ReplyStatus::ConfirmationRequired | ReplyStatus::Aborted => reply.message.yellow(),
        ReplyStatus::NotFound | ReplyStatus::Refused => reply.message.yellow(),
        ReplyStatus::Rejected | ReplyStatus::Error => reply.message.red(),
    };
    println!("{text}");
}

/// Echo intermediate status events (download links in particular) while a
/// command is still running.  Final events repeat the reply and are skipped.
fn spawn_event_printer(runtime: &Runtime, dispatcher: &Dispatcher, session: &str) {
    let mut events = dispatcher.bus().subscribe_session(session);
    runtime.spawn(async move {
        while let Some(event) = events.recv().await {
            if event.done {
                continue;
            }
            if event.status == StatusKind::Download {
                println!("  {}", event.description.bold().cyan());
            } else {
                println!("  {}", event.description.dimmed());
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt for a positive integer.  Returns `default` when the user presses
/// Enter or types something invalid.
fn prompt_u64(msg: &str, default: u64) -> u64 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<u64>() {
        Ok(v) if v > 0 => v,
        _ => {
            println!(
                "  {} '{}' is not a positive number, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

fn prompt_setting(label: &str, current: &str) -> String {
    prompt_str(&format!("  {label:<19}[{current}]: "), current)
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(line: &str) -> MemoryCommand {
        match parse_command(line) {
            Ok(ReplCommand::Memory(command)) => command,
            other => panic!("expected a memory command for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn add_takes_tag_then_memo() {
        assert_eq!(
            memory("/add work  finish the report  "),
            MemoryCommand::HandleInput {
                input_text: "finish the report".into(),
                tag: "work".into(),
                user_wants_to_add: true,
                llm_wants_to_add: false,
            }
        );
        assert!(parse_command("/add work").is_err());
    }

    #[test]
    fn update_parses_index_tag_and_memo() {
        assert_eq!(
            memory("/update 3 life moved to Lisbon"),
            MemoryCommand::UpdateMemoryEntry {
                index: 3,
                tag: "life".into(),
                memo: "moved to Lisbon".into(),
                by: "user".into(),
            }
        );
        assert!(parse_command("/update x life memo").is_err());
    }

    #[test]
    fn clear_and_rmfile_take_optional_confirm() {
        assert_eq!(memory("/clear"), MemoryCommand::ClearMemories { user_confirmation: false });
        assert_eq!(
            memory("/clear confirm"),
            MemoryCommand::ClearMemories { user_confirmation: true }
        );
        assert!(parse_command("/clear please").is_err());

        assert_eq!(
            memory("/rmfile old confirm"),
            MemoryCommand::DeleteMemoryFile {
                file_to_delete: "old".into(),
                user_confirmation: true
            }
        );
        assert_eq!(
            memory("/rmfile old"),
            MemoryCommand::DeleteMemoryFile {
                file_to_delete: "old".into(),
                user_confirmation: false
            }
        );
        assert!(parse_command("/rmfile").is_err());
    }

    #[test]
    fn download_accepts_name_or_all() {
        assert_eq!(
            memory("/download --all"),
            MemoryCommand::DownloadMemory { memory_file_name: String::new(), download_all: true }
        );
        assert_eq!(
            memory("/download work"),
            MemoryCommand::DownloadMemory { memory_file_name: "work".into(), download_all: false }
        );
        assert!(parse_command("/download").is_err());
    }

    #[test]
    fn plain_commands() {
        assert_eq!(parse_command("/help"), Ok(ReplCommand::Help));
        assert_eq!(parse_command(" /exit "), Ok(ReplCommand::Quit));
        assert_eq!(parse_command("/get 12"), Ok(ReplCommand::Get(12)));
        assert_eq!(memory("/files"), MemoryCommand::ListMemoryFiles {});
        assert_eq!(
            parse_command(r#"/tool {"name":"recall_memories"}"#),
            Ok(ReplCommand::Tool(r#"{"name":"recall_memories"}"#.into()))
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        let err = parse_command("/start").unwrap_err();
        assert!(err.contains("/start"));
    }
}
