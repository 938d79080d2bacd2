//! Session Commands
//!
//! Built-ins that work on shell state and text: cd, pwd, echo, env, export,
//! clear, help, grep.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{CommandContext, CommandResult, Command, checked_path, report_error};
use crate::path::resolve;
use crate::shell::StateUpdates;

/// Erase screen and home the cursor
const CLEAR_SEQUENCE: &str = "\x1b[2J\x1b[H";

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Cd Command
// ============================================================================

/// Cd command - change the working directory
pub struct CdCommand;

#[async_trait(?Send)]
impl Command for CdCommand {
    fn name(&self) -> &'static str {
        "cd"
    }
    fn description(&self) -> &'static str {
        "Change the working directory"
    }
    fn usage(&self) -> &'static str {
        "cd [dir]"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let arg = args.first().map(|s| s.as_str()).unwrap_or("");
        let (target, echo_target) = match arg {
            "" | "~" => (String::from(ctx.state.home()), false),
            "-" => match ctx.state.get_env("OLDPWD") {
                Some(oldpwd) => (String::from(oldpwd), true),
                None => {
                    ctx.stderr("cd: OLDPWD not set\n");
                    return CommandResult::failure(1);
                }
            },
            path => (resolve(&ctx.state.cwd, path), false),
        };

        match ctx.mounts.stat(&target).await {
            Ok(stat) if stat.is_dir => {
                if echo_target {
                    ctx.stdout(&format!("{target}\n"));
                }
                CommandResult::with_updates(StateUpdates { cwd: Some(target), ..Default::default() })
            }
            Ok(_) => {
                report_error(ctx, "cd", arg, "Not a directory");
                CommandResult::failure(1)
            }
            Err(e) => {
                report_error(ctx, "cd", arg, &e.to_string());
                CommandResult::failure(1)
            }
        }
    }
}

/// Static instance
pub static CD_CMD: CdCommand = CdCommand;

// ============================================================================
// Pwd Command
// ============================================================================

/// Pwd command - print the working directory
pub struct PwdCommand;

#[async_trait(?Send)]
impl Command for PwdCommand {
    fn name(&self) -> &'static str {
        "pwd"
    }
    fn description(&self) -> &'static str {
        "Print the working directory"
    }

    async fn execute(&self, _args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        ctx.stdout(&format!("{}\n", ctx.state.cwd));
        CommandResult::success()
    }
}

/// Static instance
pub static PWD_CMD: PwdCommand = PwdCommand;

// ============================================================================
// Echo Command
// ============================================================================

/// Echo command - print arguments
pub struct EchoCommand;

#[async_trait(?Send)]
impl Command for EchoCommand {
    fn name(&self) -> &'static str {
        "echo"
    }
    fn description(&self) -> &'static str {
        "Print arguments"
    }
    fn usage(&self) -> &'static str {
        "echo [-n] [text...]"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let (newline, rest) = match args.first().map(|s| s.as_str()) {
            Some("-n") => (false, &args[1..]),
            _ => (true, args),
        };
        ctx.stdout(&rest.join(" "));
        if newline {
            ctx.stdout("\n");
        }
        CommandResult::success()
    }
}

/// Static instance
pub static ECHO_CMD: EchoCommand = EchoCommand;

// ============================================================================
// Env Command
// ============================================================================

/// Env command - print the environment
pub struct EnvCommand;

#[async_trait(?Send)]
impl Command for EnvCommand {
    fn name(&self) -> &'static str {
        "env"
    }
    fn description(&self) -> &'static str {
        "Print environment variables"
    }

    async fn execute(&self, _args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        for (key, value) in &ctx.state.env {
            ctx.stdout(&format!("{key}={value}\n"));
        }
        CommandResult::success()
    }
}

/// Static instance
pub static ENV_CMD: EnvCommand = EnvCommand;

// ============================================================================
// Export Command
// ============================================================================

/// Export command - set environment variables
pub struct ExportCommand;

#[async_trait(?Send)]
impl Command for ExportCommand {
    fn name(&self) -> &'static str {
        "export"
    }
    fn description(&self) -> &'static str {
        "Set environment variables"
    }
    fn usage(&self) -> &'static str {
        "export [NAME=value...]"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        if args.is_empty() {
            for (key, value) in &ctx.state.env {
                ctx.stdout(&format!("export {key}=\"{value}\"\n"));
            }
            return CommandResult::success();
        }

        let mut env = BTreeMap::new();
        let mut exit_code = 0;
        for arg in args {
            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (arg.as_str(), None),
            };
            if !is_valid_identifier(name) {
                ctx.stderr(&format!("export: `{arg}': not a valid identifier\n"));
                exit_code = 1;
                continue;
            }
            if let Some(value) = value {
                env.insert(String::from(name), String::from(strip_quotes(value)));
            }
        }

        let state_updates = if env.is_empty() {
            None
        } else {
            Some(StateUpdates { env: Some(env), ..Default::default() })
        };
        CommandResult { exit_code, state_updates }
    }
}

/// Strip one pair of matching surrounding quotes
fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Static instance
pub static EXPORT_CMD: ExportCommand = ExportCommand;

// ============================================================================
// Clear Command
// ============================================================================

/// Clear command - erase the screen
pub struct ClearCommand;

#[async_trait(?Send)]
impl Command for ClearCommand {
    fn name(&self) -> &'static str {
        "clear"
    }
    fn description(&self) -> &'static str {
        "Clear the terminal screen"
    }

    async fn execute(&self, _args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        ctx.stdout(CLEAR_SEQUENCE);
        CommandResult::success()
    }
}

/// Static instance
pub static CLEAR_CMD: ClearCommand = ClearCommand;

// ============================================================================
// Help Command
// ============================================================================

/// Help command - list built-ins or show one command's usage
pub struct HelpCommand;

#[async_trait(?Send)]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }
    fn description(&self) -> &'static str {
        "List built-in commands"
    }
    fn usage(&self) -> &'static str {
        "help [command]"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let Some(registry) = ctx.registry else {
            ctx.stderr("help: command registry unavailable\n");
            return CommandResult::failure(1);
        };

        match args.first() {
            None => {
                ctx.stdout("Available commands:\n");
                for cmd in registry.commands() {
                    ctx.stdout(&format!("  {:<10} {}\n", cmd.name(), cmd.description()));
                }
                CommandResult::success()
            }
            Some(name) => match registry.find(name) {
                Some(cmd) => {
                    ctx.stdout(&format!("{}: {}\n", cmd.name(), cmd.description()));
                    if !cmd.usage().is_empty() {
                        ctx.stdout(&format!("usage: {}\n", cmd.usage()));
                    }
                    CommandResult::success()
                }
                None => {
                    ctx.stderr(&format!("help: no help topics match `{name}'\n"));
                    CommandResult::failure(1)
                }
            },
        }
    }
}

/// Static instance
pub static HELP_CMD: HelpCommand = HelpCommand;

// ============================================================================
// Grep Command
// ============================================================================

/// Grep command - filter lines by a fixed pattern
pub struct GrepCommand;

#[async_trait(?Send)]
impl Command for GrepCommand {
    fn name(&self) -> &'static str {
        "grep"
    }
    fn description(&self) -> &'static str {
        "Filter lines matching a pattern"
    }
    fn usage(&self) -> &'static str {
        "grep [-i] [-v] <pattern> [file...]"
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
        let mut ignore_case = false;
        let mut invert = false;
        let mut rest = Vec::new();
        for arg in args {
            match arg.as_str() {
                "-i" => ignore_case = true,
                "-v" => invert = true,
                "-iv" | "-vi" => {
                    ignore_case = true;
                    invert = true;
                }
                _ => rest.push(arg.clone()),
            }
        }

        let Some(pattern) = rest.first().cloned() else {
            ctx.stderr(&format!("usage: {}\n", self.usage()));
            return CommandResult::failure(1);
        };
        let files = &rest[1..];
        let needle = if ignore_case { pattern.to_lowercase() } else { pattern };

        let mut text = String::new();
        if files.is_empty() {
            text = ctx.stdin.clone().unwrap_or_default();
        } else {
            for file in files {
                if ctx.cancel.is_cancelled() {
                    return CommandResult::failure(super::EXIT_INTERRUPT);
                }
                let Some(path) = checked_path(ctx, "grep", file) else {
                    return CommandResult::failure(1);
                };
                match ctx.mounts.read_to_string(&path).await {
                    Ok(contents) => text.push_str(&contents),
                    Err(e) => {
                        report_error(ctx, "grep", file, &e.to_string());
                        return CommandResult::failure(1);
                    }
                }
            }
        }

        let mut matched = false;
        for line in text.lines() {
            let haystack = if ignore_case { line.to_lowercase() } else { String::from(line) };
            if haystack.contains(&needle) != invert {
                matched = true;
                ctx.stdout(line);
                ctx.stdout("\n");
            }
        }
        if matched { CommandResult::success() } else { CommandResult::failure(1) }
    }
}

/// Static instance
pub static GREP_CMD: GrepCommand = GrepCommand;
