//! Shell Commands
//!
//! The built-in command system. Commands implement the [`Command`] trait as
//! stateless unit structs with static instances and are looked up by name
//! in a [`CommandRegistry`]. Handlers receive a [`CommandContext`] carrying
//! the mount manager, the shell state snapshot, output sinks, terminal
//! dimensions, a cancellation token, and piped stdin.

pub mod builtin;
pub mod fs;

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::path::resolve;
use crate::security::validate_path;
use crate::shell::{ShellState, StateUpdates};
use crate::vfs::mount::MountManager;

/// Exit code for an unknown command
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code for an interrupted pipeline
pub const EXIT_INTERRUPT: i32 = 130;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag for a running pipeline. Built-ins check it
/// at natural yield points (e.g. between files in a multi-argument `cat`).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ============================================================================
// Command Context
// ============================================================================

/// Everything a built-in needs to run one stage
pub struct CommandContext<'a> {
    pub mounts: &'a MountManager,
    pub state: &'a ShellState,
    /// Captured output of the previous pipeline stage, if any
    pub stdin: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub cancel: CancelToken,
    /// Registry reference for introspective commands (`help`)
    pub registry: Option<&'a CommandRegistry>,
    stdout: RefCell<String>,
    stderr: RefCell<String>,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        mounts: &'a MountManager,
        state: &'a ShellState,
        stdin: Option<String>,
        cols: u16,
        rows: u16,
        cancel: CancelToken,
    ) -> Self {
        Self {
            mounts,
            state,
            stdin,
            cols,
            rows,
            cancel,
            registry: None,
            stdout: RefCell::new(String::new()),
            stderr: RefCell::new(String::new()),
        }
    }

    pub fn with_registry(mut self, registry: &'a CommandRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Append to the stage's captured stdout
    pub fn stdout(&self, text: &str) {
        self.stdout.borrow_mut().push_str(text);
    }

    /// Append to the stage's stderr
    pub fn stderr(&self, text: &str) {
        self.stderr.borrow_mut().push_str(text);
    }

    /// Consume the context, yielding `(stdout, stderr)`
    pub fn into_output(self) -> (String, String) {
        (self.stdout.into_inner(), self.stderr.into_inner())
    }
}

/// Result of executing one built-in
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub exit_code: i32,
    pub state_updates: Option<StateUpdates>,
}

impl CommandResult {
    pub fn success() -> Self {
        Self { exit_code: 0, state_updates: None }
    }

    pub fn failure(exit_code: i32) -> Self {
        Self { exit_code, state_updates: None }
    }

    /// Plain result carrying an accumulated exit code
    pub fn exit(exit_code: i32) -> Self {
        Self { exit_code, state_updates: None }
    }

    pub fn with_updates(updates: StateUpdates) -> Self {
        Self { exit_code: 0, state_updates: Some(updates) }
    }
}

// ============================================================================
// Command Trait
// ============================================================================

/// A built-in command.
///
/// Commands are stateless unit structs; all session state arrives through
/// the context and leaves through `CommandResult::state_updates`.
#[async_trait(?Send)]
pub trait Command: Sync {
    /// Command name as typed at the prompt
    fn name(&self) -> &'static str;

    /// One-line description for help text
    fn description(&self) -> &'static str;

    /// Usage synopsis
    fn usage(&self) -> &'static str {
        ""
    }

    async fn execute(&self, args: &[String], ctx: &CommandContext<'_>) -> CommandResult;
}

// ============================================================================
// Command Registry
// ============================================================================

/// Registry of available commands
pub struct CommandRegistry {
    commands: Vec<&'static dyn Command>,
}

impl CommandRegistry {
    pub const fn new() -> Self {
        Self { commands: Vec::new() }
    }

    pub fn register(&mut self, command: &'static dyn Command) {
        self.commands.push(command);
    }

    pub fn find(&self, name: &str) -> Option<&'static dyn Command> {
        self.commands.iter().find(|cmd| cmd.name() == name).copied()
    }

    pub fn commands(&self) -> &[&'static dyn Command] {
        &self.commands
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create and populate the default command registry
pub fn create_default_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    // Session commands
    registry.register(&builtin::CD_CMD);
    registry.register(&builtin::PWD_CMD);
    registry.register(&builtin::ECHO_CMD);
    registry.register(&builtin::ENV_CMD);
    registry.register(&builtin::EXPORT_CMD);
    registry.register(&builtin::CLEAR_CMD);
    registry.register(&builtin::HELP_CMD);
    registry.register(&builtin::GREP_CMD);

    // Filesystem commands
    registry.register(&fs::LS_CMD);
    registry.register(&fs::CAT_CMD);
    registry.register(&fs::MKDIR_CMD);
    registry.register(&fs::RM_CMD);
    registry.register(&fs::CP_CMD);
    registry.register(&fs::MV_CMD);
    registry.register(&fs::TOUCH_CMD);
    registry.register(&fs::FIND_CMD);
    registry.register(&fs::MOUNT_CMD);

    registry
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Emit a POSIX-shaped error line: `"{cmd}: {arg}: {reason}"`
pub(crate) fn report_error(ctx: &CommandContext<'_>, cmd: &str, arg: &str, reason: &str) {
    ctx.stderr(&format!("{cmd}: {arg}: {reason}\n"));
}

/// Run a path argument through the security gate, then resolve it against
/// the cwd. A rejection surfaces as `Permission denied` and `None`; no
/// backend access may happen for such an argument.
pub(crate) fn checked_path(ctx: &CommandContext<'_>, cmd: &str, arg: &str) -> Option<String> {
    match validate_path(arg, "/") {
        Ok(_) => Some(resolve(&ctx.state.cwd, arg)),
        Err(_) => {
            report_error(ctx, cmd, arg, "Permission denied");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{StateOverrides, create_shell_state};

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = create_default_registry();
        assert!(registry.find("ls").is_some());
        assert!(registry.find("cd").is_some());
        assert!(registry.find("grep").is_some());
        assert!(registry.find("nope").is_none());
        assert_eq!(registry.find("echo").unwrap().name(), "echo");
    }

    #[test]
    fn test_context_output_capture() {
        let mounts = MountManager::new();
        let state = create_shell_state(StateOverrides::default());
        let ctx = CommandContext::new(&mounts, &state, None, 80, 24, CancelToken::new());
        ctx.stdout("a");
        ctx.stdout("b");
        ctx.stderr("oops");
        let (out, err) = ctx.into_output();
        assert_eq!(out, "ab");
        assert_eq!(err, "oops");
    }

    #[test]
    fn test_checked_path_rejects_traversal() {
        let mounts = MountManager::new();
        let state = create_shell_state(StateOverrides::default());
        let ctx = CommandContext::new(&mounts, &state, None, 80, 24, CancelToken::new());
        assert!(checked_path(&ctx, "cat", "../../../etc/passwd").is_none());
        let (_, err) = ctx.into_output();
        assert_eq!(err, "cat: ../../../etc/passwd: Permission denied\n");
    }

    #[test]
    fn test_checked_path_resolves_against_cwd() {
        let mounts = MountManager::new();
        let state = create_shell_state(StateOverrides::default());
        let ctx = CommandContext::new(&mounts, &state, None, 80, 24, CancelToken::new());
        assert_eq!(checked_path(&ctx, "cat", "notes.txt").as_deref(), Some("/home/notes.txt"));
        assert_eq!(checked_path(&ctx, "cat", "/etc/hosts").as_deref(), Some("/etc/hosts"));
    }
}
