//! Virtual PTY
//!
//! A single-threaded cooperative state machine that turns keystrokes into
//! command executions. It owns the line buffer, cursor, history navigation,
//! shell state, and the pipe executor; it holds a shared reference to the
//! mount manager and never mutates mount topology. The UI terminal widget
//! feeds bytes in through [`VirtualPty::write`] and receives
//! stdout/stderr/prompt events through a registered callback.

use std::sync::Arc;

use crate::shell::commands::{CancelToken, CommandRegistry, EXIT_INTERRUPT};
use crate::shell::exec::execute_pipeline;
use crate::shell::parse::parse_pipeline;
use crate::shell::{
    ShellState, StateOverrides, add_to_history, apply_state_updates, create_shell_state,
    expand_env_vars, get_prompt_string,
};
use crate::vfs::mount::MountManager;

// ============================================================================
// ANSI Escape Sequences
// ============================================================================

/// Erase screen and home the cursor
const CLEAR_AND_HOME: &str = "\x1b[2J\x1b[H";
/// Carriage return plus erase-line, the start of every line redraw
const REDRAW_PREFIX: &str = "\r\x1b[K";
/// Red foreground (stderr rendering)
const COLOR_RED: &str = "\x1b[31m";
/// Reset all attributes
const COLOR_RESET: &str = "\x1b[0m";

// ============================================================================
// Output Events
// ============================================================================

/// Kind of data flowing back to the terminal widget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
    Prompt,
}

/// One chunk of output for the widget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub kind: OutputKind,
    pub data: String,
}

type OutputCallback = Box<dyn FnMut(OutputEvent)>;
type StateCallback = Box<dyn FnMut(&ShellState)>;

/// Progress of the two-byte `ESC [` escape-sequence scanner
enum EscapeState {
    Idle,
    /// Saw ESC, waiting for `[`
    Escape,
    /// Inside `ESC [`, collecting parameter bytes until the final byte
    Csi(String),
}

/// Translate `\n` to `\r\n` for the terminal widget
fn crlf(text: &str) -> String {
    text.replace('\n', "\r\n")
}

// ============================================================================
// Virtual PTY
// ============================================================================

/// The virtual pseudo-terminal: line editor plus dispatcher
pub struct VirtualPty {
    mounts: Arc<MountManager>,
    registry: CommandRegistry,
    state: ShellState,
    buffer: String,
    cursor: usize,
    /// Index into history while navigating, -1 when not
    history_index: isize,
    /// Line stashed when history navigation begins
    saved_line: String,
    is_executing: bool,
    cancel: CancelToken,
    cols: u16,
    rows: u16,
    escape: EscapeState,
    output: Option<OutputCallback>,
    on_state_change: Option<StateCallback>,
}

impl VirtualPty {
    pub fn new(mounts: Arc<MountManager>, registry: CommandRegistry, overrides: StateOverrides) -> Self {
        Self {
            mounts,
            registry,
            state: create_shell_state(overrides),
            buffer: String::new(),
            cursor: 0,
            history_index: -1,
            saved_line: String::new(),
            is_executing: false,
            cancel: CancelToken::new(),
            cols: 80,
            rows: 24,
            escape: EscapeState::Idle,
            output: None,
            on_state_change: None,
        }
    }

    /// Register the output sink for stdout/stderr/prompt events
    pub fn set_output(&mut self, callback: OutputCallback) {
        self.output = Some(callback);
    }

    /// Register the callback fired after every pipeline completion
    pub fn set_on_state_change(&mut self, callback: StateCallback) {
        self.on_state_change = Some(callback);
    }

    /// Advisory terminal dimensions, passed through to commands
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    /// Current line-editor contents (for the front-end's benefit)
    pub fn line(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Emit the first prompt of a session
    pub fn start(&mut self) {
        self.prompt();
    }

    /// Abort the currently running pipeline, if any
    pub fn interrupt(&self) {
        if self.is_executing {
            self.cancel.cancel();
        }
    }

    /// Feed keystroke bytes from the widget. While a pipeline is executing
    /// only Ctrl-C is honoured; all other bytes are dropped.
    pub async fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.process_byte(byte).await;
        }
    }

    async fn process_byte(&mut self, byte: u8) {
        if self.is_executing {
            if byte == 0x03 {
                self.cancel.cancel();
            }
            return;
        }

        match std::mem::replace(&mut self.escape, EscapeState::Idle) {
            EscapeState::Idle => {
                if byte == 0x1b {
                    self.escape = EscapeState::Escape;
                } else {
                    self.handle_key(byte).await;
                }
            }
            EscapeState::Escape => {
                if byte == b'[' {
                    self.escape = EscapeState::Csi(String::new());
                }
                // Any other byte after a bare ESC is inert.
            }
            EscapeState::Csi(mut params) => {
                if (0x40..=0x7e).contains(&byte) {
                    self.handle_csi(&params, byte);
                } else {
                    params.push(byte as char);
                    self.escape = EscapeState::Csi(params);
                }
            }
        }
    }

    /// A completed `ESC [ params final` sequence. Unrecognized sequences
    /// are inert.
    fn handle_csi(&mut self, params: &str, final_byte: u8) {
        match (params, final_byte) {
            ("", b'A') => self.history_up(),
            ("", b'B') => self.history_down(),
            ("", b'C') => {
                if self.cursor < self.buffer.len() {
                    self.cursor += 1;
                    self.redraw();
                }
            }
            ("", b'D') => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.redraw();
                }
            }
            ("", b'H') | ("1", b'~') => {
                self.cursor = 0;
                self.redraw();
            }
            ("", b'F') | ("4", b'~') => {
                self.cursor = self.buffer.len();
                self.redraw();
            }
            _ => {}
        }
    }

    async fn handle_key(&mut self, byte: u8) {
        match byte {
            b'\r' | b'\n' => self.commit_line().await,
            0x7f | 0x08 => {
                if self.cursor > 0 {
                    self.buffer.remove(self.cursor - 1);
                    self.cursor -= 1;
                    self.redraw();
                }
            }
            0x03 => {
                // Ctrl-C in the editor discards the line.
                self.emit(OutputKind::Stdout, "^C\r\n");
                self.buffer.clear();
                self.cursor = 0;
                self.history_index = -1;
                self.prompt();
            }
            0x04 => {
                // Ctrl-D on an empty buffer emits `exit` for the host.
                if self.buffer.is_empty() {
                    self.emit(OutputKind::Stdout, "exit\r\n");
                }
            }
            0x0c => {
                // Ctrl-L clears the screen and redraws the line.
                self.emit(OutputKind::Stdout, CLEAR_AND_HOME);
                self.redraw();
            }
            0x15 => {
                // Ctrl-U kills everything left of the cursor.
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
                self.redraw();
            }
            0x17 => {
                // Ctrl-W kills the previous whitespace-delimited word.
                let head = &self.buffer[..self.cursor];
                let trimmed = head.trim_end_matches(' ');
                let start = trimmed.rfind(' ').map(|i| i + 1).unwrap_or(0);
                self.buffer.drain(start..self.cursor);
                self.cursor = start;
                self.redraw();
            }
            0x01 => {
                self.cursor = 0;
                self.redraw();
            }
            0x05 => {
                self.cursor = self.buffer.len();
                self.redraw();
            }
            0x0b => {
                // Ctrl-K kills to end of line.
                self.buffer.truncate(self.cursor);
                self.redraw();
            }
            b'\t' => {
                // Placeholder completion: four spaces.
                self.buffer.insert_str(self.cursor, "    ");
                self.cursor += 4;
                self.redraw();
            }
            0x20..=0x7e => {
                self.buffer.insert(self.cursor, byte as char);
                self.cursor += 1;
                self.redraw();
            }
            _ => {}
        }
    }

    // ========================================================================
    // History Navigation
    // ========================================================================

    fn history_up(&mut self) {
        if self.state.history.is_empty() {
            return;
        }
        if self.history_index == -1 {
            self.saved_line = std::mem::take(&mut self.buffer);
            self.history_index = self.state.history.len() as isize - 1;
        } else if self.history_index > 0 {
            self.history_index -= 1;
        } else {
            return;
        }
        self.buffer = self.state.history[self.history_index as usize].clone();
        self.cursor = self.buffer.len();
        self.redraw();
    }

    fn history_down(&mut self) {
        if self.history_index == -1 {
            return;
        }
        self.history_index += 1;
        if self.history_index as usize >= self.state.history.len() {
            // Past the newest entry: restore the stashed line.
            self.history_index = -1;
            self.buffer = std::mem::take(&mut self.saved_line);
        } else {
            self.buffer = self.state.history[self.history_index as usize].clone();
        }
        self.cursor = self.buffer.len();
        self.redraw();
    }

    // ========================================================================
    // Execution
    // ========================================================================

    async fn commit_line(&mut self) {
        self.emit(OutputKind::Stdout, "\r\n");
        let line = std::mem::take(&mut self.buffer);
        self.cursor = 0;
        self.history_index = -1;
        self.saved_line.clear();

        if line.trim().is_empty() {
            self.prompt();
            return;
        }

        self.state = add_to_history(&self.state, &line);
        let expanded = expand_env_vars(&line, &self.state.env);
        if expanded.trim().is_empty() {
            self.prompt();
            return;
        }

        self.is_executing = true;
        self.cancel = CancelToken::new();
        let cancel = self.cancel.clone();
        let pipeline = parse_pipeline(&expanded);

        let result = execute_pipeline(
            &pipeline,
            &self.registry,
            self.mounts.as_ref(),
            &self.state,
            &cancel,
            self.cols,
            self.rows,
        )
        .await;

        match result {
            Ok(outcome) => {
                if outcome.exit_code == EXIT_INTERRUPT {
                    self.emit(OutputKind::Stdout, "^C\r\n");
                }
                if !outcome.stdout.is_empty() {
                    let data = crlf(&outcome.stdout);
                    self.emit(OutputKind::Stdout, &data);
                }
                if !outcome.stderr.is_empty() {
                    let data = format!("{COLOR_RED}{}{COLOR_RESET}", crlf(&outcome.stderr));
                    self.emit(OutputKind::Stderr, &data);
                }
                let mut next = apply_state_updates(&self.state, &outcome.state_updates);
                next.last_exit_code = outcome.exit_code;
                self.state = next;
            }
            Err(e) => {
                let data = format!("{COLOR_RED}Pipeline error: {e}{COLOR_RESET}\r\n");
                self.emit(OutputKind::Stderr, &data);
                self.state.last_exit_code = 1;
            }
        }

        self.is_executing = false;
        if let Some(callback) = &mut self.on_state_change {
            callback(&self.state);
        }
        self.prompt();
    }

    // ========================================================================
    // Output
    // ========================================================================

    fn emit(&mut self, kind: OutputKind, data: &str) {
        if let Some(callback) = &mut self.output {
            callback(OutputEvent { kind, data: String::from(data) });
        }
    }

    fn prompt(&mut self) {
        let prompt = get_prompt_string(&self.state);
        self.emit(OutputKind::Prompt, &prompt);
    }

    /// Redraw the current line: carriage return, erase, prompt, buffer,
    /// then step the cursor back to its column.
    fn redraw(&mut self) {
        let mut data = String::from(REDRAW_PREFIX);
        data.push_str(&get_prompt_string(&self.state));
        data.push_str(&self.buffer);
        let back = self.buffer.len() - self.cursor;
        if back > 0 {
            data.push_str(&format!("\x1b[{back}D"));
        }
        self.emit(OutputKind::Stdout, &data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::commands::{
        Command, CommandContext, CommandResult, create_default_registry,
    };
    use crate::vfs::memory::MemoryBackend;
    use crate::vfs::{MkdirOptions, WriteOptions};
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fixture() -> (VirtualPty, Rc<RefCell<Vec<OutputEvent>>>) {
        let mounts = Arc::new(MountManager::new());
        block_on(mounts.mount("/", Box::new(MemoryBackend::new()), false)).unwrap();
        let opts = MkdirOptions { recursive: true, ..Default::default() };
        for dir in ["/home", "/work", "/tmp"] {
            block_on(mounts.mkdir(dir, &opts)).unwrap();
        }

        let mut pty = VirtualPty::new(mounts, create_default_registry(), StateOverrides::default());
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        pty.set_output(Box::new(move |event| sink.borrow_mut().push(event)));
        (pty, events)
    }

    fn text_of(events: &[OutputEvent], kind: OutputKind) -> String {
        events.iter().filter(|e| e.kind == kind).map(|e| e.data.as_str()).collect()
    }

    #[test]
    fn test_start_emits_prompt() {
        let (mut pty, events) = fixture();
        pty.start();
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, OutputKind::Prompt);
        assert_eq!(events[0].data, "user@bavini:~$ ");
    }

    #[test]
    fn test_typed_line_executes_on_enter() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.write(b"pwd\r").await;
            let events = events.borrow();
            let stdout = text_of(&events, OutputKind::Stdout);
            assert!(stdout.contains("/home\r\n"));
            assert_eq!(events.last().unwrap().kind, OutputKind::Prompt);
            assert_eq!(pty.state().last_exit_code, 0);
        });
    }

    #[test]
    fn test_scenario_cd_then_pwd() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.mounts.mkdir("/home/projects", &MkdirOptions::default()).await.unwrap();

            pty.write(b"cd projects\r").await;
            assert_eq!(pty.state().cwd, "/home/projects");
            assert_eq!(pty.state().get_env("PWD"), Some("/home/projects"));
            assert_eq!(pty.state().get_env("OLDPWD"), Some("/home"));

            pty.write(b"pwd\r").await;
            let stdout = text_of(&events.borrow(), OutputKind::Stdout);
            assert!(stdout.contains("/home/projects\r\n"));
        });
    }

    #[test]
    fn test_scenario_pipe_to_file() {
        let (mut pty, _) = fixture();
        block_on(async {
            pty.mounts
                .write_file("/work/data.txt", b"apple\nbanana\ncherry\n", &WriteOptions::default())
                .await
                .unwrap();

            pty.write(b"cat /work/data.txt | grep a > /work/out.txt\r").await;
            assert_eq!(pty.state().last_exit_code, 0);
            assert_eq!(
                pty.mounts.read_file("/work/out.txt").await.unwrap(),
                b"apple\nbanana\n"
            );
        });
    }

    #[test]
    fn test_scenario_traversal_rejected() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.write(b"cat ../../../etc/passwd\r").await;
            assert_eq!(pty.state().last_exit_code, 1);
            let stderr = text_of(&events.borrow(), OutputKind::Stderr);
            assert!(stderr.contains("cat: ../../../etc/passwd: Permission denied"));
        });
    }

    #[test]
    fn test_scenario_append_redirect() {
        let (mut pty, _) = fixture();
        block_on(async {
            pty.mounts.write_file("/tmp/log", b"one\n", &WriteOptions::default()).await.unwrap();
            pty.write(b"echo two >> /tmp/log\r").await;
            assert_eq!(pty.mounts.read_file("/tmp/log").await.unwrap(), b"one\ntwo\n");
        });
    }

    #[test]
    fn test_scenario_history_dedup() {
        let (mut pty, _) = fixture();
        block_on(async {
            for line in ["ls\r", "ls\r", "pwd\r", "\r", "pwd\r"] {
                pty.write(line.as_bytes()).await;
            }
            assert_eq!(pty.state().history, vec!["ls", "pwd"]);
        });
    }

    #[test]
    fn test_env_expansion_on_enter() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.write(b"echo $HOME\r").await;
            let stdout = text_of(&events.borrow(), OutputKind::Stdout);
            assert!(stdout.contains("/home\r\n"));
        });
    }

    #[test]
    fn test_unknown_command_sets_127() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.write(b"bogus\r").await;
            assert_eq!(pty.state().last_exit_code, 127);
            let stderr = text_of(&events.borrow(), OutputKind::Stderr);
            assert!(stderr.contains("bogus: command not found"));
        });
    }

    #[test]
    fn test_backspace_edits_line() {
        let (mut pty, _) = fixture();
        block_on(async {
            pty.write(b"pwdd\x7f\r").await;
            assert_eq!(pty.state().history, vec!["pwd"]);
            assert_eq!(pty.state().last_exit_code, 0);
        });
    }

    #[test]
    fn test_ctrl_c_discards_line() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.write(b"doomed\x03").await;
            assert_eq!(pty.line(), "");
            let stdout = text_of(&events.borrow(), OutputKind::Stdout);
            assert!(stdout.contains("^C\r\n"));
            // Nothing was executed or recorded.
            assert!(pty.state().history.is_empty());
        });
    }

    #[test]
    fn test_ctrl_d_on_empty_buffer_emits_exit() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.write(b"\x04").await;
            let stdout = text_of(&events.borrow(), OutputKind::Stdout);
            assert_eq!(stdout, "exit\r\n");

            // With text in the buffer it does nothing.
            events.borrow_mut().clear();
            pty.write(b"x\x04").await;
            let stdout = text_of(&events.borrow(), OutputKind::Stdout);
            assert!(!stdout.contains("exit"));
        });
    }

    #[test]
    fn test_line_editing_keys() {
        let (mut pty, _) = fixture();
        block_on(async {
            // Ctrl-A then Ctrl-K wipes the line from the front.
            pty.write(b"abc\x01\x0b").await;
            assert_eq!(pty.line(), "");

            // Ctrl-U kills left of cursor.
            pty.write(b"hello\x15").await;
            assert_eq!(pty.line(), "");

            // Ctrl-W kills the previous word only.
            pty.write(b"one two\x17").await;
            assert_eq!(pty.line(), "one ");
            pty.write(b"\x15").await;

            // Tab inserts four spaces.
            pty.write(b"\t").await;
            assert_eq!(pty.line(), "    ");
            pty.write(b"\x15").await;
        });
    }

    #[test]
    fn test_arrow_keys_move_cursor() {
        let (mut pty, _) = fixture();
        block_on(async {
            pty.write(b"ab").await;
            assert_eq!(pty.cursor(), 2);
            pty.write(b"\x1b[D").await;
            assert_eq!(pty.cursor(), 1);
            pty.write(b"\x1b[C").await;
            assert_eq!(pty.cursor(), 2);
            // Home and End.
            pty.write(b"\x1b[H").await;
            assert_eq!(pty.cursor(), 0);
            pty.write(b"\x1b[F").await;
            assert_eq!(pty.cursor(), 2);
        });
    }

    #[test]
    fn test_escape_sequence_split_across_writes() {
        let (mut pty, _) = fixture();
        block_on(async {
            pty.write(b"ab").await;
            pty.write(b"\x1b").await;
            pty.write(b"[").await;
            pty.write(b"D").await;
            assert_eq!(pty.cursor(), 1);
        });
    }

    #[test]
    fn test_unknown_csi_is_inert() {
        let (mut pty, _) = fixture();
        block_on(async {
            pty.write(b"ab\x1b[5~").await;
            assert_eq!(pty.line(), "ab");
            assert_eq!(pty.cursor(), 2);
        });
    }

    #[test]
    fn test_history_navigation() {
        let (mut pty, _) = fixture();
        block_on(async {
            pty.write(b"pwd\r").await;
            pty.write(b"echo hi\r").await;

            // Up recalls the newest entry, up again the older one.
            pty.write(b"dra").await;
            pty.write(b"\x1b[A").await;
            assert_eq!(pty.line(), "echo hi");
            pty.write(b"\x1b[A").await;
            assert_eq!(pty.line(), "pwd");

            // Down walks back and past the newest restores the stash.
            pty.write(b"\x1b[B").await;
            assert_eq!(pty.line(), "echo hi");
            pty.write(b"\x1b[B").await;
            assert_eq!(pty.line(), "dra");
        });
    }

    /// Test-only command that trips its own cancellation token, standing in
    /// for Ctrl-C arriving while a pipeline runs.
    struct SelfInterruptCommand;

    #[async_trait(?Send)]
    impl Command for SelfInterruptCommand {
        fn name(&self) -> &'static str {
            "selfint"
        }
        fn description(&self) -> &'static str {
            "Interrupt the running pipeline"
        }
        async fn execute(&self, _args: &[String], ctx: &CommandContext<'_>) -> CommandResult {
            ctx.cancel.cancel();
            CommandResult::success()
        }
    }

    static SELF_INTERRUPT_CMD: SelfInterruptCommand = SelfInterruptCommand;

    #[test]
    fn test_scenario_interrupt_mid_pipeline() {
        block_on(async {
            let mounts = Arc::new(MountManager::new());
            mounts.mount("/", Box::new(MemoryBackend::new()), false).await.unwrap();
            mounts
                .mkdir("/home", &MkdirOptions { recursive: true, ..Default::default() })
                .await
                .unwrap();

            let mut registry = create_default_registry();
            registry.register(&SELF_INTERRUPT_CMD);
            let mut pty = VirtualPty::new(mounts, registry, StateOverrides::default());
            let events = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&events);
            pty.set_output(Box::new(move |event| sink.borrow_mut().push(event)));

            pty.write(b"selfint | echo never\r").await;
            assert_eq!(pty.state().last_exit_code, 130);
            let stdout = text_of(&events.borrow(), OutputKind::Stdout);
            assert!(stdout.contains("^C\r\n"));
            assert!(!stdout.contains("never"));
            assert_eq!(events.borrow().last().unwrap().kind, OutputKind::Prompt);
        });
    }

    #[test]
    fn test_shell_over_heterogeneous_mounts() {
        block_on(async {
            use crate::vfs::handle::{HandleBackend, MemoryDirHandle};
            use crate::vfs::kv::{KvBackend, MemoryKvStore};

            let mounts = Arc::new(MountManager::new());
            mounts.mount("/", Box::new(MemoryBackend::new()), false).await.unwrap();
            mounts
                .mount("/data", Box::new(KvBackend::new(Box::new(MemoryKvStore::new()))), false)
                .await
                .unwrap();
            mounts
                .mount("/files", Box::new(HandleBackend::new(Box::new(MemoryDirHandle::new()))), false)
                .await
                .unwrap();
            mounts
                .mkdir("/home", &MkdirOptions { recursive: true, ..Default::default() })
                .await
                .unwrap();

            let mut pty =
                VirtualPty::new(Arc::clone(&mounts), create_default_registry(), StateOverrides::default());
            let events = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&events);
            pty.set_output(Box::new(move |event| sink.borrow_mut().push(event)));

            // Write into the key-value mount, move across to the handle
            // mount, and read it back through the shell.
            pty.write(b"echo payload > /data/note.txt\r").await;
            pty.write(b"mv /data/note.txt /files/note.txt\r").await;
            pty.write(b"cat /files/note.txt\r").await;

            assert_eq!(pty.state().last_exit_code, 0);
            assert!(!mounts.exists("/data/note.txt").await.unwrap());
            let stdout = text_of(&events.borrow(), OutputKind::Stdout);
            assert!(stdout.contains("payload\r\n"));

            // Both mount points appear as synthetic entries at the root.
            events.borrow_mut().clear();
            pty.write(b"ls /\r").await;
            let stdout = text_of(&events.borrow(), OutputKind::Stdout);
            assert!(stdout.contains("data"));
            assert!(stdout.contains("files"));
        });
    }

    #[test]
    fn test_bare_redirect_reports_pipeline_error() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.write(b"> /tmp/f\r").await;
            assert_eq!(pty.state().last_exit_code, 1);
            let stderr = text_of(&events.borrow(), OutputKind::Stderr);
            assert!(stderr.contains("Pipeline error: no command to execute"));
        });
    }

    #[test]
    fn test_on_state_change_fires_after_pipeline() {
        let (mut pty, _) = fixture();
        block_on(async {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&seen);
            pty.set_on_state_change(Box::new(move |state| {
                sink.borrow_mut().push(state.last_exit_code);
            }));
            pty.write(b"pwd\r").await;
            pty.write(b"bogus\r").await;
            assert_eq!(*seen.borrow(), vec![0, 127]);
        });
    }

    #[test]
    fn test_redraw_contains_erase_and_prompt() {
        let (mut pty, events) = fixture();
        block_on(async {
            pty.write(b"l").await;
            let events = events.borrow();
            let last = events.last().unwrap();
            assert_eq!(last.kind, OutputKind::Stdout);
            assert!(last.data.starts_with("\r\x1b[K"));
            assert!(last.data.contains("user@bavini:~$ l"));
        });
    }

    #[test]
    fn test_input_dropped_while_executing_contract() {
        // The is_executing gate: bytes other than Ctrl-C are dropped.
        let (mut pty, _) = fixture();
        pty.is_executing = true;
        block_on(pty.write(b"abc"));
        assert_eq!(pty.line(), "");
        pty.is_executing = false;
    }
}
