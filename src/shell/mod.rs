//! Shell State & Expansion
//!
//! Per-session shell state (cwd, environment, history, last exit code) with
//! pure update functions, `$VAR` / `${VAR}` / `~` expansion, and prompt
//! rendering. State is owned by one PTY; pipelines report changes as
//! [`StateUpdates`] which are applied after the pipeline returns.

pub mod commands;
pub mod exec;
pub mod parse;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::is_inside;

/// Hard cap on retained history entries
pub const MAX_HISTORY_SIZE: usize = 1000;
/// History entries kept when persisting state for the front-end store
pub const PERSIST_HISTORY_LIMIT: usize = 100;

/// Environment a fresh session starts with
pub const DEFAULT_ENV: &[(&str, &str)] = &[
    ("HOME", "/home"),
    ("PATH", "/usr/bin:/bin"),
    ("PWD", "/"),
    ("USER", "user"),
    ("SHELL", "/bin/bash"),
    ("TERM", "xterm-256color"),
    ("LANG", "en_US.UTF-8"),
    ("EDITOR", "vim"),
];

// ============================================================================
// Shell State
// ============================================================================

/// The tuple of cwd, environment, history, and last exit code owned by one
/// PTY instance. `cwd` is always canonical and mirrored in `env["PWD"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellState {
    pub cwd: String,
    pub env: BTreeMap<String, String>,
    pub history: Vec<String>,
    pub last_exit_code: i32,
}

impl ShellState {
    /// Environment lookup
    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(|s| s.as_str())
    }

    /// HOME with the session default as fallback
    pub fn home(&self) -> &str {
        self.get_env("HOME").unwrap_or("/home")
    }
}

/// Optional initial values for [`create_shell_state`]
#[derive(Debug, Clone, Default)]
pub struct StateOverrides {
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// Build a fresh shell state from the default environment plus overrides.
/// `cwd` defaults to `HOME`.
pub fn create_shell_state(overrides: StateOverrides) -> ShellState {
    let mut env: BTreeMap<String, String> = DEFAULT_ENV
        .iter()
        .map(|(k, v)| (String::from(*k), String::from(*v)))
        .collect();
    env.extend(overrides.env);

    let cwd = overrides
        .cwd
        .or_else(|| env.get("HOME").cloned())
        .unwrap_or_else(|| String::from("/home"));
    env.insert(String::from("PWD"), cwd.clone());

    ShellState { cwd, env, history: Vec::new(), last_exit_code: 0 }
}

// ============================================================================
// Pure State Updates
// ============================================================================

/// New state with `cwd` changed; `PWD` follows and `OLDPWD` records the
/// previous directory.
pub fn update_cwd(state: &ShellState, new_cwd: &str) -> ShellState {
    let mut next = state.clone();
    next.env.insert(String::from("OLDPWD"), state.cwd.clone());
    next.env.insert(String::from("PWD"), String::from(new_cwd));
    next.cwd = String::from(new_cwd);
    next
}

/// New state with a command appended to history.
///
/// Whitespace-only lines and immediate duplicates are ignored; the history
/// is trimmed to [`MAX_HISTORY_SIZE`].
pub fn add_to_history(state: &ShellState, command: &str) -> ShellState {
    let trimmed = command.trim();
    if trimmed.is_empty() || state.history.last().map(|s| s.as_str()) == Some(trimmed) {
        return state.clone();
    }
    let mut next = state.clone();
    next.history.push(String::from(trimmed));
    if next.history.len() > MAX_HISTORY_SIZE {
        let excess = next.history.len() - MAX_HISTORY_SIZE;
        next.history.drain(..excess);
    }
    next
}

/// Partial state changes emitted by a command or pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdates {
    pub cwd: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub last_exit_code: Option<i32>,
    pub history: Option<Vec<String>>,
}

impl StateUpdates {
    /// Overlay `other` on top of these updates; later values win per field,
    /// env maps merge per key.
    pub fn merge(mut self, other: StateUpdates) -> StateUpdates {
        if other.cwd.is_some() {
            self.cwd = other.cwd;
        }
        if let Some(env) = other.env {
            self.env.get_or_insert_with(BTreeMap::new).extend(env);
        }
        if other.last_exit_code.is_some() {
            self.last_exit_code = other.last_exit_code;
        }
        if other.history.is_some() {
            self.history = other.history;
        }
        self
    }
}

/// Apply partial updates, producing the next state
pub fn apply_state_updates(state: &ShellState, updates: &StateUpdates) -> ShellState {
    let mut next = state.clone();
    if let Some(cwd) = &updates.cwd {
        next = update_cwd(&next, cwd);
    }
    if let Some(env) = &updates.env {
        next.env.extend(env.clone());
    }
    if let Some(code) = updates.last_exit_code {
        next.last_exit_code = code;
    }
    if let Some(history) = &updates.history {
        next.history = history.clone();
    }
    next
}

// ============================================================================
// Variable Expansion
// ============================================================================

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expand `${NAME}`, then `$NAME`, then a leading `~`, over the whole
/// input. Unknown variables expand to empty. Runs before parsing, so
/// quoting is not considered here.
pub fn expand_env_vars(input: &str, env: &BTreeMap<String, String>) -> String {
    let braced = expand_braced(input, env);
    let named = expand_named(&braced, env);
    expand_tilde(&named, env)
}

fn expand_braced(input: &str, env: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(close) = input[i + 2..].find('}') {
                let name = &input[i + 2..i + 2 + close];
                if let Some(value) = env.get(name) {
                    out.push_str(value);
                }
                i = i + 2 + close + 1;
                continue;
            }
        }
        let Some(ch) = input[i..].chars().next() else { break };
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn expand_named(input: &str, env: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() && is_ident_start(chars[i + 1]) {
            let mut end = i + 1;
            while end < chars.len() && is_ident_char(chars[end]) {
                end += 1;
            }
            let name: String = chars[i + 1..end].iter().collect();
            if let Some(value) = env.get(&name) {
                out.push_str(value);
            }
            i = end;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn expand_tilde(input: &str, env: &BTreeMap<String, String>) -> String {
    let home = env.get("HOME").map(|s| s.as_str()).unwrap_or("/home");
    if input == "~" {
        String::from(home)
    } else if let Some(rest) = input.strip_prefix("~/") {
        format!("{home}/{rest}")
    } else {
        String::from(input)
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// Render the prompt: `{USER}@bavini:{cwd}$ ` with the home directory
/// abbreviated to `~`.
pub fn get_prompt_string(state: &ShellState) -> String {
    let user = state.get_env("USER").unwrap_or("user");
    let home = state.home();
    let cwd = if state.cwd == home {
        String::from("~")
    } else if home != "/" && is_inside(home, &state.cwd) {
        format!("~{}", &state.cwd[home.len()..])
    } else {
        state.cwd.clone()
    };
    format!("{user}@bavini:{cwd}$ ")
}

// ============================================================================
// Persistence
// ============================================================================

/// Serializable snapshot of shell state for the front-end session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedShellState {
    pub cwd: String,
    pub env: BTreeMap<String, String>,
    pub history: Vec<String>,
    pub last_exit_code: i32,
}

/// Snapshot state for persistence, keeping only the most recent
/// [`PERSIST_HISTORY_LIMIT`] history entries
pub fn to_persisted(state: &ShellState) -> PersistedShellState {
    let start = state.history.len().saturating_sub(PERSIST_HISTORY_LIMIT);
    PersistedShellState {
        cwd: state.cwd.clone(),
        env: state.env.clone(),
        history: state.history[start..].to_vec(),
        last_exit_code: state.last_exit_code,
    }
}

/// Restore a session from its persisted snapshot
pub fn from_persisted(persisted: PersistedShellState) -> ShellState {
    ShellState {
        cwd: persisted.cwd,
        env: persisted.env,
        history: persisted.history,
        last_exit_code: persisted.last_exit_code,
    }
}
