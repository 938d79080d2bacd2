//! Pipeline Parser
//!
//! Two-phase parsing of a command line: a quote-aware scan splits the input
//! on unquoted `|`, `>`, `>>`, `<` (matching `>>` before `>`), then each
//! command segment is tokenized with the same quoting rules. Single quotes
//! preserve every byte up to the closing quote; double quotes honor
//! backslash escapes; an escaped operator or space outside quotes becomes a
//! literal. Variable expansion runs on the whole input *before* parsing, so
//! the tokenizer never expands.

/// One stage of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineCommand {
    /// Trimmed source text of the command segment
    pub raw: String,
    pub command: String,
    pub args: Vec<String>,
}

/// Output redirection operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `>`
    Overwrite,
    /// `>>`
    Append,
}

/// Output redirection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    pub kind: RedirectKind,
    pub file: String,
}

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pipeline {
    pub commands: Vec<PipelineCommand>,
    pub output_redirect: Option<OutputRedirect>,
    pub input_redirect: Option<String>,
    /// Single command, no redirects
    pub is_simple: bool,
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(PartialEq, Clone, Copy)]
enum Quote {
    None,
    Single,
    Double,
}

/// Split a command segment into tokens, honoring quotes and escapes.
/// Quoted empty strings yield empty tokens; an unterminated quote runs to
/// the end of input.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let mut quote = Quote::None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => {
                if c == '"' {
                    quote = Quote::None;
                } else if c == '\\' {
                    current.push(chars.next().unwrap_or('\\'));
                } else {
                    current.push(c);
                }
            }
            Quote::None => {
                if c == '\'' {
                    quote = Quote::Single;
                    started = true;
                } else if c == '"' {
                    quote = Quote::Double;
                    started = true;
                } else if c == '\\' {
                    current.push(chars.next().unwrap_or('\\'));
                    started = true;
                } else if c.is_whitespace() {
                    if started {
                        tokens.push(std::mem::take(&mut current));
                        started = false;
                    }
                } else {
                    current.push(c);
                    started = true;
                }
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}

// ============================================================================
// Operator Scan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Pipe,
    Out,
    OutAppend,
    In,
}

#[derive(Debug)]
enum Part<'a> {
    Text(&'a str),
    Op(Op),
}

/// True when the input contains an unquoted, unescaped `|`, `>`, or `<`
pub fn has_pipe_operators(input: &str) -> bool {
    let mut quote = Quote::None;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                }
            }
            Quote::Double => {
                if c == '"' {
                    quote = Quote::None;
                } else if c == '\\' {
                    chars.next();
                }
            }
            Quote::None => match c {
                '\'' => quote = Quote::Single,
                '"' => quote = Quote::Double,
                '\\' => {
                    chars.next();
                }
                '|' | '>' | '<' => return true,
                _ => {}
            },
        }
    }
    false
}

/// Byte index just past the character starting at `i`
fn skip_char(input: &str, i: usize) -> usize {
    let mut j = i + 1;
    while j < input.len() && !input.is_char_boundary(j) {
        j += 1;
    }
    j
}

/// Split the input into alternating text and operator parts, respecting
/// quotes and escapes. `>>` is matched before `>`.
fn split_operators(input: &str) -> Vec<Part<'_>> {
    let mut parts = Vec::new();
    let mut quote = Quote::None;
    let mut start = 0;
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Quote::Single => {
                if c == b'\'' {
                    quote = Quote::None;
                }
                i += 1;
            }
            Quote::Double => {
                if c == b'"' {
                    quote = Quote::None;
                    i += 1;
                } else if c == b'\\' {
                    i = if i + 1 < bytes.len() { skip_char(input, i + 1) } else { i + 1 };
                } else {
                    i += 1;
                }
            }
            Quote::None => match c {
                b'\'' => {
                    quote = Quote::Single;
                    i += 1;
                }
                b'"' => {
                    quote = Quote::Double;
                    i += 1;
                }
                b'\\' => {
                    i = if i + 1 < bytes.len() { skip_char(input, i + 1) } else { i + 1 };
                }
                b'|' | b'>' | b'<' => {
                    if i > start {
                        parts.push(Part::Text(&input[start..i]));
                    }
                    let (op, len) = match c {
                        b'|' => (Op::Pipe, 1),
                        b'<' => (Op::In, 1),
                        _ if bytes.get(i + 1) == Some(&b'>') => (Op::OutAppend, 2),
                        _ => (Op::Out, 1),
                    };
                    parts.push(Part::Op(op));
                    i += len;
                    start = i;
                }
                _ => {
                    i += 1;
                }
            },
        }
    }
    if start < input.len() {
        parts.push(Part::Text(&input[start..]));
    }
    parts
}

// ============================================================================
// Pipeline Parser
// ============================================================================

fn command_from(tokens: Vec<String>, raw: &str) -> Option<PipelineCommand> {
    let mut tokens = tokens.into_iter();
    let command = tokens.next()?;
    Some(PipelineCommand { raw: String::from(raw.trim()), command, args: tokens.collect() })
}

/// Parse a command line into a [`Pipeline`].
///
/// Without pipe operators the whole input becomes a single command. With
/// operators, `|` closes the current command, `>` / `>>` consume the next
/// segment's first token as the output target, and `<` consumes the next
/// segment's first token as the input target without opening a new stage.
pub fn parse_pipeline(input: &str) -> Pipeline {
    if !has_pipe_operators(input) {
        let commands: Vec<PipelineCommand> =
            command_from(tokenize(input), input).into_iter().collect();
        let is_simple = commands.len() == 1;
        return Pipeline { commands, output_redirect: None, input_redirect: None, is_simple };
    }

    let parts = split_operators(input);
    let mut commands = Vec::new();
    let mut current_tokens: Vec<String> = Vec::new();
    let mut current_raw = String::new();
    let mut output_redirect = None;
    let mut input_redirect = None;

    let flush = |tokens: &mut Vec<String>, raw: &mut String, commands: &mut Vec<PipelineCommand>| {
        if let Some(cmd) = command_from(std::mem::take(tokens), raw) {
            commands.push(cmd);
        }
        raw.clear();
    };

    let mut i = 0;
    while i < parts.len() {
        match &parts[i] {
            Part::Text(text) => {
                current_tokens.extend(tokenize(text));
                if !current_raw.is_empty() {
                    current_raw.push(' ');
                }
                current_raw.push_str(text.trim());
                i += 1;
            }
            Part::Op(Op::Pipe) => {
                flush(&mut current_tokens, &mut current_raw, &mut commands);
                i += 1;
            }
            Part::Op(op) => {
                let op = *op;
                i += 1;
                if let Some(Part::Text(text)) = parts.get(i) {
                    let mut tokens = tokenize(text);
                    if !tokens.is_empty() {
                        let target = tokens.remove(0);
                        match op {
                            Op::Out => {
                                output_redirect =
                                    Some(OutputRedirect { kind: RedirectKind::Overwrite, file: target });
                            }
                            Op::OutAppend => {
                                output_redirect =
                                    Some(OutputRedirect { kind: RedirectKind::Append, file: target });
                            }
                            Op::In | Op::Pipe => {
                                input_redirect = Some(target);
                            }
                        }
                        // Anything after the target still belongs to the
                        // current command.
                        current_tokens.extend(tokens);
                    }
                    i += 1;
                }
            }
        }
    }
    flush(&mut current_tokens, &mut current_raw, &mut commands);

    let is_simple = commands.len() == 1 && output_redirect.is_none() && input_redirect.is_none();
    Pipeline { commands, output_redirect, input_redirect, is_simple }
}

// ============================================================================
// Formatting
// ============================================================================

fn quote_token(token: &str) -> String {
    let needs_quoting = token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '|' | '>' | '<' | '"' | '\'' | '\\'));
    if !needs_quoting {
        return String::from(token);
    }
    let mut out = String::with_capacity(token.len() + 2);
    out.push('"');
    for c in token.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Render a pipeline back into a parseable command line.
/// `parse_pipeline(format_pipeline(p))` preserves commands and redirects.
pub fn format_pipeline(pipeline: &Pipeline) -> String {
    let mut out = pipeline
        .commands
        .iter()
        .map(|cmd| {
            let mut parts = vec![quote_token(&cmd.command)];
            parts.extend(cmd.args.iter().map(|a| quote_token(a)));
            parts.join(" ")
        })
        .collect::<Vec<_>>()
        .join(" | ");
    if let Some(file) = &pipeline.input_redirect {
        out.push_str(" < ");
        out.push_str(&quote_token(file));
    }
    if let Some(redirect) = &pipeline.output_redirect {
        out.push_str(match redirect.kind {
            RedirectKind::Overwrite => " > ",
            RedirectKind::Append => " >> ",
        });
        out.push_str(&quote_token(&redirect.file));
    }
    out
}
