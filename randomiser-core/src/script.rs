//! Line-oriented text form of an event script.
//!
//! ```text
//! .data:
//!     b"\x00\x01..."
//! .code:
//!     Jump         0x1c
//!     SetValue     Pool_1 0x5
//!   0x1c:
//!     ShowDialog   "Hello"
//! ```
//!
//! Labels sit on their own line right before the instruction at their
//! offset. Numbers are hex (`0x`) or decimal, strings are double quoted.

use std::fmt::Write as _;

use thiserror::Error;

use crate::encoding::CharacterEncoding;
use crate::event::Event;
use crate::instruction::{
    Argument, ArgumentType, Instruction, InstructionSet, InstructionType, Labels, ValueLocation,
    UNKNOWN_INSTRUCTION_NAME,
};
use crate::util::{bytes_literal, parse_hex_u32};
use crate::{RandomiserError, Result};

/// Errors that can occur while reading the text form of a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("line {line}: unknown section '{name}'")]
    UnknownSection { line: usize, name: String },

    #[error("line {line}: content outside of a section")]
    NoSection { line: usize },

    #[error("line {line}: unknown instruction '{name}'")]
    UnknownInstruction { line: usize, name: String },

    #[error("line {line}: wrong argument count for {name}: expected {expected}, got {got}")]
    WrongArgCount {
        line: usize,
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("line {line}: invalid {kind} literal '{token}'")]
    BadLiteral {
        line: usize,
        kind: &'static str,
        token: String,
    },

    #[error("line {line}: unterminated quoted literal")]
    Unterminated { line: usize },

    #[error("line {line}: label '{label}' defined twice")]
    DuplicateLabel { line: usize, label: String },

    #[error("missing .data section")]
    MissingData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEntry {
    Label(String),
    Instruction(Instruction),
}

/// Editing view of an [`Event`]: instructions with inline label markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub data: Vec<u8>,
    pub entries: Vec<ScriptEntry>,
}

impl Script {
    /// Rebuild the event, assigning each label the running byte offset.
    pub fn to_event(&self, encoding: &dyn CharacterEncoding) -> Result<Event> {
        let mut instructions = Vec::new();
        let mut labels = Labels::new();
        let mut position = 0u32;

        for entry in &self.entries {
            match entry {
                ScriptEntry::Instruction(instruction) => {
                    position += instruction.encoded_len(encoding)? as u32;
                    instructions.push(instruction.clone());
                }
                ScriptEntry::Label(name) => {
                    if labels.insert(name.clone(), position).is_some() {
                        return Err(RandomiserError::DuplicateLabel(name.clone()));
                    }
                }
            }
        }

        Ok(Event {
            data: self.data.clone(),
            instructions,
            labels,
        })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(".data:\n");
        let _ = writeln!(out, "    {}", bytes_literal(&self.data));
        out.push_str(".code:\n");
        for entry in &self.entries {
            match entry {
                ScriptEntry::Label(name) => {
                    let _ = writeln!(out, "  {}:", name);
                }
                ScriptEntry::Instruction(instruction) => {
                    let _ = writeln!(out, "    {}", instruction);
                }
            }
        }
        out
    }

    pub fn parse(src: &str, set: &InstructionSet) -> Result<Script> {
        Ok(parse_script(src, set)?)
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Section {
    Data,
    Code,
}

fn parse_script(src: &str, set: &InstructionSet) -> std::result::Result<Script, ScriptError> {
    let mut section: Option<Section> = None;
    let mut data: Option<Vec<u8>> = None;
    let mut entries = Vec::new();
    let mut seen_labels = std::collections::HashSet::new();

    for (idx, raw_line) in src.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('.').and_then(|l| l.strip_suffix(':')) {
            section = match name {
                "data" => Some(Section::Data),
                "code" => Some(Section::Code),
                other => {
                    return Err(ScriptError::UnknownSection {
                        line: line_no,
                        name: other.to_string(),
                    })
                }
            };
            continue;
        }

        match section {
            None => return Err(ScriptError::NoSection { line: line_no }),
            Some(Section::Data) => {
                data = Some(parse_bytes(line_no, line)?);
            }
            Some(Section::Code) => {
                if let Some(label) = line.strip_suffix(':') {
                    if !label.contains(char::is_whitespace) && !label.starts_with('"') {
                        if !seen_labels.insert(label.to_string()) {
                            return Err(ScriptError::DuplicateLabel {
                                line: line_no,
                                label: label.to_string(),
                            });
                        }
                        entries.push(ScriptEntry::Label(label.to_string()));
                        continue;
                    }
                }
                entries.push(ScriptEntry::Instruction(parse_instruction(line_no, line, set)?));
            }
        }
    }

    Ok(Script {
        data: data.ok_or(ScriptError::MissingData)?,
        entries,
    })
}

fn parse_instruction(
    line: usize,
    text: &str,
    set: &InstructionSet,
) -> std::result::Result<Instruction, ScriptError> {
    let tokens = tokenize(line, text)?;
    let (name, mut args) = match tokens.split_first() {
        Some((name, rest)) => (name.as_str(), rest),
        None => {
            return Err(ScriptError::UnknownInstruction {
                line,
                name: String::new(),
            })
        }
    };

    let kind = if name == UNKNOWN_INSTRUCTION_NAME {
        let (id_tok, rest) = args.split_first().ok_or(ScriptError::WrongArgCount {
            line,
            name: name.to_string(),
            expected: 2,
            got: 0,
        })?;
        args = rest;
        let id = parse_hex_u32(id_tok).ok_or_else(|| ScriptError::BadLiteral {
            line,
            kind: "type id",
            token: id_tok.clone(),
        })?;
        std::sync::Arc::new(InstructionType::unknown(id))
    } else {
        set.by_name(name).ok_or_else(|| ScriptError::UnknownInstruction {
            line,
            name: name.to_string(),
        })?
    };

    if args.len() != kind.arguments.len() {
        return Err(ScriptError::WrongArgCount {
            line,
            name: name.to_string(),
            expected: kind.arguments.len(),
            got: args.len(),
        });
    }

    let mut arguments = Vec::with_capacity(args.len());
    for (ty, token) in kind.arguments.iter().zip(args) {
        arguments.push(parse_argument(line, *ty, token)?);
    }

    Ok(Instruction { kind, arguments })
}

fn parse_argument(
    line: usize,
    ty: ArgumentType,
    token: &str,
) -> std::result::Result<Argument, ScriptError> {
    let bad = |kind: &'static str| ScriptError::BadLiteral {
        line,
        kind,
        token: token.to_string(),
    };
    Ok(match ty {
        ArgumentType::U32 => Argument::U32(parse_hex_u32(token).ok_or_else(|| bad("u32"))?),
        ArgumentType::ValueLocation => Argument::ValueLocation(
            ValueLocation::from_script_name(token).ok_or_else(|| bad("value location"))?,
        ),
        ArgumentType::InstructionLocation => Argument::InstructionLocation(token.to_string()),
        ArgumentType::Bytes => Argument::Bytes(parse_bytes(line, token)?),
        ArgumentType::String => Argument::String(unquote(line, token)?),
        ArgumentType::AsciiString => Argument::AsciiString(unquote(line, token)?),
    })
}

/// Split on whitespace, keeping quoted literals (including `b"..."`) whole.
fn tokenize(line: usize, text: &str) -> std::result::Result<Vec<String>, ScriptError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_quotes {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
            continue;
        }
        if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c == '"' {
            in_quotes = true;
        }
        current.push(c);
    }

    if in_quotes {
        return Err(ScriptError::Unterminated { line });
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn unescape(line: usize, body: &str) -> std::result::Result<Vec<char>, ScriptError> {
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let bad = || ScriptError::BadLiteral {
            line,
            kind: "escape",
            token: body.to_string(),
        };
        match chars.next().ok_or_else(bad)? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                let value = u8::from_str_radix(&hex, 16).map_err(|_| bad())?;
                out.push(value as char);
            }
            _ => return Err(bad()),
        }
    }
    Ok(out)
}

fn unquote(line: usize, token: &str) -> std::result::Result<String, ScriptError> {
    let body = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| ScriptError::BadLiteral {
            line,
            kind: "string",
            token: token.to_string(),
        })?;
    Ok(unescape(line, body)?.into_iter().collect())
}

fn parse_bytes(line: usize, token: &str) -> std::result::Result<Vec<u8>, ScriptError> {
    let body = token
        .strip_prefix("b\"")
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| ScriptError::BadLiteral {
            line,
            kind: "byte string",
            token: token.to_string(),
        })?;
    unescape(line, body)?
        .into_iter()
        .map(|c| {
            u8::try_from(c as u32).map_err(|_| ScriptError::BadLiteral {
                line,
                kind: "byte string",
                token: token.to_string(),
            })
        })
        .collect()
}

impl Event {
    /// Render the event as editable text.
    pub fn to_text(&self, encoding: &dyn CharacterEncoding) -> Result<String> {
        Ok(self.to_script(encoding)?.to_text())
    }

    pub fn from_text(
        src: &str,
        set: &InstructionSet,
        encoding: &dyn CharacterEncoding,
    ) -> Result<Event> {
        Script::parse(src, set)?.to_event(encoding)
    }
}
