//! Error taxonomy for the compilation and execution pipeline.
//!
//! Three enums cover the five error kinds from the language's error taxonomy:
//! [`CompileError`] for `SyntaxError`/`SemanticError`, [`RuntimeError`] for
//! `TypeError`/`RuntimeError`/`HostError`, and [`ScriptError`] which unifies
//! both at the public API boundary. None of this uses `thiserror` or
//! `anyhow`: every variant is a plain struct/enum with a hand-written
//! `Display`, matching how the teacher crate renders `MontyException`.

use std::fmt;

/// A source location: 1-based line and column, plus the originating file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A single entry in a runtime error's call stack, used to build tracebacks.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub function_name: String,
    pub loc: CodeLoc,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  at {} ({})", self.function_name, self.loc)
    }
}

/// Errors raised by the lexer and parser (grammar violations) or by the
/// semantic pass (scope/const/return-placement violations).
#[derive(Debug, Clone)]
pub enum CompileError {
    Syntax { loc: CodeLoc, message: String },
    Semantic { loc: CodeLoc, message: String },
}

impl CompileError {
    pub fn syntax(loc: CodeLoc, message: impl Into<String>) -> Self {
        Self::Syntax {
            loc,
            message: message.into(),
        }
    }

    pub fn semantic(loc: CodeLoc, message: impl Into<String>) -> Self {
        Self::Semantic {
            loc,
            message: message.into(),
        }
    }

    pub fn loc(&self) -> &CodeLoc {
        match self {
            Self::Syntax { loc, .. } | Self::Semantic { loc, .. } => loc,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { loc, message } => write!(f, "{loc}: SyntaxError: {message}"),
            Self::Semantic { loc, message } => write!(f, "{loc}: SemanticError: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// The three runtime error kinds from the error taxonomy that can occur
/// after compilation has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Type,
    Runtime,
    Host,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Type => "TypeError",
            Self::Runtime => "RuntimeError",
            Self::Host => "HostError",
        };
        f.write_str(name)
    }
}

/// A raised runtime error, carrying the value passed to `error(...)` (usually
/// a string) plus the call stack captured at the point it was raised.
///
/// Matches the shape of `spec.md` §4.3 "Errors": "Runtime errors carry a
/// value ... and the stack depth at which they were raised."
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub stack: Vec<StackFrame>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Type, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Runtime, message)
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Host, message)
    }

    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.stack.push(frame);
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.kind, self.message)?;
        for frame in &self.stack {
            writeln!(f, "{frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Union of every error the public API can return.
#[derive(Debug, Clone)]
pub enum ScriptError {
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl From<CompileError> for ScriptError {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(e) => write!(f, "{e}"),
            Self::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ScriptError {}
