use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Indentation,
    Name,
    Type,
    Value,
    Key,
    Index,
    Attribute,
    ZeroDivision,
    Import,
    ResourceLimit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Indentation => "IndentationError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Key => "KeyError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Import => "ImportError",
            ErrorKind::ResourceLimit => "ResourceLimitError",
        };
        f.write_str(name)
    }
}

/// Failure raised while lexing, parsing or running a snippet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SandboxError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based source line, 0 when not yet known
    pub line: usize,
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if self.line > 0 {
            write!(f, " (line {})", self.line)?;
        }
        Ok(())
    }
}

impl SandboxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: 0,
        }
    }

    /// Attach a line number unless a more precise one is already set.
    pub fn at(mut self, line: usize) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::new(ErrorKind::Syntax, message).at(line)
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_line_when_known() {
        let err = SandboxError::new(ErrorKind::Name, "name 'x' is not defined").at(3);
        assert_eq!(err.to_string(), "NameError: name 'x' is not defined (line 3)");
        assert_eq!(err.clone().at(9).line, 3);
        assert_eq!(
            SandboxError::type_error("bad").to_string(),
            "TypeError: bad"
        );
    }
}
