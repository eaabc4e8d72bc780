//! Notebook cell types
//!
//! Cells are the unit of notebook content. They are created by action
//! handlers and mutated only through [`crate::store::CellStore`] methods; a
//! completed workflow keeps every cell as a transcript.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Markdown,
    Code,
    Thinking,
    Outcome,
    Error,
}

impl std::fmt::Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Markdown => "markdown",
            Self::Code => "code",
            Self::Thinking => "thinking",
            Self::Outcome => "outcome",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Kind tag carried by each captured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Text,
    Stream,
    Error,
    Result,
    Display,
}

/// A single captured output of a code execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOutput {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub content: String,
}

impl CellOutput {
    pub fn new(kind: OutputKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    /// Text output.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(OutputKind::Text, content)
    }

    /// Error output.
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(OutputKind::Error, content)
    }
}

/// A notebook cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    /// Stable identity, unique within a notebook.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CellKind,
    pub content: String,
    #[serde(default)]
    pub outputs: Vec<CellOutput>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Cell {
    /// Create a cell with a fresh v4 id.
    pub fn new(kind: CellKind, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            outputs: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Create a cell with a caller-provided id.
    pub fn with_id(id: impl Into<String>, kind: CellKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            outputs: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata key at construction time.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
