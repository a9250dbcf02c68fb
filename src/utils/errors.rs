//! Error types for the dataflow optimizer.
//!
//! Errors are organized by the phase that produces them. Fatal pass failures
//! are [`TransformError`]s; everything a pass merely skips is reported as a
//! [`Diagnostic`] instead.

use thiserror::Error;
use serde::Serialize;
use crate::ir::OpId;
use std::fmt;

/// A structural defect in a [`DataflowFunc`](crate::ir::DataflowFunc).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct IrError {
    /// The error message
    pub message: String,
    /// Offending operation (if any)
    pub op: Option<OpId>,
    /// The kind of IR error
    pub kind: IrErrorKind,
}

impl IrError {
    /// Create a new IR error.
    pub fn new(kind: IrErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), op: None, kind }
    }

    /// Attach the offending operation.
    pub fn at(mut self, op: OpId) -> Self {
        self.op = Some(op);
        self
    }
}

impl fmt::Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Some(op) => write!(f, "{} at {}", self.message, op),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrErrorKind {
    /// Op id or value id out of range
    DanglingReference,
    /// Parent link and body membership disagree
    InconsistentNesting,
    /// An op was erased but is still reachable
    ErasedOpReachable,
    /// Value used but never defined
    UndefinedValue,
    /// Loop with a zero or negative step
    InvalidLoop,
}

/// Error during a transformation pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    /// The error message
    pub message: String,
    /// The kind of transformation error
    pub kind: TransformErrorKind,
    /// The transformation that failed
    pub transform: String,
    /// The node or schedule the failure is attributed to
    pub entity: Option<OpId>,
}

impl TransformError {
    /// Create a new transformation error.
    pub fn new(
        kind: TransformErrorKind,
        transform: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            kind,
            transform: transform.into(),
            entity: None,
        }
    }

    /// Attribute the error to an operation.
    pub fn on(mut self, entity: OpId) -> Self {
        self.entity = Some(entity);
        self
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.message, self.transform)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    /// A schedule was visited before its parent node got a budget
    MissingParentBudget,
    /// The complexity estimator could not price a node or schedule
    ComplexityUnavailable,
    /// Invalid tile size
    InvalidTileSize,
    /// Transformation not applicable
    NotApplicable,
}

/// A diagnostic message with severity level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Severity level
    pub severity: DiagnosticSeverity,
    /// Message
    pub message: String,
    /// Operation the message is about
    pub op: Option<OpId>,
    /// Additional notes
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// Warning - a transformation was skipped
    Warning,
    /// Note - informational message
    Note,
}

impl Diagnostic {
    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Warning, message)
    }

    /// Create a new note diagnostic.
    pub fn note(message: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Note, message)
    }

    fn with_severity(severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            op: None,
            notes: Vec::new(),
        }
    }

    /// Attach the operation the diagnostic refers to.
    pub fn with_op(mut self, op: OpId) -> Self {
        self.op = Some(op);
        self
    }

    /// Add a note to the diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Forward the diagnostic to the `log` facade.
    pub fn emit(&self) {
        let op = self.op.map(|op| format!(" [{}]", op)).unwrap_or_default();
        match self.severity {
            DiagnosticSeverity::Warning => log::warn!("{}{}", self.message, op),
            DiagnosticSeverity::Note => log::debug!("{}{}", self.message, op),
        }
        for note in &self.notes {
            log::debug!("  note: {}", note);
        }
    }
}
