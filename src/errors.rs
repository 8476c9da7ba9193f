//! Error taxonomy for the calling-convention layer

use crate::interop::{RawTypeCode, TypeCode};
use std::fmt;

pub type FfiResult<T> = Result<T, FfiError>;

/// Failure raised by a foreign callable
///
/// Carries the full diagnostic (kind, message, traceback frames) so it can
/// be re-raised unchanged once control is back on the foreign side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignError {
    pub kind: String,
    pub message: String,
    pub traceback: Vec<String>,
}

impl ForeignError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// Append a traceback frame (outermost first)
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.traceback.push(frame.into());
        self
    }

    /// Full diagnostic trace as text
    pub fn diagnostic(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in &self.traceback {
            out.push_str("  ");
            out.push_str(frame);
            out.push('\n');
        }
        out.push_str(&self.kind);
        out.push_str(": ");
        out.push_str(&self.message);
        out
    }
}

impl fmt::Display for ForeignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ForeignError {}

#[derive(Debug, Clone, PartialEq)]
pub enum FfiError {
    /// Encoder met a foreign value kind it cannot represent
    UnsupportedArgumentType { position: usize, kind: String },
    /// More than one return value was requested or produced
    MultipleReturnValues { count: usize },
    /// Decoder met a type code outside the recognised set
    UnknownTypeCode { code: RawTypeCode },
    /// Hard-mode global lookup found nothing
    UnknownGlobalFunction { name: String },
    /// Constructor returned a different code than the registry promised
    ConstructorTypeMismatch { expected: TypeCode, actual: RawTypeCode },
    /// Native call failed; message copied verbatim from the native error slot
    NativeCall { message: String },
    /// Foreign callback failed inside a native call and is re-raised as-is
    Callback(ForeignError),
    /// Name cannot cross the boundary (interior NUL)
    InvalidName { name: String },
}

impl FfiError {
    /// Short kind name used when the error is rendered as a diagnostic
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::UnsupportedArgumentType { .. } => "UnsupportedArgumentType",
            Self::MultipleReturnValues { .. } => "MultipleReturnValuesError",
            Self::UnknownTypeCode { .. } => "UnknownTypeCodeError",
            Self::UnknownGlobalFunction { .. } => "UnknownGlobalFunctionError",
            Self::ConstructorTypeMismatch { .. } => "ConstructorTypeMismatch",
            Self::NativeCall { .. } => "NativeError",
            Self::Callback(_) => "CallbackError",
            Self::InvalidName { .. } => "InvalidName",
        }
    }

    /// Convert into a foreign-side failure, preserving callback errors
    pub fn into_foreign(self) -> ForeignError {
        match self {
            Self::Callback(err) => err,
            other => ForeignError::new(other.kind_name(), other.to_string()),
        }
    }
}

impl fmt::Display for FfiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedArgumentType { position, kind } => {
                write!(f, "Unsupported argument type at position {}: {}", position, kind)
            }
            Self::MultipleReturnValues { count } => {
                write!(f, "Multiple return values are not supported (got {})", count)
            }
            Self::UnknownTypeCode { code } => write!(f, "Unknown type code: {}", code),
            Self::UnknownGlobalFunction { name } => {
                write!(f, "Cannot find global function {}", name)
            }
            Self::ConstructorTypeMismatch { expected, actual } => {
                write!(
                    f,
                    "ConstructorTypeMismatch: expected type code {}, constructor returned {}",
                    expected.raw(),
                    actual
                )
            }
            Self::NativeCall { message } => f.write_str(message),
            Self::Callback(err) => f.write_str(&err.diagnostic()),
            Self::InvalidName { name } => write!(f, "Invalid name {:?}", name),
        }
    }
}

impl std::error::Error for FfiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Callback(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ForeignError> for FfiError {
    fn from(err: ForeignError) -> Self {
        Self::Callback(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_layout() {
        let err = ForeignError::new("ValueError", "bad input")
            .with_frame("File \"model.py\", line 3, in apply")
            .with_frame("File \"model.py\", line 9, in check");
        let text = err.diagnostic();
        assert!(text.starts_with("Traceback (most recent call last):\n"));
        assert!(text.contains("line 3, in apply\n  File"));
        assert!(text.ends_with("ValueError: bad input"));
    }

    #[test]
    fn test_mismatch_names_both_codes() {
        let err = FfiError::ConstructorTypeMismatch {
            expected: TypeCode::Object,
            actual: TypeCode::Int.raw(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ConstructorTypeMismatch"));
        assert!(msg.contains("expected type code 8"));
        assert!(msg.contains("returned 0"));
    }

    #[test]
    fn test_into_foreign_keeps_callback_error() {
        let original = ForeignError::new("KeyError", "'x'");
        let back = FfiError::Callback(original.clone()).into_foreign();
        assert_eq!(back, original);

        let converted = FfiError::UnknownTypeCode { code: 5 }.into_foreign();
        assert_eq!(converted.kind, "UnknownTypeCodeError");
        assert_eq!(converted.message, "Unknown type code: 5");
    }
}
