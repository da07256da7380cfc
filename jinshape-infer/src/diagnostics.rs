use crate::ast::SourceSpan;
use crate::error::{Error, LoadError};

/// An inference failure flattened for display next to the template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub span: Option<SourceSpan>,
    /// Set when the failure happened in an included or extended template.
    pub template: Option<String>,
}

impl Diagnostic {
    pub fn from_error(error: &Error) -> Self {
        let template = match error {
            Error::Syntax(err) => err.template.clone(),
            Error::Load(LoadError::NotFound { name })
            | Error::Load(LoadError::Io { name, .. })
            | Error::Load(LoadError::Cycle { name, .. }) => Some(name.clone()),
            Error::Infer(_) => None,
        };
        let message = match error {
            Error::Syntax(err) => err.message.clone(),
            _ => error.to_string(),
        };
        Self {
            message,
            span: error.span(),
            template,
        }
    }
}
