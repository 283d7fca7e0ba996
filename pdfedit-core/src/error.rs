use thiserror::Error;

/// Failure taxonomy shared by every component of the editing core.
///
/// `NotFound` and `InvalidState` are recovered locally by callers (usually as a
/// no-op plus a notice); `Unsupported` and `ReadOnly` drive the committer's
/// fallback to the overlay tier.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("{what} `{id}` not found")]
    NotFound { what: &'static str, id: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("document is read-only")]
    ReadOnly,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl EditError {
    pub fn run_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "text run",
            id: id.into(),
        }
    }

    pub fn branch_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "history branch",
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised by a [`crate::DocumentWriter`] collaborator.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("document is encrypted or locked against modification")]
    DocumentReadOnly,
    #[error("font family `{0}` cannot be embedded")]
    FontUnavailable(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<WriterError> for EditError {
    fn from(err: WriterError) -> Self {
        match err {
            WriterError::DocumentReadOnly => EditError::ReadOnly,
            WriterError::FontUnavailable(family) => {
                EditError::Unsupported(format!("font family `{family}` cannot be embedded"))
            }
            WriterError::Backend(err) => EditError::Backend(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_errors_map_onto_taxonomy() {
        assert!(matches!(
            EditError::from(WriterError::DocumentReadOnly),
            EditError::ReadOnly
        ));
        match EditError::from(WriterError::FontUnavailable("Fancy".into())) {
            EditError::Unsupported(msg) => assert!(msg.contains("Fancy")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn not_found_renders_kind_and_id() {
        let err = EditError::run_not_found("run-0-3");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "text run `run-0-3` not found");
    }
}
