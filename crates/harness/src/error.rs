use thiserror::Error;

/// Outcome of a decode case that did not pass.
///
/// `Skipped` means the environment cannot run the requested configuration and
/// is never reported as a regression. `Failed` is an assertion violation.
/// `Fatal` carries anything else (process errors, I/O) and is propagated as is.
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("skipped: {0}")]
    Skipped(String),

    #[error("failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl CaseError {
    pub fn skip(reason: impl Into<String>) -> Self {
        CaseError::Skipped(reason.into())
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        CaseError::Failed(reason.into())
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, CaseError::Skipped(_))
    }
}

impl From<std::io::Error> for CaseError {
    fn from(err: std::io::Error) -> Self {
        CaseError::Fatal(err.into())
    }
}

/// Fail the running case unless `cond` holds.
macro_rules! check {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err($crate::error::CaseError::Failed(format!($($msg)+)));
        }
    };
}

pub(crate) use check;

#[cfg(test)]
mod tests {
    use super::*;

    fn guarded(value: u32) -> Result<u32, CaseError> {
        check!(value > 1, "invalid value {}", value);
        Ok(value)
    }

    #[test]
    fn test_check_macro() {
        assert_eq!(guarded(3).unwrap(), 3);
        match guarded(1) {
            Err(CaseError::Failed(msg)) => assert_eq!(msg, "invalid value 1"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_fatal_from_anyhow() {
        let err: CaseError = anyhow::anyhow!("ffmpeg exited with 1").into();
        assert!(matches!(err, CaseError::Fatal(_)));
        assert!(!err.is_skip());
        assert_eq!(err.to_string(), "ffmpeg exited with 1");
    }
}
