use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    SchedulerFault(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::SchedulerFault(_) => ExitCode::SchedulerFault,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::SchedulerFault(e) | Self::RuntimeError(e) => e,
        }
    }

    /// Sorts an engine error by who has to fix it.
    pub(crate) fn from_core(context: &'static str, err: stampede_core::Error) -> Self {
        use stampede_core::Error as CoreError;

        let kind = match &err {
            CoreError::Threshold(_)
            | CoreError::Metrics(_)
            | CoreError::InvalidStages
            | CoreError::InvalidVus
            | CoreError::InvalidControlTick(_)
            | CoreError::InvalidMonitorInterval
            | CoreError::InvalidOutputPath(_) => Self::InvalidInput,

            CoreError::SchedulerFault(_) => Self::SchedulerFault,

            CoreError::Io(_) | CoreError::Join(_) | CoreError::Serialize(_) => Self::RuntimeError,
        };

        kind(anyhow::Error::new(err).context(context))
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.anyhow())
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_are_classified() {
        let err = RunError::from_core("run failed", stampede_core::Error::InvalidStages);
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
        assert!(err.to_string().starts_with("run failed: "));

        let err = RunError::from_core(
            "run failed",
            stampede_core::Error::SchedulerFault("vu task panicked".to_string()),
        );
        assert_eq!(err.exit_code(), ExitCode::SchedulerFault);

        let io = std::io::Error::other("disk full");
        let err = RunError::from_core("write summary", stampede_core::Error::Io(io));
        assert_eq!(err.exit_code(), ExitCode::RuntimeError);
    }
}
