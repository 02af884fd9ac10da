use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Stage '{stage}' requires '{capability}' which no earlier stage satisfies")]
    UnsatisfiedRequirement { stage: String, capability: String },

    #[error("Cannot construct stage '{stage}': {reason}")]
    StageConstruction { stage: String, reason: String },

    #[error("Stage '{stage}' failed: {source}")]
    StageExecution {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Interrupted before stage '{stage}'")]
    Interrupted { stage: String },

    #[error("Output format error: {0}")]
    OutputFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine is shut down")]
    EngineClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PipelineError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn construction(stage: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::StageConstruction {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    pub fn execution(stage: impl Into<String>, source: anyhow::Error) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            source,
        }
    }

    /// Which part of the pipeline lifecycle produced this error
    pub fn phase(&self) -> ErrorPhase {
        match self {
            Self::UnknownStage(_) | Self::CircularDependency { .. } => ErrorPhase::Resolve,
            Self::UnsatisfiedRequirement { .. }
            | Self::StageConstruction { .. }
            | Self::Config(_)
            | Self::Yaml(_) => ErrorPhase::Build,
            Self::StageExecution { .. } | Self::Interrupted { .. } | Self::EngineClosed => {
                ErrorPhase::Execute
            }
            Self::OutputFormat(_) | Self::Io(_) => ErrorPhase::Output,
        }
    }

    /// Stage the error is attributed to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::UnsatisfiedRequirement { stage, .. }
            | Self::StageConstruction { stage, .. }
            | Self::StageExecution { stage, .. }
            | Self::Interrupted { stage } => Some(stage),
            _ => None,
        }
    }

    /// Fatal errors prevent a usable pipeline from being created.
    /// Everything else is scoped to one document or one output call.
    pub fn is_fatal(&self) -> bool {
        matches!(self.phase(), ErrorPhase::Resolve | ErrorPhase::Build)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorPhase {
    /// Stage list expansion and ordering
    Resolve,
    /// Stage construction and static requirement check
    Build,
    /// Per-document stage execution
    Execute,
    /// Output sink selection and writing
    Output,
}

impl ErrorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPhase::Resolve => "resolve",
            ErrorPhase::Build => "build",
            ErrorPhase::Execute => "execute",
            ErrorPhase::Output => "output",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "resolve" => Ok(ErrorPhase::Resolve),
            "build" => Ok(ErrorPhase::Build),
            "execute" => Ok(ErrorPhase::Execute),
            "output" => Ok(ErrorPhase::Output),
            _ => Err(PipelineError::config(format!("Invalid error phase: {}", s))),
        }
    }
}

impl std::fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_phase_roundtrip() {
        for phase in &[
            ErrorPhase::Resolve,
            ErrorPhase::Build,
            ErrorPhase::Execute,
            ErrorPhase::Output,
        ] {
            let parsed = ErrorPhase::from_str(phase.as_str()).unwrap();
            assert_eq!(*phase, parsed);
        }
    }

    #[test]
    fn test_error_phase_invalid() {
        assert!(ErrorPhase::from_str("compile").is_err());
    }

    #[test]
    fn test_circular_dependency_message_names_cycle() {
        let err = PipelineError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency: a -> b -> a");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_execution_errors_are_not_fatal() {
        let err = PipelineError::execution("pos", anyhow::anyhow!("model missing"));
        assert_eq!(err.phase(), ErrorPhase::Execute);
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("pos"));
        assert!(err.to_string().contains("model missing"));
    }
}
