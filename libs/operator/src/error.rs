//! Crate-wide error taxonomy (§7 of the design: validation / Kubernetes / chrono / invariant).

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate.
    #[error("Kubernetes reported error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },

    /// The resource's spec failed validation (§4.E Create step 1).
    #[error("invalid TestSuite spec: {0}")]
    InvalidSpec(String),

    /// Error in user input, typically a missing or unexpected field.
    #[error("invalid TestSuite resource: {0}")]
    UserInputError(String),

    /// A resource was inserted into the registry while already present outside the
    /// resume-on-restart path. Treated as a programming-invariant violation (§7f).
    #[error("resource {namespace}/{name} already registered")]
    RegistryConflict { namespace: String, name: String },

    #[error("failed to parse cron schedule: {0}")]
    CronError(String),

    #[error("failed to parse DateTime: {source}")]
    Chrono {
        #[from]
        source: chrono::ParseError,
    },

    #[error("YAML serialization error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid trace id")]
    InvalidTraceId,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Short, bounded-cardinality label suitable for a Prometheus metric.
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError { .. } => "kube".to_string(),
            Error::InvalidSpec(_) => "invalid_spec".to_string(),
            Error::UserInputError(_) => "user_input".to_string(),
            Error::RegistryConflict { .. } => "registry_conflict".to_string(),
            Error::CronError(_) => "cron".to_string(),
            Error::Chrono { .. } => "chrono".to_string(),
            Error::Yaml { .. } => "yaml".to_string(),
            Error::Json { .. } => "json".to_string(),
            Error::InvalidTraceId => "invalid_trace_id".to_string(),
        }
    }
}
