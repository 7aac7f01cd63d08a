use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown port: {0}")]
    UnknownPort(String),

    #[error("Unknown locker: {0}")]
    UnknownLocker(String),

    #[error("Unknown seaplane: {0}")]
    UnknownSeaplane(String),

    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("Unknown assignment: {0}")]
    UnknownAssignment(String),

    #[error("Unknown box: {0}")]
    UnknownBox(String),

    #[error("No EMPTY locker available at port {port}")]
    NoLockerAvailable { port: String },

    #[error("Invalid transition for {entity} {id}: {event} not permitted from {from}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        event: String,
    },

    #[error("Invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("Locker {locker} is not empty (status: {status})")]
    LockerNotEmpty { locker: String, status: String },

    #[error("{kind} already exists: {id}")]
    DuplicateEntity { kind: &'static str, id: String },

    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 資源暫時不足，下一輪調度重試
    Resource,
    /// 呼叫端違反資料不變式
    Invariant,
    Lookup,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DispatchError {
    pub fn invalid_transition(
        entity: &'static str,
        id: impl ToString,
        from: impl std::fmt::Display,
        event: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id: id.to_string(),
            from: from.to_string(),
            event: event.to_string(),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoLockerAvailable { .. } | Self::Conflict { .. } => ErrorCategory::Resource,
            Self::InvalidTransition { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidOrder { .. }
            | Self::LockerNotEmpty { .. }
            | Self::DuplicateEntity { .. } => ErrorCategory::Invariant,
            Self::UnknownPort(_)
            | Self::UnknownLocker(_)
            | Self::UnknownSeaplane(_)
            | Self::UnknownOrder(_)
            | Self::UnknownProduct(_)
            | Self::UnknownClient(_)
            | Self::UnknownAssignment(_)
            | Self::UnknownBox(_) => ErrorCategory::Lookup,
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Resource => ErrorSeverity::Low,
            ErrorCategory::Invariant | ErrorCategory::Lookup => ErrorSeverity::Medium,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 僅資源競爭類錯誤可由調度引擎吸收並於下一輪重試
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Resource
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Resource => "The order stays in the backlog and is retried next cycle",
            ErrorCategory::Invariant => "Refresh the entity state and resend a valid request",
            ErrorCategory::Lookup => "Check the identifier against the current listings",
            ErrorCategory::Configuration => "Fix the scenario file and run again",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::NoLockerAvailable { port } => {
                format!("All lockers at port {} are in use right now", port)
            }
            Self::InvalidOrder { reason } => format!("The order was rejected: {}", reason),
            Self::ConfigError { message } => format!("Configuration problem: {}", message),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
