//! Error types for saneitizer-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for saneitizer-core
#[derive(Error, Debug)]
pub enum Error {
    /// Drift classification errors
    #[error("Checker error: {0}")]
    Checker(#[from] CheckerError),

    /// Remediation errors
    #[error("Remediation error: {0}")]
    Remediation(#[from] RemediationError),

    /// Cluster coordinator construction errors
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Cluster assignment errors
    #[error("Assignment error: {0}")]
    Assignment(#[from] AssignmentError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Store or index read errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of the job-queue transport to accept a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The bounded outbound queue has no free slot.
    #[error("job queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The consumer side of the queue is gone.
    #[error("job queue closed")]
    Closed,

    /// The transport refused the job.
    #[error("job rejected: {reason}")]
    Rejected { reason: String },
}

/// Failure of a remediator to carry out a corrective action.
#[derive(Error, Debug)]
pub enum RemediationError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("output sink: {0}")]
    Sink(#[from] std::io::Error),
}

/// Failure reading the authoritative store or a cluster's index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("{backend} returned an invalid response: {reason}")]
    InvalidResponse { backend: String, reason: String },
}

/// Errors raised while checking a batch of pages.
#[derive(Error, Debug)]
pub enum CheckerError {
    /// An index record names an index whose suffix cannot be determined.
    #[error("cannot parse index name: {name}")]
    MalformedIndexName { name: String },

    #[error("cannot load pages from store: {0}")]
    PageStore(#[source] StoreError),

    #[error("cannot fetch ids from index: {0}")]
    Index(#[source] StoreError),

    #[error("remediation failed: {0}")]
    Remediation(#[from] RemediationError),
}

/// Inconsistent inputs handed to the cluster coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("remediator clusters {remediators:?} do not match recorder clusters {recorders:?}")]
    ClusterMismatch {
        remediators: Vec<String>,
        recorders: Vec<String>,
    },

    #[error("no managed clusters")]
    NoClusters,

    #[error("cluster {cluster} is not writable for the sanitizer update group")]
    NotWritable { cluster: String },

    #[error("checker clusters {checkers:?} do not match managed clusters {managed:?}")]
    CheckerMismatch {
        checkers: Vec<String>,
        managed: Vec<String>,
    },
}

/// Invalid cluster assignment configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("multiple clusters for replica: {replica} group: {group}")]
    DuplicateReplicaGroup { replica: String, group: String },

    #[error("at least one replica group must be defined for roundrobin")]
    NoReplicaGroups,

    #[error("write clusters table has no entry for {group} and no default")]
    NoWriteClustersForGroup { group: String },

    #[error("missing replica <{replica}>, have <{available}>")]
    UnknownReplica { replica: String, available: String },

    #[error("missing replica: {replica} group: {group}")]
    MissingReplicaGroup { replica: String, group: String },
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
