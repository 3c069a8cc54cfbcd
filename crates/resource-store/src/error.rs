use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },
    /// The object changed since it was read (resource version mismatch).
    #[error("{kind} {key} was modified concurrently, {message}")]
    Conflict {
        kind: String,
        key: String,
        message: String,
    },
    #[error("Resource version expired, {0}")]
    Expired(String),
    #[error("Watch fell behind by {0} events")]
    WatchLagged(u64),
    #[error("Invalid object, {0}")]
    Invalid(String),
    #[error("Store backend error, {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub(crate) fn object_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}
