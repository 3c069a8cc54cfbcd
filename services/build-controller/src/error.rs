use resource_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Store error, {0}")]
    StoreError(#[from] StoreError),

    #[error("IO error, {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serde json error, {0}")]
    SerdejsonError(#[from] serde_json::Error),

    // Output ImageStreamTag could not be turned into a push spec
    #[error("Invalid output reference, {0}")]
    InvalidOutputReference(String),

    #[error("Invalid image change trigger, {0}")]
    InvalidTrigger(String),

    // A build with the deterministic name exists but was created for another cause
    #[error("Build conflict, {0}")]
    BuildConflict(String),
}
