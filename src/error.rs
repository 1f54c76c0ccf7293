use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cycle detected in category hierarchy at node: {0}")]
    CycleDetected(String),

    #[error("Duplicate record id in hierarchy input: {0}")]
    DuplicateRecordId(String),

    #[error("Invalid apportionment: {0}")]
    InvalidApportionment(String),

    #[error("Apportionment mismatch: lines sum to {actual}, expected {expected}")]
    ApportionmentMismatch { expected: i64, actual: i64 },

    #[error("Account {account_id} is assigned to both group {first_group} and group {second_group}")]
    DuplicateAccountAssignment {
        account_id: String,
        first_group: String,
        second_group: String,
    },

    #[error("Balance overflow: {0}")]
    BalanceOverflow(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
