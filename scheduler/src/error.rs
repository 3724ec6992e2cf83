use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}
