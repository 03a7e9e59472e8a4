use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("job serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
