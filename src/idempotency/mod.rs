pub mod codec;
pub mod error;
pub mod handler;
pub mod key;
pub mod memory;
pub mod record;
pub mod replay_cache;
pub mod storage;
pub mod sweeper;

pub use codec::{decode_body, encode_body};
pub use error::{CacheFailure, CodecError, IdempotencyError, StoreError};
pub use handler::{
    IdempotencyHandler, IdempotencyHandlerConfig, IdempotencyMetrics, IdempotentResponse,
    MetricsSnapshot, OperationFuture,
};
pub use key::{IdempotencyKey, InvalidIdempotencyKey, DEFAULT_MAX_KEY_LENGTH};
pub use memory::{InMemoryIdempotencyStore, InMemoryTransaction};
pub use record::IdempotencyRecord;
pub use replay_cache::RedisReplayCache;
pub use storage::{IdempotencyStore, InsertOutcome, PostgresIdempotencyStore, StoreResult};
pub use sweeper::{ExpirationSweeper, DEFAULT_SWEEP_INTERVAL};
