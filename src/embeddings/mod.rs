pub mod storage;
pub mod worker;

pub use storage::{decode_embedding, encode_embedding, get_embedding};
pub use worker::{EmbeddingRun, EmbeddingWorker};
