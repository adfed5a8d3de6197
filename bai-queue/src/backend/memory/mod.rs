mod storage;

pub use storage::{MemoryBackend, RestoreReport};
