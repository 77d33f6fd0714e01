pub mod bm25;
pub mod memory;
pub mod vector;

pub use bm25::{tokenize, Bm25Index};
pub use memory::MemoryStore;
pub use vector::{cosine_similarity, MemoryVectorIndex};
