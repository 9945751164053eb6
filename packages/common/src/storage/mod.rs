mod catalog;
mod error;
mod memory;
mod traits;

pub use catalog::Catalog;
pub use error::{CatalogError, StoreError};
pub use memory::MemoryStore;
pub use traits::{FinalizeResult, ProblemStore, SubmissionStore, UserStore};
