pub mod persistence;
pub mod stats;
pub mod store;

pub use persistence::{AnnotationPersistence, CsvSidecar};
pub use store::{AnnotationStore, RangeOptions};
