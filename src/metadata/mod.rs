pub mod error;
pub mod index;
pub mod types;

pub use error::{MetadataError, MetadataResult};
pub use index::{MetadataIndex, QuarantinedRecord};
pub use types::{file_id_for, FileRecord, FILE_ID_LEN};
