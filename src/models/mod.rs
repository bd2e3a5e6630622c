// Data Models
pub mod batch;
pub mod capabilities;
pub mod file_entry;
pub mod operation;
pub mod proc_error;

pub use batch::{
    BatchAction, ClipboardData, ClipboardOp, ExtractParams, RenameParams, SaveAsParams,
};
pub use capabilities::Capabilities;
pub use file_entry::FileEntry;
pub use operation::{
    ActionOutcome, AddRequest, ArchiveAction, CompressionLevel, ExtractRequest,
};
pub use proc_error::{CapturedOutput, ProcError, ProcErrorKind};
