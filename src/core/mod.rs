// Core Layer
pub mod backends;
pub mod batch;
pub mod registry;
pub mod session;

pub use batch::{
    add_batch, extract_batch, extract_here_batch, remediate_unsupported_format, BatchSequencer,
    BatchStatus,
};
pub use registry::{BackendRegistry, FormatCapabilities, RegisteredBackend};
pub use session::{ArchiveEvent, ArchiveSession, SessionState};
