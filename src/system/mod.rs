// System Layer
pub mod host;
pub mod mime;
pub mod tools;
pub mod process;

pub use host::{AutoHost, HostInterface, InstallResult};
pub use mime::{mime_type_from_content, mime_type_from_name, mime_type_from_path};
pub use tools::{AssumeInstalled, PathToolLocator, StaticToolLocator, ToolLocator};
pub use process::{
    OutputParser, OutputStream, ParseEvent, ProcessObserver, ProcessOutcome, ProcessRunner,
};
