pub mod database;
pub mod file;
pub mod memory;
pub mod registry;
pub mod terminal;

pub use database::DatabaseSink;
pub use file::FileSink;
pub use memory::MemorySink;
pub use registry::{SinkKind, build_sink};
pub use terminal::TerminalSink;
