//! Archive container: wire format, writer and reader

pub mod format;
mod reader;
mod writer;

pub use format::{ArchiveHeader, EndMarker, EntryHeader, EntryTrailer, FORMAT_VERSION, MAGIC};
pub use reader::{inspect, ArchiveListing, ContainerReader, ListedEntry};
pub use writer::ContainerWriter;
