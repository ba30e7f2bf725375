pub mod writer;

pub use writer::WriterConfig;
