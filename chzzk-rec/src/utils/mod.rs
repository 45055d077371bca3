pub mod filename;
pub mod format;
pub mod fs;
