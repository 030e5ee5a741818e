//! Disk I/O for in-progress downloads.
//!
//! A download streams into `{dest}.surge`, preallocated to the final size
//! and written with positional writes from many workers at disjoint
//! offsets. Completion renames it onto the destination.

mod writer;

pub use writer::PartFile;

/// Suffix of in-progress files.
pub const PART_SUFFIX: &str = ".surge";

/// The in-progress path for a destination: appends `.surge`
/// (`file.iso` -> `file.iso.surge`).
pub fn part_path(final_path: &std::path::Path) -> std::path::PathBuf {
    let mut os = final_path.as_os_str().to_owned();
    os.push(PART_SUFFIX);
    std::path::PathBuf::from(os)
}
