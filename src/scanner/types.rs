/// Scan policy knobs.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Descend into directories on other file systems. Mount points are
    /// flagged either way.
    pub cross_filesystems: bool,
    /// Directory names to skip. Matching directories are inserted, marked
    /// excluded, and not descended into.
    pub exclude: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            cross_filesystems: false,
            exclude: Vec::new(),
        }
    }
}

/// Counters accumulated over one scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanReport {
    /// Directories whose listing was read
    pub dirs_read: u64,
    /// Plain (non-directory) entries inserted
    pub files_seen: u64,
    /// Listing or stat failures (the affected directory ends up in `Error` state)
    pub errors: u64,
    pub elapsed_ms: u64,
}
