//!
//! Test fixtures and builders shared by the KCE crates.
//!
//! Provides throwaway script directories (executable shell scripts that
//! speak the subprocess JSON contract) and helpers for writing definition
//! documents to disk.

#![forbid(unsafe_code)]

/// Script fixtures
pub mod scripts;

pub use scripts::ScriptDir;

use std::path::{Path, PathBuf};

/// Write a definition document next to the scripts it references and return
/// its path.
pub fn write_defs(dir: &Path, name: &str, yaml: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, yaml).expect("write definition document");
    path
}
