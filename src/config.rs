//! Command-line configuration.
//!
//! Compiler drivers invoke the linker with flags and inputs interleaved in
//! one stream (`-o out crt0.o main.o -L/path -lc`), so everything after the
//! first input is captured positionally and scanned by hand. `uld`'s own
//! flags (`--entry`, `--log-level`) must precede the first input.

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, warn};

use crate::linker::DEFAULT_ENTRY;

#[derive(Parser)]
#[command(author, version, about = "A static ELF linker for x86-64")]
pub struct Config {
    /// Object files, archives, and ld-style flags (-o, -L, -l)
    #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
    args: Vec<String>,

    /// Entry symbol name
    #[arg(long, default_value = DEFAULT_ENTRY)]
    pub entry: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Config {
    /// Output path from `-o`, or `a.out`.
    pub fn output(&self) -> PathBuf {
        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-o" {
                if let Some(p) = iter.next() {
                    return PathBuf::from(p);
                }
            }
        }
        PathBuf::from("a.out")
    }

    /// Input files in command-line order: positional objects and archives,
    /// plus archives resolved from `-l` against the `-L` paths seen so far.
    /// Unrecognized flags are ignored for `-fuse-ld=` driver compatibility.
    pub fn input_files(&self) -> Vec<PathBuf> {
        let mut lib_paths = Vec::new();
        let mut files = Vec::new();

        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            if arg == "-o" {
                iter.next();
                continue;
            }
            if arg.starts_with("--") {
                continue; // --static, --start-group, ...
            }

            if let Some(p) = arg.strip_prefix("-L") {
                let path = if p.is_empty() { iter.next().map(|s| s.as_str()).unwrap_or("") } else { p };
                if !path.is_empty() && !path.starts_with('-') {
                    lib_paths.push(PathBuf::from(path));
                }
            } else if let Some(n) = arg.strip_prefix("-l") {
                let name = if n.is_empty() { iter.next().map(|s| s.as_str()).unwrap_or("") } else { n };
                match find_library(name, &lib_paths) {
                    Some(p) => {
                        debug!(lib = name, path = %p.display(), "resolved library");
                        files.push(p);
                    }
                    None => warn!(lib = name, "library not found in search path"),
                }
            } else if arg.starts_with('-') {
                continue;
            } else {
                let p = PathBuf::from(arg);
                if p.exists() {
                    files.push(p);
                } else {
                    warn!(path = %p.display(), "skipping missing input");
                }
            }
        }
        files
    }
}

/// Search the `-L` directories in order. `-l:name` matches the exact file
/// name; plain `-lname` looks for `libname.a`. Static linking only, so
/// shared libraries are never considered.
fn find_library(name: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    let file_name = match name.strip_prefix(':') {
        Some(exact) => exact.to_string(),
        None => format!("lib{name}.a"),
    };
    paths.iter().map(|dir| dir.join(&file_name)).find(|p| p.exists())
}
