//! Structured link errors.
//!
//! Every failure mode of a link invocation is a `LinkError` variant. All are
//! terminal: the linker never retries, truncates, or degrades. The driver
//! prints exactly one diagnostic per invocation.

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The input is not a relocatable object this linker can consume. The
    /// detail names the offending structure (bad magic, truncated section,
    /// out-of-range index, unsupported relocation type).
    #[error("{source_name}: malformed object: {detail}")]
    MalformedObject { source_name: String, detail: String },

    /// Two strong global definitions of the same name.
    #[error("duplicate symbol '{name}': defined in both {first} and {second}")]
    DuplicateSymbol {
        name: String,
        first: String,
        second: String,
    },

    /// References that remained undefined after archive resolution converged.
    /// Lists every unresolved name, not just the first.
    #[error("undefined symbols: {}", .names.join(", "))]
    UnresolvedSymbols { names: Vec<String> },

    /// A relocated value does not fit the field its kind requires.
    #[error(
        "{source_name}: relocation overflow: {kind} against '{symbol}' at \
         {address:#x}: value {value:#x} exceeds the field range"
    )]
    RelocationOverflow {
        source_name: String,
        symbol: String,
        kind: &'static str,
        address: u64,
        value: i64,
    },

    /// The configured entry symbol has no definition in the link.
    #[error("entry symbol '{symbol}' is not defined")]
    NoEntryPoint { symbol: String },

    /// A symbol lookup against one archive found no defining member.
    #[error("{archive}: no member defines symbol '{symbol}'")]
    SymbolNotInArchive { archive: String, symbol: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
