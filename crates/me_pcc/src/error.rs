//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// package file does not exist
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// package file has zero length
    #[error("package file has 0 length: {0}")]
    EmptyPackage(String),

    /// file is too small to hold a package header
    #[error("broken package header in: {0}")]
    BrokenHeader(String),

    /// the first four bytes are not the package magic
    #[error("wrong package tag: {0:#010x}")]
    WrongTag(u32),

    /// the version field matches none of the known format variants
    #[error("unsupported package version: {0}")]
    UnsupportedVersion(u16),

    /// the compression tag matches no known algorithm
    #[error("unknown compression type: {0}")]
    UnknownCompression(u32),

    /// on-disk data no longer matches the structural assumptions of the
    /// format; the current operation must be abandoned
    #[error("corrupt package: {0}")]
    Corrupt(&'static str),

    /// unable to find the requested table entry
    #[error("unable to find requested entry")]
    EntryNotFound(#[from] EntryNotFoundError),

    /// a name with this value is already in the table
    #[error("name already present: {0}")]
    DuplicateName(String),

    /// force_compress and force_decompress are mutually exclusive
    #[error("force_compress and force_decompress can't both be enabled")]
    ConflictingSaveOptions,
}

/// Error type to provide further information when a table lookup fails
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested entry")]
pub enum EntryNotFoundError {
    /// export at index {0}
    #[error("export at index {0}")]
    Export(usize),

    /// import at index {0}
    #[error("import at index {0}")]
    Import(usize),

    /// name at index {0}
    #[error("name at index {0}")]
    Name(usize),

    /// name with value {0}
    #[error("name with value {0}")]
    NameValue(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
