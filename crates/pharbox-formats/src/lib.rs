//! File format parsers and builders for PHP archives
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::doc_markdown)] // PHP function names don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::missing_errors_doc)] // Errors are documented on the error enums
//! This crate provides symmetric (parser and builder) implementations of the
//! PHAR container used to ship PHP applications as a single file.
//!
//! # Supported Formats
//!
//! - **Stub**: PHP bootstrap terminated by `__HALT_COMPILER();`
//! - **Manifest**: Entry records with sizes, CRC32, permissions and flags
//! - **Compression**: Per-entry raw deflate and bzip2 (`bzip2` feature)
//! - **Signature**: MD5, SHA-256, SHA-512 and RSA trailers
//! - **Metadata**: PHP `serialize()` encoding of archive metadata
//!
//! # Design Principles
//!
//! - **Symmetric Operations**: Both parsing and building supported
//! - **Atomic Writes**: Archives are written to a temporary file and renamed
//! - **Round-Trip Guarantee**: parse(build(archive)) == archive

#![warn(missing_docs)]

pub mod phar;
