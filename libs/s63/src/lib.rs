//! S-63 ENC cell protection library
//!
//! Written from scratch, based on the IHO S-63 Data Protection Scheme
//! (edition 1.2.0)
//!
//! # Design goals and implementation #
//!
//! The main development goal is a faithful, self-contained implementation
//! of the permit algebra and the cell decryption pipeline, with transparent
//! access to the intermediate values (encrypted hardware identifiers,
//! cell keys, checksums) that the scheme shuttles between data servers
//! and data clients.
//!
//! The building blocks are:
//! - [`blowfish`]: the Blowfish block cipher, the only cryptographic
//!   primitive used by the scheme
//! - [`permit`]: User Permit and Cell Permit creation, validation and
//!   key extraction
//! - [`cell`]: decryption of distributed cell files
//! - [`zip`]: a single-entry Zip codec (every decrypted cell is a Zip
//!   archive wrapping one S-57 dataset)
//! - [`client`]: a data-client façade owning the hardware identity and
//!   the installed permits
//!
//! # Examples #
//! ```no_run
//! use s63::S63Client;
//!
//! let mut client = S63Client::new("12348", "98765", "01").unwrap();
//! client.import_permit_file("PERMIT.TXT").unwrap();
//! client
//!     .decrypt_and_unzip("ENC_ROOT/NO/NO4D0613.000", "out/NO4D0613.000")
//!     .unwrap();
//! ```

pub mod blowfish;
pub mod cell;
pub mod client;
pub mod permit;
pub mod utils;
pub mod zip;

use thiserror::Error;

pub use client::{PermitImport, S63Client};
pub use permit::{CellKeys, PermitStatus};

/// Errors produced by the protection scheme operations
///
/// Validation predicates are total: they report failures through these
/// variants and never log or abort. Where the scheme defines a stable
/// diagnostic code the [`sse`](Self::sse) accessor returns it.
#[derive(Debug, Error)]
pub enum S63Error {
    /// An input field has the wrong size or is not valid hexadecimal
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),

    /// A date field is not a valid YYYYMMDD calendar date
    #[error("invalid date {0:?}, must be YYYYMMDD")]
    InvalidDate(String),

    /// The userpermit failed structural or checksum validation
    #[error("invalid userpermit")]
    InvalidUserpermit,

    /// The cell permit is structurally malformed
    #[error("cell permit incorrect format: {0}")]
    BadFormat(&'static str),

    /// The cell permit checksum does not match its content
    #[error("cell permit CRC invalid")]
    CrcInvalid,

    /// The unpacked payload does not match the checksum in the archive
    #[error("payload CRC mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// CRC-32 declared by the archive headers
        expected: u32,
        /// CRC-32 computed over the unpacked payload
        computed: u32,
    },

    /// Neither cell key decrypts the cell into a Zip archive
    #[error("decryption failed, decryption keys invalid")]
    KeyInvalid,

    /// A raw ECB buffer is not a positive multiple of the block size
    #[error("buffer length {0} is not a positive multiple of 8")]
    BadLength(usize),

    /// PKCS#5 padding verification failed on decryption
    #[error("invalid block padding")]
    BadPadding,

    /// No cell permit is installed for the requested cell
    #[error("no valid cell permit found for {0}")]
    NoPermit(String),

    /// A Zip structure carries a wrong signature
    #[error("bad zip signature")]
    ZipSignature,

    /// The archive uses a compression method this codec does not support
    #[error("unsupported zip compression method {0}")]
    ZipUnsupported(u16),

    /// The declared output size exceeds the configured bound
    #[error("declared output size {size} exceeds the maximum of {limit}")]
    ZipTooLarge {
        /// Uncompressed size declared by the archive
        size: u64,
        /// Configured allocation bound
        limit: u64,
    },

    /// I/O failure reported by the operating system
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl S63Error {
    /// The stable S-63 "SSE" diagnostic code for this error, if one exists
    pub fn sse(&self) -> Option<u8> {
        match self {
            S63Error::BadFormat(_) | S63Error::InvalidDate(_) => Some(12),
            S63Error::CrcInvalid => Some(13),
            S63Error::InvalidUserpermit => Some(17),
            S63Error::KeyInvalid | S63Error::NoPermit(_) => Some(21),
            _ => None,
        }
    }
}
