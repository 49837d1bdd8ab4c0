//! A streaming, pull-based archive reader.
//!
//! Bytes come from a [`Source`][source::Source], pass through exactly one
//! decompression [`Filter`][filter::Filter] chosen by bidding on the first
//! raw block, and are handed to the [`Format`][format::Format] decoder that
//! bid highest on the decoded stream. The decoder turns headers into
//! [`Entry`] values and serves entry bodies as zero-copy [`Block`]s.
//!
//! ```no_run
//! use arcread::{ReadArchive, Status};
//!
//! # fn main() -> arcread::Result<()> {
//! let mut ar = ReadArchive::new();
//! ar.support_filter_all().support_format_all();
//! ar.open_file("backup.tar.gz")?;
//! while ar.read_next_header()? != Status::Eof {
//!     println!("{}", ar.entry().pathname());
//!     while let Some(block) = ar.read_data_block()? {
//!         let _ = (block.offset, block.data.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Cargo features
//!
//! - `gzip`, `bzip2`, `xz`, `zstd` *(Enabled by default)*, `lz4`
//!
//!   Decompression support. Disabled filters still recognize their stream
//!   signature so the failure message names the missing feature.
//!
//! - `program` (UNIX only)
//!
//!   Decompress through an external program, see
//!   [`ReadArchive::support_filter_program`].
//!
//! - `log` *(Enabled by default)*
//!
//!   Emit selection decisions, recovered anomalies and timings through
//!   the `log` facade.
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

#[cfg(feature = "log")]
#[macro_use(trace_time)]
extern crate measure_time;

#[cfg(feature = "log")]
#[macro_use(trace, debug, warn)]
extern crate log;

#[cfg(not(feature = "log"))]
#[macro_use]
mod macros {
    macro_rules! trace {
        ($($tt:tt)*) => {
            let _ = if false {
                let _ = ::std::format_args!($($tt)*);
            };
        };
    }

    macro_rules! debug {
        ($($tt:tt)*) => {
            trace!($($tt)*)
        };
    }

    macro_rules! warn {
        ($($tt:tt)*) => {
            trace!($($tt)*)
        };
    }

    macro_rules! trace_time {
        ($($tt:tt)*) => {
            trace!($($tt)*)
        };
    }
}

macro_rules! bail {
    ($err:expr $(,)?) => {
        return Err(Into::into($err))
    };
}

/// Newtype codes with named associated constants and a `Debug` that falls back
/// to the raw number for unknown values.
macro_rules! impl_open_enum {
    ($name:ident; $($(#[$meta:meta])* $variant:ident = $value:expr,)*) => {
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(match *self {
                    $(Self::$variant => stringify!($variant),)*
                    _ => return f
                        .debug_tuple(stringify!($name))
                        .field(&self.0)
                        .finish(),
                })
            }
        }

        impl $name {
            $(
                $(#[$meta])*
                pub const $variant: Self = Self($value);
            )*
        }
    };
}

pub mod archive;
pub mod entry;
mod error;
pub mod filter;
pub mod format;
pub mod link_resolver;
pub mod source;
pub mod stream;

pub use archive::{Config, DataReader, ReadArchive};
pub use entry::Entry;
pub use error::{Error, Result, Severity, Status};
pub use filter::FilterCode;
pub use format::{Block, FormatCode};
