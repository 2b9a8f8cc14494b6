//! pakvault: multi-format archive engine
//!
//! Opens three container formats through one entry model:
//! - PAK, the canonical read/write archive (zstd/LZ4/LZSS payloads,
//!   optional AES-256-GCM sealing, CRC-checked table)
//! - gzip record streams, read through a scratch file
//! - LZSS bundles
//!
//! Containers stage edits in memory and apply them with a [`SaveStrategy`]:
//! an atomic full rewrite, an in-place patch, repacks, compaction, or an
//! export to one of the foreign formats.
//!
//! # Example
//!
//! ```no_run
//! use pakvault::{Container, OpenOptions, OpenPolicy, SaveStrategy};
//!
//! let mut container =
//!     Container::open("example.pak", OpenOptions::new().policy(OpenPolicy::OpenOrCreate))?;
//! container.add_bytes("data.txt", b"Hello, World!".to_vec())?;
//! container.save(SaveStrategy::FullRewrite)?;
//!
//! let data = container.read("data.txt")?;
//! # Ok::<(), pakvault::PakError>(())
//! ```

pub mod align;
pub mod archive;
pub mod codec;
pub mod config;
pub mod container;
pub mod convert;
pub mod crypto;
pub mod cursor;
pub mod entry;
pub mod error;
pub mod extract;
pub mod formats;
pub mod progress;
pub mod save;
pub mod stream;
pub mod table;

pub use align::{pad_entry, pad_to_alignment, Padded};
pub use archive::{FileHeader, PakWriter, HEADER_SIZE, MAGIC_NUMBER};
pub use codec::CompressionMethod;
pub use config::{ExtractFlags, ExtractOptions, OpenOptions, OpenPolicy, PakConfig};
pub use container::{Container, ContainerState, LoadHandle, ParseOutcome};
pub use convert::{to_canonical, IMPORT_PREFIX};
pub use cursor::BinaryCursor;
pub use entry::{Entry, EntryFlags, ModFlags};
pub use error::{ErrorKind, PakError, Result};
pub use extract::ExtractReport;
pub use formats::{BundleWriter, FormatAdapter, FormatKind, GzipRecordWriter};
pub use progress::{
    CancelToken, ErrorReporter, NoProgress, ProgressSink, SharedProgress, TracingReporter,
};
pub use save::{SaveReport, SaveStrategy};
