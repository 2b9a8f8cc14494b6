//! Canonical PAK archive layout: header, local entry headers, tagged entry
//! table and end record.

mod end_record;
mod format;
mod local_entry;
mod reader;
mod writer;

pub use end_record::{EndRecord, END_RECORD_SIGNATURE, END_RECORD_SIZE};
pub(crate) use format::check_path_len;
pub use format::{
    write_directory_record, FileHeader, FileRecord, ARCHIVE_FLAG_SALT, FORMAT_VERSION_MAJOR,
    FORMAT_VERSION_MINOR, HEADER_SIZE, MAGIC_NUMBER, MAX_PATH_LENGTH,
    MIN_RECORD_LEN,
};
pub use local_entry::{at_local_entry, LocalEntryHeader, LOCAL_ENTRY_SIGNATURE};
pub use reader::{open_payload, PakAdapter};
pub use writer::{check_record_path, encode_path, encode_payload, PakWriter, StoredPayload};
