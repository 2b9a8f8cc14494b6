//! Row/column alignment padding for raster-like payloads.

use crate::entry::Entry;
use crate::error::{PakError, Result};

/// A padded payload and its new extents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Padded {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// Copy `payload` into a buffer whose width and height are multiples of
/// `align`. Each source row fills the prefix of its padded row; padding is
/// zero. The input is never modified.
pub fn pad_to_alignment(
    payload: &[u8],
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    align: usize,
) -> Result<Padded> {
    if align == 0 || bytes_per_pixel == 0 {
        return Err(PakError::UnsupportedOperation(
            "alignment and pixel size must be non-zero".to_string(),
        ));
    }
    let row = width * bytes_per_pixel;
    if payload.len() != row * height {
        return Err(PakError::Format(format!(
            "payload is {} bytes, {}x{}x{} needs {}",
            payload.len(),
            width,
            height,
            bytes_per_pixel,
            row * height
        )));
    }

    let padded_width = round_up(width, align);
    let padded_height = round_up(height, align);
    let stride = padded_width * bytes_per_pixel;

    let mut data = vec![0u8; stride * padded_height];
    for (src, dst) in payload.chunks_exact(row.max(1)).zip(data.chunks_exact_mut(stride.max(1))) {
        dst[..row].copy_from_slice(src);
    }

    Ok(Padded {
        data,
        width: padded_width,
        height: padded_height,
    })
}

/// Pad an entry's payload, returning a staged entry at the same path
pub fn pad_entry(
    entry: &Entry,
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    align: usize,
) -> Result<(Entry, usize, usize)> {
    let padded = pad_to_alignment(&entry.decompressed_data()?, width, height, bytes_per_pixel, align)?;
    let mut staged = Entry::staged(entry.path.clone(), padded.data);
    staged.flags = entry.flags - crate::entry::EntryFlags::TRANSIENT;
    Ok((staged, padded.width, padded.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_by_ten_pads_to_twelve() {
        let source: Vec<u8> = (0..100).map(|i| i as u8 + 1).collect();
        let padded = pad_to_alignment(&source, 10, 10, 1, 4).unwrap();

        assert_eq!((padded.width, padded.height), (12, 12));
        assert_eq!(padded.data.len(), 144);
        for i in 0..10 {
            let row = &padded.data[i * 12..(i + 1) * 12];
            assert_eq!(&row[..10], &source[i * 10..(i + 1) * 10]);
            assert_eq!(&row[10..], &[0, 0]);
        }
        assert!(padded.data[120..].iter().all(|&b| b == 0));
        assert_eq!(source[0], 1);
    }

    #[test]
    fn test_already_aligned_is_copied() {
        let source = vec![7u8; 4 * 4 * 3];
        let padded = pad_to_alignment(&source, 4, 4, 3, 4).unwrap();
        assert_eq!(padded.data, source);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        assert!(pad_to_alignment(&[0u8; 5], 2, 2, 1, 4).is_err());
        assert!(pad_to_alignment(&[0u8; 4], 2, 2, 1, 0).is_err());
    }

    #[test]
    fn test_pad_entry_keeps_path() {
        let entry = Entry::staged("tex/a.raw".to_string(), vec![1u8; 9]);
        let (padded, w, h) = pad_entry(&entry, 3, 3, 1, 4).unwrap();
        assert_eq!((w, h), (4, 4));
        assert_eq!(padded.path, "tex/a.raw");
        assert_eq!(padded.decompressed_data().unwrap().len(), 16);
    }
}
