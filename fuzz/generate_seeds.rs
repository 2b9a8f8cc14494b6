//! Generate seed corpus for fuzzing

use pakvault::codec::gzip_bytes;
use pakvault::{BundleWriter, EntryFlags, PakWriter};
use std::fs;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let corpus_dir = "fuzz/corpus/fuzz_container_load";
    fs::create_dir_all(corpus_dir)?;

    // Empty PAK
    {
        let path = format!("{}/seed_empty.pak", corpus_dir);
        PakWriter::create(&path)?.finalize()?;
        println!("Generated: {}", path);
    }

    // PAK with compressed, raw and directory records
    {
        let path = format!("{}/seed_multi.pak", corpus_dir);
        let mut writer = PakWriter::create(&path)?;
        writer.add_file("file1.txt", b"First file")?;
        writer.add_file("dir/big.txt", &b"compressible ".repeat(1000))?;
        writer.add_file_with_flags("raw.bin", &[0xAB; 256], EntryFlags::RAW_DATA_FILE)?;
        writer.add_directory("empty")?;
        writer.finalize()?;
        println!("Generated: {}", path);
    }

    // PAK sealed with a passphrase
    {
        let path = format!("{}/seed_sealed.pak", corpus_dir);
        let mut writer = PakWriter::create(&path)?.with_passphrase("fuzz");
        writer.add_file_with_flags("secret.txt", b"sealed", EntryFlags::DATA_CRYPTED)?;
        writer.finalize()?;
        println!("Generated: {}", path);
    }

    // Gzip record stream
    {
        let path = format!("{}/seed_records.gz", corpus_dir);
        let mut raw = Vec::new();
        for (name, data) in [("a.txt", &b"ABC"[..]), ("b/c.bin", &[1, 2, 3, 4][..])] {
            raw.push(b'f');
            raw.extend_from_slice(&(name.len() as u32 + 1).to_le_bytes());
            raw.extend_from_slice(name.as_bytes());
            raw.push(0);
            raw.extend_from_slice(&(data.len() as u32).to_le_bytes());
            raw.extend_from_slice(data);
        }
        raw.push(b'e');
        fs::write(&path, gzip_bytes(&raw)?)?;
        println!("Generated: {}", path);
    }

    // LZSS bundle
    {
        let path = format!("{}/seed_bundle.bndl", corpus_dir);
        let mut bundle = BundleWriter::new();
        bundle.add_file("maps/level.map", &b"tile".repeat(200), EntryFlags::FILE)?;
        bundle.add_file("raw.dat", &[7u8; 64], EntryFlags::FILE | EntryFlags::RAW_DATA_FILE)?;
        fs::write(&path, bundle.finish(Vec::new())?)?;
        println!("Generated: {}", path);
    }

    println!("Seed corpus generated in {}", corpus_dir);
    Ok(())
}
