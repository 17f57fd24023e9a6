//! Generate seed corpus for fuzzing

use star_rs::{write_archive, Entry, EntryKind, MemorySource};
use std::fs::{self, File};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let corpus_dir = "fuzz/corpus/fuzz_archive_parse";
    fs::create_dir_all(corpus_dir)?;

    println!("Generating seed corpus...");

    let mut seeds: Vec<(&str, MemorySource)> = Vec::new();

    // Empty archive (no entries)
    seeds.push(("seed_empty", MemorySource::new()));

    // Single small file
    let mut single = MemorySource::new();
    single.add_file("test.txt", b"Hello, World!".to_vec(), 0o644);
    seeds.push(("seed_single_small", single));

    // Directory tree with a symlink
    let mut tree = MemorySource::new();
    tree.add_dir("dir", 0o755)
        .add_file("dir/file1.txt", b"First file".to_vec(), 0o644)
        .add_file("dir/file2.txt", b"Second file".to_vec(), 0o600)
        .add_symlink("dir/latest", "file2.txt");
    seeds.push(("seed_tree", tree));

    // Device nodes and a FIFO
    let mut special = MemorySource::new();
    special
        .push(
            Entry::new("dev/null", EntryKind::CharDevice { major: 1, minor: 3 }, 0o666),
            None,
        )
        .push(
            Entry::new("dev/sda", EntryKind::BlockDevice { major: 8, minor: 0 }, 0o660),
            None,
        )
        .push(Entry::new("run/pipe", EntryKind::Fifo, 0o644), None);
    seeds.push(("seed_special", special));

    // Binary data and an empty file
    let mut binary = MemorySource::new();
    binary
        .add_file("binary.bin", (0..=255).collect(), 0o644)
        .add_file("empty.txt", Vec::new(), 0o644);
    seeds.push(("seed_binary", binary));

    let count = seeds.len();
    for (name, mut source) in seeds {
        let path = format!("{}/{}.star", corpus_dir, name);
        write_archive(File::create(&path)?, &mut source)?;
        println!("✓ Generated: {}", path);
    }

    println!("\nGenerated {} seed files in {}", count, corpus_dir);
    Ok(())
}
