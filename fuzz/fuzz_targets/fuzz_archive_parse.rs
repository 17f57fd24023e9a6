#![no_main]

use libfuzzer_sys::fuzz_target;
use star_rs::ArchiveReader;
use std::io::Read;

fuzz_target!(|data: &[u8]| {
    // Try to open archive - should never panic
    let reader = match ArchiveReader::new(data) {
        Ok(r) => r,
        Err(_) => return, // Expected for invalid data
    };

    // Every indexed entry must be readable within the input
    for entry in reader.list_entries() {
        if let Ok(mut stream) = reader.open_sequential(&entry.name) {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
        }
        if let Ok(at) = reader.open_random_access(&entry.name) {
            let mut buf = [0u8; 64];
            let _ = at.read_at(&mut buf, at.len() / 2);
            let _ = at.read_at(&mut buf, at.len());
            let _ = at.read_at(&mut buf, at.len().saturating_add(1));
        }
    }

    // Lookups with odd names - should never panic
    let _ = reader.contains("");
    let _ = reader.contains("/");
    let _ = reader.contains("../../../etc/passwd");
});
