#![no_main]

use libfuzzer_sys::fuzz_target;
use star_rs::Entry;

fuzz_target!(|data: &[u8]| {
    let mut rest = data;
    while !rest.is_empty() {
        match Entry::unmarshal(rest) {
            Ok((next, entry)) => {
                // Re-encoding a decoded entry must decode to the same entry
                let bytes = entry.marshal().unwrap();
                let (tail, again) = Entry::unmarshal(&bytes).unwrap();
                assert!(tail.is_empty());
                assert_eq!(again, entry);
                rest = next;
            }
            Err(_) => break,
        }
    }
});
