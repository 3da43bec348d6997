#![no_main]

use kvnode::storage::overlay::{Overlay, OverlayOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut overlay) = Overlay::new(OverlayOptions::default().dirty_reserve_bytes(64)) else {
        return;
    };
    for chunk in data.chunks(3) {
        let (op, rest) = match chunk.split_first() {
            Some(split) => split,
            None => continue,
        };
        let key = &rest[..rest.len().min(1)];
        let result = if op % 4 == 0 {
            overlay.delete(key).map(|_| ())
        } else if op % 17 == 0 {
            overlay.compact()
        } else {
            overlay.put_value(key, rest)
        };
        assert!(result.is_ok(), "overlay op failed: {result:?}");
    }
    let listed = overlay.list_entries().expect("list");
    assert_eq!(listed.len(), overlay.len());
});
