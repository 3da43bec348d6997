#![no_main]

use kvnode::storage::node::{Node, NodeSlot};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(node) = Node::parse(data) else {
        return;
    };
    // Zero-width entries let the count exceed the input; walking them is linear in it.
    if node.len() > data.len() {
        return;
    }
    let _ = node.free_space();
    let mut keys = Vec::new();
    for entry in node.iter() {
        match entry {
            Ok(entry) => keys.push(entry.key.into_owned()),
            Err(_) => break,
        }
    }
    for key in &keys {
        let _ = node.get_value(key);
    }
    let _ = node.get_value(&[]);
    let _ = node.get_value(&[0xff; 4]);

    if let Ok(mut slot) = NodeSlot::parse(data.to_vec()) {
        if let Some(key) = keys.first() {
            let _ = slot.delete(key);
        }
        let _ = slot.append(b"fuzz", b"value");
        let _ = slot.into_bytes();
    }
});
