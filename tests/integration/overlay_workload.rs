#![allow(missing_docs)]

use std::collections::BTreeMap;

use kvnode::storage::node::{build, BuildOptions, Node};
use kvnode::storage::overlay::{Overlay, OverlayOptions};
use kvnode::types::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn snapshot(overlay: &Overlay) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    Ok(overlay
        .list_entries()?
        .into_iter()
        .map(|(k, v)| (k.into_owned(), v.to_vec()))
        .collect())
}

#[test]
fn randomized_workload_matches_reference() -> Result<()> {
    let seed_entries: Vec<(Vec<u8>, Vec<u8>)> = (0..500u32)
        .map(|i| (format!("user:{i:04}").into_bytes(), i.to_le_bytes().to_vec()))
        .collect();
    let clean = build(seed_entries.clone(), &BuildOptions::default())?;
    let mut overlay = Overlay::parse_with(
        clean,
        None,
        OverlayOptions::default().max_dirty_len(40),
    )?;
    let mut reference: BTreeMap<Vec<u8>, Vec<u8>> = seed_entries.into_iter().collect();
    let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE);

    for step in 0..5_000u32 {
        let key = format!("user:{:04}", rng.gen_range(0..800)).into_bytes();
        if rng.gen_bool(0.7) {
            let value: Vec<u8> = (0..rng.gen_range(0..24)).map(|_| rng.gen()).collect();
            overlay.put_value(&key, &value)?;
            reference.insert(key, value);
        } else {
            let removed = overlay.delete(&key)?;
            assert_eq!(removed, reference.remove(&key).is_some(), "step {step}");
        }
        if step % 997 == 0 {
            assert_eq!(overlay.len(), reference.len(), "step {step}");
        }
    }

    assert_eq!(snapshot(&overlay)?, reference);
    let stats = overlay.stats().snapshot();
    assert!(stats.clean_merges > 0);
    assert!(stats.in_place_appends > 0);
    overlay.stats().emit_tracing();
    Ok(())
}

#[test]
fn persisted_buffers_round_trip() -> Result<()> {
    let mut overlay = Overlay::new(OverlayOptions::default().use_padding(true))?;
    for i in 0..250u32 {
        overlay.put_value(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())?;
    }
    let before = snapshot(&overlay)?;
    let (clean, dirty) = overlay.into_buffers()?;

    let clean_node = Node::parse(&clean)?;
    assert!(clean_node.is_sorted());
    assert!(clean_node.offset_index().is_some());
    if let Some(dirty) = &dirty {
        let dirty_node = Node::parse(dirty)?;
        assert!(!dirty_node.is_sorted());
        assert!(dirty_node.offset_index().is_none());
    }

    let mut reopened = Overlay::parse(clean, dirty)?;
    assert_eq!(snapshot(&reopened)?, before);
    reopened.compact()?;
    assert!(reopened.dirty_slot().is_none());
    assert_eq!(reopened.get_value(b"k249")?, Some(&b"v249"[..]));
    Ok(())
}
