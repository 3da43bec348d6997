#![allow(missing_docs)]

use std::borrow::Cow;

use kvnode::primitives::bytes::buf::Endian;
use kvnode::storage::node::{build, BuildOptions, LengthCode, Node, NodeSlot};
use kvnode::types::{NodeError, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[test]
fn reference_bytes_parse_through_public_api() -> Result<()> {
    let bytes = [171u8, 244, 112, 0, 11, 1, 1, 7, 0, 0, 0, 4, 1, 2, 1, 3];
    let node = Node::parse(&bytes)?;
    assert_eq!(node.len(), 1);
    assert_eq!(node.custom_data(), Some(&[7u8][..]));
    assert_eq!(node.get_value(&[2])?, Some(&[3u8][..]));
    assert_eq!(node.get_value(&[1])?, None);
    assert_eq!(node.free_space(), 0);
    Ok(())
}

#[test]
fn lookups_borrow_from_the_caller_buffer() -> Result<()> {
    let entries: [(&[u8], &[u8]); 2] = [(b"alpha", b"one"), (b"beta", b"two")];
    let bytes = build(entries, &BuildOptions::default())?;
    let value = {
        let node = Node::parse(&bytes)?;
        node.get_value(b"beta")?
    };
    let value = value.ok_or(NodeError::Invalid("missing value"))?;
    let start = value.as_ptr() as usize - bytes.as_ptr() as usize;
    assert_eq!(&bytes[start..start + value.len()], b"two");
    Ok(())
}

#[test]
fn every_option_combination_answers_lookups() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..400u32)
        .map(|i| {
            let mut key = b"tenant/42/".to_vec();
            key.extend_from_slice(&i.to_be_bytes());
            key.extend_from_slice(b".json");
            let value: Vec<u8> = (0..rng.gen_range(0..40)).map(|_| rng.gen()).collect();
            (key, value)
        })
        .collect();

    for bits in 0u8..64 {
        let options = BuildOptions::default()
            .endian(if bits & 1 == 0 { Endian::Little } else { Endian::Big })
            .keep_entry_order(bits & 2 != 0)
            .use_padding(bits & 4 != 0)
            .compact_lengths(bits & 8 != 0)
            .compress_keys(bits & 16 != 0)
            .reserve_bytes(if bits & 32 != 0 { 128 } else { 0 });
        let bytes = build(entries.iter().map(|(k, v)| (k, v)), &options)?;
        let node = Node::parse(&bytes)?;
        assert_eq!(node.len(), entries.len());
        assert_eq!(node.is_sorted(), bits & 2 == 0);
        for (key, value) in entries.iter().step_by(7) {
            assert_eq!(node.get_value(key)?, Some(value.as_slice()), "options {bits:#08b}");
        }
        assert_eq!(node.get_value(b"tenant/42/")?, None);
        assert_eq!(node.get_value(b"tenant/43/\0\0\0\0.json")?, None);
    }
    Ok(())
}

#[test]
fn compact_build_shrinks_uniform_entries() -> Result<()> {
    let entries: Vec<([u8; 8], [u8; 16])> =
        (0..100u64).map(|i| (i.to_be_bytes(), [0u8; 16])).collect();
    let plain = build(entries.iter().copied(), &BuildOptions::default())?;
    let compact = build(
        entries.iter().copied(),
        &BuildOptions::default().compact_lengths(true),
    )?;
    // Two length prefixes per entry disappear; two inline constants appear.
    assert_eq!(plain.len() - compact.len(), 2 * 100 - 2);
    let node = Node::parse(&compact)?;
    assert_eq!(node.layout().block.key_code, LengthCode::Const(8));
    assert_eq!(node.layout().block.value_code, LengthCode::Const(16));
    assert_eq!(node.get_value(&42u64.to_be_bytes())?, Some(&[0u8; 16][..]));
    Ok(())
}

#[test]
fn slot_appends_and_deletes_then_persists() -> Result<()> {
    let options = BuildOptions::default()
        .endian(Endian::Little)
        .keep_entry_order(true)
        .reserve_bytes(256);
    let mut slot = NodeSlot::build([(b"first", b"1")], &options)?;
    slot.append(b"second", b"2")?;
    slot.append(b"third", b"3")?;
    assert!(slot.delete(b"first")?);

    let keys: Vec<Vec<u8>> = slot.list_keys()?.into_iter().map(Cow::into_owned).collect();
    assert_eq!(keys, vec![b"second".to_vec(), b"third".to_vec()]);

    let persisted = slot.into_bytes()?;
    let node = Node::parse(&persisted)?;
    assert_eq!(node.len(), 2);
    assert_eq!(node.get_value(b"first")?, None);
    assert_eq!(node.get_value(b"third")?, Some(&b"3"[..]));
    assert_eq!(node.free_space(), 256 - 9 - 8);
    Ok(())
}
