#![allow(missing_docs)]

use std::fs;

use kvnode::config::{ConfigError, NodeConfig};
use kvnode::primitives::bytes::buf::Endian;
use kvnode::storage::node::{build, Node};
use kvnode::storage::overlay::Overlay;
use tempfile::tempdir;

#[test]
fn config_file_drives_build_and_overlay() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("kvnode.toml");
    fs::write(
        &path,
        r#"
[build]
endian = "big"
use_padding = true
compress_keys = true

[overlay]
max_dirty_len = 12
dirty_reserve_bytes = 512
"#,
    )?;
    let config = NodeConfig::load(&path)?;
    assert_eq!(config.build.endian, Endian::Big);

    let bytes = build([(b"page/1", b"a"), (b"page/2", b"b")], &config.build)?;
    let node = Node::parse(&bytes)?;
    assert_eq!(node.endian(), Endian::Big);
    assert_eq!(node.prefix(), b"page/");
    assert_eq!(node.layout().block.start % 8, 0);

    let mut overlay = Overlay::parse_with(bytes, None, config.overlay.clone())?;
    assert_eq!(overlay.max_dirty_len(), 12);
    for i in 0..20u8 {
        overlay.put_value(&[b'x', i], &[i])?;
    }
    assert_eq!(overlay.len(), 22);
    Ok(())
}

#[test]
fn missing_and_malformed_files_are_distinguished() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        NodeConfig::load(&missing),
        Err(ConfigError::Read { .. })
    ));

    let broken = dir.path().join("broken.toml");
    fs::write(&broken, "[overlay\nmax_dirty_len = 5")?;
    assert!(matches!(
        NodeConfig::load(&broken),
        Err(ConfigError::ParseFile { .. })
    ));

    let out_of_range = dir.path().join("small.toml");
    fs::write(&out_of_range, "[overlay]\nmax_dirty_len = 2\n")?;
    assert!(matches!(
        NodeConfig::load(&out_of_range),
        Err(ConfigError::Invalid { .. })
    ));
    Ok(())
}

#[test]
fn saved_config_loads_back() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("roundtrip.toml");
    let mut config = NodeConfig::default();
    config.build = config.build.custom_data(b"v1".to_vec()).reserve_bytes(64);
    fs::write(&path, config.to_toml_string()?)?;
    assert_eq!(NodeConfig::load(&path)?, config);
    Ok(())
}
