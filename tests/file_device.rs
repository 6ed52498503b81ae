#[macro_use]
mod common;

use std::sync::Arc;

use common::*;
use monofs::*;
use tempfile::tempdir;

#[test]
fn test_blocks_past_end_read_as_zero() {
    let dir = tempdir().unwrap();
    let dev = FileDevice::create(dir.path().join("extent"), BS, 8).unwrap();
    dev.write_block(2, &[0xAB; BS]).unwrap();

    let mut buf = vec![0xFFu8; BS];
    dev.read_block(7, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
    dev.read_block(2, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0xAB));
    assert!(dev.read_block(8, &mut buf).is_err());
}

#[test]
fn test_store_survives_reopening_the_host_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.img");
    let data = pattern(40_000);
    {
        let dev = Arc::new(FileDevice::create(&path, BS, 256).unwrap());
        let mut fs = FileSystem::open(dev, config(256)).unwrap();
        fs.create_directory(&p("etc")).unwrap();
        write_file(&mut fs, "etc/conf", b"key=value");
        write_file(&mut fs, "blob", &data);
        fs.close().unwrap();
    }
    let len = std::fs::metadata(&path).unwrap().len();
    log!("backing file is {} bytes", len);
    assert!(len <= 256 * BS as u64);

    let dev = Arc::new(FileDevice::open(&path, BS, 256).unwrap());
    let mut fs = FileSystem::open(dev, config(256).with_mode(InitMode::Recover)).unwrap();
    assert_eq!(list(&fs, "/"), vec!["etc", "blob"]);
    assert_eq!(read_file(&mut fs, "etc/conf"), b"key=value");
    assert_eq!(read_file(&mut fs, "blob"), data);
}
