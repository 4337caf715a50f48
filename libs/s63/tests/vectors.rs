//! End-to-end checks against the worked examples of the S-63 standard
use s63::blowfish::Blowfish;
use s63::{cell, permit, zip, S63Client, S63Error};
use std::fs;

const M_KEY: &str = "98765";
const HW_ID: &str = "12348";
const M_ID: &str = "01";
const USERPERMIT: &str = "73871727080876A07E450C043031";
const CK1: [u8; 5] = [0xc1, 0xcb, 0x51, 0x8e, 0x9c];
const CK2: [u8; 5] = [0x42, 0x15, 0x71, 0xcc, 0x66];
const CELLNAME: &str = "NO4D0613";
const EXPIRY: &str = "20000830";
const CELLPERMIT: &str = "NO4D061320000830BEB9BFE3C7C6CE68B16411FD09F96982795C77B204F54D48";

#[test]
fn standard_userpermit_vectors() {
    assert_eq!(permit::create_user_permit(M_KEY, HW_ID, M_ID).unwrap(), USERPERMIT);
    assert_eq!(permit::extract_hw_id(USERPERMIT, M_KEY).unwrap(), HW_ID);
}

#[test]
fn standard_cellpermit_vectors() {
    assert_eq!(
        permit::create_cell_permit(HW_ID, &CK1, &CK2, CELLNAME, EXPIRY).unwrap(),
        CELLPERMIT
    );
    let keys = permit::extract_cell_keys(CELLPERMIT, HW_ID).unwrap();
    assert_eq!(keys.ck1, CK1);
    assert_eq!(keys.ck2, CK2);
}

#[test]
fn blowfish_self_test() {
    let bf = Blowfish::new(b"1234").unwrap();
    let clear = b"This is a test clear data!!!!";
    assert_eq!(bf.decrypt_with_padding(&bf.encrypt_with_padding(clear)).unwrap(), clear);
}

#[test]
fn zip_self_test() {
    let data = b"This is a test unzipped data!!!!! 50 bytes length";
    let archive = zip::pack("test.txt", data).unwrap();
    let entry = zip::unpack(&archive, zip::DEFAULT_MAX_OUTPUT_SIZE).unwrap();
    assert_eq!(entry.payload, data);
}

/// The full data-server-to-data-client round trip: zip an S-57 dataset,
/// encrypt it under one cell key, issue a permit, then let a client
/// with only the permit file recover the clear bytes from disk.
#[test]
fn cell_distribution_roundtrip() {
    let dataset: Vec<u8> = (0u32..4096).flat_map(u32::to_le_bytes).collect();

    // data server side
    let archive = zip::pack("NO4D0613.000", &dataset).unwrap();
    let encrypted = cell::encrypt_cell(&archive, &CK2).unwrap();
    assert_eq!(encrypted.len() % 8, 0);

    let dir = tempfile::tempdir().unwrap();
    let cell_path = dir.path().join("NO4D0613.000");
    fs::write(&cell_path, &encrypted).unwrap();
    fs::write(
        dir.path().join("PERMIT.TXT"),
        format!(":DATE 20000801 15:00\n:VERSION 1\n:ENC\n{CELLPERMIT}\n"),
    )
    .unwrap();

    // data client side
    let mut client = S63Client::new(HW_ID, M_KEY, M_ID).unwrap();
    let report = client.import_permit_file(dir.path().join("PERMIT.TXT")).unwrap();
    assert_eq!(report.installed, 1);

    assert_eq!(client.open(&cell_path).unwrap(), dataset);

    let out_path = dir.path().join("decrypted").join("NO4D0613.000");
    fs::create_dir_all(out_path.parent().unwrap()).unwrap();
    client.decrypt_and_unzip(&cell_path, &out_path).unwrap();
    assert_eq!(fs::read(&out_path).unwrap(), dataset);
}

#[test]
fn unknown_cell_has_no_permit() {
    let dir = tempfile::tempdir().unwrap();
    let cell_path = dir.path().join("XX4D0613.000");
    fs::write(&cell_path, [0u8; 64]).unwrap();
    let client = S63Client::new(HW_ID, M_KEY, M_ID).unwrap();
    match client.open(&cell_path) {
        Err(e @ S63Error::NoPermit(_)) => assert_eq!(e.sse(), Some(21)),
        other => panic!("expected NoPermit, got {other:?}"),
    }
}

#[test]
fn truncated_cell_is_rejected() {
    let mut client = S63Client::new(HW_ID, M_KEY, M_ID).unwrap();
    client.install_cell_permit(CELLPERMIT).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cell_path = dir.path().join("NO4D0613.000");
    fs::write(&cell_path, [0u8; 61]).unwrap();
    assert!(matches!(client.open(&cell_path), Err(S63Error::BadLength(61))));
}
