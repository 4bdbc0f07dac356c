//! Integration tests for page allocation and storage limits

use minidb::{Db, DbError, IsolationLevel};

const PAGE_SIZE: u64 = 8192;

#[test]
fn test_capacity_below_minimum_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Db::create(dir.path().join("test"), 5),
        Err(DbError::MemTooSmall { got: 5 })
    ));
}

#[test]
fn test_record_too_large_for_a_page() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::create(dir.path().join("test"), 10).unwrap();

    let xid = db.begin(IsolationLevel::ReadCommitted).unwrap();
    // An entry is 16 bytes of MVCC header plus the record, wrapped in a
    // 3-byte slot header; this cannot fit the 8190 usable bytes.
    let too_big = vec![0u8; 8190 - 3 - 16 + 1];
    assert!(matches!(
        db.insert(xid, &too_big),
        Err(DbError::DataTooLarge { .. })
    ));

    // One byte less fits.
    let just_fits = vec![0u8; 8190 - 3 - 16];
    let uid = db.insert(xid, &just_fits).unwrap();
    assert_eq!(db.read(xid, uid).unwrap().unwrap(), just_fits);

    db.commit(xid).unwrap();
    db.close().unwrap();
}

#[test]
fn test_payload_bytes_round_trip_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::create(dir.path().join("test"), 10).unwrap();

    let payload: Vec<u8> = (0..=255).collect();
    let xid = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let uid = db.insert(xid, &payload).unwrap();
    db.commit(xid).unwrap();

    let reader = db.begin(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(db.read(reader, uid).unwrap().unwrap(), payload);
    db.commit(reader).unwrap();
    db.close().unwrap();
}

#[test]
fn test_bulk_insert_page_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test");
    let db = Db::create(&path, 10).unwrap();

    let count = 2000usize;
    let xid = db.begin(IsolationLevel::ReadCommitted).unwrap();
    let uids: Vec<_> = (0..count)
        .map(|i| {
            let mut payload = vec![0u8; 100];
            payload[..8].copy_from_slice(&(i as u64).to_le_bytes());
            db.insert(xid, &payload).unwrap()
        })
        .collect();
    db.commit(xid).unwrap();

    // Every record reads back with its marker intact.
    let reader = db.begin(IsolationLevel::ReadCommitted).unwrap();
    for (i, uid) in uids.iter().enumerate() {
        let data = db.read(reader, *uid).unwrap().unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(
            u64::from_le_bytes(data[..8].try_into().unwrap()),
            i as u64
        );
    }
    db.commit(reader).unwrap();
    db.close().unwrap();

    // Each stored record occupies 119 bytes (100 + 16 MVCC header + 3 slot
    // header) of the 8190 usable bytes per page, plus page 1.
    let stored = 100 + 16 + 3;
    let expected_data_pages = (count * stored).div_ceil(8190) as u64;
    let file_len = std::fs::metadata(dir.path().join("test.db")).unwrap().len();
    let pages = file_len / PAGE_SIZE;
    assert!(
        pages >= expected_data_pages + 1 && pages <= expected_data_pages + 3,
        "unexpected page count: {pages} (expected about {})",
        expected_data_pages + 1
    );
}

#[test]
fn test_bulk_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test");

    let uids = {
        let db = Db::create(&path, 10).unwrap();
        let xid = db.begin(IsolationLevel::ReadCommitted).unwrap();
        let uids: Vec<_> = (0..500u32)
            .map(|i| db.insert(xid, format!("record {i}").as_bytes()).unwrap())
            .collect();
        db.commit(xid).unwrap();
        db.close().unwrap();
        uids
    };

    let db = Db::open(&path, 10).unwrap();
    let reader = db.begin(IsolationLevel::ReadCommitted).unwrap();
    for (i, uid) in uids.iter().enumerate() {
        assert_eq!(
            db.read(reader, *uid).unwrap().unwrap(),
            format!("record {i}").as_bytes()
        );
    }
    db.commit(reader).unwrap();
    db.close().unwrap();
}
