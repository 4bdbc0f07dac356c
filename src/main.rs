use minidb::{Db, IsolationLevel};

fn main() {
    tracing_subscriber::fmt::init();

    println!("Minidb - an educational database core in Rust");
    println!("=============================================\n");

    let dir = std::env::temp_dir().join("minidb-demo");
    std::fs::create_dir_all(&dir).expect("Failed to create demo directory");
    let path = dir.join("demo");

    let db = match Db::open(&path, 64) {
        Ok(db) => {
            println!("Opened existing database at {}", path.display());
            db
        }
        Err(_) => {
            let db = Db::create(&path, 64).expect("Failed to create database");
            println!("Created database at {}", path.display());
            db
        }
    };

    let xid = db
        .begin(IsolationLevel::ReadCommitted)
        .expect("Failed to begin transaction");
    println!("Started transaction {}", xid);

    let records = [
        b"Hello, World!".as_slice(),
        b"This is minidb",
        b"A tiny MVCC storage core",
    ];
    let mut uids = Vec::new();
    for record in records {
        let uid = db.insert(xid, record).expect("Insert failed");
        println!("Inserted {} bytes at {}", record.len(), uid);
        uids.push(uid);
    }

    db.commit(xid).expect("Commit failed");
    println!("Committed transaction {}\n", xid);

    let reader = db
        .begin(IsolationLevel::RepeatableRead)
        .expect("Failed to begin reader");
    for uid in &uids {
        let data = db
            .read(reader, *uid)
            .expect("Read failed")
            .expect("Record not visible");
        println!("Read back: {}", String::from_utf8_lossy(&data));
    }
    db.commit(reader).expect("Commit failed");

    db.close().expect("Close failed");
    println!("\nClosed cleanly");
}
