//! A WAL append that fails part-way must not resurface after a restart.
//!
//! Runs in its own binary because the file size limit applies to the whole process.

#![cfg(all(feature = "persistent", target_os = "linux"))]

use chrono::Utc;
use tempfile::tempdir;

use seendb::storage::{open_database, IdentityStore};
use seendb::IdentityId;

fn file_size_limit() -> libc::rlimit {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_FSIZE, &mut limit) }, 0);
    limit
}

fn set_file_size_limit(limit: &libc::rlimit) {
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_FSIZE, limit) }, 0);
}

#[test]
fn failed_append_is_not_replayed() {
    // Oversized writes fail with EFBIG instead of killing the process.
    unsafe {
        libc::signal(libc::SIGXFSZ, libc::SIG_IGN);
    }

    let dir = tempdir().unwrap();
    let alice = IdentityId::new();
    let ghost = IdentityId::new();
    let bob = IdentityId::new();

    {
        let store = open_database(dir.path(), None).unwrap();
        store.record_connection(alice, "Alice", Utc::now()).unwrap();
        let size_before = store.wal_size().unwrap();

        let original = file_size_limit();
        set_file_size_limit(&libc::rlimit {
            rlim_cur: size_before + 20,
            rlim_max: original.rlim_max,
        });
        let failed = store.record_connection(ghost, "Ghost", Utc::now());
        set_file_size_limit(&original);

        assert!(failed.unwrap_err().is_unavailable());
        assert!(!store.exists(ghost).unwrap());
        assert_eq!(store.wal_size().unwrap(), size_before);

        store.record_connection(bob, "Bob", Utc::now()).unwrap();
    }

    let store = open_database(dir.path(), None).unwrap();
    assert!(!store.exists(ghost).unwrap());
    assert!(store.find_identities_by_name("Ghost").unwrap().is_empty());
    assert!(store.exists(alice).unwrap());
    assert!(store.exists(bob).unwrap());
    assert_eq!(store.identity_count().unwrap(), 2);
}
