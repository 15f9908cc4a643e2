//! Integration tests for volume persistence: a save/load round trip must
//! reproduce every component's state, and a corrupted volume must be
//! rejected rather than silently misread.

use engine::{
    AccessContext, ChangeKind, Config, Engine, FileSectorDevice, InMemorySectorDevice,
    SectorDevice,
};
use tempfile::TempDir;

#[test]
fn save_and_load_round_trips_through_a_file() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("volume.engv");
    let ctx = AccessContext::root();

    {
        let mut eng = Engine::new(Config::new());
        eng.write_file(&ctx, "/a.txt", b"hello", 0).unwrap();
        eng.mkdir(&ctx, "/dir", 1).unwrap();
        eng.write_file(&ctx, "/dir/b.txt", b"world", 2).unwrap();
        eng.snapshot(&ctx, "checkpoint", 3).unwrap();
        let mut device = FileSectorDevice::open(&path).unwrap();
        eng.save(&mut device).unwrap();
    }

    let device = FileSectorDevice::open(&path).unwrap();
    let mut reopened = Engine::load(Config::new(), &device).unwrap();
    assert_eq!(reopened.stat(&ctx, "/a.txt", 4).unwrap().length, Some(5));
    assert_eq!(
        reopened.stat(&ctx, "/dir/b.txt", 4).unwrap().length,
        Some(5)
    );
}

#[test]
fn corrupted_volume_is_rejected_on_load() {
    let mut device = InMemorySectorDevice::new();
    let eng = Engine::new(Config::new());
    eng.save(&mut device).unwrap();

    let mut sector = [0u8; 512];
    device.read_sector(1, &mut sector).unwrap();
    sector[50] ^= 0xFF;
    device.write_sector(1, &sector).unwrap();

    assert!(Engine::load(Config::new(), &device).is_err());
}

#[test]
fn view_graph_survives_a_round_trip_with_diffable_history() {
    let mut device = InMemorySectorDevice::new();
    let ctx = AccessContext::root();
    let snapshot_view;
    {
        let mut eng = Engine::new(Config::new());
        eng.write_file(&ctx, "/a.txt", b"hello", 0).unwrap();
        snapshot_view = eng.snapshot(&ctx, "s1", 1).unwrap();
        eng.hide(&ctx, "/a.txt", 2).unwrap();
        eng.save(&mut device).unwrap();
    }

    let mut reopened = Engine::load(Config::new(), &device).unwrap();
    let current = reopened.current_head();
    let diff = reopened.view_diff(snapshot_view, current);
    assert_eq!(diff, vec![("/a.txt".to_string(), ChangeKind::Hidden)]);
}

#[test]
fn compact_reclaims_only_unreachable_blobs() {
    let ctx = AccessContext::root();
    let mut eng = Engine::new(Config::new());
    eng.write_file(&ctx, "/a.txt", b"keep-me", 0).unwrap();
    eng.write_file(&ctx, "/b.txt", b"overwritten-content", 1).unwrap();
    eng.write_file(&ctx, "/b.txt", b"new-content", 2).unwrap();

    let dropped = eng.compact(&ctx, 3).unwrap();
    assert_eq!(dropped, 1);
    assert_eq!(eng.stat(&ctx, "/a.txt", 4).unwrap().length, Some(7));
    assert_eq!(eng.stat(&ctx, "/b.txt", 4).unwrap().length, Some(11));
}
