//! On-disk save/load round-trip, in the same style as the reference
//! crate's own `tempfile`-backed persistence tests.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::tempdir;

use fss::collab::test_support::{fake_root, FakeFsProbe, FakeRootIndex};
use fss::model::test_support::FakeRegistry;
use fss::{BuildTarget, FsState, FsStateOptions, PathCasing};

#[test]
fn save_and_load_round_trips_through_a_real_file() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let snapshot_path = Utf8PathBuf::from_path_buf(tmp.path().join("fss.bin"))
        .expect("tempdir path is valid utf-8");

    let registry = FakeRegistry::new();
    registry.register("prod", &["m1", "m2"]);

    let t1 = BuildTarget::new("prod", "m1");
    let t2 = BuildTarget::new("prod", "m2");
    let root1 = fake_root(t1.clone(), 1, false);
    let root2 = fake_root(t2.clone(), 2, true);

    let source = FsState::new(
        FsStateOptions { always_scan_fs: false, casing: PathCasing::Sensitive },
        Arc::new(FakeFsProbe::new()),
        Arc::new(FakeRootIndex::new()),
    );
    source.mark_initial_scan_performed(&t1);
    source.mark_initial_scan_performed(&t2);
    source.mark_dirty(None, fss::Round::Next, Utf8Path::new("/a/x.txt"), &root1, None, false)?;
    source.mark_dirty(None, fss::Round::Next, Utf8Path::new("/a/y.txt"), &root1, None, false)?;
    source.register_deleted(None, &t2, Utf8Path::new("/b/gone.txt"), None)?;

    {
        let mut w = BufWriter::new(File::create(snapshot_path.as_std_path())?);
        source.save(&mut w)?;
    }

    let dest = FsState::new(
        FsStateOptions { always_scan_fs: false, casing: PathCasing::Sensitive },
        Arc::new(FakeFsProbe::new()),
        Arc::new(FakeRootIndex::new()),
    );
    {
        let mut r = BufReader::new(File::open(snapshot_path.as_std_path())?);
        dest.load(&mut r, &registry, |target, root_id| {
            if *target == t1 && root_id == 1 {
                Some(root1.clone())
            } else if *target == t2 && root_id == 2 {
                Some(root2.clone())
            } else {
                None
            }
        })?;
    }

    assert!(dest.is_initial_scan_performed(&t1));
    assert!(dest.is_initial_scan_performed(&t2));

    let ctx = fss::CompileContext::new(Arc::new(fss::collab::test_support::FakeScope::new()));
    let delta1 = dest.effective_files_delta(&ctx, &t1).unwrap();
    assert!(delta1.is_marked_recompile(&root1, Utf8Path::new("/a/x.txt")));
    assert!(delta1.is_marked_recompile(&root1, Utf8Path::new("/a/y.txt")));

    let delta2 = dest.effective_files_delta(&ctx, &t2).unwrap();
    assert_eq!(delta2.get_and_clear_deleted_paths(), vec!["/b/gone.txt".to_string()]);

    Ok(())
}

#[test]
fn load_rejects_a_truncated_snapshot() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let snapshot_path = Utf8PathBuf::from_path_buf(tmp.path().join("fss.bin"))
        .expect("tempdir path is valid utf-8");

    let registry = FakeRegistry::new();
    registry.register("prod", &["m1"]);

    let t1 = BuildTarget::new("prod", "m1");
    let source = FsState::new(
        FsStateOptions { always_scan_fs: false, casing: PathCasing::Sensitive },
        Arc::new(FakeFsProbe::new()),
        Arc::new(FakeRootIndex::new()),
    );
    source.mark_initial_scan_performed(&t1);

    let mut buf = Vec::new();
    source.save(&mut buf)?;
    buf.truncate(buf.len() - 1);
    std::fs::write(snapshot_path.as_std_path(), &buf)?;

    let dest = FsState::new(
        FsStateOptions { always_scan_fs: false, casing: PathCasing::Sensitive },
        Arc::new(FakeFsProbe::new()),
        Arc::new(FakeRootIndex::new()),
    );
    let mut r = BufReader::new(File::open(snapshot_path.as_std_path())?);
    let result = dest.load(&mut r, &registry, |_, _| None);
    assert!(result.is_err());
    Ok(())
}
