use linkfs_core::*;
use std::path::Path;

fn setup() -> FsCore {
    let fs = FsCore::new(FsConfig::default()).unwrap();
    fs.mkdir(Path::new("/testsymlink")).unwrap();
    fs
}

fn p(path: &str) -> &Path {
    Path::new(path)
}

fn create(fs: &FsCore, path: &str) -> HandleId {
    fs.open(p(path), &OpenOptions::read_write().create(true)).unwrap()
}

#[test]
fn test_symlink_reads_through_to_target() {
    let fs = setup();
    let a = create(&fs, "/testsymlink/a");
    fs.symlink(p("/testsymlink/a"), p("/testsymlink/b")).unwrap();
    assert_eq!(fs.write(a, b"abcd").unwrap(), 4);

    let st = fs.stat_no_follow(p("/testsymlink/b")).unwrap();
    assert_eq!(st.kind, InodeKind::Symlink);
    assert_eq!(st.len, "/testsymlink/a".len() as u64);

    let b = fs.open(p("/testsymlink/b"), &OpenOptions::read_write()).unwrap();
    let mut c = [0u8; 1];
    assert_eq!(fs.read(b, &mut c).unwrap(), 1);
    assert_eq!(c[0], b'a');
    assert_eq!(fs.fstat(b).unwrap().kind, InodeKind::File);
}

#[test]
fn test_nofollow_open_returns_the_link() {
    let fs = setup();
    fs.close(create(&fs, "/testsymlink/a")).unwrap();
    fs.symlink(p("/testsymlink/a"), p("/testsymlink/b")).unwrap();

    let h = fs
        .open(p("/testsymlink/b"), &OpenOptions::read_only().nofollow(true))
        .unwrap();
    assert!(fs.fstat(h).unwrap().is_symlink());

    let mut buf = [0u8; 64];
    let n = fs.read(h, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"/testsymlink/a");
    fs.close(h).unwrap();

    let h = fs
        .open(p("/testsymlink/b"), &OpenOptions::read_write().nofollow(true))
        .unwrap();
    assert_eq!(fs.write(h, b"x"), Err(FsError::InvalidArgument));
}

#[test]
fn test_dangling_after_target_unlinked() {
    let fs = setup();
    let a = create(&fs, "/testsymlink/a");
    fs.symlink(p("/testsymlink/a"), p("/testsymlink/b")).unwrap();
    fs.write(a, b"abcd").unwrap();

    fs.unlink(p("/testsymlink/a")).unwrap();
    assert_eq!(
        fs.open(p("/testsymlink/b"), &OpenOptions::read_write()),
        Err(FsError::NotFound)
    );
    assert_eq!(fs.stat(p("/testsymlink/b")), Err(FsError::NotFound));

    // The link itself survives and still reports its own kind
    assert!(fs.stat_no_follow(p("/testsymlink/b")).unwrap().is_symlink());

    // The handle opened before the unlink still reaches the old file
    let st = fs.fstat(a).unwrap();
    assert_eq!(st.nlink, 0);
    assert_eq!(st.len, 4);
    assert_eq!(fs.write(a, b"e").unwrap(), 1);

    // Recreating the target brings the link back to life, with a new inode
    let fresh = create(&fs, "/testsymlink/a");
    let via_link = fs.stat(p("/testsymlink/b")).unwrap();
    assert_eq!(via_link.ino, fs.fstat(fresh).unwrap().ino);
    assert_ne!(via_link.ino, st.ino);
    assert_eq!(via_link.len, 0);
}

#[test]
fn test_unlinked_file_is_reclaimed_on_close() {
    let fs = setup();
    let baseline = fs.stats().live_inodes;
    let a = create(&fs, "/testsymlink/a");
    fs.write(a, b"abcd").unwrap();
    fs.unlink(p("/testsymlink/a")).unwrap();

    // Still pinned by the handle
    assert_eq!(fs.stats().live_inodes, baseline + 1);
    let st = fs.fstat(a).unwrap();
    assert_eq!(st.nlink, 0);
    assert_eq!(st.len, 4);

    fs.close(a).unwrap();
    assert_eq!(fs.stats().live_inodes, baseline);
}

#[test]
fn test_cycle_fails_with_too_many_links() {
    let fs = setup();
    fs.symlink(p("/testsymlink/a"), p("/testsymlink/b")).unwrap();
    fs.symlink(p("/testsymlink/b"), p("/testsymlink/a")).unwrap();

    for path in ["/testsymlink/a", "/testsymlink/b"] {
        assert_eq!(
            fs.open(p(path), &OpenOptions::read_write()),
            Err(FsError::TooManyLinks)
        );
        assert!(fs.stat_no_follow(p(path)).unwrap().is_symlink());
    }
}

#[test]
fn test_chain_writes_reach_the_tail() {
    let fs = setup();
    fs.symlink(p("/testsymlink/2"), p("/testsymlink/1")).unwrap();
    fs.symlink(p("/testsymlink/3"), p("/testsymlink/2")).unwrap();
    fs.symlink(p("/testsymlink/4"), p("/testsymlink/3")).unwrap();

    assert_eq!(
        fs.open(p("/testsymlink/1"), &OpenOptions::read_write()),
        Err(FsError::NotFound)
    );

    let fd1 = create(&fs, "/testsymlink/4");
    let fd2 = fs.open(p("/testsymlink/1"), &OpenOptions::read_write()).unwrap();

    assert_eq!(fs.write(fd2, b"#").unwrap(), 1);
    let mut c2 = [0u8; 1];
    assert_eq!(fs.read(fd1, &mut c2).unwrap(), 1);
    assert_eq!(c2[0], b'#');
}

#[test]
fn test_create_does_not_go_through_dangling_symlink() {
    let fs = setup();
    fs.symlink(p("/testsymlink/missing"), p("/testsymlink/l")).unwrap();

    assert_eq!(
        fs.open(p("/testsymlink/l"), &OpenOptions::read_write().create(true)),
        Err(FsError::NotFound)
    );
    assert_eq!(fs.stat(p("/testsymlink/missing")), Err(FsError::NotFound));
}

#[test]
fn test_create_follows_existing_symlink() {
    let fs = setup();
    fs.close(create(&fs, "/testsymlink/target")).unwrap();
    fs.symlink(p("target"), p("/testsymlink/l")).unwrap();

    let h = fs
        .open(p("/testsymlink/l"), &OpenOptions::read_write().create(true))
        .unwrap();
    assert_eq!(fs.fstat(h).unwrap().kind, InodeKind::File);
    assert_eq!(
        fs.fstat(h).unwrap().ino,
        fs.stat(p("/testsymlink/target")).unwrap().ino
    );
}

#[test]
fn test_symlinked_directories_in_the_middle_of_a_path() {
    let fs = setup();
    fs.mkdir(p("/testsymlink/real")).unwrap();
    fs.symlink(p("/testsymlink/real"), p("/testsymlink/dir")).unwrap();
    fs.close(create(&fs, "/testsymlink/dir/f")).unwrap();

    // Intermediate components are followed even when the final one is not
    let st = fs.stat_no_follow(p("/testsymlink/dir/f")).unwrap();
    assert_eq!(st.kind, InodeKind::File);
    assert_eq!(st.ino, fs.stat(p("/testsymlink/real/f")).unwrap().ino);

    let h = fs
        .open(p("/testsymlink/dir/f"), &OpenOptions::read_only().nofollow(true))
        .unwrap();
    assert_eq!(fs.fstat(h).unwrap().kind, InodeKind::File);
}

#[test]
fn test_file_in_the_middle_of_a_path() {
    let fs = setup();
    fs.close(create(&fs, "/testsymlink/f")).unwrap();
    fs.symlink(p("/testsymlink/f"), p("/testsymlink/l")).unwrap();

    assert_eq!(fs.stat(p("/testsymlink/f/x")), Err(FsError::NotADirectory));
    assert_eq!(fs.stat(p("/testsymlink/l/x")), Err(FsError::NotADirectory));
}

#[test]
fn test_hop_bound_from_config() {
    let config = FsConfig {
        limits: FsLimits {
            max_symlink_hops: 3,
            ..FsLimits::default()
        },
    };
    let fs = FsCore::new(config).unwrap();
    fs.close(
        fs.open(p("/end"), &OpenOptions::write_only().create(true))
            .unwrap(),
    )
    .unwrap();
    fs.symlink(p("/end"), p("/l1")).unwrap();
    fs.symlink(p("/l1"), p("/l2")).unwrap();
    fs.symlink(p("/l2"), p("/l3")).unwrap();
    fs.symlink(p("/l3"), p("/l4")).unwrap();

    assert!(fs.open(p("/l3"), &OpenOptions::read_only()).is_ok());
    assert_eq!(
        fs.open(p("/l4"), &OpenOptions::read_only()),
        Err(FsError::TooManyLinks)
    );
}

#[test]
fn test_unlink_twice_and_cleanup_leaks_nothing() {
    let fs = FsCore::new(FsConfig::default()).unwrap();
    let baseline = fs.stats();

    fs.mkdir(p("/testsymlink")).unwrap();
    fs.close(create(&fs, "/testsymlink/z")).unwrap();
    fs.symlink(p("/testsymlink/z"), p("/testsymlink/y")).unwrap();
    fs.link(p("/testsymlink/z"), p("/testsymlink/x")).unwrap();
    assert_eq!(fs.stat(p("/testsymlink/z")).unwrap().nlink, 2);

    for name in ["x", "y", "z", "x", "y", "z"] {
        fs.unlink(&Path::new("/testsymlink").join(name)).unwrap();
    }
    assert!(fs.readdir(p("/testsymlink")).unwrap().is_empty());

    fs.unlink(p("/testsymlink")).unwrap();
    fs.unlink(p("/testsymlink")).unwrap();
    assert_eq!(fs.stats(), baseline);
}

#[test]
fn test_invalid_paths() {
    let fs = setup();
    assert_eq!(fs.symlink(p("/a"), p("")), Err(FsError::InvalidArgument));
    assert_eq!(fs.symlink(p(""), p("/testsymlink/l")), Err(FsError::InvalidArgument));
    assert_eq!(fs.unlink(p("")), Err(FsError::InvalidArgument));
    assert_eq!(fs.unlink(p("/")), Err(FsError::InvalidArgument));
    assert_eq!(fs.stat_no_follow(p("")), Err(FsError::InvalidArgument));
}
