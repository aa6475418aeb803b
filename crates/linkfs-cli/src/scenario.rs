//! Symlink self-test scenarios run against a live `FsCore`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, ensure, Context, Result};
use linkfs_core::{FsCore, FsError, HandleId, InodeKind, OpenOptions};
use tracing::{debug, info};

pub const TEST_DIR: &str = "/testsymlink";

// Every name either scenario may leave behind
const NAMES: [&str; 9] = ["a", "b", "c", "1", "2", "3", "4", "z", "y"];

fn path(name: &str) -> PathBuf {
    Path::new(TEST_DIR).join(name)
}

/// Parameters of the concurrent create/unlink race
#[derive(Clone, Debug)]
pub struct RaceOptions {
    pub children: usize,
    pub iterations: usize,
    pub seed: u32,
}

impl Default for RaceOptions {
    fn default() -> Self {
        Self {
            children: 2,
            iterations: 100,
            seed: 97,
        }
    }
}

/// Remove everything the scenarios create. Missing names, and a missing
/// test directory, are fine.
pub fn cleanup(fs: &FsCore) -> Result<()> {
    for name in NAMES {
        match fs.unlink(&path(name)) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(e) => return Err(e).with_context(|| format!("failed to unlink {name}")),
        }
    }
    fs.unlink(Path::new(TEST_DIR))
        .context("failed to remove test directory")?;
    Ok(())
}

fn ensure_test_dir(fs: &FsCore) -> Result<()> {
    match fs.mkdir(Path::new(TEST_DIR)) {
        Ok(()) | Err(FsError::AlreadyExists) => Ok(()),
        Err(e) => Err(e).context("failed to create test directory"),
    }
}

fn expect_open_error(fs: &FsCore, name: &str, expected: FsError, msg: &str) -> Result<()> {
    match fs.open(&path(name), &OpenOptions::read_write()) {
        Err(e) if e == expected => Ok(()),
        Err(e) => bail!("{msg}: unexpected error: {e}"),
        Ok(handle) => {
            fs.close(handle)?;
            bail!("{msg}")
        }
    }
}

/// Handles opened by a scenario. Whatever is still open when this is
/// dropped gets closed, so a failing step cannot leave inodes pinned.
struct OpenHandles<'a> {
    fs: &'a FsCore,
    ids: Vec<HandleId>,
}

impl<'a> OpenHandles<'a> {
    fn new(fs: &'a FsCore) -> Self {
        Self { fs, ids: Vec::new() }
    }

    fn open(&mut self, name: &str, opts: &OpenOptions) -> Result<HandleId> {
        let id = self
            .fs
            .open(&path(name), opts)
            .with_context(|| format!("failed to open {name}"))?;
        self.ids.push(id);
        Ok(id)
    }

    fn close_all(&mut self) -> Result<()> {
        for id in self.ids.drain(..) {
            self.fs.close(id)?;
        }
        Ok(())
    }
}

impl Drop for OpenHandles<'_> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            if let Err(e) = self.fs.close(id) {
                debug!("failed to close {:?}: {}", id, e);
            }
        }
    }
}

/// Links, dangling links, cycles and chains, one step at a time
pub fn run_symlinks(fs: &FsCore) -> Result<()> {
    info!("Start: test symlinks");
    ensure_test_dir(fs)?;
    let mut handles = OpenHandles::new(fs);

    let fd1 = handles.open("a", &OpenOptions::read_write().create(true))?;
    fs.symlink(&path("a"), &path("b"))
        .context("symlink b -> a failed")?;
    ensure!(fs.write(fd1, b"abcd")? == 4, "failed to write to a");

    let st = fs.stat_no_follow(&path("b")).context("failed to stat b")?;
    ensure!(st.kind == InodeKind::Symlink, "b isn't a symlink");

    let fd2 = handles.open("b", &OpenOptions::read_write())?;
    let mut c = [0u8; 1];
    fs.read(fd2, &mut c)?;
    ensure!(c[0] == b'a', "failed to read bytes from b");

    fs.unlink(&path("a"))?;
    expect_open_error(
        fs,
        "b",
        FsError::NotFound,
        "should not be able to open b after deleting a",
    )?;

    fs.symlink(&path("b"), &path("a"))
        .context("symlink a -> b failed")?;
    expect_open_error(
        fs,
        "b",
        FsError::TooManyLinks,
        "should not be able to open b (cycle a -> b -> a)",
    )?;

    fs.symlink(&path("2"), &path("1")).context("failed to link 1 -> 2")?;
    fs.symlink(&path("3"), &path("2")).context("failed to link 2 -> 3")?;
    fs.symlink(&path("4"), &path("3")).context("failed to link 3 -> 4")?;

    handles.close_all()?;

    let fd1 = handles.open("4", &OpenOptions::read_write().create(true))?;
    let fd2 = handles.open("1", &OpenOptions::read_write())?;

    ensure!(fs.write(fd2, b"#")? == 1, "failed to write to 1");
    let mut c2 = [0u8; 1];
    ensure!(fs.read(fd1, &mut c2)? == 1, "failed to read from 4");
    ensure!(c2[0] == b'#', "value read from 4 differed from value written to 1");

    handles.close_all()?;
    info!("test symlinks: ok");
    Ok(())
}

fn race_worker(fs: &FsCore, mut x: u32, iterations: usize) -> Result<usize> {
    let z = path("z");
    let y = path("y");
    let mut observed = 0;

    for _ in 0..iterations {
        x = x.wrapping_mul(1103515245).wrapping_add(12345);
        if x % 3 == 0 {
            match fs.symlink(&z, &y) {
                Ok(_) | Err(FsError::AlreadyExists) => {}
                Err(e) => bail!("symlink failed: {e}"),
            }
            match fs.stat_no_follow(&y) {
                Ok(st) => {
                    ensure!(st.kind == InodeKind::Symlink, "not a symbolic link");
                    observed += 1;
                }
                Err(FsError::NotFound) => {}
                Err(e) => bail!("stat failed: {e}"),
            }
        } else {
            fs.unlink(&y).context("unlink failed")?;
        }
    }
    Ok(observed)
}

/// Several threads racing symlink/unlink on one name. Returns how many
/// stats observed a link.
pub fn run_concurrent(fs: Arc<FsCore>, opts: &RaceOptions) -> Result<usize> {
    info!("Start: test concurrent symlinks");
    ensure_test_dir(&fs)?;

    let fd = fs
        .open(&path("z"), &OpenOptions::read_write().create(true))
        .context("open failed")?;
    fs.close(fd)?;

    let workers: Vec<_> = (0..opts.children)
        .map(|child| {
            let fs = Arc::clone(&fs);
            let seed = opts.seed.wrapping_add(child as u32);
            let iterations = opts.iterations;
            thread::spawn(move || race_worker(&fs, seed, iterations))
        })
        .collect();

    let mut observed = 0;
    for (child, worker) in workers.into_iter().enumerate() {
        let Ok(result) = worker.join() else {
            bail!("test concurrent symlinks: child {child} panicked");
        };
        let seen = result.with_context(|| format!("test concurrent symlinks: child {child} failed"))?;
        debug!("child {} observed {} links", child, seen);
        observed += seen;
    }

    info!("test concurrent symlinks: ok");
    Ok(observed)
}
