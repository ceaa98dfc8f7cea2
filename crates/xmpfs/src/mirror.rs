//! Handlers mirroring a host directory.

use {
    crate::utils::*,
    filetime::FileTime,
    fusebridge::{
        ApiVersion, Args, Handle, HandlerSet, Operation, Result, StatVfs, Timespec, Value, errno::*,
    },
    log::debug,
    nix::{
        sys::stat::{Mode, SFlag},
        unistd::{AccessFlags, Gid, Uid},
    },
    std::{
        fs::{self, File},
        ops::Deref,
        os::unix::fs::{DirBuilderExt, FileExt, PermissionsExt},
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// Per-descriptor state kept by the bridge between open and release.
#[derive(Debug)]
pub struct OpenFile {
    file: File,
}

#[derive(Clone, Debug)]
pub struct Mirror {
    realroot: PathBuf,
}

impl Mirror {
    pub fn new<P: AsRef<Path>>(realroot: P) -> Mirror {
        Mirror {
            realroot: realroot.as_ref().to_path_buf(),
        }
    }

    fn real(&self, args: &Args, i: usize) -> Result<PathBuf> {
        Ok(realpath(&self.realroot, args.str(i)?))
    }

    /// The handler table serving this mirror.
    pub fn handlers(self) -> HandlerSet {
        let m = Arc::new(self);
        let mut set = HandlerSet::new();

        macro_rules! route {
            ($($op:ident => $f:ident),* $(,)?) => {
                $(
                    let fs = m.clone();
                    set.insert(Operation::$op, move |args| fs.$f(args));
                )*
            };
        }

        route! {
            Getattr => getattr,
            Fgetattr => fgetattr,
            Readlink => readlink,
            Readdir => readdir,
            Mknod => mknod,
            Mkdir => mkdir,
            Unlink => unlink,
            Rmdir => rmdir,
            Symlink => symlink,
            Rename => rename,
            Link => link,
            Chmod => chmod,
            Chown => chown,
            Truncate => truncate,
            Ftruncate => ftruncate,
            Utimens => utimens,
            Open => open,
            Create => create,
            Read => read,
            Write => write,
            Statfs => statfs,
            Flush => flush,
            Release => release,
            Fsync => fsync,
            Access => access,
        }

        set
    }

    fn getattr(&self, args: &Args) -> Result<Value> {
        let attr = fs::symlink_metadata(self.real(args, 0)?)?;
        Ok(stat(&attr).into())
    }

    fn fgetattr(&self, args: &Args) -> Result<Value> {
        let attr = open_file(args)?.file.metadata()?;
        Ok(stat(&attr).into())
    }

    fn readlink(&self, args: &Args) -> Result<Value> {
        let target = fs::read_link(self.real(args, 0)?)?;
        Ok(target.to_string_lossy().into_owned().into())
    }

    fn readdir(&self, args: &Args) -> Result<Value> {
        let realpath = self.real(args, 0)?;
        // getdir passes no offset
        let offset = match args.get(1) {
            Some(_) => args.int::<i64>(1)?.max(0),
            None => 0,
        };

        let mut dirents = Vec::new();
        if offset < 2 {
            let attr = fs::metadata(&realpath)?;
            if offset < 1 {
                dirents.push(dirent(".", &attr, 1));
            }
            // the export root is its own parent
            let parent = match realpath.parent() {
                Some(up) if realpath != self.realroot => fs::metadata(up)?,
                _ => attr.clone(),
            };
            dirents.push(dirent("..", &parent, 2));
        }

        let skip = (offset - 2).max(0) as usize;
        for (i, entry) in fs::read_dir(&realpath)?.skip(skip).enumerate() {
            dirents.push(get_dirent(&entry?, 3 + (skip + i) as i64)?);
        }

        debug!("readdir {:?} from {offset}: {} entries", realpath, dirents.len());
        Ok(Value::iter(dirents))
    }

    fn mknod(&self, args: &Args) -> Result<Value> {
        let mode = args.int::<u32>(1)?;
        nix::sys::stat::mknod(
            &self.real(args, 0)?,
            SFlag::from_bits_truncate(mode & nix::libc::S_IFMT),
            Mode::from_bits_truncate(mode & !nix::libc::S_IFMT),
            args.int(2)?,
        )?;
        Ok(Value::None)
    }

    fn mkdir(&self, args: &Args) -> Result<Value> {
        let mode = args.int::<u32>(1)?;
        fs::DirBuilder::new()
            .mode(mode)
            .create(self.real(args, 0)?)?;
        Ok(Value::None)
    }

    fn unlink(&self, args: &Args) -> Result<Value> {
        fs::remove_file(self.real(args, 0)?)?;
        Ok(Value::None)
    }

    fn rmdir(&self, args: &Args) -> Result<Value> {
        fs::remove_dir(self.real(args, 0)?)?;
        Ok(Value::None)
    }

    fn symlink(&self, args: &Args) -> Result<Value> {
        // the target is stored verbatim, relative to wherever the link lives
        std::os::unix::fs::symlink(args.str(0)?, self.real(args, 1)?)?;
        Ok(Value::None)
    }

    fn rename(&self, args: &Args) -> Result<Value> {
        fs::rename(self.real(args, 0)?, self.real(args, 1)?)?;
        Ok(Value::None)
    }

    fn link(&self, args: &Args) -> Result<Value> {
        fs::hard_link(self.real(args, 0)?, self.real(args, 1)?)?;
        Ok(Value::None)
    }

    fn chmod(&self, args: &Args) -> Result<Value> {
        let mode = args.int::<u32>(1)?;
        fs::set_permissions(self.real(args, 0)?, PermissionsExt::from_mode(mode))?;
        Ok(Value::None)
    }

    fn chown(&self, args: &Args) -> Result<Value> {
        // -1 leaves the id unchanged
        let uid = args.int::<u32>(1)?;
        let gid = args.int::<u32>(2)?;
        nix::unistd::chown(
            &self.real(args, 0)?,
            (uid != u32::MAX).then(|| Uid::from_raw(uid)),
            (gid != u32::MAX).then(|| Gid::from_raw(gid)),
        )?;
        Ok(Value::None)
    }

    fn truncate(&self, args: &Args) -> Result<Value> {
        fs::OpenOptions::new()
            .write(true)
            .open(self.real(args, 0)?)?
            .set_len(args.int(1)?)?;
        Ok(Value::None)
    }

    fn ftruncate(&self, args: &Args) -> Result<Value> {
        open_file(args)?.file.set_len(args.int(1)?)?;
        Ok(Value::None)
    }

    fn utimens(&self, args: &Args) -> Result<Value> {
        let filepath = self.real(args, 0)?;
        let atime = Timespec::try_from(args.get(1).ok_or(EINVAL)?)?;
        let mtime = Timespec::try_from(args.get(2).ok_or(EINVAL)?)?;

        let attr = fs::symlink_metadata(&filepath)?;
        filetime::set_symlink_file_times(
            &filepath,
            file_time(&atime, FileTime::from_last_access_time(&attr)),
            file_time(&mtime, FileTime::from_last_modification_time(&attr)),
        )?;
        Ok(Value::None)
    }

    fn open(&self, args: &Args) -> Result<Value> {
        let flags = args.int::<i32>(1)?;
        self.open_real(args, flags & !nix::libc::O_CREAT, 0)
    }

    fn create(&self, args: &Args) -> Result<Value> {
        let flags = args.int::<i32>(1)?;
        self.open_real(args, flags | nix::libc::O_CREAT, args.int(2)?)
    }

    fn open_real(&self, args: &Args, flags: i32, mode: u32) -> Result<Value> {
        let oflags = nix::fcntl::OFlag::from_bits_truncate(flags & UNIX_FLAGS);
        let omode = Mode::from_bits_truncate(mode);
        let fd = nix::fcntl::open(&self.real(args, 0)?, oflags, omode)?;
        if args.control().api_version() < ApiVersion::V22 {
            // nowhere to keep the descriptor
            return Ok(Value::None);
        }

        Ok(Handle::new(OpenFile {
            file: File::from(fd),
        })
        .into())
    }

    /// The descriptor's file, or the path opened afresh on revisions that hand
    /// no session to read and write.
    fn backing<'a>(&self, args: &'a Args, write: bool) -> Result<Backing<'a>> {
        if args.control().api_version() >= ApiVersion::V22 {
            return Ok(Backing::Session(&open_file(args)?.file));
        }
        let file = fs::OpenOptions::new()
            .read(!write)
            .write(write)
            .open(self.real(args, 0)?)?;
        Ok(Backing::Path(file))
    }

    fn read(&self, args: &Args) -> Result<Value> {
        let count = args.int::<usize>(1)?;
        let offset = args.int::<u64>(2)?;

        let mut buf = vec![0; count];
        let bytes = self.backing(args, false)?.read_at(&mut buf, offset)?;
        buf.truncate(bytes);
        Ok(buf.into())
    }

    fn write(&self, args: &Args) -> Result<Value> {
        let offset = args.int::<u64>(2)?;
        let count = self.backing(args, true)?.write_at(args.bytes(1)?, offset)?;
        Ok(count.into())
    }

    fn statfs(&self, _: &Args) -> Result<Value> {
        let fs = nix::sys::statvfs::statvfs(&self.realroot)?;

        Ok(StatVfs {
            f_bsize: fs.block_size() as u64,
            f_frsize: fs.fragment_size() as u64,
            f_blocks: fs.blocks() as u64,
            f_bfree: fs.blocks_free() as u64,
            f_bavail: fs.blocks_available() as u64,
            f_files: fs.files() as u64,
            f_ffree: fs.files_free() as u64,
            f_favail: fs.files_available() as u64,
            f_flag: fs.flags().bits() as u64,
            f_namemax: fs.name_max() as u64,
        }
        .into())
    }

    fn flush(&self, args: &Args) -> Result<Value> {
        self.backing(args, false)?;
        Ok(Value::None)
    }

    fn release(&self, args: &Args) -> Result<Value> {
        debug!("release {}", args.path()?);
        Ok(Value::None)
    }

    fn fsync(&self, args: &Args) -> Result<Value> {
        let file = self.backing(args, false)?;
        if args.int::<i32>(1)? != 0 {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(Value::None)
    }

    fn access(&self, args: &Args) -> Result<Value> {
        let mask = AccessFlags::from_bits_truncate(args.int(1)?);
        nix::unistd::access(&self.real(args, 0)?, mask)?;
        Ok(Value::None)
    }
}

enum Backing<'a> {
    Session(&'a File),
    Path(File),
}

impl Deref for Backing<'_> {
    type Target = File;

    fn deref(&self) -> &File {
        match self {
            Backing::Session(file) => *file,
            Backing::Path(file) => file,
        }
    }
}

fn open_file(args: &Args) -> Result<&OpenFile> {
    Ok(args
        .handle()
        .and_then(|h| h.downcast_ref::<OpenFile>())
        .ok_or(EBADF)?)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        fusebridge::{
            Session,
            loopback::{Client, Loopback, Statfs, VecFiller},
            native::{FileInfo, NativeTimespec},
        },
        nix::libc::{O_RDONLY, O_RDWR, O_WRONLY, S_IFDIR, S_IFLNK, S_IFREG},
        std::{io::Write, os::unix::fs::MetadataExt},
    };

    fn mirror<F>(root: &Path, script: F)
    where
        F: FnOnce(&Client) -> Result<()> + Send + 'static,
    {
        mirror_at(root, ApiVersion::CURRENT, script)
    }

    fn mirror_at<F>(root: &Path, version: ApiVersion, script: F)
    where
        F: FnOnce(&Client) -> Result<()> + Send + 'static,
    {
        let mut daemon = Loopback::new(script);
        Session::builder()
            .handlers(Mirror::new(root).handlers())
            .mount_args(["xmpfs", "/mnt"])
            .api_version(version)
            .build()
            .unwrap()
            .run(&mut daemon)
            .unwrap();
    }

    #[test]
    fn lists_and_stats_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::File::create(dir.path().join("a.txt"))
            .unwrap()
            .write_all(b"hello")
            .unwrap();

        mirror(dir.path(), |c| {
            let mut names = c.list("/")?;
            names.sort();
            assert_eq!(names, vec![".", "..", "a.txt", "sub"]);

            let st = c.getattr("/a.txt")?;
            assert_eq!(st.st_mode & nix::libc::S_IFMT, S_IFREG);
            assert_eq!(st.st_size, 5);
            assert_eq!(c.getattr("/sub")?.st_mode & nix::libc::S_IFMT, S_IFDIR);
            assert_eq!(c.getattr("/nope"), Err(ENOENT));
            Ok(())
        });
    }

    #[test]
    fn root_is_its_own_parent() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let root_ino = fs::metadata(dir.path()).unwrap().ino();

        mirror(dir.path(), move |c| {
            let fi = FileInfo::default();
            let mut filler = VecFiller::default();
            c.readdir("/", 0, &fi, &mut filler)?;
            let inos: Vec<_> = filler.entries.iter().map(|(n, st, _)| (n.clone(), st.st_ino)).collect();
            assert_eq!(inos[0], (".".to_owned(), root_ino));
            assert_eq!(inos[1], ("..".to_owned(), root_ino));

            let mut filler = VecFiller::default();
            c.readdir("/sub", 0, &fi, &mut filler)?;
            assert_eq!(filler.entries[1].1.st_ino, root_ino);
            Ok(())
        });
    }

    #[test]
    fn statfs_reports_the_export() {
        let dir = tempfile::tempdir().unwrap();
        let namemax = nix::sys::statvfs::statvfs(dir.path()).unwrap().name_max() as u64;

        mirror(dir.path(), move |c| {
            match c.statfs("/")? {
                Statfs::Vfs(st) => {
                    assert!(st.f_bsize > 0);
                    assert_eq!(st.f_namemax, namemax);
                }
                other => panic!("unexpected {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn reads_and_writes_through_open_files() {
        let dir = tempfile::tempdir().unwrap();

        mirror(dir.path(), |c| {
            let mut fi = c.create("/f", O_WRONLY, 0o644)?;
            assert_eq!(c.write("/f", b"0123456789", 0, &fi)?, 10);
            c.fsync("/f", false, &fi)?;
            c.release("/f", &mut fi)?;

            let mut fi = c.open("/f", O_RDONLY)?;
            assert_eq!(c.read("/f", 4, 3, &fi)?, b"3456");
            assert_eq!(c.read("/f", 16, 8, &fi)?, b"89");
            assert_eq!(c.fgetattr("/f", &fi)?.st_size, 10);
            c.flush("/f", &fi)?;
            c.release("/f", &mut fi)?;

            // a descriptor without a session
            assert_eq!(c.read("/f", 1, 0, &fi), Err(EBADF));
            Ok(())
        });

        assert_eq!(fs::read(dir.path().join("f")).unwrap(), b"0123456789");
    }

    #[test]
    fn namespace_operations() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        mirror(dir.path(), |c| {
            c.mkdir("/d", 0o755)?;
            let fi = c.create("/d/f", O_RDWR, 0o600)?;
            c.ftruncate("/d/f", 3, &fi)?;

            c.rename("/d/f", "/d/g")?;
            c.link("/d/g", "/h")?;
            c.symlink("d/g", "/l")?;
            assert_eq!(c.readlink("/l")?, "d/g");
            assert_eq!(c.getattr("/l")?.st_mode & nix::libc::S_IFMT, S_IFLNK);
            assert_eq!(c.getattr("/h")?.st_nlink, 2);

            c.chmod("/h", 0o640)?;
            assert_eq!(c.getattr("/d/g")?.st_mode & 0o777, 0o640);
            c.truncate("/h", 1)?;
            assert_eq!(c.getattr("/d/g")?.st_size, 1);

            assert_eq!(c.rmdir("/d"), Err(ENOTEMPTY));
            c.unlink("/d/g")?;
            c.rmdir("/d")?;
            c.unlink("/l")?;
            Ok(())
        });

        assert!(root.join("h").exists());
        assert!(!root.join("d").exists());
    }

    #[test]
    fn times_and_access() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), b"x").unwrap();

        mirror(dir.path(), |c| {
            let ts = [
                NativeTimespec {
                    tv_sec: 1000,
                    tv_nsec: 0,
                },
                NativeTimespec {
                    tv_sec: 2000,
                    tv_nsec: 0,
                },
            ];
            c.utimens("/f", &ts)?;
            let st = c.getattr("/f")?;
            assert_eq!((st.st_atime, st.st_mtime), (1000, 2000));

            c.access("/f", nix::libc::F_OK)?;
            assert_eq!(c.access("/missing", nix::libc::F_OK), Err(ENOENT));

            match c.statfs("/")? {
                Statfs::Vfs(st) => assert!(st.f_bsize > 0),
                other => panic!("unexpected {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn oldest_revision_works_by_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), b"abcdef").unwrap();

        mirror_at(dir.path(), ApiVersion::OLDEST, |c| {
            let mut fi = c.open("/f", O_RDWR)?;
            assert_eq!(fi.fh, 0);
            assert_eq!(c.write("/f", b"XY", 2, &fi)?, 2);
            assert_eq!(c.read("/f", 16, 0, &fi)?, b"abXYef");
            c.release("/f", &mut fi)?;

            let names = c.list("/")?;
            assert!(names.contains(&"f".to_owned()));
            assert!(matches!(c.statfs("/")?, Statfs::Legacy(_)));
            Ok(())
        });
    }
}
