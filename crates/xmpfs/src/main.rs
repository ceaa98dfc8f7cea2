use {
    clap::Parser,
    fusebridge::{
        ApiVersion, Session,
        loopback::{Client, Loopback, Statfs},
        *,
    },
    nix::libc::{O_RDONLY, O_WRONLY},
    std::{fs, path::PathBuf},
};

mod mirror;
mod utils;

use crate::mirror::Mirror;

#[derive(Debug, clap::Parser)]
struct Cli {
    /// Directory to mirror
    rootdir: PathBuf,

    /// Let the daemon dispatch requests from several threads
    #[arg(long)]
    multithreaded: bool,

    /// Protocol revision to register with (21-28)
    #[arg(long)]
    api_version: Option<ApiVersion>,

    #[command(subcommand)]
    command: Command,
}

/// Requests replayed through the loopback daemon.
#[derive(Debug, clap::Subcommand)]
enum Command {
    /// List a directory
    Ls { path: String },
    /// Print the attributes of a file
    Stat { path: String },
    /// Print the contents of a file
    Cat { path: String },
    /// Write a string to a file, creating it if needed
    Put { path: String, data: String },
    Mkdir { path: String },
    Rm { path: String },
    /// Print filesystem statistics
    Df,
}

fn replay(c: &Client, command: Command) -> fusebridge::Result<()> {
    match command {
        Command::Ls { path } => {
            for name in c.list(&path)? {
                println!("{name}");
            }
        }
        Command::Stat { path } => {
            let st = c.getattr(&path)?;
            println!(
                "mode {:o} ino {} nlink {} uid {} gid {} size {} blocks {}",
                st.st_mode, st.st_ino, st.st_nlink, st.st_uid, st.st_gid, st.st_size, st.st_blocks
            );
        }
        Command::Cat { path } => {
            let mut fi = c.open(&path, O_RDONLY)?;
            let mut offset = 0;
            loop {
                let data = c.read(&path, 64 * 1024, offset, &fi)?;
                if data.is_empty() {
                    break;
                }
                offset += data.len() as i64;
                print!("{}", String::from_utf8_lossy(&data));
            }
            c.release(&path, &mut fi)?;
        }
        Command::Put { path, data } => {
            let mut fi = c.create(&path, O_WRONLY | nix::libc::O_TRUNC, 0o644)?;
            let count = c.write(&path, data.as_bytes(), 0, &fi)?;
            c.release(&path, &mut fi)?;
            println!("{count} bytes written");
        }
        Command::Mkdir { path } => c.mkdir(&path, 0o755)?,
        Command::Rm { path } => c.unlink(&path)?,
        Command::Df => match c.statfs("/")? {
            Statfs::Vfs(st) => println!(
                "bsize {} blocks {} free {} avail {} files {} namemax {}",
                st.f_bsize, st.f_blocks, st.f_bfree, st.f_bavail, st.f_files, st.f_namemax
            ),
            Statfs::Legacy(st) => println!(
                "bsize {} blocks {} free {} avail {} files {} namelen {}",
                st.f_bsize, st.f_blocks, st.f_bfree, st.f_bavail, st.f_files, st.f_namelen
            ),
        },
    }
    Ok(())
}

fn xmpfs_main(
    Cli {
        rootdir,
        multithreaded,
        api_version,
        command,
    }: Cli,
) -> fusebridge::Result<i32> {
    if !fs::metadata(&rootdir)?.is_dir() {
        return res!(io_err!(Other, "root must be a directory"));
    }

    let mut builder = Session::builder()
        .handlers(Mirror::new(&rootdir).handlers())
        .mount_args(["xmpfs".to_owned(), rootdir.to_string_lossy().into_owned()])
        .multithreaded(multithreaded);
    if let Some(v) = api_version {
        builder = builder.api_version(v);
    }

    let mut daemon = Loopback::new(move |c| replay(c, command));
    builder.build()?.run(&mut daemon).and(Ok(0))
}

fn main() {
    env_logger::init();

    let exit_code = xmpfs_main(Cli::parse()).unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        -1
    });

    std::process::exit(exit_code);
}
