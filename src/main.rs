//! `imgfs` keeps a miniature UNIX-style filesystem inside a single
//! image file and drives it through an interactive prompt.
//!
//! The image is opened (and created at full size if missing), probed
//! for a filesystem, formatted when none is recognized, then mounted.

use imgfs::device::Disk;
use imgfs::error::FsError;
use imgfs::fs::FileSystem;
use imgfs::layout::InodeKind;
use imgfs::util::ByteSize;
use std::env;
use std::fmt;
use std::io;
use std::io::BufRead;
use std::io::Write;
use std::path::PathBuf;
use std::process::exit;
use uuid::Uuid;

/// The default path of the image file.
const DEFAULT_IMAGE_PATH: &str = "disk.img";
/// The default number of blocks in the image.
const DEFAULT_TOTAL_BLOCKS: i32 = 1024;
/// The default block size in bytes.
const DEFAULT_BLOCK_SIZE: i32 = 512;
/// The default number of inode slots.
const DEFAULT_MAX_INODES: i32 = 128;

/// Structure storing command line arguments.
struct Args {
    /// The name of the current program used in command line.
    prog: String,
    /// If true, print command line help.
    help: bool,
    /// The path to the image file.
    image: PathBuf,
    /// The number of blocks in the image.
    total_blocks: i32,
    /// The block size in bytes.
    block_size: i32,
    /// The number of inode slots.
    max_inodes: i32,
}

fn parse_args() -> Args {
    let mut args = Args {
        prog: "imgfs".to_owned(),
        help: false,
        image: DEFAULT_IMAGE_PATH.into(),
        total_blocks: DEFAULT_TOTAL_BLOCKS,
        block_size: DEFAULT_BLOCK_SIZE,
        max_inodes: DEFAULT_MAX_INODES,
    };

    let mut iter = env::args();
    if let Some(prog) = iter.next() {
        args.prog = prog;
    }
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            "-b" | "--blocks" => args.total_blocks = parse_count(&args.prog, iter.next()),
            "-s" | "--block-size" => args.block_size = parse_count(&args.prog, iter.next()),
            "-i" | "--inodes" => args.max_inodes = parse_count(&args.prog, iter.next()),
            _ => args.image = arg.into(),
        }
    }
    args
}

fn parse_count(prog: &str, arg: Option<String>) -> i32 {
    arg.and_then(|s| s.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| {
            error(prog, "expected a positive number");
        })
}

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(prog: &str, msg: M) -> ! {
    eprintln!("{prog}: error: {msg}");
    exit(1);
}

/// Prints command help.
///
/// `prog` is the name of the current program.
fn print_help(prog: &str) {
    println!();
    println!("Usage:");
    println!(" {prog} [options] [image]");
    println!();
    println!("Opens the filesystem image (default `{DEFAULT_IMAGE_PATH}`), formatting it");
    println!("first when it does not contain a filesystem, and starts a shell on it.");
    println!();
    println!("Options:");
    println!(" -h, --help\t\tPrints help.");
    println!(" -b, --blocks <n>\tNumber of blocks in the image (default {DEFAULT_TOTAL_BLOCKS}).");
    println!(" -s, --block-size <n>\tBlock size in bytes (default {DEFAULT_BLOCK_SIZE}).");
    println!(" -i, --inodes <n>\tNumber of inode slots (default {DEFAULT_MAX_INODES}).");
}

fn print_commands() {
    println!("Commands:");
    println!(" ls [path]\t\tList a directory (default `/`).");
    println!(" mkdir <path>\t\tCreate a directory.");
    println!(" touch <path>\t\tCreate an empty file.");
    println!(" write <path> <text>\tWrite text to a file, creating it if needed.");
    println!(" cat <path>\t\tPrint a file's contents.");
    println!(" find <pattern>\t\tList paths whose name contains the pattern.");
    println!(" info\t\t\tShow volume information.");
    println!(" help\t\t\tShow this message.");
    println!(" exit\t\t\tFlush and quit.");
}

/// Shows a prompt and reads one line from stdin.
///
/// Returns `None` on end of input.
fn prompt(text: &str) -> Option<String> {
    print!("{text}");
    let _ = io::stdout().flush();
    io::stdin()
        .lock()
        .lines()
        .next()
        .map(|line| line.unwrap_or_default())
}

fn cmd_ls(fs: &mut FileSystem, path: &str) -> Result<(), FsError> {
    for entry in fs.list_directory_entries(path)? {
        if fs.is_directory_inode(entry.inode_index) {
            println!("{}/", entry.name());
        } else {
            println!("{}", entry.name());
        }
    }
    Ok(())
}

fn cmd_cat(fs: &mut FileSystem, path: &str) -> Result<(), FsError> {
    let fd = fs.open_file(path)?;
    let mut contents = Vec::new();
    let result = fs.read_file(fd, &mut contents);
    fs.close_file(fd)?;
    result?;
    print!("{}", String::from_utf8_lossy(&contents));
    Ok(())
}

fn cmd_write(fs: &mut FileSystem, path: &str, text: &str) -> Result<(), FsError> {
    let fd = match fs.open_file(path) {
        Err(FsError::NotFound(_)) => {
            fs.create_file(path)?;
            fs.open_file(path)?
        }
        fd => fd?,
    };
    let result = fs.write_file(fd, text.as_bytes());
    fs.close_file(fd)?;
    result
}

fn cmd_find(fs: &mut FileSystem, pattern: &str) -> Result<(), FsError> {
    for path in fs.search(pattern)? {
        println!("{path}");
    }
    Ok(())
}

fn cmd_info(fs: &FileSystem) {
    let superblock = fs.superblock();
    let total = superblock.total_blocks as u64 * superblock.block_size as u64;
    let used_inodes = fs
        .inode_table()
        .iter()
        .filter(|inode| inode.kind != InodeKind::Unused)
        .count();
    println!("Volume:      {}", Uuid::from_bytes(superblock.volume_id));
    println!(
        "Size:        {} ({} blocks of {} bytes)",
        ByteSize(total),
        superblock.total_blocks,
        superblock.block_size,
    );
    println!("Inodes:      {used_inodes} used / {}", fs.max_inodes());
    println!(
        "Free space:  {}",
        ByteSize(fs.free_block_count() as u64 * superblock.block_size as u64),
    );
    println!(
        "Data region: blocks {}..{}",
        superblock.data_region_start, superblock.total_blocks,
    );
}

/// Runs one shell command line. Returns `false` when the shell should
/// exit.
fn run_command(fs: &mut FileSystem, prog: &str, line: &str) -> bool {
    let line = line.trim();
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let result = match cmd {
        "" => Ok(()),
        "exit" | "quit" => return false,
        "help" => {
            print_commands();
            Ok(())
        }
        "info" => {
            cmd_info(fs);
            Ok(())
        }
        "ls" => cmd_ls(fs, if rest.is_empty() { "/" } else { rest }),
        "mkdir" if !rest.is_empty() => fs.create_directory(rest),
        "touch" if !rest.is_empty() => fs.create_file(rest),
        "cat" if !rest.is_empty() => cmd_cat(fs, rest),
        "find" if !rest.is_empty() => cmd_find(fs, rest),
        "write" if !rest.is_empty() => {
            let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            cmd_write(fs, path, text.trim_start())
        }
        "mkdir" | "touch" | "cat" | "find" | "write" => {
            eprintln!("{prog}: usage: {cmd} <path>");
            Ok(())
        }
        _ => {
            eprintln!("{prog}: unknown command `{cmd}` (try `help`)");
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("{prog}: {e}");
    }
    true
}

fn main() {
    env_logger::init();

    let args = parse_args();
    if args.help {
        print_help(&args.prog);
        exit(0);
    }

    let disk = Disk::open(&args.image, args.total_blocks, args.block_size).unwrap_or_else(|e| {
        error(&args.prog, format_args!("{}: {e}", args.image.display()));
    });
    let mut fs = FileSystem::new(disk, args.max_inodes);

    let present = fs.is_present().unwrap_or_else(|e| {
        error(&args.prog, format_args!("{}: {e}", args.image.display()));
    });
    if !present {
        println!("no filesystem on {}, formatting", args.image.display());
        fs.initialize().unwrap_or_else(|e| {
            error(&args.prog, format_args!("failed to format: {e}"));
        });
    }
    fs.mount().unwrap_or_else(|e| {
        error(&args.prog, format_args!("failed to mount: {e}"));
    });

    while let Some(line) = prompt("imgfs> ") {
        if !run_command(&mut fs, &args.prog, &line) {
            break;
        }
    }

    fs.close().unwrap_or_else(|e| {
        error(&args.prog, format_args!("failed to close image: {e}"));
    });
}
