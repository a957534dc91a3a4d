//! Command line front-end for dirstore maintenance, bulk import/export,
//! verify and index rebuild over a configured store.

use structopt::StructOpt;

use std::{ffi, fs, io, path, process};

use dirstore::{Backend, BackendConfig, Dn, ImportConfig, ImportMode, IndexKind, Result};

#[derive(StructOpt)]
#[structopt(name = "dirstore")]
struct Opt {
    /// Backend configuration, TOML.
    #[structopt(short = "c", long = "config")]
    config: ffi::OsString,

    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(StructOpt)]
enum Cmd {
    /// Bulk load entries from an LDIF file.
    Import {
        /// Clear existing contents before loading.
        #[structopt(long = "replace", conflicts_with = "overwrite")]
        replace: bool,
        /// Overwrite entries already present instead of rejecting them.
        #[structopt(long = "overwrite")]
        overwrite: bool,
        /// Worker threads, defaults to the cpu count.
        #[structopt(long = "threads")]
        threads: Option<usize>,
        /// LDIF file to load.
        file: ffi::OsString,
    },
    /// Export every entry as LDIF.
    Export {
        /// Export only this branch, everything when omitted.
        #[structopt(long = "branch")]
        branch: Option<String>,
        /// Output file, stdout when omitted.
        file: Option<ffi::OsString>,
    },
    /// Cross-check primary mappings and indexes.
    Verify,
    /// Regenerate one attribute index.
    Rebuild {
        /// Base DN of the container.
        base: String,
        /// Attribute name.
        attr: String,
        /// Index kind, equality, presence, substring, ordering or
        /// approximate.
        kind: String,
    },
}

fn main() {
    env_logger::init();

    let opts = Opt::from_args();
    if let Err(err) = run(opts) {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn run(opts: Opt) -> Result<()> {
    let config = BackendConfig::from_file(path::Path::new(&opts.config))?;
    let backend = Backend::open(config)?;

    let res = match opts.cmd {
        Cmd::Import {
            replace,
            overwrite,
            threads,
            file,
        } => cmd_import(&backend, replace, overwrite, threads, &file),
        Cmd::Export { branch, file } => cmd_export(&backend, branch.as_deref(), file.as_deref()),
        Cmd::Verify => cmd_verify(&backend),
        Cmd::Rebuild { base, attr, kind } => cmd_rebuild(&backend, &base, &attr, &kind),
    };
    backend.close()?;
    res
}

fn cmd_import(
    backend: &Backend,
    replace: bool,
    overwrite: bool,
    threads: Option<usize>,
    file: &ffi::OsStr,
) -> Result<()> {
    let mut config = ImportConfig::default();
    if replace {
        config.set_mode(ImportMode::Replace);
    } else if overwrite {
        config.set_mode(ImportMode::Overwrite);
    }
    if let Some(threads) = threads {
        config.set_threads(threads);
    }

    let fd = match fs::File::open(file) {
        Ok(fd) => fd,
        Err(err) => {
            eprintln!("cannot open {:?}: {}", file, err);
            process::exit(1);
        }
    };
    let report = backend.import_ldif(&config, io::BufReader::new(fd))?;
    println!("{}", report);
    Ok(())
}

fn cmd_export(backend: &Backend, branch: Option<&str>, file: Option<&ffi::OsStr>) -> Result<()> {
    let branch = match branch {
        Some(branch) => Some(branch.parse::<Dn>()?),
        None => None,
    };
    let n = match file {
        Some(file) => {
            let fd = match fs::File::create(file) {
                Ok(fd) => fd,
                Err(err) => {
                    eprintln!("cannot create {:?}: {}", file, err);
                    process::exit(1);
                }
            };
            export_to(backend, branch.as_ref(), io::BufWriter::new(fd))?
        }
        None => export_to(backend, branch.as_ref(), io::stdout().lock())?,
    };
    eprintln!("exported {} entries", n);
    Ok(())
}

fn export_to<W: io::Write>(backend: &Backend, branch: Option<&Dn>, sink: W) -> Result<usize> {
    match branch {
        Some(branch) => backend.export_branch(branch, sink),
        None => backend.export_ldif(sink),
    }
}

fn cmd_verify(backend: &Backend) -> Result<()> {
    let report = backend.verify()?;
    println!("checked {} entries, {} errors", report.checked, report.errors);
    if report.errors > 0 {
        process::exit(2);
    }
    Ok(())
}

fn cmd_rebuild(backend: &Backend, base: &str, attr: &str, kind: &str) -> Result<()> {
    let base: Dn = base.parse()?;
    let kind: IndexKind = kind.parse()?;
    let n = backend.rebuild_index(&base, attr, kind)?;
    println!("rebuilt {}.{}, {} entries", attr, kind, n);
    Ok(())
}
