//! Module implement common utility functions and types.

use cbordata::{Cbor, FromCbor, IntoCbor};

use std::{ffi, fs, path};

use crate::{Error, Result};

pub mod spinlock;
pub mod thread;

pub use spinlock::Spinlock;
pub use thread::Thread;

/// Helper function to serialize value `T` implementing IntoCbor, into
/// byte-string.
pub fn into_cbor_bytes<T>(val: T) -> Result<Vec<u8>>
where
    T: IntoCbor,
{
    let mut data: Vec<u8> = vec![];
    let n = err_at!(
        FailCbor,
        err_at!(FailCbor, val.into_cbor())?.encode(&mut data)
    )?;
    if n != data.len() {
        err_at!(Fatal, msg: "cbor encoding len mismatch {} {}", n, data.len())
    } else {
        Ok(data)
    }
}

/// Helper function to deserialize value `T` implementing FromCbor, from
/// byte-string. Return (value, bytes-consumed).
pub fn from_cbor_bytes<T>(mut data: &[u8]) -> Result<(T, usize)>
where
    T: FromCbor,
{
    let (val, n) = err_at!(FailCbor, Cbor::decode(&mut data))?;
    Ok((err_at!(FailCbor, T::from_cbor(val))?, n))
}

/// Create a file under `dir`, in write mode, truncating any existing file.
pub fn create_file_w(dir: &ffi::OsStr, name: &str) -> Result<fs::File> {
    let loc: path::PathBuf = [dir.to_os_string(), name.into()].iter().collect();
    let mut opts = fs::OpenOptions::new();
    err_at!(
        IOError,
        opts.create(true).write(true).truncate(true).open(&loc),
        "file {:?}", loc
    )
}

/// Open a file under `dir` in read mode.
pub fn open_file_r(dir: &ffi::OsStr, name: &str) -> Result<fs::File> {
    let loc: path::PathBuf = [dir.to_os_string(), name.into()].iter().collect();
    err_at!(IOError, fs::OpenOptions::new().read(true).open(&loc), "file {:?}", loc)
}
