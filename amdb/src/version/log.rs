use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use fs4::FileExt;

use crate::error::{CResult, Error};

use super::KeyDir;

const TOMBSTONE_FLAG: u8 = 0b0000_0001;

/// An append-only log of versioned entries, encoded as:
///
/// - Key length as big-endian u32.
/// - Key as raw bytes.
/// - Value length as big-endian i32, or -1 for tombstones.
/// - Value as raw bytes.
/// - Version as big-endian u64.
/// - Flags as a single byte (bit 0 set means tombstone).
pub struct VersionedLog {
    pub(crate) path: PathBuf,
    pub(crate) file: std::fs::File,
}

impl VersionedLog {
    pub fn new(path: PathBuf) -> CResult<Self> {
        Self::new_with_lock(path, true)
    }

    pub fn new_with_lock(path: PathBuf, try_lock: bool) -> CResult<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|err| Error::Internal(format!("{err}: {:?}", dir.to_str())))?;
        }

        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        if try_lock {
            file.try_lock_exclusive()?;
        }

        Ok(Self { path, file })
    }

    /// Replays the log from the start to rebuild the in-memory index. An
    /// incomplete entry at the end of the file (a crash mid-write) is
    /// treated as the tail of the log and the file is truncated to drop it.
    pub fn build_keydir(&mut self) -> CResult<(KeyDir, u64)> {
        let mut len_buf = [0u8; 4];
        let mut keydir = KeyDir::new();
        let mut max_version = 0u64;
        let file_len = self.file.metadata()?.len();
        let mut r = BufReader::new(&mut self.file);
        let mut pos = r.seek(SeekFrom::Start(0))?;

        while pos < file_len {
            let mut read_entry = || -> Result<(Vec<u8>, u64, Option<u32>, u64), std::io::Error> {
                r.read_exact(&mut len_buf)?;
                let key_len = u32::from_be_bytes(len_buf);
                let mut key = vec![0; key_len as usize];
                r.read_exact(&mut key)?;

                r.read_exact(&mut len_buf)?;
                let value_len_or_tombstone = match i32::from_be_bytes(len_buf) {
                    l if l >= 0 => Some(l as u32),
                    _ => None,
                };
                let value_pos = pos + 4 + key_len as u64 + 4;

                let value_len = value_len_or_tombstone.unwrap_or(0);
                if value_pos + value_len as u64 + 8 + 1 > file_len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "entry extends beyond end of file",
                    ));
                }
                r.seek_relative(value_len as i64)?;

                let mut version_buf = [0u8; 8];
                r.read_exact(&mut version_buf)?;
                let version = u64::from_be_bytes(version_buf);

                let mut flags_buf = [0u8; 1];
                r.read_exact(&mut flags_buf)?;

                Ok((key, value_pos, value_len_or_tombstone, version))
            };

            match read_entry() {
                Ok((key, value_pos, Some(value_len), version)) => {
                    keydir.insert(key, (value_pos, value_len, version));
                    max_version = max_version.max(version);
                    pos = value_pos + value_len as u64 + 8 + 1;
                }
                Ok((key, value_pos, None, version)) => {
                    keydir.remove(&key);
                    max_version = max_version.max(version);
                    pos = value_pos + 8 + 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::error!("found incomplete entry at offset {pos}, truncating file");
                    self.file.set_len(pos)?;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok((keydir, max_version))
    }

    pub fn read_value(&mut self, value_pos: u64, value_len: u32) -> CResult<Vec<u8>> {
        let mut value = vec![0; value_len as usize];
        self.file.seek(SeekFrom::Start(value_pos))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }

    /// Appends one entry and returns `(value_pos, value_len)` for the keydir.
    pub fn write_entry(
        &mut self,
        key: &[u8],
        value: Option<&[u8]>,
        version: u64,
    ) -> CResult<(u64, u32)> {
        let key_len = key.len() as u32;
        let value_len = value.map_or(0, |v| v.len() as u32);
        let value_len_or_tombstone = value.map_or(-1, |v| v.len() as i32);
        let flags = if value.is_none() { TOMBSTONE_FLAG } else { 0 };
        let total_len = 4 + key_len + 4 + value_len + 8 + 1;

        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut w = BufWriter::with_capacity(total_len as usize, &mut self.file);
        w.write_all(&key_len.to_be_bytes())?;
        w.write_all(key)?;
        w.write_all(&value_len_or_tombstone.to_be_bytes())?;
        if let Some(value) = value {
            w.write_all(value)?;
        }
        w.write_all(&version.to_be_bytes())?;
        w.write_all(&[flags])?;
        w.flush()?;

        let value_pos = pos + 4 + key_len as u64 + 4;
        Ok((value_pos, value_len))
    }
}
