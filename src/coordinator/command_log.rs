//! Command log
//!
//! Append-only record of every committed write plan, replayed on startup to
//! rebuild the metadata state.
//! Entry format: [MAGIC][INDEX][LEN][PAYLOAD][CRC32], payload is a bincode `Plan`.
//!
//! Indexes start at 1 and are contiguous. A torn or corrupt tail, as left by a
//! crash mid-append, is cut off when the log is opened. An append that fails
//! in-process is cut off immediately, so later entries never land behind
//! a partial frame.

use crate::common::{crc32, Error, LogSyncPolicy, Result};
use crate::coordinator::plan::Plan;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

const LOG_MAGIC: [u8; 4] = [0x54, 0x4D, 0x4C, 0x31]; // "TML1"
const HEADER_LEN: u64 = 4 + 8 + 4;
const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub plan: Plan,
}

pub struct CommandLog {
    path: PathBuf,
    file: File,
    /// Bytes covered by intact entries
    valid_len: u64,
    next_index: u64,
    sync_policy: LogSyncPolicy,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl CommandLog {
    /// Open or create the log, returning it with every intact entry in order.
    pub fn open(path: impl AsRef<Path>, sync_policy: LogSyncPolicy) -> Result<(Self, Vec<LogEntry>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (entries, valid_len) = Self::read_all(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                "command log {} has {} trailing bytes after index {}, truncating",
                path.display(),
                file_len - valid_len,
                entries.last().map(|e| e.index).unwrap_or(0)
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let next_index = entries.last().map(|e| e.index + 1).unwrap_or(1);
        Ok((
            Self {
                path,
                file,
                valid_len,
                next_index,
                sync_policy,
                poisoned: false,
                #[cfg(test)]
                fail_after: None,
            },
            entries,
        ))
    }

    /// Read every intact entry; also returns the byte length they cover.
    fn read_all(path: &Path) -> Result<(Vec<LogEntry>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut entries: Vec<LogEntry> = Vec::new();
        let mut offset = 0u64;

        loop {
            match Self::read_frame(&mut reader) {
                Ok(Some((index, payload))) => {
                    let expected = entries.last().map(|e| e.index + 1).unwrap_or(1);
                    if index != expected {
                        return Err(Error::Log(format!(
                            "index gap in {}: expected {}, found {}",
                            path.display(),
                            expected,
                            index
                        )));
                    }
                    let plan: Plan = bincode::deserialize(&payload)?;
                    offset += HEADER_LEN + payload.len() as u64 + 4;
                    entries.push(LogEntry { index, plan });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("command log read stopped at offset {}: {}", offset, e);
                    break;
                }
            }
        }

        Ok((entries, offset))
    }

    /// One checksummed frame, or `None` on a clean end of file
    fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(u64, Vec<u8>)>> {
        let mut magic = [0u8; 4];
        match reader.read_exact(&mut magic) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        if magic != LOG_MAGIC {
            return Err(Error::Log("invalid entry magic".into()));
        }

        let mut index_bytes = [0u8; 8];
        reader.read_exact(&mut index_bytes)?;
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_PAYLOAD_LEN {
            return Err(Error::Log(format!("entry length {} exceeds limit", len)));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;

        let mut checksum_data = Vec::with_capacity(12 + payload.len());
        checksum_data.extend_from_slice(&index_bytes);
        checksum_data.extend_from_slice(&len_bytes);
        checksum_data.extend_from_slice(&payload);
        if crc32(&checksum_data) != u32::from_le_bytes(checksum_bytes) {
            return Err(Error::Log("checksum mismatch".into()));
        }

        Ok(Some((u64::from_le_bytes(index_bytes), payload)))
    }

    /// Append a plan, returning its index.
    pub fn append(&mut self, plan: &Plan) -> Result<u64> {
        if self.poisoned {
            return Err(Error::Log(format!(
                "command log {} holds a partial entry and refuses appends",
                self.path.display()
            )));
        }
        let payload = bincode::serialize(plan)?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|l| *l <= MAX_PAYLOAD_LEN)
            .ok_or_else(|| Error::InvalidPlan(format!("plan encodes to {} bytes", payload.len())))?;

        let index = self.next_index;
        let index_bytes = index.to_le_bytes();
        let len_bytes = len.to_le_bytes();

        let mut checksum_data = Vec::with_capacity(12 + payload.len());
        checksum_data.extend_from_slice(&index_bytes);
        checksum_data.extend_from_slice(&len_bytes);
        checksum_data.extend_from_slice(&payload);
        let checksum = crc32(&checksum_data);

        let mut frame = Vec::with_capacity(HEADER_LEN as usize + payload.len() + 4);
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&index_bytes);
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&checksum.to_le_bytes());

        if let Err(e) = self.write_frame(&frame) {
            self.rollback(index);
            return Err(e.into());
        }

        self.valid_len += frame.len() as u64;
        self.next_index += 1;
        Ok(index)
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        if let Some(n) = self.fail_after.take() {
            self.file.write_all(&frame[..n.min(frame.len())])?;
            return Err(std::io::Error::other("injected write failure"));
        }
        self.file.write_all(frame)?;
        if self.sync_policy == LogSyncPolicy::Always {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut the file back to the last intact entry after a failed append.
    fn rollback(&mut self, index: u64) {
        let restored = self
            .file
            .set_len(self.valid_len)
            .and_then(|_| self.file.sync_data());
        match restored {
            Ok(()) => tracing::warn!(
                "append of index {} to {} failed, truncated back to {} bytes",
                index,
                self.path.display(),
                self.valid_len
            ),
            Err(e) => {
                tracing::error!(
                    "append of index {} to {} failed and could not be rolled back: {}",
                    index,
                    self.path.display(),
                    e
                );
                self.poisoned = true;
            }
        }
    }

    /// Index the next append will receive
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ttl_plan(ttl_ms: i64) -> Plan {
        Plan::SetTtl {
            name: "root.sg1".into(),
            ttl_ms,
        }
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commands.log");

        {
            let (mut log, entries) = CommandLog::open(&path, LogSyncPolicy::Always).unwrap();
            assert!(entries.is_empty());
            assert_eq!(log.append(&ttl_plan(1)).unwrap(), 1);
            assert_eq!(log.append(&ttl_plan(2)).unwrap(), 2);
        }

        let (mut log, entries) = CommandLog::open(&path, LogSyncPolicy::Never).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].index, 2);
        assert_eq!(entries[1].plan, ttl_plan(2));
        assert_eq!(log.next_index(), 3);
        assert_eq!(log.append(&ttl_plan(3)).unwrap(), 3);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commands.log");

        {
            let (mut log, _) = CommandLog::open(&path, LogSyncPolicy::Always).unwrap();
            log.append(&ttl_plan(1)).unwrap();
            log.append(&ttl_plan(2)).unwrap();
        }
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 3).unwrap();
        drop(file);

        let (mut log, entries) = CommandLog::open(&path, LogSyncPolicy::Always).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(log.append(&ttl_plan(9)).unwrap(), 2);
        drop(log);

        let (_, entries) = CommandLog::open(&path, LogSyncPolicy::Always).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].plan, ttl_plan(9));
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commands.log");

        {
            let (mut log, _) = CommandLog::open(&path, LogSyncPolicy::Always).unwrap();
            log.append(&ttl_plan(1)).unwrap();
            let intact = std::fs::metadata(&path).unwrap().len();

            log.fail_after = Some(10);
            assert!(log.append(&ttl_plan(2)).is_err());
            assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
            assert_eq!(log.next_index(), 2);

            assert_eq!(log.append(&ttl_plan(3)).unwrap(), 2);
        }

        let (log, entries) = CommandLog::open(&path, LogSyncPolicy::Always).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].index, 2);
        assert_eq!(entries[1].plan, ttl_plan(3));
        assert_eq!(log.next_index(), 3);
    }

    #[test]
    fn test_poisoned_log_refuses_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commands.log");
        let (mut log, _) = CommandLog::open(&path, LogSyncPolicy::Never).unwrap();
        log.poisoned = true;
        assert!(matches!(log.append(&ttl_plan(1)), Err(Error::Log(_))));
    }

    #[test]
    fn test_corrupt_checksum_stops_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commands.log");

        {
            let (mut log, _) = CommandLog::open(&path, LogSyncPolicy::Always).unwrap();
            log.append(&ttl_plan(1)).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let (log, entries) = CommandLog::open(&path, LogSyncPolicy::Always).unwrap();
        assert!(entries.is_empty());
        assert_eq!(log.next_index(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
