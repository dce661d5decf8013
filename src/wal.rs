use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{EntityKind, Row};

/// One durable mutation. `Put` carries the full post-image of the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    Put(Row),
    Delete { kind: EntityKind, key: String },
}

/// Frame layout on disk: little-endian payload length, bincode payload,
/// little-endian CRC32 of the payload.
fn write_frame(out: &mut impl Write, record: &WalRecord) -> io::Result<()> {
    let body = bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut frame = Vec::with_capacity(body.len() + 8);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    out.write_all(&frame)
}

/// Outcome of reading one frame during replay.
enum Frame {
    Record(WalRecord),
    /// Clean end of file, or a torn write at the tail.
    End,
    /// Checksum or decode failure. Nothing after it is trusted.
    Corrupt(&'static str),
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn fill(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(input: &mut impl Read) -> io::Result<Frame> {
    let mut word = [0u8; 4];
    if !fill(input, &mut word)? {
        return Ok(Frame::End);
    }
    let mut body = vec![0u8; u32::from_le_bytes(word) as usize];
    if !fill(input, &mut body)? || !fill(input, &mut word)? {
        return Ok(Frame::End);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&body) {
        return Ok(Frame::Corrupt("checksum mismatch"));
    }
    Ok(match bincode::deserialize(&body) {
        Ok(record) => Frame::Record(record),
        Err(_) => Frame::Corrupt("undecodable record"),
    })
}

/// Append-only log of row mutations, one [`write_frame`] frame per record.
/// Every append is fsynced before it is acknowledged.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one record and fsync before returning.
    pub fn append(&mut self, record: &WalRecord) -> io::Result<()> {
        write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        self.flush_sync()
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log as exactly `records`: temp file, fsync, rename, reopen.
    pub fn compact(&mut self, records: &[WalRecord]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                write_frame(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact record in `path`, oldest first. A missing file is an
    /// empty log. Replay stops at the first torn or corrupt frame.
    pub fn replay(path: &Path) -> io::Result<Vec<WalRecord>> {
        let mut input = match File::open(path) {
            Ok(file) => BufReader::new(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        loop {
            match read_frame(&mut input)? {
                Frame::Record(record) => records.push(record),
                Frame::End => break,
                Frame::Corrupt(why) => {
                    tracing::warn!(path = %path.display(), kept = records.len(), why, "WAL replay stopped early");
                    break;
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Setting;
    use chrono::Utc;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("gymbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn setting(key: &str, value: &str) -> WalRecord {
        WalRecord::Put(Row::Setting(Setting {
            key: key.into(),
            value: value.into(),
            updated_at: Utc::now(),
        }))
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let records = vec![
            setting("gym_name", "Iron Temple"),
            WalRecord::Delete {
                kind: EntityKind::Settings,
                key: "slogan".into(),
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append(r).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }

        assert_eq!(Wal::replay(&path).unwrap(), records);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let record = setting("slogan", "lift heavy");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&record).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap(); // partial length + some bytes
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![record]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let payload = bincode::serialize(&setting("gym_name", "x")).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_keeps_records_before_bad_frame() {
        let path = tmp_path("bad_frame.wal");
        let first = setting("gym_name", "Iron Temple");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            // Valid checksum over bytes that are not a WalRecord
            let body = [0xFFu8; 3];
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&3u32.to_le_bytes()).unwrap();
            f.write_all(&body).unwrap();
            f.write_all(&crc32fast::hash(&body).to_le_bytes()).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&setting("slogan", "after")).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let mut wal = Wal::open(&path).unwrap();
        for i in 0..20 {
            wal.append(&setting("slogan", &format!("v{i}"))).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let live = vec![setting("slogan", "v19")];
        wal.compact(&live).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let extra = setting("gym_name", "Iron Temple");
        wal.append(&extra).unwrap();
        drop(wal);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], live[0]);
        assert_eq!(replayed[1], extra);
        let _ = fs::remove_file(&path);
    }
}
