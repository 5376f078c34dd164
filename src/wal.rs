use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Largest payload a single entry may declare. Anything bigger is a corrupt
/// length prefix, not an event.
const MAX_ENTRY_LEN: u64 = 16 * 1024 * 1024;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the log ended (cleanly or torn).
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of replaying the log from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Length of the prefix made of valid entries.
    pub valid_len: u64,
    /// Bytes after the last valid entry were ignored (crash mid-append or corruption).
    pub discarded_tail: bool,
}

/// Append-only write-ahead log for rooms, reservations and restrictions.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`.
/// A booking is a single entry, so a torn write can only lose the whole
/// booking, never half of it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    /// Buffered since the last successful `flush_sync`.
    pending: u64,
    appends_since_compact: u64,
}

fn open_append(path: &Path) -> io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((BufWriter::new(file), len))
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let (writer, committed_len) = open_append(path)?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            committed_len,
            pending: 0,
            appends_since_compact: 0,
        })
    }

    /// Cut the file at `path` back to its first `valid_len` bytes. Run before
    /// `open` when replay discarded a tail, or new entries would land behind
    /// bytes the next replay stops at.
    pub fn discard_tail(path: &Path, valid_len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing. `flush_sync()` commits the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.pending += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact += self.pending;
        self.pending = 0;
        Ok(())
    }

    /// Drop everything written or buffered since the last successful
    /// `flush_sync`, so entries whose callers were told they failed never
    /// reach a replay.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.pending = 0;
        let (fresh, _) = open_append(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, fresh);
        // into_parts hands back the unwritten buffer instead of flushing it.
        let _ = stale.into_parts();
        Self::discard_tail(&self.path, self.committed_len)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a snapshot of events to `<path>.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let (writer, committed_len) = open_append(&self.path)?;
        self.writer = writer;
        self.committed_len = committed_len;
        self.pending = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Replay every valid entry. Replay stops at the first truncated or
    /// corrupt entry; nothing after it is trusted.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        let mut consumed: u64 = 0;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as u64;
            if len > MAX_ENTRY_LEN || len + 8 > total_len - consumed {
                break;
            }

            let mut payload = vec![0u8; len as usize];
            if !read_frame_part(&mut reader, &mut payload)? {
                break;
            }

            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => break,
            }
            consumed += 8 + len;
        }

        replay.valid_len = consumed;
        replay.discarded_tail = consumed < total_len;
        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{NaiveDate, Utc};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomkeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room(id: RoomId) -> Event {
        Event::RoomCreated {
            room: Room {
                id,
                name: format!("Room {id}"),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    fn block(id: RestrictionId, room_id: RoomId) -> Event {
        let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        Event::RoomBlocked {
            restriction: RoomRestriction {
                id,
                room_id,
                kind: RestrictionKind::OwnerBlock,
                reservation_id: None,
                stay: Stay::new(start, start.succ_opt().unwrap()),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![room(1), block(1, 1)];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_discards_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = room(1);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap(); // partial length + some bytes
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event.clone()]);
        assert!(replay.discarded_tail);

        Wal::discard_tail(&path, replay.valid_len).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), replay.valid_len);
        let next = room(2);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&next).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event, next]);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn oversized_length_prefix_is_a_torn_tail() {
        let path = tmp_path("huge_len.wal");
        let event = room(1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[7u8; 32]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event]);
        assert!(replay.discarded_tail);
    }

    #[test]
    fn rollback_drops_unsynced_batch() {
        let path = tmp_path("rollback.wal");
        let kept = room(1);
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        // Bytes that reached the file but whose batch was reported failed.
        wal.append_buffered(&block(1, 1)).unwrap();
        wal.writer.flush().unwrap();
        // And bytes still sitting in the buffer.
        wal.append_buffered(&block(2, 1)).unwrap();
        wal.rollback().unwrap();
        assert_eq!(wal.appends_since_compact(), 1);

        let next = block(3, 1);
        wal.append(&next).unwrap();
        drop(wal);

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![kept, next]);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let good = room(1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&room(2)).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![good]);
        assert!(replay.discarded_tail);
    }

    #[test]
    fn compact_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&room(1)).unwrap();
        for i in 0..10 {
            wal.append(&block(i, 1)).unwrap();
            wal.append(&Event::BlockRemoved { id: i, room_id: 1 }).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 21);
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![room(1)];
        wal.compact(&snapshot).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should be smaller: {after} < {before}");

        let next = block(50, 1);
        wal.append(&next).unwrap();
        drop(wal);

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![snapshot[0].clone(), next]);
    }

    #[test]
    fn buffered_appends_visible_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (1..=5).map(room).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap().events, events);
    }
}
