use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// No legitimate record comes close; a larger length prefix means the
/// frame header itself is damaged.
const MAX_RECORD_LEN: usize = 64 * 1024;

/// Bytes around the payload: length prefix and trailing CRC.
const FRAME_OVERHEAD: u64 = 8;

/// Frame one event as `[u32 len][bincode][u32 crc32]`, little endian.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// `Ok(false)` when the stream ends before `buf` is full.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record, or `None` at end of file or at the first torn or
/// corrupt frame.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len as u64 + FRAME_OVERHEAD)))
}

/// What a full read of a WAL file found.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Bytes past the intact prefix, left by a crash mid-write or by damage.
    pub discarded: u64,
}

/// Append-only write-ahead log of [`Event`]s.
///
/// Every record is framed by its length and a CRC of the payload, so a torn
/// final write is detected on the next start and cut off before new records
/// are appended behind it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Replay `path`, cut off any damaged tail, and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        if replay.discarded > 0 {
            warn!(
                "{}: dropping {} damaged bytes after offset {}",
                path.display(),
                replay.discarded,
                replay.valid_len
            );
            OpenOptions::new()
                .write(true)
                .open(path)?
                .set_len(replay.valid_len)?;
        }
        Ok((Self::open(path)?, replay.events))
    }

    /// Append and fsync one event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `events` to a side file next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact record from the start of `path`. A missing file is
    /// an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        while let Some((event, size)) = read_record(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += size;
        }
        replay.discarded = total.saturating_sub(replay.valid_len);
        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("labdesk_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn lab_created(id: Ulid, name: &str) -> Event {
        Event::LaboratoryCreated {
            id,
            name: name.into(),
            code: name.to_uppercase(),
        }
    }

    fn reservation(laboratory_id: Ulid, hour: u32) -> Event {
        let d = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        Event::ReservationCreated {
            id: Ulid::new(),
            laboratory_id,
            owner: "ana".into(),
            span: Span::new(
                d.and_hms_opt(hour, 0, 0).unwrap(),
                d.and_hms_opt(hour + 1, 0, 0).unwrap(),
            ),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let lab = Ulid::new();
        let events = vec![lab_created(lab, "chem"), reservation(lab, 10)];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap().events;
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = lab_created(Ulid::new(), "chem");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Partial second entry, as left by a crash mid-write
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event]);
        assert_eq!(replay.discarded, 6);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        let replayed = Wal::replay(&path).unwrap().events;
        assert!(replayed.is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let event = Event::LaboratoryDeleted { id: Ulid::new() };

        {
            let payload = bincode::serialize(&event).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;

            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap().events;
        assert!(replayed.is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_wal() {
        let path = tmp_path("compact_reduce.wal");
        let _ = fs::remove_file(&path);

        let lab = Ulid::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&lab_created(lab, "chem")).unwrap();
            for hour in 8..18 {
                let booked = reservation(lab, hour);
                wal.append(&booked).unwrap();
                if let Event::ReservationCreated { id, .. } = &booked {
                    wal.append(&Event::ReservationCancelled { id: *id, laboratory_id: lab })
                        .unwrap();
                }
            }
        }

        let before = fs::metadata(&path).unwrap().len();
        let compacted = vec![lab_created(lab, "chem")];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
        }
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        assert_eq!(Wal::replay(&path).unwrap().events, compacted);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let lab = Ulid::new();
        let compacted = vec![lab_created(lab, "chem")];
        let new_event = reservation(lab, 14);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&compacted[0]).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&new_event).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap().events;
        assert_eq!(replayed, vec![compacted[0].clone(), new_event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let lab = Ulid::new();
        let events: Vec<Event> = (8..13).map(|h| reservation(lab, h)).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap().events, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_cuts_torn_tail_before_appending() {
        let path = tmp_path("recover_tail.wal");
        let _ = fs::remove_file(&path);

        let lab = Ulid::new();
        let first = lab_created(lab, "chem");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 11]).unwrap();
        }

        let later = reservation(lab, 9);
        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![first.clone()]);
            wal.append(&later).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![first, later]);
        assert_eq!(replay.discarded, 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn oversized_length_prefix_is_corruption() {
        let path = tmp_path("oversized.wal");
        let _ = fs::remove_file(&path);

        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.valid_len, 0);
        assert_eq!(replay.discarded, 20);

        let _ = fs::remove_file(&path);
    }
}
