use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::error::ScheduleError;
use crate::model::Event;

/// Frame one event as `len | payload | crc`, all little-endian.
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

/// On-disk history of calendar events.
///
/// Each record is a `u32` payload length, the bincode-encoded [`Event`],
/// then a `u32` CRC-32 of the payload. A record cut short by a crash fails
/// either the length read or the checksum and is dropped on replay.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    /// Opens `path` for appending, creating it if missing.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Queue `event` in the write buffer; `flush_sync` makes it durable.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Push buffered records to the file and fsync it.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write `events` to `<path>.tmp` and fsync, then rename it over the
    /// journal and reopen for appends.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for event in events {
                encode_event(&mut writer, event)?;
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

    /// Read every valid event from disk. Missing file means no events;
    /// a truncated or corrupt tail ends the replay.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        let mut len_buf = [0u8; 4];
        while fill(&mut reader, &mut len_buf)? {
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            let mut crc_buf = [0u8; 4];
            if !fill(&mut reader, &mut payload)? || !fill(&mut reader, &mut crc_buf)? {
                tracing::warn!(path = %path.display(), "journal ends in a partial record");
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), "journal entry failed checksum, stopping replay");
                break;
            }
            let Ok(event) = bincode::deserialize::<Event>(&payload) else {
                break;
            };
            events.push(event);
        }

        Ok(events)
    }
}

/// `read_exact`, except that running out of input yields `Ok(false)`.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

// ── Group-commit writer ──────────────────────────────────────

pub(crate) enum JournalCommand {
    Append(Event),
    Flush {
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Cloneable handle used by calendar managers to enqueue events.
///
/// `append` is a plain in-memory channel send, so it is safe to call while
/// holding a calendar lock: the fsync happens later on the writer task.
#[derive(Clone)]
pub struct JournalHandle {
    tx: mpsc::UnboundedSender<JournalCommand>,
}

impl JournalHandle {
    /// Spawn the writer task for `journal`. Must be called inside a tokio runtime.
    pub fn spawn(journal: Journal) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(journal, rx));
        Self { tx }
    }

    pub fn append(&self, event: Event) -> Result<(), ScheduleError> {
        self.tx
            .send(JournalCommand::Append(event))
            .map_err(|_| ScheduleError::Journal("journal writer shut down".into()))
    }

    /// Enqueue a command while the caller still holds whatever lock orders it.
    pub(crate) fn send(&self, cmd: JournalCommand) -> Result<(), ScheduleError> {
        self.tx
            .send(cmd)
            .map_err(|_| ScheduleError::Journal("journal writer shut down".into()))
    }

    /// Resolve once every event appended before this call is on disk.
    pub async fn flush(&self) -> Result<(), ScheduleError> {
        let (response, rx) = oneshot::channel();
        self.send(JournalCommand::Flush { response })?;
        await_io(rx).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self.send(JournalCommand::AppendsSinceCompact { response }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

pub(crate) async fn await_io(rx: oneshot::Receiver<io::Result<()>>) -> Result<(), ScheduleError> {
    rx.await
        .map_err(|_| ScheduleError::Journal("journal writer dropped response".into()))?
        .map_err(|e| ScheduleError::Journal(e.to_string()))
}

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until a command arrives.
/// 2. Buffer it and every immediately available append.
/// 3. Single flush_sync for the whole batch.
/// 4. Run the non-append command that ended the batch, if any.
///
/// A write error is remembered and reported to the next `Flush`.
async fn writer_loop(mut journal: Journal, mut rx: mpsc::UnboundedReceiver<JournalCommand>) {
    let mut pending_err: Option<io::Error> = None;
    while let Some(cmd) = rx.recv().await {
        let mut next = Some(cmd);
        let mut batch = 0usize;
        loop {
            match next.take() {
                Some(JournalCommand::Append(event)) => {
                    if let Err(e) = journal.append_buffered(&event) {
                        tracing::error!("journal append failed: {e}");
                        pending_err.get_or_insert(e);
                    }
                    batch += 1;
                    next = rx.try_recv().ok();
                }
                other => {
                    next = other;
                    break;
                }
            }
        }

        if batch > 0 {
            metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch as f64);
            let flush_start = std::time::Instant::now();
            if let Err(e) = journal.flush_sync() {
                tracing::error!("journal fsync failed: {e}");
                pending_err.get_or_insert(e);
            }
            metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
                .record(flush_start.elapsed().as_secs_f64());
        }

        match next {
            Some(JournalCommand::Flush { response }) => {
                let result = match pending_err.take() {
                    Some(e) => Err(e),
                    None => journal.flush_sync(),
                };
                let _ = response.send(result);
            }
            Some(JournalCommand::Compact { events, response }) => {
                let result = journal.compact(&events);
                if let Err(ref e) = result {
                    tracing::error!(path = %journal.path().display(), "journal compaction failed: {e}");
                }
                let _ = response.send(result);
            }
            Some(JournalCommand::AppendsSinceCompact { response }) => {
                let _ = response.send(journal.appends_since_compact());
            }
            Some(JournalCommand::Append(_)) | None => {}
        }
    }
}
