//! Append-only journal backing the task channel.
//!
//! Records are stored as a little-endian `u32` length followed by the bincode
//! encoded record. Opening a journal replays it, returns the tasks that were
//! never settled, and rewrites the file so that it only holds those. While
//! running, the owner rewrites it the same way once enough settled records
//! have piled up.

use log::warn;
use serde::{Deserialize, Serialize};
use shared::TaskId;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A published task as the channel stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub correlation_id: TaskId,
    pub payload: Vec<u8>,
    /// Deliveries so far.
    pub attempts: u32,
}

impl Envelope {
    pub fn new(correlation_id: TaskId, payload: Vec<u8>) -> Self {
        Self {
            correlation_id,
            payload,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Record {
    Published(Envelope),
    Settled { correlation_id: TaskId },
    DeadLettered { correlation_id: TaskId },
}

/// Tasks found in a journal on open, in publish order.
#[derive(Debug, Default)]
pub struct Recovered {
    pub ready: Vec<Envelope>,
    pub dead_lettered: Vec<Envelope>,
}

/// Settled records tolerated before the journal asks to be compacted.
pub const DEFAULT_COMPACT_AFTER: usize = 1024;

pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    sync_writes: bool,
    compact_after: usize,
    /// Settled records appended since the file was last rewritten.
    settled: usize,
}

impl Journal {
    pub fn open(path: &Path, sync_writes: bool, compact_after: usize) -> io::Result<(Self, Recovered)> {
        let recovered = replay(read_records(path)?);
        compact(path, recovered.ready.iter(), &recovered.dead_lettered)?;

        let journal = Journal {
            path: path.to_path_buf(),
            writer: open_append(path)?,
            sync_writes,
            compact_after: compact_after.max(1),
            settled: 0,
        };
        Ok((journal, recovered))
    }

    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        write_record(&mut self.writer, record)?;
        self.writer.flush()?;
        if self.sync_writes {
            self.writer.get_ref().sync_data()?;
        }
        if let Record::Settled { .. } = record {
            self.settled += 1;
        }
        Ok(())
    }

    pub fn needs_compaction(&self) -> bool {
        self.settled >= self.compact_after
    }

    /// Replaces the file with one holding only `live` and `dead_lettered`.
    ///
    /// The caller must pass every task it has not settled yet, in the order
    /// they should be recovered.
    pub fn compact<'a>(
        &mut self,
        live: impl Iterator<Item = &'a Envelope>,
        dead_lettered: &'a [Envelope],
    ) -> io::Result<()> {
        self.writer.flush()?;
        compact(&self.path, live, dead_lettered)?;
        self.writer = open_append(&self.path)?;
        self.settled = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn write_record<W: Write>(writer: &mut W, record: &Record) -> io::Result<()> {
    let data =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&data)
}

fn read_records(path: &Path) -> io::Result<Vec<Record>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut records = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let Some(header) = bytes.get(offset..offset + 4) else {
            warn!("Ignoring torn record header at byte {} of {}", offset, path.display());
            break;
        };
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let start = offset + 4;
        let Some(body) = bytes.get(start..start + len) else {
            warn!("Ignoring torn record at byte {} of {}", offset, path.display());
            break;
        };
        match bincode::deserialize::<Record>(body) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Stopping replay of {} at byte {}: {}", path.display(), offset, e);
                break;
            }
        }
        offset = start + len;
    }
    Ok(records)
}

fn replay(records: Vec<Record>) -> Recovered {
    let mut settled = HashSet::new();
    let mut dead = HashSet::new();
    for record in &records {
        match record {
            Record::Settled { correlation_id } => {
                settled.insert(correlation_id.clone());
            }
            Record::DeadLettered { correlation_id } => {
                dead.insert(correlation_id.clone());
            }
            Record::Published(_) => {}
        }
    }

    let mut recovered = Recovered::default();
    for record in records {
        if let Record::Published(envelope) = record {
            if settled.contains(&envelope.correlation_id) {
                continue;
            }
            if dead.contains(&envelope.correlation_id) {
                recovered.dead_lettered.push(envelope);
            } else {
                recovered.ready.push(envelope);
            }
        }
    }
    recovered
}

fn compact<'a>(
    path: &Path,
    live: impl Iterator<Item = &'a Envelope>,
    dead_lettered: &'a [Envelope],
) -> io::Result<()> {
    let tmp = path.with_extension("compact");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        // Attempt counters are not carried across a rewrite.
        for envelope in live.chain(dead_lettered) {
            let fresh = Envelope::new(envelope.correlation_id.clone(), envelope.payload.clone());
            write_record(&mut writer, &Record::Published(fresh))?;
        }
        for envelope in dead_lettered {
            write_record(
                &mut writer,
                &Record::DeadLettered {
                    correlation_id: envelope.correlation_id.clone(),
                },
            )?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)
}
