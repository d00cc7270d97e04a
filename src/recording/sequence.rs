//! Multi-file recordings: an `.mwrm` index chaining several `.wrm` files.
//!
//! Index layout:
//! ```text
//! 800 600
//! 0
//!
//! /var/rec/session-000000.wrm 1352304810 1352304870
//! /var/rec/session-000001.wrm 1352304870 1352304930
//! ```
//! Screen size, a flags line, a blank separator, then one line per file
//! with its first and last chunk time in epoch seconds.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Errors from reading a sequence index or advancing through its files.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed sequence index line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
    #[error("no more data in sequence")]
    NoMoreData,
}

/// One recording file listed in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceEntry {
    pub path: PathBuf,
    pub begin: u64,
    pub end: u64,
}

/// Parsed `.mwrm` index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceIndex {
    pub width: u16,
    pub height: u16,
    pub flags: u32,
    pub entries: Vec<SequenceEntry>,
}

impl SequenceIndex {
    /// Parse index text. Paths are taken as written.
    pub fn parse(text: &str) -> Result<Self, SequenceError> {
        let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim_end()));

        let (n, header) = lines.next().ok_or(SequenceError::Malformed {
            line: 1,
            reason: "missing screen size",
        })?;
        let mut dims = header.split_whitespace().map(str::parse::<u16>);
        let (Some(Ok(width)), Some(Ok(height))) = (dims.next(), dims.next()) else {
            return Err(SequenceError::Malformed {
                line: n,
                reason: "expected \"<width> <height>\"",
            });
        };

        let (n, flags_line) = lines.next().ok_or(SequenceError::Malformed {
            line: 2,
            reason: "missing flags line",
        })?;
        let flags = flags_line
            .trim()
            .parse()
            .map_err(|_| SequenceError::Malformed {
                line: n,
                reason: "flags are not a number",
            })?;

        match lines.next() {
            Some((_, "")) | None => {}
            Some((n, _)) => {
                return Err(SequenceError::Malformed {
                    line: n,
                    reason: "expected blank separator",
                });
            }
        }

        let mut entries = Vec::new();
        for (n, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_entry(line).ok_or(SequenceError::Malformed {
                line: n,
                reason: "expected \"<path> <begin> <end>\"",
            })?);
        }

        Ok(Self {
            width,
            height,
            flags,
            entries,
        })
    }
}

/// Path may contain spaces; the two times are the last fields.
fn parse_entry(line: &str) -> Option<SequenceEntry> {
    let (rest, end) = line.rsplit_once(' ')?;
    let (path, begin) = rest.trim_end().rsplit_once(' ')?;
    let path = path.trim_end();
    if path.is_empty() {
        return None;
    }
    Some(SequenceEntry {
        path: PathBuf::from(path),
        begin: begin.parse().ok()?,
        end: end.trim().parse().ok()?,
    })
}

/// Reads the files of an `.mwrm` index back to back as one byte stream.
///
/// Usage:
/// ```ignore
/// let sequence = MetaSequenceReader::open("session.mwrm")?;
/// let mut player = Player::open(sequence, PlayerConfig::default())?;
/// ```
pub struct MetaSequenceReader {
    index: SequenceIndex,
    base: PathBuf,
    seqno: usize,
    current: Option<BufReader<File>>,
    /// Failure held back until the bytes read before it are delivered.
    pending: Option<SequenceError>,
}

impl MetaSequenceReader {
    /// Read and parse an index file. No recording file is opened yet.
    pub fn open<P: AsRef<Path>>(index_path: P) -> Result<Self, SequenceError> {
        let index_path = index_path.as_ref();
        let text = fs::read_to_string(index_path)?;
        let base = index_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self::with_index(SequenceIndex::parse(&text)?, base))
    }

    /// Chain the files of an already parsed index; `base` is where missing
    /// files are looked up.
    pub fn with_index(index: SequenceIndex, base: PathBuf) -> Self {
        log::debug!(
            "sequence of {} files, {}x{}",
            index.entries.len(),
            index.width,
            index.height
        );
        Self {
            index,
            base,
            seqno: 0,
            current: None,
            pending: None,
        }
    }

    pub fn index(&self) -> &SequenceIndex {
        &self.index
    }

    /// Number of files opened so far.
    pub fn seqno(&self) -> usize {
        self.seqno
    }

    fn entry(&self) -> Option<&SequenceEntry> {
        self.seqno.checked_sub(1).and_then(|i| self.index.entries.get(i))
    }

    /// Path of the current file as listed in the index.
    pub fn path(&self) -> Option<&Path> {
        self.entry().map(|e| e.path.as_path())
    }

    /// First chunk time of the current file, epoch seconds.
    pub fn begin_chunk_time(&self) -> Option<u64> {
        self.entry().map(|e| e.begin)
    }

    /// Last chunk time of the current file, epoch seconds.
    pub fn end_chunk_time(&self) -> Option<u64> {
        self.entry().map(|e| e.end)
    }

    /// Where `path` is found: as written, else in the index directory.
    fn locate(&self, path: &Path) -> PathBuf {
        if path.exists() {
            return path.to_path_buf();
        }
        match path.file_name() {
            Some(name) => {
                let relocated = self.base.join(name);
                log::debug!("relocating {} to {}", path.display(), relocated.display());
                relocated
            }
            None => path.to_path_buf(),
        }
    }

    /// Open the next file of the sequence.
    pub fn next(&mut self) -> Result<(), SequenceError> {
        let Some(entry) = self.index.entries.get(self.seqno) else {
            self.current = None;
            return Err(SequenceError::NoMoreData);
        };
        let path = self.locate(&entry.path);
        log::info!("opening sequence file {} ({})", self.seqno + 1, path.display());
        self.current = Some(BufReader::new(File::open(&path)?));
        self.seqno += 1;
        Ok(())
    }

    /// Fill `buf` from the chain; fewer bytes only at the end of the sequence.
    ///
    /// A failure after some bytes were copied returns those bytes first and
    /// the error on the following call.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SequenceError> {
        if let Some(e) = self.pending.take() {
            return Err(e);
        }
        let mut filled = 0;
        while filled < buf.len() {
            match self.fill(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if filled == 0 => return Err(e),
                Err(e) => {
                    self.pending = Some(e);
                    break;
                }
            }
        }
        Ok(filled)
    }

    /// One read from the current file, opening the next one as needed.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, SequenceError> {
        loop {
            if self.current.is_none() {
                match self.next() {
                    Ok(()) => {}
                    Err(SequenceError::NoMoreData) => return Ok(0),
                    Err(e) => return Err(e),
                }
            }
            let Some(file) = self.current.as_mut() else {
                return Ok(0);
            };
            match file.read(buf)? {
                0 => self.current = None,
                n => return Ok(n),
            }
        }
    }
}

impl Read for MetaSequenceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf).map_err(|e| match e {
            SequenceError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const INDEX: &str = "800 600\n0\n\n\
        ./fixtures/sample0.wrm 1352304810 1352304870\n\
        ./fixtures/sample1.wrm 1352304870 1352304930\n\
        ./fixtures/sample2.wrm 1352304930 1352304990\n";

    /// Three files of distinct sizes next to an index listing them by
    /// paths that do not exist.
    fn fixture(dir: &Path) -> (PathBuf, Vec<u8>) {
        let mut all = Vec::new();
        for (i, len) in [14_713usize, 4_445, 2_902].into_iter().enumerate() {
            let bytes: Vec<u8> = (0..len).map(|b| (b * (i + 3)) as u8).collect();
            let mut f = File::create(dir.join(format!("sample{}.wrm", i))).unwrap();
            f.write_all(&bytes).unwrap();
            all.extend(bytes);
        }
        let index = dir.join("sample.mwrm");
        fs::write(&index, INDEX).unwrap();
        (index, all)
    }

    #[test]
    fn test_parse_index() {
        let index = SequenceIndex::parse(INDEX).unwrap();
        assert_eq!((index.width, index.height, index.flags), (800, 600, 0));
        assert_eq!(index.entries.len(), 3);
        assert_eq!(index.entries[1].path, PathBuf::from("./fixtures/sample1.wrm"));
        assert_eq!(index.entries[2].begin, 1_352_304_930);
        assert_eq!(index.entries[2].end, 1_352_304_990);
    }

    #[test]
    fn test_parse_path_with_spaces() {
        let index = SequenceIndex::parse("1024 768\n0\n\n/tmp/my rec.wrm 10 20\n").unwrap();
        assert_eq!(index.entries[0].path, PathBuf::from("/tmp/my rec.wrm"));
        assert_eq!(index.entries[0].end, 20);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            SequenceIndex::parse("800\n0\n\n"),
            Err(SequenceError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            SequenceIndex::parse("800 600\n0\nnot blank\n"),
            Err(SequenceError::Malformed { line: 3, .. })
        ));
        assert!(matches!(
            SequenceIndex::parse("800 600\n0\n\nfile.wrm 12\n"),
            Err(SequenceError::Malformed { line: 4, .. })
        ));
    }

    #[test]
    fn test_advance_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _) = fixture(dir.path());
        let mut seq = MetaSequenceReader::open(&index).unwrap();
        assert_eq!(seq.seqno(), 0);
        assert_eq!(seq.path(), None);

        seq.next().unwrap();
        assert_eq!(seq.path(), Some(Path::new("./fixtures/sample0.wrm")));
        assert_eq!(seq.begin_chunk_time(), Some(1_352_304_810));
        assert_eq!(seq.end_chunk_time(), Some(1_352_304_870));
        assert_eq!(seq.seqno(), 1);

        seq.next().unwrap();
        seq.next().unwrap();
        assert_eq!(seq.begin_chunk_time(), Some(1_352_304_930));
        assert_eq!(seq.seqno(), 3);
        assert!(matches!(seq.next(), Err(SequenceError::NoMoreData)));
    }

    #[test]
    fn test_fixed_size_reads_cover_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let (index, all) = fixture(dir.path());
        let mut seq = MetaSequenceReader::open(&index).unwrap();
        let mut buf = [0u8; 1000];
        let mut received = Vec::new();
        for _ in 0..221 {
            let n = seq.recv(&mut buf).unwrap();
            received.extend_from_slice(&buf[..n]);
            if n < buf.len() {
                break;
            }
        }
        assert_eq!(received.len(), 14_713 + 4_445 + 2_902);
        assert_eq!(received, all);
        assert_eq!(seq.recv(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_sequence_plays_as_one_recording() {
        use crate::recording::{Consumer, OrderCounter, Player, RecorderConfig, WrmRecorder};
        use crate::schema::PlayerConfig;

        let dir = tempfile::tempdir().unwrap();
        let mut lines = String::from("800 600\n0\n\n");
        for part in 0..2u64 {
            let begin = 1_352_304_810 + part * 60;
            let mut rec = WrmRecorder::new(Vec::new(), RecorderConfig::default()).unwrap();
            rec.timestamp(begin * 1_000_000, None).unwrap();
            rec.timestamp((begin + 60) * 1_000_000, None).unwrap();
            let path = dir.path().join(format!("part{}.wrm", part));
            fs::write(&path, rec.finish().unwrap().0).unwrap();
            lines.push_str(&format!("part{}.wrm {} {}\n", part, begin, begin + 60));
        }
        let index = dir.path().join("parts.mwrm");
        fs::write(&index, lines).unwrap();

        let mut counter = OrderCounter::default();
        let mut player = Player::open(
            MetaSequenceReader::open(&index).unwrap(),
            PlayerConfig::default(),
        )
        .unwrap();
        player.add_consumer(Consumer::device(&mut counter)).unwrap();
        let stats = player.play().unwrap();
        assert_eq!(stats.first_timestamp, Some(1_352_304_810_000_000));
        assert_eq!(stats.last_timestamp, Some(1_352_304_930_000_000));
        drop(player);
        assert_eq!(counter.count("external_breakpoint"), 1);
    }

    #[test]
    fn test_partial_read_delivered_before_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("first.wrm"), b"abcdef").unwrap();
        let index = dir.path().join("split.mwrm");
        fs::write(
            &index,
            "800 600\n0\n\nfirst.wrm 1 2\n/nowhere/gone.wrm 2 3\n",
        )
        .unwrap();
        let mut seq = MetaSequenceReader::open(&index).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(seq.recv(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"abcdef");
        assert!(matches!(seq.recv(&mut buf), Err(SequenceError::Io(_))));
        assert_eq!(seq.seqno(), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("broken.mwrm");
        fs::write(&index, "800 600\n0\n\n/nowhere/gone.wrm 1 2\n").unwrap();
        let mut seq = MetaSequenceReader::open(&index).unwrap();
        assert!(matches!(seq.next(), Err(SequenceError::Io(_))));
    }
}
