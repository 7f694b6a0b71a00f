use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Commit;

/// Larger length prefixes can only come from a corrupt frame.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Frame a commit as `[u32 len][bincode payload][u32 crc32]`.
fn write_frame(writer: &mut impl Write, commit: &Commit) -> io::Result<()> {
    let payload =
        bincode::serialize(commit).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "commit too large for one frame"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read the next frame and its size on disk. `Ok(None)` means end of log,
/// including a torn or corrupt tail left behind by a crash mid-write.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Commit, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Commit>(&payload)
        .ok()
        .map(|commit| (commit, (len + 8) as u64)))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Where frames end up. A plain `File` outside tests.
pub(crate) trait LogFile: Write + Send {
    fn sync(&mut self) -> io::Result<()>;

    /// Cut the log back to `len` bytes. Later writes land at the new end.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only write-ahead log of committed transactions.
///
/// One frame per commit, so a transaction is either fully replayed or, if
/// its frame was torn by a crash, dropped along with everything after it.
///
/// Frames are staged in memory and reach the file only in `flush_sync`. A
/// failed flush cuts the file back to its last synced length, so a commit
/// reported as failed can never surface on replay. If that cut itself fails
/// the log is poisoned and refuses writes until reopened.
pub struct Wal {
    file: Box<dyn LogFile>,
    pending: Vec<u8>,
    pending_frames: u64,
    synced_len: u64,
    poisoned: bool,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::with_file(path, Box::new(file), len))
    }

    fn with_file(path: &Path, file: Box<dyn LogFile>, synced_len: u64) -> Self {
        Self {
            file,
            pending: Vec::new(),
            pending_frames: 0,
            synced_len,
            poisoned: false,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        }
    }

    /// Append and fsync a single commit.
    #[cfg(test)]
    pub fn append(&mut self, commit: &Commit) -> io::Result<()> {
        self.append_buffered(commit)?;
        self.flush_sync()
    }

    /// Stage a commit without writing it. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, commit: &Commit) -> io::Result<()> {
        self.check_poisoned()?;
        write_frame(&mut self.pending, commit)?;
        self.pending_frames += 1;
        Ok(())
    }

    /// Write and fsync everything staged. On failure the staged frames are
    /// discarded and the file is cut back to the last synced length.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        let result = self.file.write_all(&self.pending).and_then(|()| self.file.sync());
        let written = self.pending.len() as u64;
        let frames = std::mem::take(&mut self.pending_frames);
        self.pending.clear();
        match result {
            Ok(()) => {
                self.synced_len += written;
                self.appends_since_compact += frames;
                Ok(())
            }
            Err(e) => {
                self.roll_back();
                Err(e)
            }
        }
    }

    fn roll_back(&mut self) {
        match self.file.truncate(self.synced_len) {
            Ok(()) => tracing::warn!(
                path = %self.path.display(),
                len = self.synced_len,
                "rolled WAL back after failed write"
            ),
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    "cannot roll WAL back, refusing further writes: {e}"
                );
                self.poisoned = true;
            }
        }
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "WAL poisoned by an earlier write failure; reopen to recover",
            ));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as `snapshot` alone: write a temp file, fsync, rename over.
    /// Also clears a poisoned log, since the snapshot replaces its contents.
    pub fn compact(&mut self, snapshot: &Commit) -> io::Result<()> {
        if !self.poisoned {
            self.flush_sync()?;
        }
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            write_frame(&mut writer, snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        // The old handle now points at an unlinked file.
        let reopened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|file| Ok((file.metadata()?.len(), file)));
        let (len, file) = match reopened {
            Ok(opened) => opened,
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        };
        self.file = Box::new(file);
        self.synced_len = len;
        self.poisoned = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every intact commit from disk, oldest first.
    #[cfg(test)]
    pub fn replay(path: &Path) -> io::Result<Vec<Commit>> {
        Ok(Self::scan(path)?.0)
    }

    /// Replay, then cut off any damaged tail so later appends land directly
    /// after the last intact frame.
    pub fn recover(path: &Path) -> io::Result<Vec<Commit>> {
        let (commits, intact) = Self::scan(path)?;
        match fs::metadata(path) {
            Ok(meta) if meta.len() > intact => {
                tracing::warn!(
                    path = %path.display(),
                    discarded = meta.len() - intact,
                    "truncating damaged WAL tail"
                );
                OpenOptions::new().write(true).open(path)?.set_len(intact)?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(commits)
    }

    /// Intact commits plus the byte length they occupy.
    fn scan(path: &Path) -> io::Result<(Vec<Commit>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut commits = Vec::new();
        let mut intact = 0;
        while let Some((commit, size)) = read_frame(&mut reader)? {
            commits.push(commit);
            intact += size;
        }
        Ok((commits, intact))
    }
}
