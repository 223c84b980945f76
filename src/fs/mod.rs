//! The tiny DOS filesystem the game binaries see.
//!
//! Three namespaces multiplex on the file name: the single writable save
//! slot, the in-memory joystick configuration, and the read-only packed
//! game data. There are no directories and no metadata, just names.

use ascii::AsciiStr;

use crate::game::{JoyFile, SavedGame, CHIP_SAVE_SIZE};

/// Name the game binaries use for the save slot.
pub const SAVE_FILE_NAME: &str = "savefile";

/// Name of the joystick configuration record.
pub const JOYFILE_NAME: &str = "joyfile.joy";

pub const MAX_OPEN_FILES: usize = 16;
pub const MAX_FILESIZE: usize = 0x10000;

/// One entry in the packed game-data archive index.
pub struct ArchiveEntry {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

/// The read-only game files, stored zstd-compressed and decoded in one shot
/// the first time anything is opened.
pub struct GameArchive {
    index: Vec<ArchiveEntry>,
    packed: Vec<u8>,
    unpacked_size: usize,
    unpacked: Option<Vec<u8>>,
}

impl GameArchive {
    /// An archive with no files, for hosts that only run the lab from a
    /// save, and for tests.
    pub fn empty() -> GameArchive {
        GameArchive {
            index: Vec::new(),
            packed: Vec::new(),
            unpacked_size: 0,
            unpacked: None,
        }
    }

    pub fn new(index: Vec<ArchiveEntry>, packed: Vec<u8>, unpacked_size: usize) -> GameArchive {
        GameArchive {
            index,
            packed,
            unpacked_size,
            unpacked: None,
        }
    }

    /// Build an uncompressed archive from loose files. Test scaffolding;
    /// shipping data arrives packed.
    pub fn from_files(files: Vec<(&'static str, Vec<u8>)>) -> GameArchive {
        let mut index = Vec::new();
        let mut data = Vec::new();
        for (name, bytes) in files {
            index.push(ArchiveEntry {
                name,
                offset: data.len(),
                size: bytes.len(),
            });
            data.extend_from_slice(&bytes);
        }
        let size = data.len();
        GameArchive {
            index,
            packed: Vec::new(),
            unpacked_size: size,
            unpacked: Some(data),
        }
    }

    /// Case-insensitive lookup, decoding the archive on first access.
    pub fn lookup(&mut self, name: &str) -> Option<(usize, usize)> {
        let name = AsciiStr::from_ascii(name).ok()?;
        let entry = self
            .index
            .iter()
            .find(|e| match AsciiStr::from_ascii(e.name) {
                Ok(e_name) => e_name.eq_ignore_ascii_case(name),
                Err(_) => false,
            })?;
        Some((entry.offset, entry.size))
    }

    pub fn data(&mut self) -> &[u8] {
        if self.unpacked.is_none() {
            let unpacked = zstd::bulk::decompress(&self.packed, self.unpacked_size)
                .expect("corrupt game data archive");
            assert!(unpacked.len() == self.unpacked_size, "archive size mismatch");
            self.unpacked = Some(unpacked);
        }
        self.unpacked.as_deref().unwrap()
    }

    /// The decoded bytes of one file by name, if present.
    pub fn file(&mut self, name: &str) -> Option<&[u8]> {
        let (offset, size) = self.lookup(name)?;
        Some(&self.data()[offset..offset + size])
    }
}

/// The single writable save slot.
pub struct SaveFile {
    buffer: Box<[u8; MAX_FILESIZE]>,
    size: usize,
    open_for_write: bool,
}

impl SaveFile {
    fn new() -> SaveFile {
        SaveFile {
            buffer: vec![0u8; MAX_FILESIZE].into_boxed_slice().try_into().unwrap(),
            size: 0,
            open_for_write: false,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    pub fn set_bytes(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() || bytes.len() > MAX_FILESIZE {
            return false;
        }
        self.buffer[..bytes.len()].copy_from_slice(bytes);
        self.size = bytes.len();
        true
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// A saved game has exactly the dump size; anything else isn't one.
    pub fn is_game(&self) -> bool {
        self.size == SavedGame::SIZE
    }

    /// A saved chip is its own smaller format.
    pub fn is_chip(&self) -> bool {
        self.size == CHIP_SAVE_SIZE
    }

    pub fn as_game(&self) -> Option<SavedGame<'_>> {
        SavedGame::new(self.bytes())
    }

    /// Raw access for the compressed-save path, which decodes straight into
    /// the slot.
    pub(crate) fn raw_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Target {
    Save,
    Config,
    Game { offset: usize, size: usize },
}

#[derive(Copy, Clone)]
struct OpenFile {
    target: Target,
    offset: usize,
}

/// Filesystem state: the archive, the save slot, the config record, and a
/// small table of open descriptors.
pub struct Filesystem {
    pub archive: GameArchive,
    pub save: SaveFile,
    pub config: JoyFile,
    open_files: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl Filesystem {
    pub fn new(archive: GameArchive) -> Filesystem {
        Filesystem {
            archive,
            save: SaveFile::new(),
            config: JoyFile::new(),
            open_files: [None; MAX_OPEN_FILES],
        }
    }

    /// Drop every open descriptor. Runs on each exec; DOS closes a dying
    /// process's files the same way.
    pub fn reset(&mut self) {
        self.open_files = [None; MAX_OPEN_FILES];
    }

    /// Open a file for reading. Returns a descriptor, or `None` for an
    /// unknown name, which the facade reports as a DOS error.
    pub fn open(&mut self, name: &str) -> Option<u16> {
        log::debug!("file open '{}'", name);

        let target = if name == SAVE_FILE_NAME {
            self.save.open_for_write = false;
            Target::Save
        } else if name == JOYFILE_NAME {
            Target::Config
        } else {
            match self.archive.lookup(name) {
                Some((offset, size)) => Target::Game { offset, size },
                None => {
                    log::warn!("failed to open file '{}'", name);
                    return None;
                }
            }
        };

        Some(self.allocate(target))
    }

    /// Create a file for writing. Only the save slot may be created.
    pub fn create(&mut self, name: &str) -> Option<u16> {
        log::debug!("file create '{}'", name);

        if name != SAVE_FILE_NAME {
            log::warn!("refusing to open '{}' for writing", name);
            return None;
        }

        self.save.size = 0;
        self.save.open_for_write = true;
        Some(self.allocate(Target::Save))
    }

    /// Close a descriptor. Returns true when this was the save slot being
    /// written, so the facade can tell the host a fresh save exists.
    pub fn close(&mut self, fd: u16) -> bool {
        let slot = self
            .open_files
            .get_mut(fd as usize)
            .expect("closing an invalid file descriptor");
        let file = slot.take().expect("closing a file which is not open");

        file.target == Target::Save && self.save.open_for_write
    }

    /// Read up to `dest.len()` bytes. Short reads at end of file are
    /// silent, matching DOS.
    pub fn read(&mut self, fd: u16, dest: &mut [u8]) -> usize {
        let file = self.open_files[fd as usize]
            .as_mut()
            .expect("reading a file which is not open");

        let (data, offset): (&[u8], usize) = match file.target {
            Target::Save => (&self.save.buffer[..self.save.size], file.offset),
            Target::Config => (self.config.as_bytes(), file.offset),
            Target::Game { offset, size } => (&self.archive.data()[offset..offset + size], file.offset),
        };

        let n = dest.len().min(data.len().saturating_sub(offset));
        dest[..n].copy_from_slice(&data[offset..offset + n]);
        file.offset += n;

        log::debug!("file read {}({}) bytes at {}", dest.len(), n, offset);
        n
    }

    /// Write bytes to a descriptor. Anything but the save slot is a
    /// filesystem contract violation.
    pub fn write(&mut self, fd: u16, src: &[u8]) -> usize {
        let file = self.open_files[fd as usize]
            .as_mut()
            .expect("writing a file which is not open");

        assert!(
            file.target == Target::Save,
            "writing a file that isn't the saved game file"
        );

        let offset = file.offset.min(MAX_FILESIZE);
        let n = src.len().min(MAX_FILESIZE - offset);
        self.save.buffer[offset..offset + n].copy_from_slice(&src[..n]);

        file.offset = offset + n;
        self.save.size = file.offset;

        log::debug!("file write {}({}) bytes at {}", src.len(), n, offset);
        n
    }

    fn allocate(&mut self, target: Target) -> u16 {
        let fd = self
            .open_files
            .iter()
            .position(|f| f.is_none())
            .expect("too many open files");
        self.open_files[fd] = Some(OpenFile { target, offset: 0 });
        fd as u16
    }
}
