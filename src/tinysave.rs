//! Compressed save files, small enough to share as links.
//!
//! A save buffer is mostly game data that also ships with the engine, so a
//! pre-shared dictionary built from the packed game files squeezes it down
//! by two orders of magnitude. The dictionary bytes are frozen: changing
//! them at all breaks every save in the wild, so any change must bump the
//! version byte at the front of the stream.

use crate::fs::{GameArchive, SaveFile, MAX_FILESIZE};

/// Version header on every compressed save. Only this one is supported.
pub const CURRENT_SAVE_VERSION: u8 = 0x11;

/// Compression level. CPU and memory versus space; can change freely
/// without breaking format compatibility.
const COMPRESSION_LEVEL: i32 = 18;

/// Game files concatenated into the dictionary, in order. Frozen.
const DICTIONARY_FILES: &[&str] = &[
    // Built-in loadable chips
    "4bitcntr.csv",
    "stereo.csv",
    "rsflop.csv",
    "oneshot.csv",
    "countton.csv",
    "adder.csv",
    "clock.csv",
    "delay.csv",
    "bus.csv",
    "wallhug.csv",
    // World overlays for the game
    "street.wld",
    "subway.wld",
    "town.wld",
    "comp.wld",
    // Chips used in the initial game world
    "countton.chp",
    "wallhug.chp",
    "countton.pin",
    "wallhug.pin",
    // Initial world for the lab
    "lab.wor",
    // Initial world for the game
    "sewer.wor",
    "sewer.cir",
];

pub struct TinySave {
    dict: Vec<u8>,
    buffer: Vec<u8>,
}

impl TinySave {
    /// Build the dictionary from the archive contents. Files are trimmed
    /// of trailing zeroes before concatenation.
    pub fn new(archive: &mut GameArchive) -> TinySave {
        let mut dict = Vec::new();

        for name in DICTIONARY_FILES {
            match archive.file(name) {
                Some(data) => {
                    let mut len = data.len();
                    while len > 0 && data[len - 1] == 0 {
                        len -= 1;
                    }
                    dict.extend_from_slice(&data[..len]);
                }
                None => log::warn!("dictionary file '{}' missing from archive", name),
            }
        }

        TinySave {
            dict,
            buffer: Vec::new(),
        }
    }

    /// The shared dictionary, for hosts that decode saves externally.
    pub fn dictionary(&self) -> &[u8] {
        &self.dict
    }

    /// Compress a save buffer. Returns the versioned stream, empty on
    /// failure.
    pub fn compress(&mut self, save: &[u8]) -> &[u8] {
        self.buffer.clear();
        self.buffer.push(CURRENT_SAVE_VERSION);

        let compressed = zstd::bulk::Compressor::with_dictionary(COMPRESSION_LEVEL, &self.dict)
            .and_then(|mut c| c.compress(save));

        match compressed {
            Ok(bytes) => self.buffer.extend_from_slice(&bytes),
            Err(err) => {
                log::warn!("save compression failed: {}", err);
                self.buffer.clear();
            }
        }
        &self.buffer
    }

    /// Decompress a versioned stream straight into the save slot.
    pub fn decompress(&mut self, data: &[u8], save: &mut SaveFile) -> bool {
        if data.is_empty() {
            // No version header
            return false;
        }
        if data[0] != CURRENT_SAVE_VERSION {
            // No other versions supported
            return false;
        }

        let result = zstd::bulk::Decompressor::with_dictionary(&self.dict)
            .and_then(|mut d| d.decompress_to_buffer(&data[1..], save.raw_buffer()));

        match result {
            Ok(size) if size <= MAX_FILESIZE => {
                save.set_size(size);
                true
            }
            Ok(_) => false,
            Err(err) => {
                log::warn!("save decompression failed: {}", err);
                save.set_size(0);
                false
            }
        }
    }
}
