//! In-memory flash model.
//!
//! Addresses are program addresses, `address_stride` apart per word. Pages
//! and rows are aligned to their length in words. An optional image file is
//! rewritten after every erase or write.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::{DeviceInfo, Flash, Words};

#[derive(Clone, Copy, PartialEq, Debug, thiserror::Error)]
pub enum SimError {
    #[error("address {0:#x} outside program memory")]
    OutOfRange(u32),
    #[error("address {0:#x} is not aligned")]
    Misaligned(u32),
    #[error("row of {0} words does not match the row length")]
    RowLength(usize),
    #[error("image file: {0:?}")]
    Io(IoErrorKind),
}

#[derive(Clone, PartialEq, Debug)]
pub struct MemFlash {
    words: Vec<u32>,
    row_len: usize,
    page_len: usize,
    stride: u32,
    image: Option<PathBuf>,
}

impl MemFlash {
    /// Value of an erased word (24-bit program words)
    pub const ERASED: u32 = 0x00ff_ffff;

    /// Create an erased flash sized for `info.prog_len`
    pub fn new(info: &DeviceInfo) -> Self {
        let count = (info.prog_len / info.address_stride.max(1)) as usize;

        Self {
            words: vec![Self::ERASED; count],
            row_len: usize::from(info.row_len.max(1)),
            page_len: usize::from(info.page_len.max(1)),
            stride: info.address_stride.max(1),
            image: None,
        }
    }

    /// Back the flash with a raw little-endian image file, loading it if it exists
    pub fn open<P: AsRef<Path>>(path: P, info: &DeviceInfo) -> Result<Self, SimError> {
        let mut flash = Self::new(info);
        let path = path.as_ref();

        match fs::read(path) {
            Ok(data) => {
                debug!("Loaded {} byte image from {}", data.len(), path.display());
                flash.load(&data);
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                info!("Image {} not found, starting erased", path.display());
            }
            Err(e) => return Err(SimError::Io(e.kind())),
        }

        flash.image = Some(path.to_path_buf());
        Ok(flash)
    }

    /// Overwrite the start of memory from a raw little-endian image
    pub fn load(&mut self, data: &[u8]) {
        let words = Words::new(data);
        self.words
            .iter_mut()
            .zip(words.iter())
            .for_each(|(w, v)| *w = v);
    }

    /// Raw little-endian image of the whole memory
    pub fn image(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    fn index(&self, address: u32, count: usize) -> Result<usize, SimError> {
        if address % self.stride != 0 {
            return Err(SimError::Misaligned(address));
        }
        let index = (address / self.stride) as usize;
        if index + count > self.words.len() {
            return Err(SimError::OutOfRange(address));
        }
        Ok(index)
    }

    fn sync(&self) -> Result<(), SimError> {
        if let Some(path) = &self.image {
            fs::write(path, self.image()).map_err(|e| SimError::Io(e.kind()))?;
        }
        Ok(())
    }
}

impl Flash for MemFlash {
    type Error = SimError;

    fn erase_page(&mut self, address: u32) -> Result<(), Self::Error> {
        let index = self.index(address, 1)?;
        let start = index - index % self.page_len;
        let end = (start + self.page_len).min(self.words.len());

        trace!("Erasing words {:#x}..{:#x}", start, end);
        self.words[start..end].iter_mut().for_each(|w| *w = Self::ERASED);

        self.sync()
    }

    fn read_word(&mut self, address: u32) -> Result<u32, Self::Error> {
        let index = self.index(address, 1)?;
        Ok(self.words[index])
    }

    fn write_row(&mut self, address: u32, words: Words<'_>) -> Result<(), Self::Error> {
        if words.len() != self.row_len {
            return Err(SimError::RowLength(words.len()));
        }
        let index = self.index(address, words.len())?;
        if index % self.row_len != 0 {
            return Err(SimError::Misaligned(address));
        }

        self.words[index..]
            .iter_mut()
            .zip(words.iter())
            .for_each(|(w, v)| *w = v);

        self.sync()
    }

    fn write_double_word(&mut self, address: u32, words: [u32; 2]) -> Result<(), Self::Error> {
        let index = self.index(address, 2)?;
        self.words[index..index + 2].copy_from_slice(&words);

        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::device_info;

    fn row(base: u32) -> Vec<u8> {
        (0..8u32).flat_map(|n| (base + n).to_le_bytes()).collect()
    }

    #[test]
    fn starts_erased() {
        let mut f = MemFlash::new(&device_info());
        assert_eq!(f.words().len(), 0x800);
        assert_eq!(f.read_word(0x0).unwrap(), MemFlash::ERASED);
        assert_eq!(f.read_word(0xffe).unwrap(), MemFlash::ERASED);
        assert_eq!(f.read_word(0x1000), Err(SimError::OutOfRange(0x1000)));
        assert_eq!(f.read_word(0x3), Err(SimError::Misaligned(0x3)));
    }

    #[test]
    fn rows_must_be_aligned() {
        let mut f = MemFlash::new(&device_info());
        let data = row(0x100);

        f.write_row(0x20, Words::new(&data)).unwrap();
        assert_eq!(f.read_word(0x20).unwrap(), 0x100);
        assert_eq!(f.read_word(0x2e).unwrap(), 0x107);

        assert_eq!(f.write_row(0x22, Words::new(&data)), Err(SimError::Misaligned(0x22)));
        assert_eq!(f.write_row(0x20, Words::new(&data[..8])), Err(SimError::RowLength(2)));
    }

    #[test]
    fn erase_clears_the_whole_page() {
        let mut f = MemFlash::new(&device_info());
        let data = row(0x200);
        f.write_row(0x40, Words::new(&data)).unwrap();
        f.write_row(0x70, Words::new(&data)).unwrap();
        f.write_row(0x80, Words::new(&data)).unwrap();

        // pages are 32 words, 64 address units
        f.erase_page(0x52).unwrap();
        assert_eq!(f.read_word(0x40).unwrap(), MemFlash::ERASED);
        assert_eq!(f.read_word(0x7e).unwrap(), MemFlash::ERASED);
        assert_eq!(f.read_word(0x80).unwrap(), 0x200);
    }

    #[test]
    fn image_round_trip() {
        let info = device_info();
        let mut f = MemFlash::new(&info);
        f.write_double_word(0x10, [0x12_3456, 0x65_4321]).unwrap();

        let mut g = MemFlash::new(&info);
        g.load(&f.image());
        assert_eq!(f, g);
    }

    #[test]
    fn image_file_is_kept_in_sync() {
        let info = device_info();
        let path = std::env::temp_dir().join(format!("uart-bootloader-sim-{}.bin", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut f = MemFlash::open(&path, &info).unwrap();
        f.write_double_word(0x0, [0x04_0400, 0]).unwrap();

        let mut g = MemFlash::open(&path, &info).unwrap();
        assert_eq!(g.read_word(0x0).unwrap(), 0x04_0400);
        assert_eq!(g.words(), f.words());

        let _ = fs::remove_file(&path);
    }
}
