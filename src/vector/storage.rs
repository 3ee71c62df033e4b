//! Binary persistence for trained IVF-PQ indexes.
//!
//! # Storage Format
//!
//! All integers and floats are little-endian.
//! - Header (32 bytes): magic `QIVF`, version u32, dimension u32, nlist u32,
//!   m u32, nbits u32, vector count u64
//! - Coarse centroids: `nlist * dimension` f32
//! - Sub-codebooks: `m * 2^nbits * (dimension / m)` f32
//! - Inverted lists, in centroid order: entry count u64, then one record
//!   per entry (slot number u64 followed by `m` code bytes)
//!
//! Floats are written with `to_le_bytes`, so a save/open cycle reproduces
//! the index bit for bit. Reading goes through a memory map.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use memmap2::MmapOptions;

use crate::vector::index::{InvertedList, IvfPqIndex};
use crate::vector::quantizer::ProductQuantizer;
use crate::vector::trainer::TrainedModel;
use crate::vector::types::{SlotId, VectorDimension, VectorError};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 32;

/// Magic bytes to identify index files.
const MAGIC_BYTES: &[u8; 4] = b"QIVF";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Number of bytes per slot number.
const BYTES_PER_SLOT: usize = 8;

impl IvfPqIndex {
    /// Encodes the trained index into the binary artifact format.
    ///
    /// # Errors
    /// `NotTrained` for an untrained index; there is nothing to persist.
    pub fn serialize(&self) -> Result<Vec<u8>, VectorError> {
        let model = self.model.as_ref().ok_or(VectorError::NotTrained)?;
        let quantizer = &model.quantizer;
        let dimension = self.dimension.get();

        let payload = model.nlist() * dimension * BYTES_PER_F32
            + quantizer.codebooks().len() * BYTES_PER_F32
            + self
                .lists
                .iter()
                .map(|l| 8 + l.slots.len() * BYTES_PER_SLOT + l.codes.len())
                .sum::<usize>();
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload);

        buf.extend_from_slice(MAGIC_BYTES);
        buf.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
        buf.extend_from_slice(&(dimension as u32).to_le_bytes());
        buf.extend_from_slice(&(model.nlist() as u32).to_le_bytes());
        buf.extend_from_slice(&(quantizer.m() as u32).to_le_bytes());
        buf.extend_from_slice(&quantizer.nbits().to_le_bytes());
        buf.extend_from_slice(&(self.ntotal as u64).to_le_bytes());

        for centroid in &model.centroids {
            write_f32s(&mut buf, centroid);
        }
        write_f32s(&mut buf, quantizer.codebooks());

        for list in &self.lists {
            buf.extend_from_slice(&(list.len() as u64).to_le_bytes());
            for (slot, code) in list.entries(quantizer.m()) {
                buf.extend_from_slice(&slot.to_bytes());
                buf.extend_from_slice(code);
            }
        }

        Ok(buf)
    }

    /// Decodes an index previously produced by [`IvfPqIndex::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, VectorError> {
        let mut reader = ByteReader::new(bytes);

        if reader.take(4)? != MAGIC_BYTES {
            return Err(VectorError::InvalidFormat("Invalid magic bytes".to_string()));
        }
        let version = reader.read_u32()?;
        if version != STORAGE_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: version,
            });
        }

        let dimension = VectorDimension::new(reader.read_u32()? as usize)?;
        let nlist = reader.read_u32()? as usize;
        let m = reader.read_u32()? as usize;
        let nbits = reader.read_u32()?;
        let ntotal = reader.read_u64()? as usize;

        ProductQuantizer::check_geometry(dimension.get(), m, nbits)
            .map_err(|e| VectorError::InvalidFormat(format!("bad header: {e}")))?;
        if nlist == 0 {
            return Err(VectorError::InvalidFormat("nlist of zero".to_string()));
        }
        // Centroids plus one count per list must fit before anything is allocated.
        let minimum = nlist
            .saturating_mul(dimension.get() * BYTES_PER_F32)
            .saturating_add(nlist.saturating_mul(8));
        if minimum > reader.remaining() {
            return Err(VectorError::InvalidFormat(format!(
                "header declares {nlist} lists but only {} bytes follow",
                reader.remaining()
            )));
        }

        let centroids = (0..nlist)
            .map(|_| reader.read_f32s(dimension.get()))
            .collect::<Result<Vec<_>, _>>()?;
        let codebooks = reader.read_f32s((1usize << nbits) * dimension.get())?;
        let quantizer = ProductQuantizer::from_parts(dimension.get(), m, nbits, codebooks)?;

        let record_size = BYTES_PER_SLOT + m;
        if ntotal.saturating_mul(record_size) > reader.remaining() {
            return Err(VectorError::InvalidFormat(format!(
                "header declares {ntotal} vectors but only {} bytes follow",
                reader.remaining()
            )));
        }

        // Slots are dense: each of 0..ntotal appears in exactly one list.
        let mut seen = vec![false; ntotal];
        let ksub = quantizer.ksub();
        let mut lists = Vec::with_capacity(nlist);
        let mut counted = 0usize;
        for _ in 0..nlist {
            let count = reader.read_u64()? as usize;
            let mut list = InvertedList::default();
            for _ in 0..count {
                let slot = SlotId::new(reader.read_u64()?);
                match seen.get_mut(slot.as_index()) {
                    Some(flag) if !*flag => *flag = true,
                    Some(_) => {
                        return Err(VectorError::InvalidFormat(format!(
                            "slot {slot} stored more than once"
                        )));
                    }
                    None => {
                        return Err(VectorError::InvalidFormat(format!(
                            "slot {slot} out of range for {ntotal} vectors"
                        )));
                    }
                }
                let code = reader.take(m)?;
                if code.iter().any(|&c| usize::from(c) >= ksub) {
                    return Err(VectorError::InvalidFormat(format!(
                        "code byte out of range for {ksub}-entry codebooks"
                    )));
                }
                list.push(slot, code);
            }
            counted += count;
            lists.push(list);
        }

        if counted != ntotal {
            return Err(VectorError::InvalidFormat(format!(
                "header declares {ntotal} vectors but lists hold {counted}"
            )));
        }
        if !reader.is_exhausted() {
            return Err(VectorError::InvalidFormat(
                "trailing bytes after last inverted list".to_string(),
            ));
        }

        let mut index = Self::from_trained(TrainedModel {
            dimension,
            centroids,
            quantizer,
        });
        index.lists = lists;
        index.ntotal = ntotal;
        Ok(index)
    }

    /// Writes the index artifact to `path`.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so readers never observe a half-written artifact.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VectorError> {
        let path = path.as_ref();
        let bytes = self.serialize()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Opens an index artifact through a read-only memory map.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if file.metadata()?.len() < HEADER_SIZE as u64 {
            return Err(VectorError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }
        // SAFETY: artifacts are immutable once written; save() replaces them by rename
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::deserialize(&mmap)
    }
}

fn write_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    for value in values {
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

/// Bounds-checked little-endian cursor over a byte slice.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], VectorError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                VectorError::InvalidFormat(format!(
                    "unexpected end of data at offset {} (wanted {len} bytes)",
                    self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, VectorError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, VectorError> {
        let mut array = [0u8; 8];
        array.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(array))
    }

    fn read_f32s(&mut self, count: usize) -> Result<Vec<f32>, VectorError> {
        let len = count.checked_mul(BYTES_PER_F32).ok_or_else(|| {
            VectorError::InvalidFormat("float block size overflow".to_string())
        })?;
        Ok(self
            .take(len)?
            .chunks_exact(BYTES_PER_F32)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }
}
