/// Document layout — the extent list that maps document addresses to bytes.
///
/// A document is never rewritten in place while it is being edited. Instead
/// it is described by an ordered list of extents, each backed by the
/// original file, by an attached data file, or by bytes held in memory.
/// Edits build a **new** `Layout`; the old one stays valid, so a worker can
/// keep an `Arc<Layout>` snapshot for the whole of a scan pass without
/// holding any lock.
use crate::error::{Result, ScanError};
use std::sync::Arc;

/// Where the bytes of one extent come from.
#[derive(Debug, Clone)]
pub enum Backing {
    /// The document's own file, starting at `offset`.
    File { offset: u64 },
    /// An attached data file, starting at `offset`.
    DataFile { index: usize, offset: u64 },
    /// In-memory bytes (typed, pasted or loaded), starting at `start`.
    Memory { bytes: Arc<[u8]>, start: usize },
}

/// A contiguous run of document bytes with a single backing.
#[derive(Debug, Clone)]
pub struct Extent {
    pub backing: Backing,
    pub len: u64,
}

impl Extent {
    pub fn memory(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        let len = bytes.len() as u64;
        Self {
            backing: Backing::Memory { bytes, start: 0 },
            len,
        }
    }

    /// Split into `[0, at)` and `[at, len)`. `at` must be strictly inside.
    fn split(&self, at: u64) -> (Extent, Extent) {
        debug_assert!(at > 0 && at < self.len, "split point outside extent");
        let tail_backing = match &self.backing {
            Backing::File { offset } => Backing::File { offset: offset + at },
            Backing::DataFile { index, offset } => Backing::DataFile {
                index: *index,
                offset: offset + at,
            },
            Backing::Memory { bytes, start } => Backing::Memory {
                bytes: Arc::clone(bytes),
                start: start + at as usize,
            },
        };
        (
            Extent {
                backing: self.backing.clone(),
                len: at,
            },
            Extent {
                backing: tail_backing,
                len: self.len - at,
            },
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    extents: Vec<Extent>,
    /// Document address at which each extent begins (parallel to `extents`).
    starts: Vec<u64>,
    length: u64,
}

impl Layout {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The unedited contents of a file of `length` bytes.
    pub fn of_file(length: u64) -> Self {
        Self::from_extents(vec![Extent {
            backing: Backing::File { offset: 0 },
            len: length,
        }])
    }

    /// A document held entirely in memory.
    pub fn of_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::from_extents(vec![Extent::memory(bytes)])
    }

    fn from_extents(extents: Vec<Extent>) -> Self {
        let extents: Vec<Extent> = extents.into_iter().filter(|e| e.len > 0).collect();
        let mut starts = Vec::with_capacity(extents.len());
        let mut length = 0u64;
        for extent in &extents {
            starts.push(length);
            length += extent.len;
        }
        Self {
            extents,
            starts,
            length,
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Find the extent holding `address` and the offset of `address` within it.
    pub fn locate(&self, address: u64) -> Option<(usize, u64)> {
        if address >= self.length {
            return None;
        }
        // Last extent whose start is <= address.
        let index = self.starts.partition_point(|&start| start <= address) - 1;
        Some((index, address - self.starts[index]))
    }

    /// Extents before and after `address`, splitting one if needed.
    fn split_at(&self, address: u64) -> (Vec<Extent>, Vec<Extent>) {
        match self.locate(address) {
            None => (self.extents.clone(), Vec::new()),
            Some((index, 0)) => (
                self.extents[..index].to_vec(),
                self.extents[index..].to_vec(),
            ),
            Some((index, offset)) => {
                let (head, tail) = self.extents[index].split(offset);
                let mut before = self.extents[..index].to_vec();
                before.push(head);
                let mut after = Vec::with_capacity(self.extents.len() - index);
                after.push(tail);
                after.extend_from_slice(&self.extents[index + 1..]);
                (before, after)
            }
        }
    }

    fn check(&self, address: u64) -> Result<()> {
        if address > self.length {
            return Err(ScanError::OutOfRange {
                address,
                length: self.length,
            });
        }
        Ok(())
    }

    /// Insert `extent` so that its first byte lands at `address`.
    pub fn insert(&self, address: u64, extent: Extent) -> Result<Layout> {
        self.check(address)?;
        let (mut before, after) = self.split_at(address);
        before.push(extent);
        before.extend(after);
        Ok(Self::from_extents(before))
    }

    pub fn insert_bytes(&self, address: u64, bytes: &[u8]) -> Result<Layout> {
        self.insert(address, Extent::memory(bytes))
    }

    /// Remove up to `len` bytes starting at `address`.
    pub fn delete(&self, address: u64, len: u64) -> Result<Layout> {
        self.check(address)?;
        let end = address.saturating_add(len).min(self.length);
        let (before, _) = self.split_at(address);
        let (_, after) = self.split_at(end);
        let mut extents = before;
        extents.extend(after);
        Ok(Self::from_extents(extents))
    }

    /// Overwrite bytes starting at `address`; writing past the end extends
    /// the document.
    pub fn replace(&self, address: u64, bytes: &[u8]) -> Result<Layout> {
        self.delete(address, bytes.len() as u64)?
            .insert_bytes(address, bytes)
    }
}
