use anyhow::{Context, Result, anyhow};
use memmap2::{Mmap, MmapMut};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;
use crate::osm::Location;

// 8 bytes per node: 4 bytes lon, 4 bytes lat
// Stored as fixed precision integers (deg * 10^7)
const NODE_SIZE: usize = 8;
// 16 bytes per entry: 8 bytes node id (u64), 8 bytes packed coords
const SPARSE_ENTRY_SIZE: usize = 16;
const SCALE_FACTOR: f64 = 10_000_000.0;
// Flipping the sign bit makes an all-zero slot decode to i32::MIN, which is
// never a valid coordinate, so untouched dense slots read back as missing.
const COORD_BIAS: u32 = 0x8000_0000;

/// Node id capacity of `dense_mmap_array` when no explicit size is given.
pub const DENSE_DEFAULT_MAX_NODES: u64 = 16_000_000_000;

/// Names accepted by `--location_store`, in the order `-L` prints them.
pub const STORE_TYPES: &[&str] = &[
    "dense_file_array",
    "dense_mmap_array",
    "flex_mem",
    "sparse_file_array",
    "sparse_mem_array",
];

const OUT_OF_ORDER: &str = "LocationStore: Node IDs are out of order for a sparse store; \
     run `osmium sort` to sort by type then id, or use flex_mem";

/// Backend selection, parsed from `NAME` or `NAME,FILE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationStoreKind {
    FlexMem,
    SparseMemArray,
    SparseFileArray(Option<PathBuf>),
    DenseMmapArray,
    DenseFileArray(PathBuf),
}

impl LocationStoreKind {
    pub fn label(&self) -> &'static str {
        match self {
            LocationStoreKind::FlexMem => "flex_mem",
            LocationStoreKind::SparseMemArray => "sparse_mem_array",
            LocationStoreKind::SparseFileArray(_) => "sparse_file_array",
            LocationStoreKind::DenseMmapArray => "dense_mmap_array",
            LocationStoreKind::DenseFileArray(_) => "dense_file_array",
        }
    }
}

impl FromStr for LocationStoreKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, file) = match value.split_once(',') {
            Some((name, file)) => (name.trim(), Some(PathBuf::from(file.trim()))),
            None => (value.trim(), None),
        };
        match (name, file) {
            ("flex_mem", None) => Ok(LocationStoreKind::FlexMem),
            ("sparse_mem_array", None) => Ok(LocationStoreKind::SparseMemArray),
            ("sparse_file_array", file) => Ok(LocationStoreKind::SparseFileArray(file)),
            ("dense_mmap_array", None) => Ok(LocationStoreKind::DenseMmapArray),
            ("dense_file_array", Some(file)) => Ok(LocationStoreKind::DenseFileArray(file)),
            ("dense_file_array", None) => Err(Error::Usage(
                "Location store dense_file_array needs a file: dense_file_array,FILE".to_string(),
            )),
            _ => Err(Error::UnknownLocationStore {
                name: value.to_string(),
                available: STORE_TYPES.join(", "),
            }),
        }
    }
}

/// Node id → location index used to resolve way geometries.
///
/// Locations may be added until [`LocationStore::prepare`] is called, which
/// the driver does when the first way arrives. Sparse stores only answer
/// lookups after that.
pub struct LocationStore {
    inner: LocationStoreImpl,
    prepared: bool,
}

enum LocationStoreImpl {
    Memory(MemoryStore),
    SparseMem(SparseMemStore),
    SparseFile(SparseFileStore),
    Dense(DenseStore),
}

struct MemoryStore {
    nodes: HashMap<i64, (u32, u32)>,
}

struct SparseMemStore {
    entries: Vec<(u64, u64)>,
    last_id: Option<u64>,
}

enum SparseFileStore {
    Writing {
        writer: BufWriter<File>,
        count: u64,
        last_id: Option<u64>,
    },
    Mapped {
        mmap: Option<Mmap>,
        count: u64,
    },
}

struct DenseStore {
    mmap: MmapMut,
    max_nodes: u64,
}

impl LocationStore {
    pub fn create(kind: &LocationStoreKind) -> Result<Self> {
        let inner = match kind {
            LocationStoreKind::FlexMem => LocationStoreImpl::Memory(MemoryStore {
                nodes: HashMap::new(),
            }),
            LocationStoreKind::SparseMemArray => LocationStoreImpl::SparseMem(SparseMemStore {
                entries: Vec::new(),
                last_id: None,
            }),
            LocationStoreKind::SparseFileArray(path) => {
                let file = match path {
                    Some(path) => File::create(path).with_context(|| {
                        format!("LocationStore: Failed to create sparse file {:?}", path)
                    })?,
                    // Anonymous temp file, removed by the OS once closed
                    None => tempfile::tempfile()
                        .context("LocationStore: Failed to create temporary sparse file")?,
                };
                LocationStoreImpl::SparseFile(SparseFileStore::Writing {
                    writer: BufWriter::new(file),
                    count: 0,
                    last_id: None,
                })
            }
            LocationStoreKind::DenseMmapArray => {
                return Self::dense_temp(DENSE_DEFAULT_MAX_NODES);
            }
            LocationStoreKind::DenseFileArray(path) => {
                return Self::dense_file(path, DENSE_DEFAULT_MAX_NODES);
            }
        };
        Ok(Self {
            inner,
            prepared: false,
        })
    }

    pub fn flex_mem() -> Self {
        Self {
            inner: LocationStoreImpl::Memory(MemoryStore {
                nodes: HashMap::new(),
            }),
            prepared: false,
        }
    }

    /// Dense store backed by an anonymous temporary file mapped into memory.
    pub fn dense_temp(max_nodes: u64) -> Result<Self> {
        let file = tempfile::tempfile()
            .context("LocationStore: Failed to create temporary dense file")?;
        Self::dense_from_file(&file, max_nodes)
    }

    /// Dense store backed by a memory-mapped file at `path`. The file is
    /// left in place afterwards.
    pub fn dense_file(path: &Path, max_nodes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("LocationStore: Failed to open dense file {:?}", path))?;
        Self::dense_from_file(&file, max_nodes)
    }

    fn dense_from_file(file: &File, max_nodes: u64) -> Result<Self> {
        // Set file length to max size (relying on sparse files)
        let file_size = max_nodes
            .checked_mul(NODE_SIZE as u64)
            .context("LocationStore: Dense file size overflow")?;
        file.set_len(file_size)
            .context("LocationStore: Failed to set dense file length")?;

        // SAFETY: The file handle is exclusively owned by this process and
        // not truncated while mapped.
        let mmap = unsafe {
            MmapMut::map_mut(file).context("LocationStore: Failed to map dense file")?
        };

        Ok(Self {
            inner: LocationStoreImpl::Dense(DenseStore { mmap, max_nodes }),
            prepared: false,
        })
    }

    pub fn set(&mut self, id: i64, location: Location) -> Result<()> {
        match &mut self.inner {
            LocationStoreImpl::Memory(store) => {
                store.nodes.insert(id, encode(location));
                Ok(())
            }
            LocationStoreImpl::SparseMem(store) => {
                if self.prepared {
                    return Err(anyhow!(OUT_OF_ORDER));
                }
                store.set(id.unsigned_abs(), location)
            }
            LocationStoreImpl::SparseFile(store) => store.set(id.unsigned_abs(), location),
            LocationStoreImpl::Dense(store) => store.set(id.unsigned_abs(), location),
        }
    }

    /// Finish the loading phase. Safe to call more than once.
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        match &mut self.inner {
            LocationStoreImpl::SparseMem(store) => store.entries.shrink_to_fit(),
            LocationStoreImpl::SparseFile(store) => store.map()?,
            LocationStoreImpl::Memory(_) | LocationStoreImpl::Dense(_) => {}
        }
        self.prepared = true;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<Location> {
        match &self.inner {
            LocationStoreImpl::Memory(store) => store.nodes.get(&id).and_then(|c| decode(*c)),
            LocationStoreImpl::SparseMem(store) => store.get(id.unsigned_abs()),
            LocationStoreImpl::SparseFile(store) => store.get(id.unsigned_abs()),
            LocationStoreImpl::Dense(store) => store.get(id.unsigned_abs()),
        }
    }
}

fn encode_coord(value: f64) -> u32 {
    ((value * SCALE_FACTOR).round() as i32 as u32) ^ COORD_BIAS
}

fn decode_coord(raw: u32) -> Option<f64> {
    let fixed = (raw ^ COORD_BIAS) as i32;
    if fixed == i32::MIN {
        None
    } else {
        Some(fixed as f64 / SCALE_FACTOR)
    }
}

fn encode(location: Location) -> (u32, u32) {
    (encode_coord(location.x), encode_coord(location.y))
}

fn decode((lon, lat): (u32, u32)) -> Option<Location> {
    Some(Location {
        x: decode_coord(lon)?,
        y: decode_coord(lat)?,
    })
}

/// Pack lon/lat into a single u64 for sparse storage
fn pack_coords(location: Location) -> u64 {
    let (lon, lat) = encode(location);
    ((lon as u64) << 32) | lat as u64
}

fn unpack_coords(packed: u64) -> Option<Location> {
    decode(((packed >> 32) as u32, packed as u32))
}

fn check_order(last_id: &mut Option<u64>, id: u64) -> Result<()> {
    if let Some(last) = *last_id
        && id < last
    {
        return Err(anyhow!(OUT_OF_ORDER));
    }
    *last_id = Some(id);
    Ok(())
}

impl SparseMemStore {
    fn set(&mut self, id: u64, location: Location) -> Result<()> {
        check_order(&mut self.last_id, id)?;
        self.entries.push((id, pack_coords(location)));
        Ok(())
    }

    fn get(&self, id: u64) -> Option<Location> {
        let index = self.entries.binary_search_by_key(&id, |(key, _)| *key).ok()?;
        unpack_coords(self.entries[index].1)
    }
}

impl SparseFileStore {
    fn set(&mut self, id: u64, location: Location) -> Result<()> {
        match self {
            SparseFileStore::Writing {
                writer,
                count,
                last_id,
            } => {
                check_order(last_id, id)?;
                writer.write_all(&id.to_le_bytes())?;
                writer.write_all(&pack_coords(location).to_le_bytes())?;
                *count += 1;
                Ok(())
            }
            SparseFileStore::Mapped { .. } => Err(anyhow!(OUT_OF_ORDER)),
        }
    }

    fn map(&mut self) -> Result<()> {
        let SparseFileStore::Writing { writer, count, .. } = self else {
            return Ok(());
        };
        let count = *count;
        writer
            .flush()
            .context("LocationStore: Failed to flush sparse file")?;

        let file = writer.get_ref();
        let file_len = file
            .metadata()
            .context("LocationStore: Failed to stat sparse file")?
            .len();
        if file_len != count * SPARSE_ENTRY_SIZE as u64 {
            return Err(anyhow!(
                "LocationStore: Sparse file count mismatch: expected {}, file has {} bytes",
                count,
                file_len
            ));
        }

        // Mapping an empty file fails on some platforms.
        let mmap = if count == 0 {
            None
        } else {
            // SAFETY: The file handle is exclusively owned by this store and
            // no longer written to.
            Some(unsafe { Mmap::map(file).context("LocationStore: Failed to map sparse file")? })
        };
        *self = SparseFileStore::Mapped { mmap, count };
        Ok(())
    }

    fn get(&self, id: u64) -> Option<Location> {
        let SparseFileStore::Mapped {
            mmap: Some(mmap),
            count,
        } = self
        else {
            return None;
        };

        let mut low = 0u64;
        let mut high = *count;

        while low < high {
            let mid = low + (high - low) / 2;
            let offset = (mid as usize) * SPARSE_ENTRY_SIZE;
            let data = &mmap[offset..offset + SPARSE_ENTRY_SIZE];
            let mid_id = u64::from_le_bytes(data[0..8].try_into().ok()?);
            let packed = u64::from_le_bytes(data[8..16].try_into().ok()?);

            match mid_id.cmp(&id) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return unpack_coords(packed),
            }
        }

        None
    }
}

impl DenseStore {
    fn set(&mut self, id: u64, location: Location) -> Result<()> {
        if id >= self.max_nodes {
            return Err(anyhow!(
                "LocationStore: Node ID {id} exceeds dense store capacity ({}); use flex_mem or a sparse store",
                self.max_nodes
            ));
        }

        let offset = (id as usize) * NODE_SIZE;
        let (lon, lat) = encode(location);
        let data = &mut self.mmap[offset..offset + NODE_SIZE];
        data[0..4].copy_from_slice(&lon.to_le_bytes());
        data[4..8].copy_from_slice(&lat.to_le_bytes());
        Ok(())
    }

    fn get(&self, id: u64) -> Option<Location> {
        if id >= self.max_nodes {
            return None;
        }

        let offset = (id as usize) * NODE_SIZE;
        let data = &self.mmap[offset..offset + NODE_SIZE];
        let lon = u32::from_le_bytes(data[0..4].try_into().ok()?);
        let lat = u32::from_le_bytes(data[4..8].try_into().ok()?);
        decode((lon, lat))
    }
}
