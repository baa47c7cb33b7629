//! Raw little-endian row-major files with a JSON header beside them.
//!
//! For a data file at `path` the header lives at `path.json`.

use crate::block::Block;
use crate::dtype::DType;
use crate::labels::Labels;
use crate::seed::{check_chunk_shape, check_in_range, Seed, SeedError};
use crate::viewport::Viewport;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const ON_DISK_BACKEND: &str = "on-disk";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskHeader {
    pub dtype: DType,
    pub shape: Vec<usize>,
    #[serde(default)]
    pub chunk_shape: Option<Vec<usize>>,
    #[serde(default)]
    pub labels: Option<Labels>,
}

pub fn header_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Bytes per element in the on-disk encoding.
pub(crate) fn encoded_size(dtype: DType) -> Result<usize, SeedError> {
    match dtype {
        DType::Logical => Ok(1),
        DType::Integer => Ok(4),
        DType::Real => Ok(8),
        DType::Text => Err(SeedError::UnsupportedDType(dtype, ON_DISK_BACKEND)),
    }
}

/// Element offsets (row-major, into an array of `shape`) at which each
/// contiguous run of `viewport` starts. Every run spans the viewport's
/// length along the last dimension.
pub(crate) fn run_starts(shape: &[usize], viewport: &Viewport) -> Vec<usize> {
    let rank = shape.len();
    if rank == 0 {
        return vec![0];
    }
    if viewport.is_empty() {
        return vec![];
    }
    let mut strides = vec![1usize; rank];
    for d in (0..rank - 1).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    let lead = &viewport.lengths()[..rank - 1];
    let mut coords = vec![0usize; rank - 1];
    let mut starts = Vec::with_capacity(lead.iter().product());
    loop {
        let start = (0..rank)
            .map(|d| {
                let c = if d < rank - 1 { coords[d] } else { 0 };
                (viewport.offset(d) + c) * strides[d]
            })
            .sum();
        starts.push(start);
        // advance the odometer over the leading dimensions
        let mut d = rank - 1;
        loop {
            if d == 0 {
                return starts;
            }
            d -= 1;
            coords[d] += 1;
            if coords[d] < lead[d] {
                break;
            }
            coords[d] = 0;
        }
    }
}

pub(crate) fn run_length(viewport: &Viewport) -> usize {
    viewport.lengths().last().copied().unwrap_or(1)
}

pub(crate) fn decode(dtype: DType, bytes: &[u8], shape: &[usize]) -> Result<Block, SeedError> {
    let size = encoded_size(dtype)?;
    let chunks = bytes.chunks_exact(size);
    Ok(match dtype {
        DType::Logical => Block::from_vec_shape(chunks.map(|c| c[0] != 0).collect(), shape)?,
        DType::Integer => Block::from_vec_shape(
            chunks
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            shape,
        )?,
        DType::Real => Block::from_vec_shape(
            chunks
                .map(|c| {
                    let mut a = [0u8; 8];
                    a.copy_from_slice(c);
                    f64::from_le_bytes(a)
                })
                .collect(),
            shape,
        )?,
        DType::Text => Err(SeedError::UnsupportedDType(dtype, ON_DISK_BACKEND))?,
    })
}

/// Encode a block in row-major order.
pub(crate) fn encode(block: &Block) -> Result<Vec<u8>, SeedError> {
    Ok(match block {
        Block::Logical(x) => x.iter().map(|&v| v as u8).collect(),
        Block::Integer(x) => x.iter().flat_map(|v| v.to_le_bytes()).collect(),
        Block::Real(x) => x.iter().flat_map(|v| v.to_le_bytes()).collect(),
        Block::Text(_) => Err(SeedError::UnsupportedDType(DType::Text, ON_DISK_BACKEND))?,
    })
}

/// A seed over a data file written by [`crate::sink::DiskSink`] or any
/// producer following the same layout.
#[derive(Debug, Clone)]
pub struct DiskSeed {
    path: PathBuf,
    header: DiskHeader,
}

impl DiskSeed {
    /// Open the data file at `path`, reading its header.
    ///
    /// # Errors
    /// - `BackendIO` if the header or data file cannot be read
    /// - `Metadata` if the header is malformed, its chunk shape does not fit
    ///   its shape, or it disagrees with the data size
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref().to_path_buf();
        let header_text = std::fs::read_to_string(header_path(&path))?;
        let header: DiskHeader = serde_json::from_str(&header_text)?;
        Self::from_parts(path, header)
    }

    pub(crate) fn from_parts(path: PathBuf, header: DiskHeader) -> Result<Self, SeedError> {
        let expected = header.shape.iter().product::<usize>() * encoded_size(header.dtype)?;
        let actual = std::fs::metadata(&path)?.len();
        if actual != expected as u64 {
            return Err(SeedError::Metadata(format!(
                "{} holds {actual} bytes, header implies {expected}",
                path.display()
            )));
        }
        if let Some(chunk_shape) = &header.chunk_shape {
            check_chunk_shape(&header.shape, chunk_shape)?;
        }
        if let Some(labels) = &header.labels {
            labels
                .validate(&header.shape)
                .map_err(|e| SeedError::Metadata(e.to_string()))?;
        }
        Ok(Self { path, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &DiskHeader {
        &self.header
    }
}

impl Seed for DiskSeed {
    fn shape(&self) -> &[usize] {
        &self.header.shape
    }

    fn labels(&self) -> Option<&Labels> {
        self.header.labels.as_ref()
    }

    fn dtype(&self) -> DType {
        self.header.dtype
    }

    fn extract(&self, viewport: &Viewport) -> Result<Block, SeedError> {
        check_in_range(self, viewport)?;
        let size = encoded_size(self.header.dtype)?;
        let run_bytes = run_length(viewport) * size;
        let starts = run_starts(&self.header.shape, viewport);
        let mut bytes = vec![0u8; starts.len() * run_bytes];

        let mut file = File::open(&self.path)?;
        for (run, &start) in starts.iter().enumerate() {
            file.seek(SeekFrom::Start((start * size) as u64))?;
            file.read_exact(&mut bytes[run * run_bytes..(run + 1) * run_bytes])?;
        }
        log::trace!(
            "read {} runs for {viewport} from {}",
            starts.len(),
            self.path.display()
        );
        decode(self.header.dtype, &bytes, viewport.shape())
    }

    fn native_chunk_shape(&self) -> Option<Vec<usize>> {
        self.header.chunk_shape.clone()
    }

    fn backend_name(&self) -> &'static str {
        ON_DISK_BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_starts() {
        let v = Viewport::from_ranges(&[1..3, 2..4]);
        assert_eq!(run_starts(&[4, 5], &v), vec![7, 12]);
        assert_eq!(run_length(&v), 2);
        let v3 = Viewport::from_ranges(&[0..2, 1..2, 0..3]);
        assert_eq!(run_starts(&[2, 2, 3], &v3), vec![3, 9]);
    }

    #[test]
    fn test_open_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.bin");
        let data: Vec<f64> = (0..12).map(|x| x as f64).collect();
        let block = Block::from_vec_shape(data, &[3, 4]).unwrap();
        std::fs::write(&path, encode(&block).unwrap()).unwrap();
        let header = DiskHeader {
            dtype: DType::Real,
            shape: vec![3, 4],
            chunk_shape: Some(vec![1, 4]),
            labels: None,
        };
        std::fs::write(header_path(&path), serde_json::to_string(&header).unwrap()).unwrap();

        let seed = DiskSeed::open(&path).unwrap();
        assert_eq!(seed.native_chunk_shape(), Some(vec![1, 4]));
        let b = seed
            .extract(&Viewport::from_ranges(&[1..3, 1..3]))
            .unwrap();
        assert_eq!(b.to_vec::<f64>().unwrap(), vec![5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn test_missing_file_is_backend_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = DiskSeed::open(dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, SeedError::BackendIO(_)));
    }
}
