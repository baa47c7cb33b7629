use crate::block::Block;
use crate::dtype::DType;
use crate::labels::Labels;
use crate::seed::disk::{
    encode, encoded_size, header_path, run_length, run_starts, DiskHeader, ON_DISK_BACKEND,
};
use crate::seed::{check_chunk_shape, DiskSeed, Seed};
use crate::sink::{Coverage, DiskSinkConfig, RealizationSink, SinkError};
use crate::viewport::Viewport;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

/// Writes blocks straight into a preallocated data file; the header is
/// written on finalize.
#[derive(Debug)]
pub struct DiskSink {
    config: DiskSinkConfig,
    header: DiskHeader,
    file: File,
    coverage: Coverage,
}

impl DiskSink {
    /// Create (or truncate) the data file at `config.path` sized for `shape`.
    ///
    /// # Errors
    /// - `UnsupportedDType` for Text
    /// - `Seed(Metadata)` if the configured chunk shape does not fit `shape`
    /// - `BackendIO` if the file cannot be created
    pub fn create(
        config: DiskSinkConfig,
        shape: &[usize],
        dtype: DType,
        labels: Option<Labels>,
    ) -> Result<Self, SinkError> {
        let size =
            encoded_size(dtype).map_err(|_| SinkError::UnsupportedDType(dtype, ON_DISK_BACKEND))?;
        if let Some(chunk_shape) = &config.chunk_shape {
            check_chunk_shape(shape, chunk_shape)?;
        }
        let file = File::create(&config.path)?;
        file.set_len((shape.iter().product::<usize>() * size) as u64)?;
        log::debug!("created {} for {shape:?} {dtype}", config.path.display());
        Ok(Self {
            header: DiskHeader {
                dtype,
                shape: shape.to_vec(),
                chunk_shape: config.chunk_shape.clone(),
                labels,
            },
            config,
            file,
            coverage: Coverage::new(shape, dtype),
        })
    }
}

impl RealizationSink for DiskSink {
    fn shape(&self) -> &[usize] {
        &self.header.shape
    }

    fn dtype(&self) -> DType {
        self.header.dtype
    }

    fn write_block(&mut self, viewport: &Viewport, block: &Block) -> Result<(), SinkError> {
        self.coverage.check(viewport, block)?;
        let size = encoded_size(self.header.dtype)?;
        let bytes = encode(block)?;
        let run_bytes = run_length(viewport) * size;
        for (run, start) in run_starts(&self.header.shape, viewport).into_iter().enumerate() {
            self.file.seek(SeekFrom::Start((start * size) as u64))?;
            self.file
                .write_all(&bytes[run * run_bytes..(run + 1) * run_bytes])?;
        }
        self.coverage.commit(viewport);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Arc<dyn Seed>, SinkError> {
        let DiskSink {
            config,
            header,
            file,
            coverage,
        } = *self;
        coverage.ensure_complete()?;
        file.sync_all()?;
        drop(file);
        std::fs::write(
            header_path(&config.path),
            serde_json::to_string_pretty(&header)?,
        )?;
        Ok(Arc::new(DiskSeed::from_parts(config.path, header)?))
    }
}
