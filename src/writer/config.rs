//! Write options: compression codecs, levels, and row-group sizing.
//!
//! Everything here is validated up front, before any query runs or file is
//! opened, so an invalid option combination fails as a
//! [`WriteError::Configuration`] with no side effects.

use std::ops::RangeInclusive;

use parquet::basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::error::WriteError;

/// Default number of rows streamed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Assumed bytes per row when converting a target-MB row-group size or a
/// row-count estimate into bytes. An unvalidated planning constant, not a
/// measured invariant.
pub const ESTIMATED_ROW_WIDTH_BYTES: u64 = 64;

/// Supported compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Zstandard, levels 1-22.
    #[default]
    Zstd,
    /// Gzip, levels 1-9.
    Gzip,
    /// Brotli, levels 0-11.
    Brotli,
    /// LZ4 (written as the LZ4_RAW Parquet codec), no level.
    Lz4,
    /// Snappy, no level.
    Snappy,
    /// No compression.
    Uncompressed,
}

impl Codec {
    /// Parse a codec name, case-insensitively.
    pub fn parse(name: &str) -> Result<Self, WriteError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "ZSTD" => Ok(Codec::Zstd),
            "GZIP" => Ok(Codec::Gzip),
            "BROTLI" => Ok(Codec::Brotli),
            "LZ4" | "LZ4_RAW" => Ok(Codec::Lz4),
            "SNAPPY" => Ok(Codec::Snappy),
            "UNCOMPRESSED" | "NONE" => Ok(Codec::Uncompressed),
            other => Err(WriteError::Configuration(format!(
                "unknown compression codec: {other}"
            ))),
        }
    }

    /// The codec name as reported in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            Codec::Zstd => "ZSTD",
            Codec::Gzip => "GZIP",
            Codec::Brotli => "BROTLI",
            Codec::Lz4 => "LZ4",
            Codec::Snappy => "SNAPPY",
            Codec::Uncompressed => "UNCOMPRESSED",
        }
    }

    /// Valid level range, or `None` for codecs that take no level.
    pub fn valid_levels(self) -> Option<RangeInclusive<i32>> {
        match self {
            Codec::Zstd => Some(1..=22),
            Codec::Gzip => Some(1..=9),
            Codec::Brotli => Some(0..=11),
            Codec::Lz4 | Codec::Snappy | Codec::Uncompressed => None,
        }
    }
}

/// A validated codec plus optional level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionSpec {
    codec: Codec,
    level: Option<i32>,
}

impl CompressionSpec {
    /// Build a spec, rejecting out-of-range levels and levels given for
    /// codecs that take none.
    pub fn new(codec: Codec, level: Option<i32>) -> Result<Self, WriteError> {
        if let Some(level) = level {
            match codec.valid_levels() {
                Some(range) if range.contains(&level) => {}
                Some(range) => {
                    return Err(WriteError::Configuration(format!(
                        "compression level {level} out of range for {} (valid: {}-{})",
                        codec.name(),
                        range.start(),
                        range.end()
                    )))
                }
                None => {
                    return Err(WriteError::Configuration(format!(
                        "codec {} does not take a compression level",
                        codec.name()
                    )))
                }
            }
        }
        Ok(Self { codec, level })
    }

    /// Parse a codec name and optional level in one step.
    pub fn parse(name: &str, level: Option<i32>) -> Result<Self, WriteError> {
        Self::new(Codec::parse(name)?, level)
    }

    /// The codec.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The explicit level, if one was given.
    pub fn level(&self) -> Option<i32> {
        self.level
    }

    /// The Parquet library's compression value. Levels were range-checked
    /// at construction, so the library-side constructors cannot fail here.
    pub fn to_parquet(&self) -> Result<Compression, WriteError> {
        let to_config = |e: parquet::errors::ParquetError| WriteError::Configuration(e.to_string());
        Ok(match (self.codec, self.level) {
            (Codec::Zstd, level) => {
                Compression::ZSTD(ZstdLevel::try_new(level.unwrap_or(3)).map_err(to_config)?)
            }
            (Codec::Gzip, Some(level)) => {
                Compression::GZIP(GzipLevel::try_new(level as u32).map_err(to_config)?)
            }
            (Codec::Gzip, None) => Compression::GZIP(GzipLevel::default()),
            (Codec::Brotli, Some(level)) => {
                Compression::BROTLI(BrotliLevel::try_new(level as u32).map_err(to_config)?)
            }
            (Codec::Brotli, None) => Compression::BROTLI(BrotliLevel::default()),
            (Codec::Lz4, _) => Compression::LZ4_RAW,
            (Codec::Snappy, _) => Compression::SNAPPY,
            (Codec::Uncompressed, _) => Compression::UNCOMPRESSED,
        })
    }
}

/// Row-group sizing: an explicit row count, a target size in megabytes, or
/// the writer default. Giving both explicit forms is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowGroupSpec {
    /// Let the writer use its own default row-group size.
    #[default]
    Default,
    /// Exactly this many rows per row group.
    Rows(usize),
    /// Size row groups to roughly this many megabytes.
    TargetMb(usize),
}

impl RowGroupSpec {
    /// Build from the two optional user-facing knobs.
    pub fn from_options(rows: Option<usize>, target_mb: Option<usize>) -> Result<Self, WriteError> {
        match (rows, target_mb) {
            (Some(_), Some(_)) => Err(WriteError::Configuration(
                "row_group_rows and row_group_target_mb are mutually exclusive".to_string(),
            )),
            (Some(0), None) | (None, Some(0)) => Err(WriteError::Configuration(
                "row group size must be positive".to_string(),
            )),
            (Some(rows), None) => Ok(RowGroupSpec::Rows(rows)),
            (None, Some(mb)) => Ok(RowGroupSpec::TargetMb(mb)),
            (None, None) => Ok(RowGroupSpec::Default),
        }
    }

    /// The row count per group, converting a megabyte target using the
    /// assumed row width. `None` means the writer default applies.
    pub fn resolve_rows(&self, estimated_row_width: u64) -> Option<usize> {
        match self {
            RowGroupSpec::Default => None,
            RowGroupSpec::Rows(rows) => Some(*rows),
            RowGroupSpec::TargetMb(mb) => {
                let bytes = (*mb as u64) * 1024 * 1024;
                let width = estimated_row_width.max(1);
                Some(((bytes / width).max(1)) as usize)
            }
        }
    }
}

/// Validated writer-side options shared by every strategy.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Compression codec and level.
    pub compression: CompressionSpec,
    /// Row-group sizing.
    pub row_group: RowGroupSpec,
    /// Rows per streamed batch.
    pub batch_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: CompressionSpec::default(),
            row_group: RowGroupSpec::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl WriterOptions {
    /// Parquet writer properties embedding `kv_metadata` in the footer.
    pub fn to_writer_properties(
        &self,
        kv_metadata: &[(String, String)],
    ) -> Result<WriterProperties, WriteError> {
        let mut builder = WriterProperties::builder().set_compression(self.compression.to_parquet()?);
        if let Some(rows) = self.row_group.resolve_rows(ESTIMATED_ROW_WIDTH_BYTES) {
            builder = builder.set_max_row_group_size(rows);
        }
        if !kv_metadata.is_empty() {
            let kv = kv_metadata
                .iter()
                .map(|(k, v)| KeyValue {
                    key: k.clone(),
                    value: Some(v.clone()),
                })
                .collect();
            builder = builder.set_key_value_metadata(Some(kv));
        }
        Ok(builder.build())
    }
}
