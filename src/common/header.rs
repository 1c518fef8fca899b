use log::trace;

use crate::common::bytes::ByteVector;
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;

/// A structural header that was read from disk and can be rewritten in
/// place when its payload changes size.
pub trait DiskHeader {
    /// Offset of the first header byte, or `None` for a synthesized header.
    fn position(&self) -> Option<u64>;

    /// Number of bytes the header currently occupies on disk.
    fn header_size(&self) -> u64;

    /// Render this header as if its payload were `delta` bytes larger.
    /// The result may be wider than the original (e.g. a 32-bit MP4 box
    /// that needs the 64-bit form).
    fn render_resized(&self, delta: i64) -> Result<ByteVector>;

    /// Rewrite the header on disk. Returns the net delta seen by the parent:
    /// `delta` plus any growth of the header itself.
    fn overwrite(&self, file: &mut TagFile, delta: i64) -> Result<i64> {
        let position = self
            .position()
            .ok_or_else(|| MetaError::ValueError("header was never read from disk".into()))?;
        let rendered = self.render_resized(delta)?;
        let old_size = self.header_size();
        trace!("overwrite header at {} ({} -> {} bytes)", position, old_size, rendered.len());
        file.insert(&rendered, position, old_size)?;
        Ok(delta + rendered.len() as i64 - old_size as i64)
    }
}

/// Apply a payload size change to every ancestor, innermost first.
/// Returns the delta seen above the outermost ancestor.
pub fn propagate_size_delta<H: DiskHeader + ?Sized>(
    file: &mut TagFile,
    ancestors: &[&H],
    delta: i64,
) -> Result<i64> {
    if delta == 0 {
        return Ok(0);
    }
    ancestors
        .iter()
        .try_fold(delta, |delta, header| header.overwrite(file, delta))
}

/// Checked payload size arithmetic shared by the header implementations.
pub fn resized(size: u64, delta: i64, format: &'static str) -> Result<u64> {
    size.checked_add_signed(delta)
        .ok_or_else(|| MetaError::corrupt(format, format!("size {} cannot change by {}", size, delta)))
}
