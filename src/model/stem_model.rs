use crate::error::Result;

/// One hop's worth of input, as seen on the compute side.
#[derive(Debug, Clone, Copy)]
pub struct ChunkInput<'a> {
    /// Planar samples, one buffer per channel, all `len` long.
    pub channels: &'a [Vec<f32>],
    pub len: usize,
    pub sample_rate: u32,
    pub stem_count: usize,
}

/// A separation backend living inside the compute context.
///
/// Implementations must return exactly `stem_count` buffers of `len`
/// samples, in the order vocals, drums, bass, other, guitar, piano.
pub trait StemModel: Send + Sync {
    fn name(&self) -> &str;

    /// Longest hop, in samples, the backend can take in one call.
    fn max_chunk_len(&self) -> Option<usize> {
        None
    }

    /// Rate the backend was trained at. Hops are resampled to it.
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Called once when the model is installed in a compute context.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    fn separate(&self, input: ChunkInput<'_>) -> Result<Vec<Vec<f32>>>;
}
