//! Fixed-size interleaved stereo blocks and their wire encoding.

/// Sample value that, repeated over a whole block, marks a splice point.
pub const SPLICE_SENTINEL: f32 = -1.0;

/// One block of interleaved stereo `f32` samples (L, R, L, R, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    samples: Vec<f32>,
}

impl AudioBlock {
    /// Creates a silent block of `frames` stereo frames.
    pub fn new(frames: usize) -> Self {
        Self {
            samples: vec![0.0; frames * 2],
        }
    }

    /// Creates a block from interleaved samples.
    pub fn from_samples(samples: Vec<f32>) -> Self {
        debug_assert!(samples.len() % 2 == 0, "stereo blocks hold sample pairs");
        Self { samples }
    }

    /// Creates a block where every sample is the splice sentinel.
    pub fn splice_marker(frames: usize) -> Self {
        Self {
            samples: vec![SPLICE_SENTINEL; frames * 2],
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Returns the (left, right) pair of one frame.
    pub fn frame(&self, index: usize) -> (f32, f32) {
        (self.samples[index * 2], self.samples[index * 2 + 1])
    }

    /// Zeroes the block.
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }

    /// Returns true if every sample is the splice sentinel.
    pub fn is_splice_marker(&self) -> bool {
        !self.samples.is_empty() && self.samples.iter().all(|&s| s == SPLICE_SENTINEL)
    }

    /// Adds `other` into this block sample by sample.
    pub fn mix_in(&mut self, other: &AudioBlock) {
        debug_assert_eq!(self.samples.len(), other.samples.len());
        for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
            *dst += *src;
        }
    }

    /// Writes this block scaled by `gain` into `target`.
    pub fn scale_into(&self, gain: f32, target: &mut AudioBlock) {
        debug_assert_eq!(self.samples.len(), target.samples.len());
        for (dst, src) in target.samples.iter_mut().zip(&self.samples) {
            *dst = *src * gain;
        }
    }

    /// Appends the little-endian wire encoding of the block to `out`.
    pub fn write_le_bytes(&self, out: &mut Vec<u8>) {
        out.reserve(self.samples.len() * 4);
        for sample in &self.samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }

    /// Returns the little-endian wire encoding of the block.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 4);
        self.write_le_bytes(&mut out);
        out
    }

    /// Overwrites the block from its wire encoding.
    ///
    /// `bytes` must be exactly four bytes per sample.
    pub fn copy_from_le_bytes(&mut self, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.samples.len() * 4);
        for (sample, chunk) in self.samples.iter_mut().zip(bytes.chunks_exact(4)) {
            *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }
}

/// A reply carried more bytes than the block being assembled can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    pub expected: usize,
    pub received: usize,
}

/// Reassembles one block from pipe reads of arbitrary size.
///
/// Pipe reads may return less than a full block, so chunks are staged until
/// the expected byte count is reached. A chunk that would go past it is a
/// protocol violation.
#[derive(Debug)]
pub struct BlockAssembler {
    expected: usize,
    staging: Vec<u8>,
}

impl BlockAssembler {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            staging: Vec::with_capacity(expected),
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn received(&self) -> usize {
        self.staging.len()
    }

    pub fn remaining(&self) -> usize {
        self.expected - self.staging.len()
    }

    pub fn is_complete(&self) -> bool {
        self.staging.len() == self.expected
    }

    /// Drops any staged bytes.
    pub fn reset(&mut self) {
        self.staging.clear();
    }

    /// Stages one chunk. Returns true once the block is complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<bool, Overflow> {
        let received = self.staging.len() + chunk.len();
        if received > self.expected {
            return Err(Overflow {
                expected: self.expected,
                received,
            });
        }
        self.staging.extend_from_slice(chunk);
        Ok(self.is_complete())
    }

    /// Decodes the completed block into `block` and resets for the next one.
    pub fn finish_into(&mut self, block: &mut AudioBlock) {
        debug_assert!(self.is_complete());
        block.copy_from_le_bytes(&self.staging);
        self.staging.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_block(frames: usize) -> AudioBlock {
        let samples = (0..frames * 2)
            .map(|i| (i as f32 * 0.37).sin() * 0.8)
            .collect();
        AudioBlock::from_samples(samples)
    }

    #[test]
    fn test_splice_marker_detection() {
        assert!(AudioBlock::splice_marker(16).is_splice_marker());
        assert!(!AudioBlock::new(16).is_splice_marker());

        let mut almost = AudioBlock::splice_marker(16);
        almost.samples_mut()[31] = -0.99;
        assert!(!almost.is_splice_marker());
    }

    #[test]
    fn test_mix_in_sums_samples() {
        let a = AudioBlock::from_samples(vec![0.125, 0.25, 0.375, 0.5]);
        let b = AudioBlock::from_samples(vec![1.0, -1.0, 0.5, 0.0]);
        let mut master = AudioBlock::new(2);
        master.mix_in(&a);
        master.mix_in(&b);
        assert_eq!(master.samples(), &[1.125, -0.75, 0.875, 0.5]);
        assert_eq!(master.frame(1), (0.875, 0.5));
    }

    #[test]
    fn test_wire_encoding_is_little_endian() {
        let block = AudioBlock::from_samples(vec![1.0, -2.5]);
        let bytes = block.to_le_bytes();
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn test_single_read_assembly() {
        let source = ramp_block(64);
        let bytes = source.to_le_bytes();
        let mut assembler = BlockAssembler::new(bytes.len());
        assert_eq!(assembler.feed(&bytes), Ok(true));

        let mut decoded = AudioBlock::new(64);
        assembler.finish_into(&mut decoded);
        assert_eq!(decoded, source);
        assert_eq!(assembler.received(), 0);
    }

    #[test]
    fn test_split_reads_reassemble_identically() {
        let frames = 64;
        let source = ramp_block(frames);
        let bytes = source.to_le_bytes();
        let total = bytes.len();

        let mut whole = AudioBlock::new(frames);
        let mut assembler = BlockAssembler::new(total);
        assembler.feed(&bytes).unwrap();
        assembler.finish_into(&mut whole);

        for k in 1..total {
            let mut assembler = BlockAssembler::new(total);
            assert_eq!(assembler.feed(&bytes[..k]), Ok(false), "k = {}", k);
            assert_eq!(assembler.remaining(), total - k);
            assert_eq!(assembler.feed(&bytes[k..]), Ok(true), "k = {}", k);

            let mut split = AudioBlock::new(frames);
            assembler.finish_into(&mut split);
            assert_eq!(split, whole, "k = {}", k);
        }
    }

    #[test]
    fn test_too_many_bytes_fails_fast() {
        let mut assembler = BlockAssembler::new(8);
        assert_eq!(assembler.feed(&[0; 6]), Ok(false));
        assert_eq!(
            assembler.feed(&[0; 4]),
            Err(Overflow {
                expected: 8,
                received: 10
            })
        );
        // Staged bytes are untouched by the rejected chunk.
        assert_eq!(assembler.received(), 6);
    }

    #[test]
    fn test_scale_into_never_amplifies() {
        let source = ramp_block(32);
        let mut target = AudioBlock::new(32);
        source.scale_into(0.3, &mut target);
        for (scaled, original) in target.samples().iter().zip(source.samples()) {
            assert!(scaled.abs() <= original.abs());
        }
    }
}
