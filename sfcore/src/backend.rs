/// One block of interleaved PCM frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmBlock<'a> {
    Signed16(&'a [i16]),
    /// Unsigned samples centered at `0x80`
    Unsigned8(&'a [u8]),
}

impl PcmBlock<'_> {
    /// Number of samples (not frames) in the block
    pub fn len(&self) -> usize {
        match self {
            Self::Signed16(s) => s.len(),
            Self::Unsigned8(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait AudioBackend {
    fn push_block(&mut self, block: PcmBlock<'_>);
}

/// A backend dropping every sample
#[derive(Debug, Clone, Copy, Default)]
pub struct Dummy;

impl AudioBackend for Dummy {
    fn push_block(&mut self, _block: PcmBlock<'_>) {}
}

/// A backend keeping every sample in memory
#[derive(Debug, Clone, Default)]
pub struct Collect {
    pub signed: Vec<i16>,
    pub unsigned: Vec<u8>,
    pub blocks: usize,
}

impl AudioBackend for Collect {
    fn push_block(&mut self, block: PcmBlock<'_>) {
        self.blocks += 1;
        match block {
            PcmBlock::Signed16(s) => self.signed.extend_from_slice(s),
            PcmBlock::Unsigned8(s) => self.unsigned.extend_from_slice(s),
        }
    }
}

impl<T: AudioBackend + ?Sized> AudioBackend for &mut T {
    fn push_block(&mut self, block: PcmBlock<'_>) {
        (**self).push_block(block)
    }
}

impl<T: AudioBackend + ?Sized> AudioBackend for Box<T> {
    fn push_block(&mut self, block: PcmBlock<'_>) {
        (**self).push_block(block)
    }
}
