//! Save state helpers
//!
//! Values are written big-endian and grouped into named blocks of the form
//! `NAM:000123:` followed by the block body, which is the layout used by
//! snes9x freeze files.

#[cfg(test)]
mod tests;

/// Length of a block header (`NAM:000123:`)
pub const BLOCK_HEADER_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unexpected end of save state data ({needed} bytes needed, {available} available)")]
    UnexpectedEnd { needed: usize, available: usize },
    #[error("expected block `{expected}`, found `{found}`")]
    BlockMismatch { expected: String, found: String },
    #[error("malformed block header")]
    BadBlockHeader,
    #[error("block `{block}` has {bytes} unread bytes")]
    TrailingData { block: String, bytes: usize },
    #[error("invalid value {value} for {what}")]
    InvalidValue { what: &'static str, value: u32 },
}

#[derive(Debug, Default, Clone)]
pub struct SaveStateSerializer {
    pub data: Vec<u8>,
}

impl SaveStateSerializer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes)
    }

    /// Write a named block whose body is produced by `f`
    pub fn block<F: FnOnce(&mut Self)>(&mut self, name: &str, f: F) {
        let mut body = Self::new();
        f(&mut body);
        self.raw_block(name, &body.data)
    }

    pub fn raw_block(&mut self, name: &str, body: &[u8]) {
        debug_assert_eq!(name.len(), 3);
        self.data
            .extend_from_slice(format!("{}:{:06}:", name, body.len()).as_bytes());
        self.data.extend_from_slice(body)
    }
}

#[derive(Debug, Clone)]
pub struct SaveStateDeserializer<'a> {
    data: &'a [u8],
}

impl<'a> SaveStateDeserializer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.data.len() < n {
            return Err(Error::UnexpectedEnd {
                needed: n,
                available: self.data.len(),
            });
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut arr = [0; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    /// Name of the next block, if a complete header follows
    pub fn peek_block_name(&self) -> Option<&'a str> {
        let header = self.data.get(..BLOCK_HEADER_LEN)?;
        if header[3] != b':' || header[10] != b':' {
            return None;
        }
        core::str::from_utf8(&header[..3]).ok()
    }

    /// Consume the header of the block called `name` and return a
    /// deserializer limited to its body
    pub fn block(&mut self, name: &str) -> Result<SaveStateDeserializer<'a>, Error> {
        let header = self.take(BLOCK_HEADER_LEN)?;
        if header[3] != b':' || header[10] != b':' {
            return Err(Error::BadBlockHeader);
        }
        let found = core::str::from_utf8(&header[..3]).map_err(|_| Error::BadBlockHeader)?;
        if found != name {
            return Err(Error::BlockMismatch {
                expected: name.to_string(),
                found: found.to_string(),
            });
        }
        let len = core::str::from_utf8(&header[4..10])
            .ok()
            .and_then(|len| len.parse::<usize>().ok())
            .ok_or(Error::BadBlockHeader)?;
        Ok(SaveStateDeserializer::new(self.take(len)?))
    }

    /// Fail if a block body was not consumed entirely
    pub fn finish(self, block: &str) -> Result<(), Error> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(Error::TrailingData {
                block: block.to_string(),
                bytes: self.data.len(),
            })
        }
    }
}

pub trait InSaveState: Sized {
    fn serialize(&self, state: &mut SaveStateSerializer);
    fn deserialize(&mut self, state: &mut SaveStateDeserializer) -> Result<(), Error>;
}

macro_rules! impl_for_int {
    ($($t:ty),*) => {$(
        impl InSaveState for $t {
            fn serialize(&self, state: &mut SaveStateSerializer) {
                state.data.extend_from_slice(&self.to_be_bytes())
            }

            fn deserialize(&mut self, state: &mut SaveStateDeserializer) -> Result<(), Error> {
                *self = Self::from_be_bytes(state.take_array()?);
                Ok(())
            }
        }
    )*};
}

impl_for_int! { u8, u16, u32, u64, i8, i16, i32, i64 }

impl<const N: usize, T: InSaveState> InSaveState for [T; N] {
    fn serialize(&self, state: &mut SaveStateSerializer) {
        self.iter().for_each(|i| i.serialize(state))
    }

    fn deserialize(&mut self, state: &mut SaveStateDeserializer) -> Result<(), Error> {
        self.iter_mut().try_for_each(|i| i.deserialize(state))
    }
}

// snes9x stores its `bool8` fields as a plain 0 or 1 byte
impl InSaveState for bool {
    fn serialize(&self, state: &mut SaveStateSerializer) {
        u8::from(*self).serialize(state)
    }

    fn deserialize(&mut self, state: &mut SaveStateDeserializer) -> Result<(), Error> {
        let mut i: u8 = 0;
        i.deserialize(state)?;
        *self = i != 0;
        Ok(())
    }
}

impl<T: InSaveState + Default> InSaveState for Option<T> {
    fn serialize(&self, state: &mut SaveStateSerializer) {
        self.is_some().serialize(state);
        if let Some(v) = self {
            v.serialize(state)
        }
    }

    fn deserialize(&mut self, state: &mut SaveStateDeserializer) -> Result<(), Error> {
        let mut present = false;
        present.deserialize(state)?;
        *self = if present {
            let mut i = T::default();
            i.deserialize(state)?;
            Some(i)
        } else {
            None
        };
        Ok(())
    }
}

impl<T1: InSaveState, T2: InSaveState> InSaveState for (T1, T2) {
    fn serialize(&self, state: &mut SaveStateSerializer) {
        self.0.serialize(state);
        self.1.serialize(state);
    }

    fn deserialize(&mut self, state: &mut SaveStateDeserializer) -> Result<(), Error> {
        self.0.deserialize(state)?;
        self.1.deserialize(state)
    }
}

/// Vectors are prefixed with their element count as `u32`
impl<T: InSaveState + Default> InSaveState for Vec<T> {
    fn serialize(&self, state: &mut SaveStateSerializer) {
        (self.len() as u32).serialize(state);
        self.iter().for_each(|i| i.serialize(state))
    }

    fn deserialize(&mut self, state: &mut SaveStateDeserializer) -> Result<(), Error> {
        let mut n: u32 = 0;
        n.deserialize(state)?;
        // every element takes at least one byte, so this bounds the allocation
        if n as usize > state.remaining() {
            return Err(Error::UnexpectedEnd {
                needed: n as usize,
                available: state.remaining(),
            });
        }
        let mut items = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let mut item = T::default();
            item.deserialize(state)?;
            items.push(item);
        }
        *self = items;
        Ok(())
    }
}
