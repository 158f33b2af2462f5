use crate::SnapshotError;

/// Fixed-width integers stored big-endian in a snapshot.
pub(crate) trait BeBytes: Sized {
    const SIZE: usize;

    fn write_be(self, out: &mut Vec<u8>);
    fn read_be(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_be_bytes {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BeBytes for $ty {
                const SIZE: usize = core::mem::size_of::<$ty>();

                fn write_be(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_be_bytes());
                }

                fn read_be(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$ty>::from_be_bytes)
                }
            }
        )*
    };
}

impl_be_bytes!(u8, u32, u64, u128);

#[derive(Default)]
pub(crate) struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub(crate) fn put<T: BeBytes>(&mut self, value: T) -> &mut Self {
        value.write_be(&mut self.bytes);
        self
    }

    /// Writes a collection length as a `u32`, saturating at `u32::MAX`.
    pub(crate) fn put_len(&mut self, len: usize) -> &mut Self {
        self.put(u32::try_from(len).unwrap_or(u32::MAX))
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn take<T: BeBytes>(&mut self) -> Result<T, SnapshotError> {
        let (head, rest) = self
            .bytes
            .split_at_checked(T::SIZE)
            .ok_or(SnapshotError::UnexpectedEnd)?;
        self.bytes = rest;
        T::read_be(head).ok_or(SnapshotError::UnexpectedEnd)
    }

    pub(crate) fn take_len(&mut self) -> Result<usize, SnapshotError> {
        let len: u32 = self.take()?;
        usize::try_from(len).map_err(|_| SnapshotError::UnexpectedEnd)
    }

    /// Fails if any bytes are left over.
    pub(crate) const fn finish(self) -> Result<(), SnapshotError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(SnapshotError::TrailingBytes(self.bytes.len()))
        }
    }
}
