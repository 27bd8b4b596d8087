use crate::slice_utils::write_to_offset_unchecked;
use etherparse::Icmpv4Slice;

pub struct Icmpv4HeaderSliceMut<'a> {
    slice: &'a mut [u8],
}

impl<'a> Icmpv4HeaderSliceMut<'a> {
    /// Creates a new [`Icmpv4HeaderSliceMut`].
    pub fn from_slice(slice: &'a mut [u8]) -> Result<Self, etherparse::err::LenError> {
        Icmpv4Slice::from_slice(slice)?;

        Ok(Self { slice })
    }

    pub fn set_identifier(&mut self, id: u16) {
        // Safety: Slice is at least 8 bytes long (echo header) as checked in the ctor.
        unsafe { write_to_offset_unchecked(self.slice, 4, id.to_be_bytes()) };
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        // Safety: Slice is at least 4 bytes long as checked in the ctor.
        unsafe { write_to_offset_unchecked(self.slice, 2, checksum.to_be_bytes()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    #[test]
    fn smoke() {
        let mut buf = Vec::new();

        PacketBuilder::ipv4([0u8; 4], [0u8; 4], 0)
            .icmpv4_echo_request(1, 1)
            .write(&mut buf, &[])
            .unwrap();

        let mut slice = Icmpv4HeaderSliceMut::from_slice(&mut buf[20..]).unwrap();

        slice.set_identifier(77);
        slice.set_checksum(88);

        let slice = Icmpv4Slice::from_slice(&buf[20..]).unwrap();

        assert_eq!(slice.checksum(), 88);
    }
}
