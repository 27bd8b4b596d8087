use crate::slice_utils::write_to_offset_unchecked;
use etherparse::Icmpv6Slice;

/// Mutable view over an ICMPv6 echo request/reply header.
///
/// Only covers the echo variants; other ICMPv6 message types don't carry an
/// identifier field and aren't rewritten by DNAT.
pub struct Icmpv6EchoHeaderSliceMut<'a> {
    slice: &'a mut [u8],
}

impl<'a> Icmpv6EchoHeaderSliceMut<'a> {
    /// Creates a new [`Icmpv6EchoHeaderSliceMut`].
    pub fn from_slice(slice: &'a mut [u8]) -> Result<Self, etherparse::err::LenError> {
        Icmpv6Slice::from_slice(slice)?;

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

        PacketBuilder::ipv6([0u8; 16], [0u8; 16], 0)
            .icmpv6_echo_request(1, 1)
            .write(&mut buf, &[])
            .unwrap();

        let mut slice = Icmpv6EchoHeaderSliceMut::from_slice(&mut buf[40..]).unwrap();

        slice.set_identifier(77);
        slice.set_checksum(88);

        let slice = Icmpv6Slice::from_slice(&buf[40..]).unwrap();

        assert_eq!(slice.checksum(), 88);
    }
}
