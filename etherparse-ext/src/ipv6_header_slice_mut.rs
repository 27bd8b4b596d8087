use crate::slice_utils::write_to_offset_unchecked;
use etherparse::Ipv6HeaderSlice;

pub struct Ipv6HeaderSliceMut<'a> {
    slice: &'a mut [u8],
}

impl<'a> Ipv6HeaderSliceMut<'a> {
    /// Creates a new [`Ipv6HeaderSliceMut`].
    pub fn from_slice(slice: &'a mut [u8]) -> Result<Self, etherparse::err::LenError> {
        Ipv6HeaderSlice::from_slice(slice)?;

        Ok(Self { slice })
    }

    pub fn set_source(&mut self, src: [u8; 16]) {
        // Safety: Slice is at least 40 bytes long as checked in the ctor.
        unsafe { write_to_offset_unchecked(self.slice, 8, src) };
    }

    pub fn set_destination(&mut self, dst: [u8; 16]) {
        // Safety: Slice is at least 40 bytes long as checked in the ctor.
        unsafe { write_to_offset_unchecked(self.slice, 24, dst) };
    }

    /// Sets the ECN bits within the traffic class, leaving DSCP and the flow label untouched.
    pub fn set_ecn(&mut self, ecn: u8) {
        self.slice[1] = (self.slice[1] & 0b1100_1111) | ((ecn & 0b11) << 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    #[test]
    fn smoke() {
        let mut buf = Vec::new();

        PacketBuilder::ipv6([1; 16], [2; 16], 0)
            .udp(10, 20)
            .write(&mut buf, &[])
            .unwrap();

        let mut slice = Ipv6HeaderSliceMut::from_slice(&mut buf).unwrap();

        slice.set_source([3; 16]);
        slice.set_destination([4; 16]);
        slice.set_ecn(0b10);

        let slice = Ipv6HeaderSlice::from_slice(&buf).unwrap();

        assert_eq!(slice.source(), [3; 16]);
        assert_eq!(slice.destination(), [4; 16]);
        assert_eq!(slice.ecn(), 0b10);
    }
}
