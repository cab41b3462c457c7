#[cfg(test)]
mod tests {
    use crate::encoding::{Decode, Encode, EncodingError, decode_from_slice, encode_to_vec};

    #[test]
    fn test_u32_round_trip() {
        for value in [0u32, 1, 0xFF, 0xDEAD_BEEF, u32::MAX] {
            let bytes = encode_to_vec(&value).unwrap();
            assert_eq!(bytes.len(), 4);
            let (decoded, consumed) = u32::decode_from(&bytes).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, 4);
        }
    }

    #[test]
    fn test_u64_round_trip() {
        for value in [0u64, 1, u64::from(u32::MAX) + 1, u64::MAX] {
            let bytes = encode_to_vec(&value).unwrap();
            assert_eq!(bytes.len(), 8);
            let (decoded, consumed) = u64::decode_from(&bytes).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, 8);
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode_to_vec(&0x0102_0304u32).unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_fixed_array_round_trip() {
        let magic = *b"HFTB";
        let bytes = encode_to_vec(&magic).unwrap();
        assert_eq!(bytes, b"HFTB");
        let (decoded, consumed) = <[u8; 4]>::decode_from(&bytes).unwrap();
        assert_eq!(decoded, magic);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_byte_vec_round_trip() {
        let data = b"an opaque value".to_vec();
        let bytes = encode_to_vec(&data).unwrap();
        assert_eq!(bytes.len(), 4 + data.len());
        let (decoded, consumed) = <Vec<u8>>::decode_from(&bytes).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_empty_byte_vec() {
        let data: Vec<u8> = Vec::new();
        let bytes = encode_to_vec(&data).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        let (decoded, _) = <Vec<u8>>::decode_from(&bytes).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_borrowed_slice_matches_owned() {
        let owned = b"same bytes".to_vec();
        let mut from_slice = Vec::new();
        owned.as_slice().encode_to(&mut from_slice).unwrap();
        assert_eq!(from_slice, encode_to_vec(&owned).unwrap());
    }

    #[test]
    fn test_sequential_decode_walks_buffer() {
        let mut buf = Vec::new();
        7u32.encode_to(&mut buf).unwrap();
        99u64.encode_to(&mut buf).unwrap();
        b"tail".to_vec().encode_to(&mut buf).unwrap();

        let mut off = 0;
        let (a, n) = u32::decode_from(&buf[off..]).unwrap();
        off += n;
        let (b, n) = u64::decode_from(&buf[off..]).unwrap();
        off += n;
        let (c, n) = <Vec<u8>>::decode_from(&buf[off..]).unwrap();
        off += n;

        assert_eq!(a, 7);
        assert_eq!(b, 99);
        assert_eq!(c, b"tail");
        assert_eq!(off, buf.len());
    }

    #[test]
    fn test_short_buffer_is_eof() {
        let result = decode_from_slice::<u64>(&[1, 2, 3]);
        assert!(matches!(
            result,
            Err(EncodingError::UnexpectedEof {
                needed: 8,
                available: 3
            })
        ));
    }
}
