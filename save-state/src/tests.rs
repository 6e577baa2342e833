use super::*;

macro_rules! test_serialize_int {
    ($t:ty, $iter:expr) => {{
        let mut s = SaveStateSerializer::new();
        for i in $iter {
            i.serialize(&mut s);
            assert_eq!(s.data.as_slice(), i.to_be_bytes().as_slice());
            let mut d = SaveStateDeserializer::new(&s.data);
            let mut v: $t = 0;
            v.deserialize(&mut d).unwrap();
            assert_eq!(i, v);
            assert!(d.is_empty());
            s.data.clear();
        }
    }};
}

#[test]
pub fn test_serialize_u16() {
    test_serialize_int!(u16, 0..=0xffffu16)
}

#[test]
pub fn test_serialize_i16() {
    test_serialize_int!(i16, -0x8000..=0x7fffi16)
}

#[test]
pub fn test_serialize_i32() {
    test_serialize_int!(
        i32,
        (0..=0x1111u32)
            .map(|i| (i * 17) ^ (i << 11))
            .map(|v| v as i32 - 0x400000)
    )
}

#[test]
pub fn test_big_endian_layout() {
    let mut s = SaveStateSerializer::new();
    0x1234u16.serialize(&mut s);
    0xdeadbeefu32.serialize(&mut s);
    true.serialize(&mut s);
    assert_eq!(s.data, [0x12, 0x34, 0xde, 0xad, 0xbe, 0xef, 1]);
}

#[test]
pub fn test_block_header() {
    let mut s = SaveStateSerializer::new();
    s.block("ARE", |s| {
        0x12u8.serialize(s);
        0x3456u16.serialize(s);
    });
    assert_eq!(&s.data[..BLOCK_HEADER_LEN], b"ARE:000003:");
    assert_eq!(&s.data[BLOCK_HEADER_LEN..], &[0x12, 0x34, 0x56]);

    let mut d = SaveStateDeserializer::new(&s.data);
    assert_eq!(d.peek_block_name(), Some("ARE"));
    let mut body = d.block("ARE").unwrap();
    let (mut a, mut b) = (0u8, 0u16);
    a.deserialize(&mut body).unwrap();
    b.deserialize(&mut body).unwrap();
    body.finish("ARE").unwrap();
    assert_eq!((a, b), (0x12, 0x3456));
    assert!(d.is_empty());
}

#[test]
pub fn test_block_mismatch() {
    let mut s = SaveStateSerializer::new();
    s.raw_block("CPU", &[0; 4]);
    let mut d = SaveStateDeserializer::new(&s.data);
    assert_eq!(
        d.block("REG").unwrap_err(),
        Error::BlockMismatch {
            expected: "REG".into(),
            found: "CPU".into()
        }
    );
}

#[test]
pub fn test_truncated_data() {
    let data = [1u8, 2, 3];
    let mut d = SaveStateDeserializer::new(&data);
    let mut v = 0u32;
    assert_eq!(
        v.deserialize(&mut d),
        Err(Error::UnexpectedEnd {
            needed: 4,
            available: 3
        })
    );
    assert_eq!(v, 0);
}

#[test]
pub fn test_vec_and_option() {
    let mut s = SaveStateSerializer::new();
    vec![-3i16, 7, 0x1000].serialize(&mut s);
    Some(5u8).serialize(&mut s);
    None::<u8>.serialize(&mut s);
    let mut d = SaveStateDeserializer::new(&s.data);
    let mut v: Vec<i16> = vec![];
    let (mut a, mut b) = (None::<u8>, Some(1u8));
    v.deserialize(&mut d).unwrap();
    a.deserialize(&mut d).unwrap();
    b.deserialize(&mut d).unwrap();
    assert_eq!(v, [-3, 7, 0x1000]);
    assert_eq!((a, b), (Some(5), None));
}

#[test]
pub fn test_vec_length_is_bounded() {
    let data = [0xff, 0xff, 0xff, 0xff, 0];
    let mut d = SaveStateDeserializer::new(&data);
    let mut v: Vec<u8> = vec![];
    assert!(v.deserialize(&mut d).is_err());
    assert!(v.is_empty());
}
