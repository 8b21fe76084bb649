/// Assert that a value can be read back from an expression producing bytes,
/// and that writing the expected Rust value produces those same bytes.
///
/// Two forms of `bytes_value` are supported:
///
/// * `bytes_value(auto_endian) = $number` derives the big- and little-endian
///   byte representations from a Rust number with `.to_be_bytes()` /
///   `.to_le_bytes()`, and asserts both directions.
/// * `bytes_value(big_endian) = $bytes` takes an already-encoded big-endian
///   byte slice and only asserts that direction (useful when the bytes don't
///   come from a single Rust number, e.g. a whole record).
macro_rules! assert_read_write {
    (
        $type:ty : Read<$read_from:ty> + Write<$write_from:ty> {
            bytes_value(auto_endian) = $value:expr,
            rust_value = $rust_value:expr $(,)?
        }
    ) => {{
        {
            let bytes = ($value).to_be_bytes();

            assert_eq!(
                <$type as crate::Read<$read_from>>::read::<crate::BigEndian, ()>(&bytes),
                Ok((&[] as &[u8], ($rust_value).clone())),
                "read as big endian",
            );

            let mut written = Vec::new();
            <$type as crate::Write<$write_from>>::write::<crate::BigEndian, _>(
                &($rust_value).clone(),
                &mut written,
            )
            .unwrap();
            assert_eq!(&written[..], &bytes[..], "write as big endian");
        }

        {
            let bytes = ($value).to_le_bytes();

            assert_eq!(
                <$type as crate::Read<$read_from>>::read::<crate::LittleEndian, ()>(&bytes),
                Ok((&[] as &[u8], ($rust_value).clone())),
                "read as little endian",
            );

            let mut written = Vec::new();
            <$type as crate::Write<$write_from>>::write::<crate::LittleEndian, _>(
                &($rust_value).clone(),
                &mut written,
            )
            .unwrap();
            assert_eq!(&written[..], &bytes[..], "write as little endian");
        }
    }};

    (
        $type:ty : Read<$read_from:ty> + Write<$write_from:ty> {
            bytes_value(big_endian) = $bytes:expr,
            rust_value = $rust_value:expr $(,)?
        }
    ) => {{
        let bytes = $bytes;

        assert_eq!(
            <$type as crate::Read<$read_from>>::read::<crate::BigEndian, ()>(bytes),
            Ok((&[] as &[u8], ($rust_value).clone())),
            "read as big endian",
        );

        let mut written = Vec::new();
        <$type as crate::Write<$write_from>>::write::<crate::BigEndian, _>(
            &($rust_value).clone(),
            &mut written,
        )
        .unwrap();
        assert_eq!(&written[..], bytes, "write as big endian");
    }};
}
