use std::borrow::Cow;

/// Values that can be sent as their in-memory byte representation.
///
/// Byte-like data is borrowed as is. Numeric values use native byte order,
/// and sequences of them are the concatenation of their elements. Text is
/// written as its UTF-8 bytes, without a terminator.
pub trait RawBytes {
    fn raw_bytes(&self) -> Cow<'_, [u8]>;
}

impl RawBytes for [u8] {
    fn raw_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl<const N: usize> RawBytes for [u8; N] {
    fn raw_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl RawBytes for Vec<u8> {
    fn raw_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl RawBytes for str {
    fn raw_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl RawBytes for String {
    fn raw_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl RawBytes for u8 {
    fn raw_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(std::slice::from_ref(self))
    }
}

impl RawBytes for bool {
    fn raw_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Owned(vec![u8::from(*self)])
    }
}

impl<T: RawBytes + ?Sized> RawBytes for &T {
    fn raw_bytes(&self) -> Cow<'_, [u8]> {
        (**self).raw_bytes()
    }
}

macro_rules! impl_raw_bytes_numeric {
    ($($t:ty),* $(,)?) => {
        $(
            impl RawBytes for $t {
                fn raw_bytes(&self) -> Cow<'_, [u8]> {
                    Cow::Owned(self.to_ne_bytes().to_vec())
                }
            }

            impl RawBytes for [$t] {
                fn raw_bytes(&self) -> Cow<'_, [u8]> {
                    Cow::Owned(self.iter().flat_map(|v| v.to_ne_bytes()).collect())
                }
            }

            impl<const N: usize> RawBytes for [$t; N] {
                fn raw_bytes(&self) -> Cow<'_, [u8]> {
                    self.as_slice().raw_bytes()
                }
            }

            impl RawBytes for Vec<$t> {
                fn raw_bytes(&self) -> Cow<'_, [u8]> {
                    self.as_slice().raw_bytes()
                }
            }
        )*
    };
}

impl_raw_bytes_numeric!(i8, u16, i16, u32, i32, u64, i64, u128, i128, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_has_no_terminator() {
        assert_eq!(&*"AT\r".raw_bytes(), b"AT\r");
        assert_eq!(&*String::from("ok").raw_bytes(), b"ok");
    }

    #[test]
    fn test_byte_slices_are_borrowed() {
        let data = vec![1u8, 2, 3];
        assert!(matches!(data.raw_bytes(), Cow::Borrowed(_)));
        assert!(matches!([9u8; 4].raw_bytes(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_scalar_native_order() {
        assert_eq!(&*0x1234u16.raw_bytes(), &0x1234u16.to_ne_bytes());
        assert_eq!(&*(-1i32).raw_bytes(), &[0xFFu8; 4]);
        assert_eq!(&*true.raw_bytes(), &[1u8]);
    }

    #[test]
    fn test_sequences_concatenate() {
        let words = [0x0102u16, 0x0304];
        let mut expected = 0x0102u16.to_ne_bytes().to_vec();
        expected.extend_from_slice(&0x0304u16.to_ne_bytes());
        assert_eq!(&*words.raw_bytes(), expected.as_slice());
        assert_eq!(&*vec![0.5f32].raw_bytes(), &0.5f32.to_ne_bytes());
    }
}
