//! Element kinds and the storage element trait.

use crate::ViewError;

/// Storage/quantization kind of a tensor's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementKind {
    /// 8-bit fixed point (Q-format, fractional bits in the quantization record).
    Fx8 = 0,
    /// 16-bit fixed point.
    Fx16 = 1,
    /// 8-bit asymmetric affine.
    Sa8 = 2,
    /// 32-bit asymmetric affine (accumulators, biases).
    Sa32 = 3,
}

impl ElementKind {
    /// Size of one element in bytes.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            ElementKind::Fx8 | ElementKind::Sa8 => 1,
            ElementKind::Fx16 => 2,
            ElementKind::Sa32 => 4,
        }
    }

    /// Whether the kind uses the affine (zero point + scale) scheme.
    #[inline]
    pub fn is_affine(self) -> bool {
        matches!(self, ElementKind::Sa8 | ElementKind::Sa32)
    }

    /// Inclusive value range of the storage type.
    pub fn range(self) -> (i64, i64) {
        match self {
            ElementKind::Fx8 | ElementKind::Sa8 => (i8::MIN as i64, i8::MAX as i64),
            ElementKind::Fx16 => (i16::MIN as i64, i16::MAX as i64),
            ElementKind::Sa32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }

    /// Tag byte used in configuration records.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a tag byte.
    pub fn from_tag(tag: u8) -> crate::Result<Self> {
        match tag {
            0 => Ok(ElementKind::Fx8),
            1 => Ok(ElementKind::Fx16),
            2 => Ok(ElementKind::Sa8),
            3 => Ok(ElementKind::Sa32),
            other => Err(ViewError::UnknownElementKind(other)),
        }
    }
}

/// Integer storage element readable from and writable to a bank.
///
/// Implemented for `i8`, `i16` and `i32`, the three container widths the
/// element kinds map onto.
pub trait Element:
    bytemuck::Pod
    + num_traits::PrimInt
    + num_traits::WrappingAdd
    + num_traits::WrappingMul
    + Into<i64>
    + Default
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Size in bytes.
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Widen to `i64` without loss.
    #[inline]
    fn widen(self) -> i64 {
        self.into()
    }

    /// Narrow an `i64`, saturating at the type bounds.
    fn saturate(value: i64) -> Self;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                #[inline]
                fn saturate(value: i64) -> Self {
                    value.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t
                }
            }
        )*
    };
}

impl_element!(i8, i16, i32);

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_element<T: Element>() {}

    #[test]
    fn test_standard_types() {
        assert_element::<i8>();
        assert_element::<i16>();
        assert_element::<i32>();
        assert_eq!(<i16 as Element>::SIZE, 2);
    }

    #[test]
    fn test_kind_sizes_and_tags() {
        for kind in [
            ElementKind::Fx8,
            ElementKind::Fx16,
            ElementKind::Sa8,
            ElementKind::Sa32,
        ] {
            assert_eq!(ElementKind::from_tag(kind.tag()).unwrap(), kind);
        }
        assert_eq!(ElementKind::Sa32.size(), 4);
        assert!(ElementKind::Sa8.is_affine());
        assert!(!ElementKind::Fx16.is_affine());
        assert_eq!(
            ElementKind::from_tag(9),
            Err(ViewError::UnknownElementKind(9))
        );
    }

    #[test]
    fn test_saturate() {
        assert_eq!(i8::saturate(300), 127);
        assert_eq!(i8::saturate(-300), -128);
        assert_eq!(i16::saturate(-5), -5);
        assert_eq!(i32::saturate(i64::MAX), i32::MAX);
    }
}
