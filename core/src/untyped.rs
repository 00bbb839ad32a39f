use crate::{Value, ValueType, F32, F64};

/// An untyped [`Value`].
///
/// This is the cell type of the operand stack, of locals and of globals. The
/// instruction being executed decides which of the four views applies;
/// validation guarantees the views always line up, so no tag is stored.
///
/// Writes of 32-bit values zero the upper half: the `i64` view of a freshly
/// pushed `i32` is its zero-extended value.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct UntypedValue {
    bits: u64,
}

impl UntypedValue {
    /// Returns the underlying bits of the [`UntypedValue`].
    pub fn to_bits(self) -> u64 {
        self.bits
    }

    /// Creates an [`UntypedValue`] from the given bits.
    pub fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// Converts the [`UntypedValue`] into a [`Value`] of the given type.
    pub fn with_type(self, value_type: ValueType) -> Value {
        match value_type {
            ValueType::I32 => Value::I32(<_>::from(self)),
            ValueType::I64 => Value::I64(<_>::from(self)),
            ValueType::F32 => Value::F32(<_>::from(self)),
            ValueType::F64 => Value::F64(<_>::from(self)),
        }
    }
}

macro_rules! impl_from_unsigned_prim {
    ( $( $prim:ty ),* $(,)? ) => {
        $(
            impl From<$prim> for UntypedValue {
                fn from(value: $prim) -> Self {
                    Self { bits: value as u64 }
                }
            }
        )*
    };
}
impl_from_unsigned_prim!(bool, u8, u16, u32, u64);

macro_rules! impl_from_signed_prim {
    ( $( $prim:ty as $base:ty ),* $(,)? ) => {
        $(
            // Through the unsigned type of the same width, so that narrow
            // values land zero-extended rather than sign-extended.
            impl From<$prim> for UntypedValue {
                fn from(value: $prim) -> Self {
                    Self { bits: value as $base as u64 }
                }
            }
        )*
    };
}
impl_from_signed_prim!(i8 as u8, i16 as u16, i32 as u32, i64 as u64);

impl From<f32> for UntypedValue {
    fn from(value: f32) -> Self {
        Self {
            bits: value.to_bits() as u64,
        }
    }
}

impl From<f64> for UntypedValue {
    fn from(value: f64) -> Self {
        Self {
            bits: value.to_bits(),
        }
    }
}

impl From<F32> for UntypedValue {
    fn from(value: F32) -> Self {
        Self {
            bits: value.to_bits() as u64,
        }
    }
}

impl From<F64> for UntypedValue {
    fn from(value: F64) -> Self {
        Self {
            bits: value.to_bits(),
        }
    }
}

impl From<Value> for UntypedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::I32(value) => value.into(),
            Value::I64(value) => value.into(),
            Value::F32(value) => value.into(),
            Value::F64(value) => value.into(),
        }
    }
}

macro_rules! impl_from_untyped_for_int {
    ( $( $int:ty ),* $(,)? ) => {
        $(
            impl From<UntypedValue> for $int {
                fn from(untyped: UntypedValue) -> Self {
                    untyped.to_bits() as _
                }
            }
        )*
    };
}
impl_from_untyped_for_int!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! impl_from_untyped_for_float {
    ( $( $float:ty ),* $(,)? ) => {
        $(
            impl From<UntypedValue> for $float {
                fn from(untyped: UntypedValue) -> Self {
                    Self::from_bits(untyped.to_bits() as _)
                }
            }
        )*
    };
}
impl_from_untyped_for_float!(f32, f64, F32, F64);

impl From<UntypedValue> for bool {
    fn from(untyped: UntypedValue) -> Self {
        untyped.to_bits() != 0
    }
}
