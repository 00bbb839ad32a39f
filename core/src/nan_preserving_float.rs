//! Bit-exact wrappers around `f32` and `f64`.
//!
//! Native float types normalize NaN payloads on some platforms when values
//! move through registers. Wasm semantics require the stored bit pattern of a
//! NaN to survive loads, stores, `local.*` traffic and reinterpret casts, so
//! the interpreter keeps floats as raw bits and only converts to the native
//! type for actual arithmetic.

use core::{
    cmp::Ordering,
    ops::{Add, Div, Mul, Neg, Sub},
};
use num_traits::float::FloatCore;

macro_rules! nan_preserving_float {
    (
        $( #[$docs:meta] )*
        struct $name:ident($bits:ty as $float:ty);
    ) => {
        $(#[$docs])*
        #[derive(Copy, Clone)]
        pub struct $name($bits);

        impl $name {
            const SIGN_BIT: $bits = 1 << (<$bits>::BITS - 1);

            /// Creates a value from its raw bit pattern.
            #[inline]
            pub fn from_bits(bits: $bits) -> Self {
                Self(bits)
            }

            /// Returns the raw bit pattern.
            #[inline]
            pub fn to_bits(self) -> $bits {
                self.0
            }

            /// Creates a value from a native float.
            #[inline]
            pub fn from_float(value: $float) -> Self {
                Self(value.to_bits())
            }

            /// Returns the value as a native float.
            #[inline]
            pub fn to_float(self) -> $float {
                <$float>::from_bits(self.0)
            }

            /// Returns `true` if the value is a NaN of any payload.
            #[inline]
            pub fn is_nan(self) -> bool {
                self.to_float().is_nan()
            }

            /// Clears the sign bit.
            #[must_use]
            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0 & !Self::SIGN_BIT)
            }

            /// Returns the fractional part.
            #[must_use]
            #[inline]
            pub fn fract(self) -> Self {
                FloatCore::fract(self.to_float()).into()
            }
        }

        impl From<$float> for $name {
            #[inline]
            fn from(value: $float) -> Self {
                Self::from_float(value)
            }
        }

        impl From<$name> for $float {
            #[inline]
            fn from(value: $name) -> Self {
                value.to_float()
            }
        }

        impl From<$bits> for $name {
            #[inline]
            fn from(bits: $bits) -> Self {
                Self::from_bits(bits)
            }
        }

        impl From<$name> for $bits {
            #[inline]
            fn from(value: $name) -> Self {
                value.to_bits()
            }
        }

        impl Neg for $name {
            type Output = Self;

            #[inline]
            fn neg(self) -> Self {
                Self(self.0 ^ Self::SIGN_BIT)
            }
        }

        impl PartialEq for $name {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                self.to_float() == other.to_float()
            }
        }

        impl PartialOrd for $name {
            #[inline]
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                self.to_float().partial_cmp(&other.to_float())
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                self.to_float().fmt(f)
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                self.to_float().fmt(f)
            }
        }

        nan_preserving_float!(@binop $name, $float, Add, add);
        nan_preserving_float!(@binop $name, $float, Sub, sub);
        nan_preserving_float!(@binop $name, $float, Mul, mul);
        nan_preserving_float!(@binop $name, $float, Div, div);
    };
    (@binop $name:ident, $float:ty, $op:ident, $method:ident) => {
        impl $op for $name {
            type Output = Self;

            #[inline]
            fn $method(self, rhs: Self) -> Self {
                $op::$method(self.to_float(), rhs.to_float()).into()
            }
        }
    };
}

nan_preserving_float! {
    /// A NaN preserving `f32` type.
    struct F32(u32 as f32);
}

nan_preserving_float! {
    /// A NaN preserving `f64` type.
    struct F64(u64 as f64);
}

#[cfg(test)]
mod tests {
    use super::{F32, F64};
    use rand::Rng;

    #[test]
    fn arithmetic_agrees_with_native_f32() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let (a, b): (f32, f32) = (rng.gen(), rng.gen());
            assert_eq!(f32::from(F32::from(a) + F32::from(b)), a + b);
            assert_eq!(f32::from(F32::from(a) - F32::from(b)), a - b);
            assert_eq!(f32::from(F32::from(a) * F32::from(b)), a * b);
            assert_eq!(f32::from(F32::from(a) / F32::from(b)), a / b);
        }
    }

    #[test]
    fn arithmetic_agrees_with_native_f64() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let (a, b): (f64, f64) = (rng.gen(), rng.gen());
            assert_eq!(f64::from(F64::from(a) + F64::from(b)), a + b);
            assert_eq!(f64::from(F64::from(a) - F64::from(b)), a - b);
            assert_eq!(f64::from(F64::from(a) * F64::from(b)), a * b);
            assert_eq!(f64::from(F64::from(a) / F64::from(b)), a / b);
        }
    }

    #[test]
    fn neg_preserves_nan_payload() {
        assert_eq!((-F32::from_bits(0xff80_3210)).to_bits(), 0x7f80_3210);
        assert_eq!(
            (-F64::from_bits(0xff80_3210_0000_0000)).to_bits(),
            0x7f80_3210_0000_0000
        );
    }

    #[test]
    fn abs_clears_only_the_sign_bit() {
        assert_eq!(F32::from_bits(0xffc0_0001).abs().to_bits(), 0x7fc0_0001);
        assert_eq!(F32::from(-1.5f32).abs(), F32::from(1.5f32));
    }
}
