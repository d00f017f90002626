use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A SIMD instruction-set family a kernel can be lowered for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, strum::EnumIter,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Arch {
    Neon,
    Avx2,
    Avx512,
}

/// The closed set of element types the registry knows about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, strum::EnumIter,
)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum ElemType {
    Float32,
    Float64,
    Float16,
    Bfloat16,
    Sint32,
    Sint64,
    Uint8,
    Uint32,
    Uint64,
}

impl Arch {
    pub fn name(&self) -> &'static str {
        match self {
            Arch::Neon => "neon",
            Arch::Avx2 => "avx2",
            Arch::Avx512 => "avx512",
        }
    }
}

impl ElemType {
    /// The bytes required to represent a value of this ElemType.
    pub fn size(&self) -> u8 {
        match self {
            ElemType::Uint8 => 1,
            ElemType::Float16 | ElemType::Bfloat16 => 2,
            ElemType::Float32 | ElemType::Sint32 | ElemType::Uint32 => 4,
            ElemType::Float64 | ElemType::Sint64 | ElemType::Uint64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ElemType::Float32 | ElemType::Float64 | ElemType::Float16 | ElemType::Bfloat16
        )
    }

    /// Unsigned integer types, which are the only ones the bit-counting
    /// reductions apply to.
    pub fn is_bit_countable(&self) -> bool {
        matches!(self, ElemType::Uint8 | ElemType::Uint32 | ElemType::Uint64)
    }

    /// Short spelling used in emitted symbol names (`add_neon_f32`).
    pub fn short_name(&self) -> &'static str {
        match self {
            ElemType::Float32 => "f32",
            ElemType::Float64 => "f64",
            ElemType::Float16 => "f16",
            ElemType::Bfloat16 => "bf16",
            ElemType::Sint32 => "i32",
            ElemType::Sint64 => "i64",
            ElemType::Uint8 => "u8",
            ElemType::Uint32 => "u32",
            ElemType::Uint64 => "u64",
        }
    }
}

impl Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Display for ElemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElemType::Float32 => write!(f, "float32"),
            ElemType::Float64 => write!(f, "float64"),
            ElemType::Float16 => write!(f, "float16"),
            ElemType::Bfloat16 => write!(f, "bfloat16"),
            ElemType::Sint32 => write!(f, "int32"),
            ElemType::Sint64 => write!(f, "int64"),
            ElemType::Uint8 => write!(f, "uint8"),
            ElemType::Uint32 => write!(f, "uint32"),
            ElemType::Uint64 => write!(f, "uint64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_short_name_is_distinct_from_display(elem in any::<ElemType>()) {
            prop_assert_ne!(elem.short_name(), elem.to_string());
        }

        #[test]
        fn test_bit_countable_types_are_integers(elem in any::<ElemType>()) {
            if elem.is_bit_countable() {
                prop_assert!(!elem.is_float());
            }
        }
    }
}
