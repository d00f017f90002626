//! Portable C helpers shared by every architecture's profiles.

use super::{Conversions, HelperFn, Intrinsic};

pub(super) fn bf16_to_f32() -> HelperFn {
    HelperFn::new(
        "pv_bf16_to_f32",
        "static inline float pv_bf16_to_f32(uint16_t h) {
  union { uint32_t u; float f; } v;
  v.u = (uint32_t)h << 16;
  return v.f;
}",
    )
}

/// Rounds to nearest-even, quieting NaNs.
pub(super) fn f32_to_bf16() -> HelperFn {
    HelperFn::new(
        "pv_f32_to_bf16",
        "static inline uint16_t pv_f32_to_bf16(float f) {
  union { uint32_t u; float f; } v;
  v.f = f;
  if ((v.u & 0x7fffffffu) > 0x7f800000u) {
    return (uint16_t)((v.u >> 16) | 0x40u);
  }
  v.u += 0x7fffu + ((v.u >> 16) & 1u);
  return (uint16_t)(v.u >> 16);
}",
    )
}

pub(super) fn bf16_conversions() -> Conversions {
    Conversions {
        promote: Intrinsic::helper(bf16_to_f32()),
        demote: Intrinsic::helper(f32_to_bf16()),
        ..Conversions::identity()
    }
}

/// Strips the trailing `_t` of a C vector type name, e.g. `float32x4`.
pub(super) fn type_stem(ty: &str) -> &str {
    ty.strip_suffix("_t").unwrap_or(ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bf16_conversions_reference_their_helpers() {
        let conv = bf16_conversions();
        assert_eq!(conv.promote.apply(&["x".into()]), "pv_bf16_to_f32(x)");
        assert_eq!(conv.demote.helpers()[0].name, "pv_f32_to_bf16");
        assert!(conv.demote.helpers()[0]
            .definition
            .starts_with("static inline uint16_t pv_f32_to_bf16("));
    }

    #[test]
    fn test_type_stem() {
        assert_eq!(type_stem("float32x4_t"), "float32x4");
        assert_eq!(type_stem("__m256"), "__m256");
    }
}
