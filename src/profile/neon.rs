//! AArch64 Advanced SIMD profiles.
//!
//! One 128-bit `Q` tier per element type, then the scalar tier. Half and
//! bfloat16 data is widened to `float32x4_t` on load and narrowed on store.

use super::helpers::{bf16_conversions, type_stem};
use super::scalar::{scalar_tier, ScalarSpelling};
use super::{
    Conversions, FmaOrder, HelperFn, Intrinsic, IntrinsicProfile, MathStrategy, MultiLoad,
    OpTable, PopCountAccum, SelectOrder, Split, Tier, TierId, VecOp,
};
use crate::common::{Arch, ElemType};

const UNROLL: u32 = 4;

/// Register-level spelling of one element type.
struct Lane {
    /// Intrinsic suffix, e.g. `f32` or `u8`.
    sfx: &'static str,
    vec: &'static str,
    /// Unsigned suffix of the comparison result, e.g. `u32`.
    mask: &'static str,
    lanes: u32,
    c_type: &'static str,
}

fn lane(elem: ElemType) -> Lane {
    let (sfx, vec, mask, lanes, c_type) = match elem {
        ElemType::Float32 | ElemType::Float16 | ElemType::Bfloat16 => {
            ("f32", "float32x4_t", "u32", 4, "float")
        }
        ElemType::Float64 => ("f64", "float64x2_t", "u64", 2, "double"),
        ElemType::Sint32 => ("s32", "int32x4_t", "u32", 4, "int32_t"),
        ElemType::Sint64 => ("s64", "int64x2_t", "u64", 2, "int64_t"),
        ElemType::Uint8 => ("u8", "uint8x16_t", "u8", 16, "uint8_t"),
        ElemType::Uint32 => ("u32", "uint32x4_t", "u32", 4, "uint32_t"),
        ElemType::Uint64 => ("u64", "uint64x2_t", "u64", 2, "uint64_t"),
    };
    Lane {
        sfx,
        vec,
        mask,
        lanes,
        c_type,
    }
}

/// `vreinterpretq_<to>_<from>(x)`, or `x` when the types already agree.
fn reinterpret(to: &str, from: &str, x: &str) -> String {
    if to == from {
        x.to_string()
    } else {
        format!("vreinterpretq_{to}_{from}({x})")
    }
}

pub(super) fn profiles() -> Vec<IntrinsicProfile> {
    [
        ElemType::Float32,
        ElemType::Float64,
        ElemType::Float16,
        ElemType::Bfloat16,
        ElemType::Sint32,
        ElemType::Sint64,
        ElemType::Uint8,
        ElemType::Uint32,
        ElemType::Uint64,
    ]
    .into_iter()
    .map(profile)
    .collect()
}

fn profile(elem: ElemType) -> IntrinsicProfile {
    let l = lane(elem);
    let (storage_type, math, conversions) = match elem {
        ElemType::Float16 => (
            "float16_t",
            MathStrategy::Promoted,
            Conversions {
                promote: Intrinsic::template("((float)($0))"),
                demote: Intrinsic::template("((float16_t)($0))"),
                ..Conversions::identity()
            },
        ),
        ElemType::Bfloat16 => ("uint16_t", MathStrategy::Promoted, bf16_conversions()),
        _ => (l.c_type, MathStrategy::Native, Conversions::identity()),
    };
    let lane_type = l.vec.split('x').next().unwrap_or(l.vec);
    let split = Split {
        half_type: format!("{lane_type}x{}_t", l.lanes / 2),
        lower: Intrinsic::Call(format!("vget_low_{}", l.sfx)),
        upper: Intrinsic::Call(format!("vget_high_{}", l.sfx)),
    };
    let conversions =
        conversions.with_halves(split, Intrinsic::Call(format!("vcombine_{}", l.sfx)));

    let mut ops = if elem.is_float() {
        float_ops(&l)
    } else {
        int_ops(elem, &l)
    };
    let mut multi = Some(MultiLoad {
        ty: format!("{}x4_t", type_stem(l.vec)),
        field: "$0.val[$1]".to_string(),
    });
    match elem {
        ElemType::Float16 => {
            ops.insert(VecOp::Load, Intrinsic::template("vcvt_f32_f16(vld1_f16($0))"));
            ops.insert(
                VecOp::Store,
                Intrinsic::template("vst1_f16($1, vcvt_f16_f32($0))"),
            );
        }
        ElemType::Bfloat16 => {
            ops.insert(
                VecOp::Load,
                Intrinsic::template("vreinterpretq_f32_u32(vshll_n_u16(vld1_u16($0), 16))"),
            );
            ops.insert(
                VecOp::Store,
                Intrinsic::template_with("vst1_u16($1, pv_f32x4_to_bf16($0))", vec![narrow_bf16()]),
            );
        }
        _ => {}
    }
    if math == MathStrategy::Promoted {
        ops.shift_remove(&VecOp::Load4);
        multi = None;
    }

    let popcount_accum = elem.is_bit_countable().then(|| PopCountAccum {
        ty: "uint64x2_t".to_string(),
        zero: Intrinsic::template("vdupq_n_u64(0)"),
        partial: Intrinsic::Template(format!(
            "vpaddlq_u32(vpaddlq_u16(vpaddlq_u8(vcntq_u8({}))))",
            reinterpret("u8", l.sfx, "$0")
        )),
        add: Intrinsic::call("vaddq_u64"),
        reduce: Intrinsic::call("vaddvq_u64"),
    });

    let vector = Tier {
        id: TierId::Q,
        lanes: l.lanes,
        unroll: UNROLL,
        scalar: false,
        vec_type: l.vec.to_string(),
        mask_type: format!("uint{}x{}_t", &l.mask[1..], l.lanes),
        multi,
        popcount_accum,
        ops,
    };

    let sqrt = match l.sfx {
        "f64" => "vget_lane_f64(vsqrt_f64(vdup_n_f64($0)), 0)",
        _ => "vget_lane_f32(vsqrt_f32(vdup_n_f32($0)), 0)",
    };
    let scalar = scalar_tier(ScalarSpelling {
        elem,
        work_type: l.c_type,
        fma_order: FmaOrder::AccFirst,
        select_order: SelectOrder::MaskFirst,
        conversions: &conversions,
        sqrt: Some(sqrt),
    });

    IntrinsicProfile {
        arch: Arch::Neon,
        elem,
        storage_type: storage_type.to_string(),
        work_type: l.c_type.to_string(),
        math,
        fma_order: FmaOrder::AccFirst,
        select_order: SelectOrder::MaskFirst,
        conversions,
        load_ptr_cast: None,
        store_ptr_cast: None,
        literal_suffix: if elem == ElemType::Float32 { "f" } else { "" }.to_string(),
        includes: vec!["arm_neon.h".to_string(), "stdint.h".to_string()],
        tiers: vec![vector, scalar],
    }
}

fn float_ops(l: &Lane) -> OpTable {
    let (s, m) = (l.sfx, l.mask);
    let c = |name: &str| Intrinsic::Call(format!("{name}_{s}"));
    let t = |pattern: String| Intrinsic::Template(pattern);
    let bitwise = |op: &str| {
        t(format!(
            "vreinterpretq_{s}_{m}({op}_{m}(vreinterpretq_{m}_{s}($0), vreinterpretq_{m}_{s}($1)))"
        ))
    };
    op_table! {
        Load => c("vld1q"),
        Store => t(format!("vst1q_{s}($1, $0)")),
        Set => c("vdupq_n"),
        Zero => t(format!("vdupq_n_{s}(0)")),
        MulAdd => c("vfmaq"),
        Add => c("vaddq"),
        Sub => c("vsubq"),
        Mul => c("vmulq"),
        Div => c("vdivq"),
        Min => c("vminq"),
        Max => c("vmaxq"),
        Neg => c("vnegq"),
        Abs => c("vabsq"),
        Sqrt => c("vsqrtq"),
        ReduceSum => c("vaddvq"),
        InterleaveLower => c("vzip1q"),
        InterleaveUpper => c("vzip2q"),
        And => bitwise("vandq"),
        Or => bitwise("vorrq"),
        Xor => bitwise("veorq"),
        AndNot => bitwise("vbicq"),
        Not => t(format!("vreinterpretq_{s}_u32(vmvnq_u32(vreinterpretq_u32_{s}($0)))")),
        Less => c("vcltq"),
        LessEqual => c("vcleq"),
        Greater => c("vcgtq"),
        GreaterEqual => c("vcgeq"),
        Equal => c("vceqq"),
        IfThenElse => c("vbslq"),
        BitsFromMask => Intrinsic::helper(bits_from_mask(m, l.lanes)),
        ReduceMin => c("vminvq"),
        ReduceMax => c("vmaxvq"),
        GetLane => c("vgetq_lane"),
        Load4 => Intrinsic::Call(format!("vld1q_{s}_x4")),
    }
}

fn int_ops(elem: ElemType, l: &Lane) -> OpTable {
    let (s, m) = (l.sfx, l.mask);
    let c = |name: &str| Intrinsic::Call(format!("{name}_{s}"));
    let t = |pattern: String| Intrinsic::Template(pattern);
    let wide = elem.size() == 8;
    let signed = s.starts_with('s');

    let mut ops = op_table! {
        Load => c("vld1q"),
        Store => t(format!("vst1q_{s}($1, $0)")),
        Set => c("vdupq_n"),
        Zero => t(format!("vdupq_n_{s}(0)")),
        Add => c("vaddq"),
        Sub => c("vsubq"),
        ReduceSum => c("vaddvq"),
        InterleaveLower => c("vzip1q"),
        InterleaveUpper => c("vzip2q"),
        And => c("vandq"),
        Or => c("vorrq"),
        Xor => c("veorq"),
        AndNot => c("vbicq"),
        Less => c("vcltq"),
        LessEqual => c("vcleq"),
        Greater => c("vcgtq"),
        GreaterEqual => c("vcgeq"),
        Equal => c("vceqq"),
        IfThenElse => c("vbslq"),
        BitsFromMask => Intrinsic::helper(bits_from_mask(m, l.lanes)),
        GetLane => c("vgetq_lane"),
        Load4 => Intrinsic::Call(format!("vld1q_{s}_x4")),
    };

    if wide {
        // No 64-bit lane multiply, min/max or complement; build the latter
        // two from comparisons and a 32-bit view.
        ops.extend(op_table! {
            Min => t(format!("vbslq_{s}(vcltq_{s}($0, $1), $0, $1)")),
            Max => t(format!("vbslq_{s}(vcgtq_{s}($0, $1), $0, $1)")),
            Not => t(format!("vreinterpretq_{s}_u32(vmvnq_u32(vreinterpretq_u32_{s}($0)))")),
        });
    } else {
        ops.extend(op_table! {
            MulAdd => c("vmlaq"),
            Mul => c("vmulq"),
            Min => c("vminq"),
            Max => c("vmaxq"),
            Not => c("vmvnq"),
            ReduceMin => c("vminvq"),
            ReduceMax => c("vmaxvq"),
        });
    }
    if signed {
        ops.insert(VecOp::Neg, c("vnegq"));
        ops.insert(VecOp::Abs, c("vabsq"));
    }

    let popcount = match s {
        "u8" => Intrinsic::call("vcntq_u8"),
        _ => {
            let mut counted = format!("vcntq_u8({})", reinterpret("u8", s, "$0"));
            counted = format!("vpaddlq_u8({counted})");
            if elem.size() >= 4 {
                counted = format!("vpaddlq_u16({counted})");
            }
            if wide {
                counted = format!("vpaddlq_u32({counted})");
            }
            let unsigned = format!("u{}", elem.size() * 8);
            t(reinterpret(s, &unsigned, &counted))
        }
    };
    ops.insert(VecOp::PopCount, popcount);
    if s == "u8" {
        ops.insert(VecOp::TableLookup, Intrinsic::call("vqtbl1q_u8"));
    }
    ops
}

/// Packs the top bit of every mask lane into an integer, lane 0 lowest.
fn bits_from_mask(mask: &str, lanes: u32) -> HelperFn {
    let name = format!("pv_bits_from_mask_{mask}x{lanes}");
    let ty = format!("uint{}x{}_t", &mask[1..], lanes);
    let body = match mask {
        "u8" => "  const int8x16_t shift = {0, 1, 2, 3, 4, 5, 6, 7, 0, 1, 2, 3, 4, 5, 6, 7};
  uint8x16_t bits = vshlq_u8(vshrq_n_u8(m, 7), shift);
  return (uint64_t)vaddv_u8(vget_low_u8(bits)) | ((uint64_t)vaddv_u8(vget_high_u8(bits)) << 8);"
            .to_string(),
        "u32" => "  const int32x4_t shift = {0, 1, 2, 3};
  return vaddvq_u32(vshlq_u32(vshrq_n_u32(m, 31), shift));"
            .to_string(),
        _ => "  return (vgetq_lane_u64(m, 0) & 1) | ((vgetq_lane_u64(m, 1) & 1) << 1);".to_string(),
    };
    HelperFn::new(
        &name,
        format!("static inline uint64_t {name}({ty} m) {{\n{body}\n}}"),
    )
}

/// Round-to-nearest-even narrowing of four floats to bfloat16 bit patterns.
fn narrow_bf16() -> HelperFn {
    HelperFn::new(
        "pv_f32x4_to_bf16",
        "static inline uint16x4_t pv_f32x4_to_bf16(float32x4_t v) {
  uint32x4_t u = vreinterpretq_u32_f32(v);
  uint32x4_t lsb = vandq_u32(vshrq_n_u32(u, 16), vdupq_n_u32(1));
  u = vaddq_u32(u, vaddq_u32(vdupq_n_u32(0x7fff), lsb));
  return vshrn_n_u32(u, 16);
}",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(elem: ElemType) -> IntrinsicProfile {
        profiles().into_iter().find(|p| p.elem == elem).unwrap()
    }

    #[test]
    fn test_f32_q_tier() {
        let p = find(ElemType::Float32);
        let q = p.primary_tier().unwrap();
        assert_eq!(q.id, TierId::Q);
        assert_eq!(q.lanes, 4);
        assert_eq!(q.vec_type, "float32x4_t");
        assert_eq!(q.mask_type, "uint32x4_t");
        assert_eq!(q.op(VecOp::MulAdd), Some(&Intrinsic::call("vfmaq_f32")));
        assert_eq!(q.multi.as_ref().unwrap().ty, "float32x4x4_t");
        assert_eq!(p.literal_suffix, "f");
    }

    #[test]
    fn test_u32_popcount_never_reinterprets_to_itself() {
        let p = find(ElemType::Uint32);
        let q = p.primary_tier().unwrap();
        let pop = q.op(VecOp::PopCount).unwrap().apply(&["x".into()]);
        assert_eq!(pop, "vpaddlq_u16(vpaddlq_u8(vcntq_u8(vreinterpretq_u8_u32(x))))");
        let partial = q.popcount_accum.as_ref().unwrap().partial.apply(&["x".into()]);
        assert_eq!(
            partial,
            "vpaddlq_u32(vpaddlq_u16(vpaddlq_u8(vcntq_u8(vreinterpretq_u8_u32(x)))))"
        );
    }

    #[test]
    fn test_u8_partial_popcount_skips_reinterpret() {
        let p = find(ElemType::Uint8);
        let accum = p.primary_tier().unwrap().popcount_accum.clone().unwrap();
        assert_eq!(
            accum.partial.apply(&["x".into()]),
            "vpaddlq_u32(vpaddlq_u16(vpaddlq_u8(vcntq_u8(x))))"
        );
        assert_eq!(accum.ty, "uint64x2_t");
    }

    #[test]
    fn test_half_precision_widens_on_load() {
        let p = find(ElemType::Float16);
        assert!(p.is_promoted());
        assert_eq!(p.storage_type, "float16_t");
        assert_eq!(p.work_type, "float");
        let q = p.primary_tier().unwrap();
        assert!(q.op(VecOp::Load4).is_none());
        assert!(q.multi.is_none());
        assert_eq!(
            q.op(VecOp::Load).unwrap().apply(&["p".into()]),
            "vcvt_f32_f16(vld1_f16(p))"
        );
    }

    #[test]
    fn test_bf16_store_pulls_in_narrowing_helper() {
        let p = find(ElemType::Bfloat16);
        let store = p.primary_tier().unwrap().op(VecOp::Store).unwrap();
        assert_eq!(store.helpers()[0].name, "pv_f32x4_to_bf16");
    }

    #[test]
    fn test_wide_lanes_lack_multiply() {
        let q = find(ElemType::Sint64);
        let tier = q.primary_tier().unwrap();
        assert!(tier.op(VecOp::Mul).is_none());
        assert!(tier.op(VecOp::Min).is_some());
        assert_eq!(tier.mask_type, "uint64x2_t");
    }
}
