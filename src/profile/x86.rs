//! x86-64 AVX2 and AVX-512 profiles.
//!
//! Both families share one builder parameterized by register [Width]. AVX2
//! compares produce full-width vector masks consumed by `blendv`, which takes
//! its mask last; AVX-512 compares produce `__mmask` registers and blends take
//! the mask first.

use super::helpers::bf16_conversions;
use super::scalar::{scalar_tier, ScalarSpelling};
use super::{
    Conversions, FmaOrder, HelperFn, Intrinsic, IntrinsicProfile, MathStrategy, OpTable,
    PopCountAccum, SelectOrder, Split, Tier, TierId, VecOp,
};
use crate::common::{Arch, ElemType};

const UNROLL: u32 = 4;

#[derive(Debug, Clone, Copy)]
struct Width {
    arch: Arch,
    id: TierId,
    bits: u32,
    /// Intrinsic prefix, e.g. `_mm256`.
    p: &'static str,
    /// Integer register suffix, e.g. `si256`.
    si: &'static str,
}

const YMM: Width = Width {
    arch: Arch::Avx2,
    id: TierId::Ymm,
    bits: 256,
    p: "_mm256",
    si: "si256",
};

const ZMM: Width = Width {
    arch: Arch::Avx512,
    id: TierId::Zmm,
    bits: 512,
    p: "_mm512",
    si: "si512",
};

impl Width {
    fn is_avx512(&self) -> bool {
        self.bits == 512
    }

    fn select_order(&self) -> SelectOrder {
        if self.is_avx512() {
            SelectOrder::MaskFirst
        } else {
            SelectOrder::MaskLast
        }
    }
}

const ELEMS: [ElemType; 9] = [
    ElemType::Float32,
    ElemType::Float64,
    ElemType::Float16,
    ElemType::Bfloat16,
    ElemType::Sint32,
    ElemType::Sint64,
    ElemType::Uint8,
    ElemType::Uint32,
    ElemType::Uint64,
];

pub(super) fn avx2_profiles() -> Vec<IntrinsicProfile> {
    ELEMS.into_iter().map(|e| profile(YMM, e)).collect()
}

pub(super) fn avx512_profiles() -> Vec<IntrinsicProfile> {
    ELEMS.into_iter().map(|e| profile(ZMM, e)).collect()
}

fn c_type(elem: ElemType) -> &'static str {
    match elem {
        ElemType::Float32 | ElemType::Float16 | ElemType::Bfloat16 => "float",
        ElemType::Float64 => "double",
        ElemType::Sint32 => "int32_t",
        ElemType::Sint64 => "int64_t",
        ElemType::Uint8 => "uint8_t",
        ElemType::Uint32 => "uint32_t",
        ElemType::Uint64 => "uint64_t",
    }
}

/// Splits a register into its two half-width registers and joins them back.
/// AVX-512F has no 256-bit float insert or extract for `ps`, so those go
/// through the `pd` forms.
fn halves(w: Width, elem: ElemType) -> (Split, Intrinsic) {
    let (p, b, h) = (w.p, w.bits, w.bits / 2);
    let t = |pattern: String| Intrinsic::Template(pattern);
    let (half_type, lower, upper, combine) = match (elem, w.is_avx512()) {
        (ElemType::Float64, false) => (
            "__m128d".to_string(),
            t(format!("{p}_castpd{b}_pd{h}($0)")),
            t(format!("{p}_extractf128_pd($0, 1)")),
            t(format!("{p}_set_m128d($1, $0)")),
        ),
        (ElemType::Float64, true) => (
            "__m256d".to_string(),
            t(format!("{p}_castpd{b}_pd{h}($0)")),
            t(format!("{p}_extractf64x4_pd($0, 1)")),
            t(format!("{p}_insertf64x4({p}_castpd{h}_pd{b}($0), $1, 1)")),
        ),
        (e, false) if e.is_float() => (
            "__m128".to_string(),
            t(format!("{p}_castps{b}_ps{h}($0)")),
            t(format!("{p}_extractf128_ps($0, 1)")),
            t(format!("{p}_set_m128($1, $0)")),
        ),
        (e, true) if e.is_float() => (
            "__m256".to_string(),
            t(format!("{p}_castps{b}_ps{h}($0)")),
            t(format!(
                "_mm256_castpd_ps({p}_extractf64x4_pd({p}_castps_pd($0), 1))"
            )),
            t(format!(
                "{p}_castpd_ps({p}_insertf64x4({p}_castps_pd({p}_castps{h}_ps{b}($0)), _mm256_castps_pd($1), 1))"
            )),
        ),
        (_, false) => (
            "__m128i".to_string(),
            t(format!("{p}_castsi{b}_si{h}($0)")),
            t(format!("{p}_extracti128_si256($0, 1)")),
            t(format!("{p}_set_m128i($1, $0)")),
        ),
        (_, true) => (
            "__m256i".to_string(),
            t(format!("{p}_castsi{b}_si{h}($0)")),
            t(format!("{p}_extracti64x4_epi64($0, 1)")),
            t(format!("{p}_inserti64x4({p}_castsi{h}_si{b}($0), $1, 1)")),
        ),
    };
    let split = Split {
        half_type,
        lower,
        upper,
    };
    (split, combine)
}

fn profile(w: Width, elem: ElemType) -> IntrinsicProfile {
    let work = c_type(elem);
    let promoted = matches!(elem, ElemType::Float16 | ElemType::Bfloat16);
    let lane_bits = if promoted { 32 } else { u32::from(elem.size()) * 8 };
    let lanes = w.bits / lane_bits;
    let b = w.bits;

    let (vec_type, ops) = match elem {
        ElemType::Float64 => (format!("__m{b}d"), float_ops(w, "pd")),
        e if e.is_float() => (format!("__m{b}"), float_ops(w, "ps")),
        _ => (format!("__m{b}i"), int_ops(w, elem)),
    };
    let mut ops = ops;
    let mask_type = if w.is_avx512() {
        format!("__mmask{lanes}")
    } else {
        vec_type.clone()
    };

    let (storage_type, conversions) = match elem {
        ElemType::Float16 => {
            let (load, store) = if w.is_avx512() {
                (
                    "_mm512_cvtph_ps(_mm256_loadu_si256((const __m256i *)($0)))",
                    "_mm256_storeu_si256((__m256i *)($1), _mm512_cvtps_ph($0, _MM_FROUND_TO_NEAREST_INT))",
                )
            } else {
                (
                    "_mm256_cvtph_ps(_mm_loadu_si128((const __m128i *)($0)))",
                    "_mm_storeu_si128((__m128i *)($1), _mm256_cvtps_ph($0, _MM_FROUND_TO_NEAREST_INT))",
                )
            };
            ops.insert(VecOp::Load, Intrinsic::template(load));
            ops.insert(VecOp::Store, Intrinsic::template(store));
            (
                "uint16_t",
                Conversions {
                    promote: Intrinsic::template("_cvtsh_ss($0)"),
                    demote: Intrinsic::template("_cvtss_sh($0, _MM_FROUND_TO_NEAREST_INT)"),
                    ..Conversions::identity()
                },
            )
        }
        ElemType::Bfloat16 => {
            let (load, store) = if w.is_avx512() {
                (
                    "_mm512_castsi512_ps(_mm512_slli_epi32(_mm512_cvtepu16_epi32(_mm256_loadu_si256((const __m256i *)($0))), 16))",
                    "_mm256_storeu_si256((__m256i *)($1), pv_f32x16_to_bf16($0))",
                )
            } else {
                (
                    "_mm256_castsi256_ps(_mm256_slli_epi32(_mm256_cvtepu16_epi32(_mm_loadu_si128((const __m128i *)($0))), 16))",
                    "_mm_storeu_si128((__m128i *)($1), pv_f32x8_to_bf16($0))",
                )
            };
            ops.insert(VecOp::Load, Intrinsic::template(load));
            ops.insert(
                VecOp::Store,
                Intrinsic::template_with(store, vec![narrow_bf16(w)]),
            );
            ("uint16_t", bf16_conversions())
        }
        _ => (work, Conversions::identity()),
    };
    let (split, combine) = halves(w, elem);
    let conversions = conversions.with_halves(split, combine);

    let int_vector = !elem.is_float();
    let (load_ptr_cast, store_ptr_cast) = if int_vector && !w.is_avx512() {
        (
            Some(format!("(const __m{b}i *)")),
            Some(format!("(__m{b}i *)")),
        )
    } else {
        (None, None)
    };

    let popcount_accum = elem.is_bit_countable().then(|| {
        if w.is_avx512() {
            PopCountAccum {
                ty: "__m512i".to_string(),
                zero: Intrinsic::template("_mm512_setzero_si512()"),
                partial: Intrinsic::call("_mm512_popcnt_epi64"),
                add: Intrinsic::call("_mm512_add_epi64"),
                reduce: Intrinsic::call("_mm512_reduce_add_epi64"),
            }
        } else {
            PopCountAccum {
                ty: "__m256i".to_string(),
                zero: Intrinsic::template("_mm256_setzero_si256()"),
                partial: Intrinsic::template_with(
                    "_mm256_sad_epu8(pv_popcnt_epi8_256($0), _mm256_setzero_si256())",
                    vec![popcnt_epi8_256()],
                ),
                add: Intrinsic::call("_mm256_add_epi64"),
                reduce: Intrinsic::helper(reduce_add_epi64_256()),
            }
        }
    });

    let vector = Tier {
        id: w.id,
        lanes,
        unroll: UNROLL,
        scalar: false,
        vec_type,
        mask_type,
        multi: None,
        popcount_accum,
        ops,
    };
    let sqrt = if elem == ElemType::Float64 {
        "_mm_cvtsd_f64(_mm_sqrt_sd(_mm_setzero_pd(), _mm_set_sd($0)))"
    } else {
        "_mm_cvtss_f32(_mm_sqrt_ss(_mm_set_ss($0)))"
    };
    let scalar = scalar_tier(ScalarSpelling {
        elem,
        work_type: work,
        fma_order: FmaOrder::AccLast,
        select_order: w.select_order(),
        conversions: &conversions,
        sqrt: Some(sqrt),
    });
    log::trace!("Built {} {} profile", w.arch, elem);

    IntrinsicProfile {
        arch: w.arch,
        elem,
        storage_type: storage_type.to_string(),
        work_type: work.to_string(),
        math: if promoted {
            MathStrategy::Promoted
        } else {
            MathStrategy::Native
        },
        fma_order: FmaOrder::AccLast,
        select_order: w.select_order(),
        conversions,
        load_ptr_cast,
        store_ptr_cast,
        literal_suffix: if elem == ElemType::Float32 { "f" } else { "" }.to_string(),
        includes: vec!["immintrin.h".to_string(), "stdint.h".to_string()],
        tiers: vec![vector, scalar],
    }
}

fn float_ops(w: Width, s: &str) -> OpTable {
    let (p, b) = (w.p, w.bits);
    let c = |name: &str| Intrinsic::Call(format!("{p}_{name}_{s}"));
    let t = Intrinsic::Template;
    let scalar = if s == "ps" { "float" } else { "double" };

    let mut ops = op_table! {
        Load => c("loadu"),
        Store => t(format!("{p}_storeu_{s}($1, $0)")),
        Set => c("set1"),
        Zero => t(format!("{p}_setzero_{s}()")),
        MulAdd => c("fmadd"),
        Add => c("add"),
        Sub => c("sub"),
        Mul => c("mul"),
        Div => c("div"),
        Min => c("min"),
        Max => c("max"),
        Neg => t(format!("{p}_xor_{s}($0, {p}_set1_{s}(-0.0))")),
        Abs => t(format!("{p}_andnot_{s}({p}_set1_{s}(-0.0), $0)")),
        Sqrt => c("sqrt"),
        InterleaveLower => c("unpacklo"),
        InterleaveUpper => c("unpackhi"),
        And => c("and"),
        Or => c("or"),
        Xor => c("xor"),
        AndNot => t(format!("{p}_andnot_{s}($1, $0)")),
        Not => t(format!("{p}_xor_{s}($0, {p}_castsi{b}_{s}({p}_set1_epi32(-1)))")),
    };

    for (op, pred) in [
        (VecOp::Less, "_CMP_LT_OQ"),
        (VecOp::LessEqual, "_CMP_LE_OQ"),
        (VecOp::Greater, "_CMP_GT_OQ"),
        (VecOp::GreaterEqual, "_CMP_GE_OQ"),
        (VecOp::Equal, "_CMP_EQ_OQ"),
    ] {
        let spelled = if w.is_avx512() {
            format!("{p}_cmp_{s}_mask($0, $1, {pred})")
        } else {
            format!("{p}_cmp_{s}($0, $1, {pred})")
        };
        ops.insert(op, t(spelled));
    }

    if w.is_avx512() {
        let x = if s == "ps" { "ss" } else { "sd" };
        let index = if s == "ps" { "epi32" } else { "epi64" };
        let cvt = if s == "ps" { "f32" } else { "f64" };
        ops.extend(op_table! {
            IfThenElse => t(format!("{p}_mask_blend_{s}($0, $2, $1)")),
            BitsFromMask => Intrinsic::template("((uint64_t)($0))"),
            ReduceSum => c("reduce_add"),
            ReduceMin => c("reduce_min"),
            ReduceMax => c("reduce_max"),
            TableLookup => t(format!("{p}_permutexvar_{s}($1, $0)")),
            GetLane => t(format!(
                "{p}_cvt{x}_{cvt}({p}_permutexvar_{s}({p}_set1_{index}($1), $0))"
            )),
        });
    } else {
        ops.extend(op_table! {
            IfThenElse => c("blendv"),
            BitsFromMask => t(format!("((uint64_t){p}_movemask_{s}($0))")),
            ReduceSum => Intrinsic::helper(hreduce_float(s, "add", scalar)),
            ReduceMin => Intrinsic::helper(hreduce_float(s, "min", scalar)),
            ReduceMax => Intrinsic::helper(hreduce_float(s, "max", scalar)),
        });
        if s == "ps" {
            ops.insert(VecOp::TableLookup, c("permutevar8x32"));
            ops.insert(
                VecOp::GetLane,
                Intrinsic::template("_mm256_cvtss_f32(_mm256_permutevar8x32_ps($0, _mm256_set1_epi32($1)))"),
            );
        } else {
            ops.insert(
                VecOp::GetLane,
                Intrinsic::template(
                    "_mm256_cvtsd_f64(_mm256_castsi256_pd(_mm256_permutevar8x32_epi32(_mm256_castpd_si256($0), _mm256_setr_epi32(2 * ($1), 2 * ($1) + 1, 0, 0, 0, 0, 0, 0))))",
                ),
            );
        }
    }
    ops
}

fn int_ops(w: Width, elem: ElemType) -> OpTable {
    let (p, si) = (w.p, w.si);
    let bits = u32::from(elem.size()) * 8;
    let ty = c_type(elem);
    let signed = matches!(elem, ElemType::Sint32 | ElemType::Sint64);
    let su = if signed { "epi" } else { "epu" };
    let t = Intrinsic::Template;
    let set1 = match (bits, w.is_avx512()) {
        (64, false) => "set1_epi64x".to_string(),
        _ => format!("set1_epi{bits}"),
    };

    let mut ops = op_table! {
        Load => Intrinsic::Call(format!("{p}_loadu_{si}")),
        Store => t(format!("{p}_storeu_{si}($1, $0)")),
        Set => Intrinsic::Call(format!("{p}_{set1}")),
        Zero => t(format!("{p}_setzero_{si}()")),
        Add => Intrinsic::Call(format!("{p}_add_epi{bits}")),
        Sub => Intrinsic::Call(format!("{p}_sub_epi{bits}")),
        InterleaveLower => Intrinsic::Call(format!("{p}_unpacklo_epi{bits}")),
        InterleaveUpper => Intrinsic::Call(format!("{p}_unpackhi_epi{bits}")),
        And => Intrinsic::Call(format!("{p}_and_{si}")),
        Or => Intrinsic::Call(format!("{p}_or_{si}")),
        Xor => Intrinsic::Call(format!("{p}_xor_{si}")),
        AndNot => t(format!("{p}_andnot_{si}($1, $0)")),
        Not => t(format!("{p}_xor_{si}($0, {p}_set1_epi32(-1))")),
    };

    let mul = match (bits, w.is_avx512()) {
        (32, _) => Some(format!("{p}_mullo_epi32")),
        (64, true) => Some(format!("{p}_mullo_epi64")),
        _ => None,
    };
    if let Some(mul) = mul {
        ops.insert(VecOp::Mul, Intrinsic::Call(mul.clone()));
        ops.insert(
            VecOp::MulAdd,
            t(format!("{p}_add_epi{bits}($2, {mul}($0, $1))")),
        );
    }
    if w.is_avx512() || bits < 64 {
        ops.insert(VecOp::Min, Intrinsic::Call(format!("{p}_min_{su}{bits}")));
        ops.insert(VecOp::Max, Intrinsic::Call(format!("{p}_max_{su}{bits}")));
    }
    if signed {
        ops.insert(
            VecOp::Neg,
            t(format!("{p}_sub_epi{bits}({p}_setzero_{si}(), $0)")),
        );
        if w.is_avx512() || bits == 32 {
            ops.insert(VecOp::Abs, Intrinsic::Call(format!("{p}_abs_epi{bits}")));
        }
    }

    if w.is_avx512() {
        for (op, pred) in [
            (VecOp::Less, "lt"),
            (VecOp::LessEqual, "le"),
            (VecOp::Greater, "gt"),
            (VecOp::GreaterEqual, "ge"),
        ] {
            ops.insert(op, t(format!("{p}_cmp{pred}_{su}{bits}_mask($0, $1)")));
        }
        ops.extend(op_table! {
            Equal => t(format!("{p}_cmpeq_epi{bits}_mask($0, $1)")),
            IfThenElse => t(format!("{p}_mask_blend_epi{bits}($0, $2, $1)")),
            BitsFromMask => Intrinsic::template("((uint64_t)($0))"),
            PopCount => Intrinsic::Call(format!("{p}_popcnt_epi{bits}")),
            TableLookup => t(format!("{p}_permutexvar_epi{bits}($1, $0)")),
        });
        let (cvt, index) = if bits == 64 {
            ("_mm_cvtsi128_si64", "epi64")
        } else {
            ("_mm_cvtsi128_si32", if bits == 8 { "epi8" } else { "epi32" })
        };
        ops.insert(
            VecOp::GetLane,
            t(format!(
                "(({ty}){cvt}(_mm512_castsi512_si128(_mm512_permutexvar_{index}(_mm512_set1_{index}($1), $0))))"
            )),
        );
        if bits == 8 {
            ops.insert(
                VecOp::ReduceSum,
                t("((uint8_t)_mm512_reduce_add_epi64(_mm512_sad_epu8($0, _mm512_setzero_si512())))".to_string()),
            );
        } else {
            ops.insert(
                VecOp::ReduceSum,
                t(format!("(({ty})_mm512_reduce_add_epi{bits}($0))")),
            );
            ops.insert(
                VecOp::ReduceMin,
                t(format!("(({ty})_mm512_reduce_min_{su}{bits}($0))")),
            );
            ops.insert(
                VecOp::ReduceMax,
                t(format!("(({ty})_mm512_reduce_max_{su}{bits}($0))")),
            );
        }
    } else {
        avx2_int_compares(&mut ops, bits, signed);
        ops.insert(VecOp::IfThenElse, Intrinsic::call("_mm256_blendv_epi8"));
        ops.insert(
            VecOp::BitsFromMask,
            t(match bits {
                8 => "((uint64_t)(uint32_t)_mm256_movemask_epi8($0))".to_string(),
                32 => "((uint64_t)_mm256_movemask_ps(_mm256_castsi256_ps($0)))".to_string(),
                _ => "((uint64_t)_mm256_movemask_pd(_mm256_castsi256_pd($0)))".to_string(),
            }),
        );
        ops.insert(
            VecOp::GetLane,
            t(format!("(({ty})_mm256_extract_epi{bits}($0, $1))")),
        );
        let popcnt = match bits {
            8 => Intrinsic::helper(popcnt_epi8_256()),
            32 => Intrinsic::template_with(
                "_mm256_madd_epi16(_mm256_maddubs_epi16(pv_popcnt_epi8_256($0), _mm256_set1_epi8(1)), _mm256_set1_epi16(1))",
                vec![popcnt_epi8_256()],
            ),
            _ => Intrinsic::template_with(
                "_mm256_sad_epu8(pv_popcnt_epi8_256($0), _mm256_setzero_si256())",
                vec![popcnt_epi8_256()],
            ),
        };
        ops.insert(VecOp::PopCount, popcnt);
        match bits {
            8 => {
                ops.extend(op_table! {
                    TableLookup => Intrinsic::call("_mm256_shuffle_epi8"),
                    ReduceSum => Intrinsic::template_with(
                        "((uint8_t)pv_reduce_add_epi64_256(_mm256_sad_epu8($0, _mm256_setzero_si256())))",
                        vec![reduce_add_epi64_256()],
                    ),
                    ReduceMin => Intrinsic::helper(hreduce_epu8_256("min")),
                    ReduceMax => Intrinsic::helper(hreduce_epu8_256("max")),
                });
            }
            32 => {
                ops.extend(op_table! {
                    TableLookup => Intrinsic::call("_mm256_permutevar8x32_epi32"),
                    ReduceSum => Intrinsic::helper(hreduce_epi32_256("add", "epi", ty)),
                    ReduceMin => Intrinsic::helper(hreduce_epi32_256("min", su, ty)),
                    ReduceMax => Intrinsic::helper(hreduce_epi32_256("max", su, ty)),
                });
            }
            _ => {
                ops.insert(
                    VecOp::ReduceSum,
                    Intrinsic::template_with(
                        &format!("(({ty})pv_reduce_add_epi64_256($0))"),
                        vec![reduce_add_epi64_256()],
                    ),
                );
            }
        }
    }
    ops
}

/// AVX2 has only signed greater-than and equality; derive the rest, biasing
/// unsigned operands by the sign bit first.
fn avx2_int_compares(ops: &mut OpTable, bits: u32, signed: bool) {
    let bias = |x: &str| -> String {
        if signed {
            return x.to_string();
        }
        let sign = match bits {
            8 => "_mm256_set1_epi8((char)0x80)",
            32 => "_mm256_set1_epi32((int)0x80000000)",
            _ => "_mm256_set1_epi64x((long long)0x8000000000000000ULL)",
        };
        format!("_mm256_xor_si256({x}, {sign})")
    };
    let gt = |a: &str, b: &str| format!("_mm256_cmpgt_epi{bits}({}, {})", bias(a), bias(b));
    let not = |x: String| format!("_mm256_xor_si256({x}, _mm256_set1_epi32(-1))");
    ops.extend(op_table! {
        Greater => Intrinsic::Template(gt("$0", "$1")),
        Less => Intrinsic::Template(gt("$1", "$0")),
        LessEqual => Intrinsic::Template(not(gt("$0", "$1"))),
        GreaterEqual => Intrinsic::Template(not(gt("$1", "$0"))),
        Equal => Intrinsic::Template(format!("_mm256_cmpeq_epi{bits}($0, $1)")),
    });
}

fn hreduce_float(s: &str, what: &str, scalar: &str) -> HelperFn {
    let name = format!("pv_reduce_{what}_{s}256");
    let op = format!("_mm_{what}_{s}");
    let cvt = if s == "ps" { "_mm_cvtss_f32" } else { "_mm_cvtsd_f64" };
    let body = if s == "ps" {
        format!(
            "  __m128 x = {op}(_mm256_castps256_ps128(v), _mm256_extractf128_ps(v, 1));
  x = {op}(x, _mm_movehl_ps(x, x));
  x = {op}(x, _mm_movehdup_ps(x));"
        )
    } else {
        format!(
            "  __m128d x = {op}(_mm256_castpd256_pd128(v), _mm256_extractf128_pd(v, 1));
  x = {op}(x, _mm_unpackhi_pd(x, x));"
        )
    };
    let vec = if s == "ps" { "__m256" } else { "__m256d" };
    HelperFn::new(
        &name,
        format!("static inline {scalar} {name}({vec} v) {{\n{body}\n  return {cvt}(x);\n}}"),
    )
}

fn hreduce_epi32_256(what: &str, su: &str, ty: &str) -> HelperFn {
    let name = format!("pv_reduce_{what}_{su}32_256");
    let op = format!("_mm_{what}_{su}32");
    HelperFn::new(
        &name,
        format!(
            "static inline {ty} {name}(__m256i v) {{
  __m128i x = {op}(_mm256_castsi256_si128(v), _mm256_extracti128_si256(v, 1));
  x = {op}(x, _mm_shuffle_epi32(x, 0x4e));
  x = {op}(x, _mm_shuffle_epi32(x, 0xb1));
  return ({ty})_mm_cvtsi128_si32(x);
}}"
        ),
    )
}

fn hreduce_epu8_256(what: &str) -> HelperFn {
    let name = format!("pv_reduce_{what}_epu8_256");
    let op = format!("_mm_{what}_epu8");
    HelperFn::new(
        &name,
        format!(
            "static inline uint8_t {name}(__m256i v) {{
  __m128i x = {op}(_mm256_castsi256_si128(v), _mm256_extracti128_si256(v, 1));
  x = {op}(x, _mm_srli_si128(x, 8));
  x = {op}(x, _mm_srli_si128(x, 4));
  x = {op}(x, _mm_srli_si128(x, 2));
  x = {op}(x, _mm_srli_si128(x, 1));
  return (uint8_t)_mm_cvtsi128_si32(x);
}}"
        ),
    )
}

fn reduce_add_epi64_256() -> HelperFn {
    HelperFn::new(
        "pv_reduce_add_epi64_256",
        "static inline uint64_t pv_reduce_add_epi64_256(__m256i v) {
  __m128i x = _mm_add_epi64(_mm256_castsi256_si128(v), _mm256_extracti128_si256(v, 1));
  x = _mm_add_epi64(x, _mm_unpackhi_epi64(x, x));
  return (uint64_t)_mm_cvtsi128_si64(x);
}",
    )
}

/// Per-byte population count via a nibble lookup table.
fn popcnt_epi8_256() -> HelperFn {
    HelperFn::new(
        "pv_popcnt_epi8_256",
        "static inline __m256i pv_popcnt_epi8_256(__m256i v) {
  const __m256i lut = _mm256_setr_epi8(0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4,
                                       0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4);
  const __m256i low = _mm256_set1_epi8(0x0f);
  __m256i lo = _mm256_and_si256(v, low);
  __m256i hi = _mm256_and_si256(_mm256_srli_epi16(v, 4), low);
  return _mm256_add_epi8(_mm256_shuffle_epi8(lut, lo), _mm256_shuffle_epi8(lut, hi));
}",
    )
}

fn narrow_bf16(w: Width) -> HelperFn {
    if w.is_avx512() {
        HelperFn::new(
            "pv_f32x16_to_bf16",
            "static inline __m256i pv_f32x16_to_bf16(__m512 v) {
  __m512i u = _mm512_castps_si512(v);
  __m512i lsb = _mm512_and_si512(_mm512_srli_epi32(u, 16), _mm512_set1_epi32(1));
  u = _mm512_add_epi32(u, _mm512_add_epi32(_mm512_set1_epi32(0x7fff), lsb));
  return _mm512_cvtepi32_epi16(_mm512_srli_epi32(u, 16));
}",
        )
    } else {
        HelperFn::new(
            "pv_f32x8_to_bf16",
            "static inline __m128i pv_f32x8_to_bf16(__m256 v) {
  __m256i u = _mm256_castps_si256(v);
  __m256i lsb = _mm256_and_si256(_mm256_srli_epi32(u, 16), _mm256_set1_epi32(1));
  u = _mm256_add_epi32(u, _mm256_add_epi32(_mm256_set1_epi32(0x7fff), lsb));
  u = _mm256_srli_epi32(u, 16);
  return _mm_packus_epi32(_mm256_castsi256_si128(u), _mm256_extracti128_si256(u, 1));
}",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(w: Width, elem: ElemType) -> IntrinsicProfile {
        profile(w, elem)
    }

    #[test]
    fn test_lane_counts() {
        assert_eq!(find(YMM, ElemType::Float32).primary_tier().unwrap().lanes, 8);
        assert_eq!(find(YMM, ElemType::Float64).primary_tier().unwrap().lanes, 4);
        assert_eq!(find(YMM, ElemType::Uint8).primary_tier().unwrap().lanes, 32);
        assert_eq!(find(ZMM, ElemType::Float32).primary_tier().unwrap().lanes, 16);
        assert_eq!(find(ZMM, ElemType::Bfloat16).primary_tier().unwrap().lanes, 16);
        assert_eq!(find(ZMM, ElemType::Uint8).primary_tier().unwrap().mask_type, "__mmask64");
    }

    #[test]
    fn test_fused_multiply_add_takes_accumulator_last() {
        for w in [YMM, ZMM] {
            let p = find(w, ElemType::Float32);
            assert_eq!(p.fma_order, FmaOrder::AccLast);
            let tier = p.primary_tier().unwrap();
            assert_eq!(
                tier.op(VecOp::MulAdd).unwrap().apply(&["a".into(), "b".into(), "acc".into()]),
                format!("{}_fmadd_ps(a, b, acc)", w.p)
            );
        }
    }

    #[test]
    fn test_select_conventions_differ_by_width() {
        let avx2 = find(YMM, ElemType::Float32);
        assert_eq!(avx2.select_order, SelectOrder::MaskLast);
        assert_eq!(
            avx2.primary_tier().unwrap().op(VecOp::IfThenElse),
            Some(&Intrinsic::call("_mm256_blendv_ps"))
        );
        let avx512 = find(ZMM, ElemType::Float32);
        assert_eq!(avx512.select_order, SelectOrder::MaskFirst);
        assert_eq!(
            avx512
                .primary_tier()
                .unwrap()
                .op(VecOp::IfThenElse)
                .unwrap()
                .apply(&["m".into(), "y".into(), "n".into()]),
            "_mm512_mask_blend_ps(m, n, y)"
        );
    }

    #[test]
    fn test_avx2_integers_cast_pointers() {
        let p = find(YMM, ElemType::Uint32);
        assert_eq!(p.load_ptr_cast.as_deref(), Some("(const __m256i *)"));
        assert_eq!(p.store_ptr_cast.as_deref(), Some("(__m256i *)"));
        assert!(find(ZMM, ElemType::Uint32).load_ptr_cast.is_none());
        assert!(find(YMM, ElemType::Float32).load_ptr_cast.is_none());
    }

    #[test]
    fn test_unsigned_compares_bias_sign_bit() {
        let tier = find(YMM, ElemType::Uint32);
        let less = tier
            .primary_tier()
            .unwrap()
            .op(VecOp::Less)
            .unwrap()
            .apply(&["a".into(), "b".into()]);
        assert_eq!(
            less,
            "_mm256_cmpgt_epi32(_mm256_xor_si256(b, _mm256_set1_epi32((int)0x80000000)), _mm256_xor_si256(a, _mm256_set1_epi32((int)0x80000000)))"
        );
    }

    #[test]
    fn test_avx2_partial_popcount_needs_lookup_helper() {
        let p = find(YMM, ElemType::Uint64);
        let accum = p.primary_tier().unwrap().popcount_accum.clone().unwrap();
        assert_eq!(accum.partial.helpers()[0].name, "pv_popcnt_epi8_256");
        assert_eq!(accum.reduce.helpers()[0].name, "pv_reduce_add_epi64_256");
        assert!(find(YMM, ElemType::Sint64)
            .primary_tier()
            .unwrap()
            .popcount_accum
            .is_none());
    }

    #[test]
    fn test_no_multi_register_load_on_x86() {
        for w in [YMM, ZMM] {
            let p = find(w, ElemType::Float32);
            assert!(p.primary_tier().unwrap().op(VecOp::Load4).is_none());
        }
    }
}
