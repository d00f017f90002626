//! Call lowering, in priority order: the portable vector vocabulary, the
//! fixed built-ins, the inlined math helpers, then everything else as a plain
//! C call.

use super::c_utils::{c_ident, strip_parens, LEN_NAME};
use super::mathlib::{scalar_name, vector_wrapper, MathFn, Precision};
use super::types::VarType;
use super::{KernelGenerator, LowerError, Strictness};
use crate::ir::{Expr, Literal, UnOp, VOCABULARY_PREFIX};
use crate::profile::{FmaOrder, HelperFn, SelectOrder, VecOp};

/// The variable type a conversion call such as `uint64(x)` produces.
pub(super) fn conversion_target(func: &str) -> Option<VarType> {
    match func {
        "float32" => Some(VarType::Float32),
        "float64" => Some(VarType::Float64),
        "int" => Some(VarType::Int),
        "int32" => Some(VarType::Int32),
        "int64" => Some(VarType::Int64),
        "uint8" | "byte" => Some(VarType::Uint8),
        "uint32" => Some(VarType::Uint32),
        "uint64" | "uint" => Some(VarType::Uint64),
        "T" => Some(VarType::Elem),
        _ => None,
    }
}

fn float_bits(bits: u32) -> HelperFn {
    let (name, float, int) = match bits {
        32 => ("pv_float32_bits", "float", "uint32_t"),
        _ => ("pv_float64_bits", "double", "uint64_t"),
    };
    HelperFn::new(
        name,
        format!(
            "static inline {int} {name}({float} f) {{
  union {{ {float} f; {int} u; }} v;
  v.f = f;
  return v.u;
}}"
        ),
    )
}

fn float_from_bits(bits: u32) -> HelperFn {
    let (name, float, int) = match bits {
        32 => ("pv_float32_from_bits", "float", "uint32_t"),
        _ => ("pv_float64_from_bits", "double", "uint64_t"),
    };
    HelperFn::new(
        name,
        format!(
            "static inline {float} {name}({int} u) {{
  union {{ {float} f; {int} u; }} v;
  v.u = u;
  return v.f;
}}"
        ),
    )
}

const BUILTINS: &[&str] = &[
    "len",
    "min",
    "max",
    "panic",
    "bits.OnesCount",
    "bits.OnesCount8",
    "bits.OnesCount16",
    "bits.OnesCount32",
    "bits.OnesCount64",
    "math.Float32bits",
    "math.Float64bits",
    "math.Float32frombits",
    "math.Float64frombits",
];

impl KernelGenerator<'_> {
    pub(super) fn call(&mut self, func: &str, args: &[Expr]) -> Result<String, LowerError> {
        if let Some(name) = func.strip_prefix(VOCABULARY_PREFIX) {
            if matches!(name, "MaxLanes" | "Lanes" | "NumLanes") {
                return Ok(self.tier.lanes.to_string());
            }
            if let Ok(op) = name.parse::<VecOp>() {
                return self.vector_op(op, args);
            }
        }
        if conversion_target(func).is_some() || BUILTINS.contains(&func) {
            return self.builtin(func, args);
        }
        if let Some(f) = MathFn::from_callee(func) {
            return self.math_call(f, args);
        }
        let lowered = self.exprs(args)?;
        if let Some(name) = func.strip_prefix(VOCABULARY_PREFIX) {
            return self.missing(name, &lowered);
        }
        Ok(format!("{}({})", c_ident(func), lowered.join(", ")))
    }

    fn exprs(&mut self, args: &[Expr]) -> Result<Vec<String>, LowerError> {
        args.iter().map(|a| self.expr(a)).collect()
    }

    fn vector_op(&mut self, op: VecOp, args: &[Expr]) -> Result<String, LowerError> {
        if args.len() != op.arity() {
            let lowered = self.exprs(args)?;
            let reason = format!(
                "simd.{op} takes {} operands, not {}",
                op.arity(),
                args.len()
            );
            return self.malformed_call(op.as_ref(), &lowered, reason);
        }
        if op == VecOp::GetLane && !self.tier.scalar {
            if let Some(spilled) = self.dynamic_lane(args)? {
                return Ok(spilled);
            }
        }
        let tier = self.tier;
        let profile = self.profile;
        let resolved = match op {
            VecOp::LowerHalf | VecOp::UpperHalf | VecOp::Combine if !tier.scalar => {
                profile.conversions.half_op(op)
            }
            _ => tier.op(op),
        };
        let Some(intrinsic) = resolved else {
            let lowered = self.exprs(args)?;
            return self.missing(op.as_ref(), &lowered);
        };

        let mut lowered = self.exprs(args)?;
        match op {
            VecOp::Load | VecOp::Load4 => {
                let ptr = std::mem::take(&mut lowered[0]);
                lowered[0] = self.load_pointer(ptr);
            }
            VecOp::Store => {
                let ptr = std::mem::take(&mut lowered[1]);
                lowered[1] = self.store_pointer(ptr);
            }
            VecOp::MulAdd if self.profile.fma_order == FmaOrder::AccFirst => {
                lowered.rotate_right(1);
            }
            VecOp::IfThenElse if self.profile.select_order == SelectOrder::MaskLast => {
                lowered.swap(0, 2);
            }
            _ => {}
        }
        self.headers.use_helpers(intrinsic.helpers());
        Ok(intrinsic.apply(&lowered))
    }

    /// Lane extraction at a non-literal index. Few instruction sets can
    /// index lanes by a runtime value, so the vector goes through memory.
    fn dynamic_lane(&mut self, args: &[Expr]) -> Result<Option<String>, LowerError> {
        let literal = match strip_parens(&args[1]) {
            Expr::Lit(Literal::Int(_)) => true,
            Expr::Unary {
                op: UnOp::Neg,
                expr,
            } => matches!(strip_parens(expr), Expr::Lit(Literal::Int(_))),
            _ => false,
        };
        if literal {
            return Ok(None);
        }
        let v = self.expr(&args[0])?;
        let index = self.expr(&args[1])?;
        let buf = self.namer.fresh_name("lanes");
        self.pending.push(format!(
            "volatile {} {buf}[{}] __attribute__((aligned(64)));",
            self.profile.work_type, self.tier.lanes
        ));
        Ok(Some(format!(
            "(*({} *){buf} = {v}, {buf}[{index}])",
            self.tier.vec_type
        )))
    }

    pub(super) fn load_pointer(&self, ptr: String) -> String {
        self.cast_pointer(self.profile.load_ptr_cast.as_deref(), ptr)
    }

    fn store_pointer(&self, ptr: String) -> String {
        self.cast_pointer(self.profile.store_ptr_cast.as_deref(), ptr)
    }

    /// Scalar tiers address storage directly and never need the cast.
    fn cast_pointer(&self, cast: Option<&str>, ptr: String) -> String {
        match cast {
            Some(cast) if !self.tier.scalar => {
                if ptr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    format!("{cast}{ptr}")
                } else {
                    format!("{cast}({ptr})")
                }
            }
            _ => ptr,
        }
    }

    fn builtin(&mut self, func: &str, args: &[Expr]) -> Result<String, LowerError> {
        if func == "len" {
            return match args {
                [array] => self.extent(array),
                _ => {
                    self.len_used = true;
                    Ok(LEN_NAME.to_string())
                }
            };
        }
        let lowered = self.exprs(args)?;
        match func {
            "panic" => return Ok("__builtin_trap()".to_string()),
            "min" | "max" if !lowered.is_empty() => {
                let cmp = if func == "min" { "<" } else { ">" };
                let mut it = lowered.into_iter();
                let first = it.next().unwrap_or_default();
                return Ok(it.fold(first, |acc, x| {
                    format!("(({acc}) {cmp} ({x}) ? ({acc}) : ({x}))")
                }));
            }
            _ => {}
        }
        let [x] = lowered.as_slice() else {
            let reason = format!("{func} takes one operand, not {}", lowered.len());
            return self.malformed_call(func, &lowered, reason);
        };

        if let Some(ty) = conversion_target(func) {
            let c_type = ty.c_type(self.profile, self.tier);
            return Ok(format!("(({c_type})({x}))"));
        }
        let helper = match func {
            "bits.OnesCount" | "bits.OnesCount64" => {
                return Ok(format!("((long)__builtin_popcountll((uint64_t)({x})))"));
            }
            "bits.OnesCount8" | "bits.OnesCount16" | "bits.OnesCount32" => {
                return Ok(format!("((long)__builtin_popcount((uint32_t)({x})))"));
            }
            "math.Float32bits" => float_bits(32),
            "math.Float64bits" => float_bits(64),
            "math.Float32frombits" => float_from_bits(32),
            _ => float_from_bits(64),
        };
        self.headers.use_helper(&helper);
        Ok(format!("{}({x})", helper.name))
    }

    /// Math helpers are always inlined. Vector operands go lane by lane
    /// through a wrapper around the scalar helper.
    fn math_call(&mut self, f: MathFn, args: &[Expr]) -> Result<String, LowerError> {
        let [arg] = args else {
            let lowered = self.exprs(args)?;
            let reason = format!("{} takes one operand, not {}", f.as_ref(), args.len());
            return self.malformed_call(f.as_ref(), &lowered, reason);
        };
        let prec = Precision::for_elem(self.profile.elem);
        let vector = self.types.infer(arg, self.profile) == VarType::Vector;
        let x = self.expr(arg)?;
        if vector && !self.tier.scalar {
            let wrapper = vector_wrapper(f, prec, self.profile, self.tier);
            self.headers.use_math_wrapper(prec, &wrapper);
            return Ok(format!("{}({x})", wrapper.name));
        }
        self.headers.use_math(prec);
        Ok(format!("{}({x})", scalar_name(f, prec)))
    }

    /// An operation the active tier can't spell.
    pub(super) fn missing(&self, op: &str, args: &[String]) -> Result<String, LowerError> {
        let (arch, elem, tier) = (self.profile.arch, self.profile.elem, self.tier.id);
        if self.options.strictness == Strictness::Strict {
            return Err(LowerError::MissingMapping {
                op: op.to_string(),
                tier,
                arch,
                elem,
            });
        }
        log::warn!("simd.{op} has no mapping on the {tier} tier of {arch} {elem}");
        Ok(format!(
            "__portavec_missing_{}({}) /* simd.{op} has no {arch} {elem} {tier} mapping */",
            c_ident(op),
            args.join(", ")
        ))
    }

    /// A call whose operands don't fit the callee.
    fn malformed_call(
        &self,
        name: &str,
        args: &[String],
        reason: String,
    ) -> Result<String, LowerError> {
        if self.options.strictness == Strictness::Strict {
            return Err(LowerError::Malformed(reason));
        }
        log::warn!("{reason}");
        Ok(format!(
            "__portavec_missing_{}({}) /* {reason} */",
            c_ident(name),
            args.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Lowerer;
    use crate::common::{Arch, ElemType};
    use crate::ir::{ParamType, ParsedFunction, Stmt};
    use crate::profile::Registry;

    fn lower_call(e: Expr, arch: Arch, elem: ElemType) -> String {
        let f = ParsedFunction::new("k")
            .param("a", ParamType::Array)
            .param("v", ParamType::Vector)
            .param("w", ParamType::Vector)
            .param("m", ParamType::Vector)
            .param("n", ParamType::ScalarInt)
            .param("x", ParamType::ScalarFloat)
            .body(vec![Stmt::Expr(e)]);
        let registry = Registry::builtin();
        let profile = registry.lookup(arch, elem).unwrap();
        Lowerer::new().translate(&f, profile, elem).unwrap()
    }

    fn statement(c: &str) -> &str {
        c.lines().rev().nth(1).unwrap().trim().trim_end_matches(';')
    }

    #[test]
    fn test_conversions_and_builtins() {
        assert_eq!(conversion_target("byte"), Some(VarType::Uint8));
        assert_eq!(conversion_target("T"), Some(VarType::Elem));
        assert_eq!(conversion_target("complex64"), None);

        let c = lower_call(Expr::call("T", vec![Expr::ident("n")]), Arch::Neon, ElemType::Float16);
        assert_eq!(statement(&c), "((float)(n))");
        let c = lower_call(
            Expr::call("bits.OnesCount32", vec![Expr::ident("n")]),
            Arch::Neon,
            ElemType::Uint32,
        );
        assert_eq!(statement(&c), "((long)__builtin_popcount((uint32_t)(n)))");
        let c = lower_call(
            Expr::call("min", vec![Expr::ident("n"), Expr::int(3), Expr::int(7)]),
            Arch::Neon,
            ElemType::Uint32,
        );
        assert_eq!(statement(&c), "((((n) < (3) ? (n) : (3))) < (7) ? (((n) < (3) ? (n) : (3))) : (7))");
    }

    #[test]
    fn test_float_bits_use_inline_unions() {
        let c = lower_call(
            Expr::call("math.Float32bits", vec![Expr::ident("x")]),
            Arch::Avx2,
            ElemType::Float32,
        );
        assert_eq!(statement(&c), "pv_float32_bits(x)");
        assert!(c.contains("static inline uint32_t pv_float32_bits(float f) {"));
    }

    #[test]
    fn test_fma_reorders_for_accumulator_first() {
        let fma = Expr::simd(
            "MulAdd",
            vec![Expr::ident("v"), Expr::ident("w"), Expr::ident("m")],
        );
        let c = lower_call(fma.clone(), Arch::Neon, ElemType::Float32);
        assert_eq!(statement(&c), "vfmaq_f32(m, v, w)");
        let c = lower_call(fma, Arch::Avx2, ElemType::Float32);
        assert_eq!(statement(&c), "_mm256_fmadd_ps(v, w, m)");
    }

    #[test]
    fn test_select_reorders_for_mask_last() {
        let select = Expr::simd(
            "IfThenElse",
            vec![Expr::ident("m"), Expr::ident("v"), Expr::ident("w")],
        );
        let c = lower_call(select.clone(), Arch::Neon, ElemType::Float32);
        assert_eq!(statement(&c), "vbslq_f32(m, v, w)");
        let c = lower_call(select.clone(), Arch::Avx2, ElemType::Float32);
        assert_eq!(statement(&c), "_mm256_blendv_ps(w, v, m)");
        let c = lower_call(select, Arch::Avx512, ElemType::Float32);
        assert_eq!(statement(&c), "_mm512_mask_blend_ps(m, w, v)");
    }

    #[test]
    fn test_integer_loads_and_stores_cast_pointers_on_avx2() {
        let store = Expr::simd(
            "Store",
            vec![Expr::simd("Load", vec![Expr::ident("a")]), Expr::ident("a")],
        );
        let c = lower_call(store.clone(), Arch::Avx2, ElemType::Uint8);
        assert_eq!(
            statement(&c),
            "_mm256_storeu_si256((__m256i *)a, _mm256_loadu_si256((const __m256i *)a))"
        );
        let c = lower_call(store, Arch::Avx512, ElemType::Uint8);
        assert_eq!(statement(&c), "_mm512_storeu_si512(a, _mm512_loadu_si512(a))");
    }

    #[test]
    fn test_math_dispatch_by_operand_shape() {
        let c = lower_call(Expr::call("math.Exp", vec![Expr::ident("x")]), Arch::Neon, ElemType::Float64);
        assert_eq!(statement(&c), "pv_exp_f64(x)");
        assert!(c.contains("static inline double pv_exp_f64(double x) {"));
        assert!(!c.contains("pv_exp_v"));

        let c = lower_call(Expr::call("simd.Erf", vec![Expr::ident("v")]), Arch::Avx512, ElemType::Float32);
        assert_eq!(statement(&c), "pv_erf_v16_f32(v)");
        assert!(c.contains("static inline __m512 pv_erf_v16_f32(__m512 v) {"));
        assert!(!c.contains("erff("));
    }

    #[test]
    fn test_generic_calls_pass_through() {
        let c = lower_call(
            Expr::call("kernels.helper", vec![Expr::ident("n")]),
            Arch::Neon,
            ElemType::Uint8,
        );
        assert_eq!(statement(&c), "kernels_helper(n)");
        let c = lower_call(
            Expr::call("simd.Frobnicate", vec![Expr::ident("v")]),
            Arch::Neon,
            ElemType::Uint8,
        );
        assert!(statement(&c).starts_with("__portavec_missing_Frobnicate(v) /*"));
    }

    #[test]
    fn test_lane_count_is_the_tier_width() {
        let lanes = Expr::call("simd.MaxLanes", vec![]);
        assert_eq!(statement(&lower_call(lanes.clone(), Arch::Avx512, ElemType::Uint8)), "64");
        assert_eq!(statement(&lower_call(lanes.clone(), Arch::Avx2, ElemType::Bfloat16)), "8");
        assert_eq!(statement(&lower_call(lanes, Arch::Neon, ElemType::Float64)), "2");
    }
}
