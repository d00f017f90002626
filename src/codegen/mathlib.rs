//! Inlined polynomial math helpers.
//!
//! Kernels may not call external symbols, so transcendental functions are
//! emitted as `static inline` C ahead of the kernel. Vector arguments go
//! through a lane-wise wrapper per (function, tier).

use crate::common::ElemType;
use crate::profile::{HelperFn, IntrinsicProfile, Tier};
use crate::utils::indent;

use super::c_utils::SUPPRESS_VECTORIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Precision {
    F32,
    F64,
}

impl Precision {
    /// float64 computes in double; every other element type, including the
    /// promoted half-width floats, in float.
    pub fn for_elem(elem: ElemType) -> Self {
        match elem {
            ElemType::Float64 => Precision::F64,
            _ => Precision::F32,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Precision::F32 => "f32",
            Precision::F64 => "f64",
        }
    }

    pub fn c_type(&self) -> &'static str {
        match self {
            Precision::F32 => "float",
            Precision::F64 => "double",
        }
    }

    /// Source of every scalar helper at this precision.
    pub fn library(&self) -> &'static str {
        match self {
            Precision::F32 => include_str!("partials/mathlib_f32.c"),
            Precision::F64 => include_str!("partials/mathlib_f64.c"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum MathFn {
    Exp,
    Log,
    Sigmoid,
    Erf,
}

impl MathFn {
    /// Recognizes `math.Exp`, `simd.Exp`, bare `Exp` and their siblings.
    pub fn from_callee(func: &str) -> Option<Self> {
        let bare = func.rsplit('.').next().unwrap_or(func);
        match bare {
            "Exp" => Some(MathFn::Exp),
            "Log" => Some(MathFn::Log),
            "Sigmoid" => Some(MathFn::Sigmoid),
            "Erf" => Some(MathFn::Erf),
            _ => None,
        }
    }
}

pub fn scalar_name(f: MathFn, prec: Precision) -> String {
    format!("pv_{}_{}", f.as_ref(), prec.suffix())
}

/// A wrapper applying the scalar helper to each lane of a `tier` vector.
pub fn vector_wrapper(
    f: MathFn,
    prec: Precision,
    profile: &IntrinsicProfile,
    tier: &Tier,
) -> HelperFn {
    let name = format!("pv_{}_v{}_{}", f.as_ref(), tier.lanes, prec.suffix());
    let (vec, work, lanes) = (&tier.vec_type, &profile.work_type, tier.lanes);
    let def = format!(
        "static inline {vec} {name}({vec} v) {{
{i}{work} lanes[{lanes}] __attribute__((aligned(64)));
{i}*({vec} *)lanes = v;
{i}{SUPPRESS_VECTORIZE}
{i}for (int k = 0; k < {lanes}; k++) {{
{ii}lanes[k] = ({work}){scalar}(({ct})lanes[k]);
{i}}}
{i}return *({vec} *)lanes;
}}",
        i = indent(1),
        ii = indent(2),
        scalar = scalar_name(f, prec),
        ct = prec.c_type(),
    );
    HelperFn::new(&name, def)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Arch;
    use crate::profile::Registry;

    #[test]
    fn test_precision_follows_working_width() {
        assert_eq!(Precision::for_elem(ElemType::Float64), Precision::F64);
        assert_eq!(Precision::for_elem(ElemType::Float32), Precision::F32);
        assert_eq!(Precision::for_elem(ElemType::Bfloat16), Precision::F32);
        assert_eq!(scalar_name(MathFn::Sigmoid, Precision::F64), "pv_sigmoid_f64");
    }

    #[test]
    fn test_callee_spellings() {
        assert_eq!(MathFn::from_callee("math.Exp"), Some(MathFn::Exp));
        assert_eq!(MathFn::from_callee("simd.Sigmoid"), Some(MathFn::Sigmoid));
        assert_eq!(MathFn::from_callee("Erf"), Some(MathFn::Erf));
        assert_eq!(MathFn::from_callee("math.Sqrt"), None);
    }

    #[test]
    fn test_libraries_define_every_function_without_libm() {
        for prec in [Precision::F32, Precision::F64] {
            let lib = prec.library();
            for f in [MathFn::Exp, MathFn::Log, MathFn::Sigmoid, MathFn::Erf] {
                let name = scalar_name(f, prec);
                assert!(
                    lib.contains(&format!("static inline {} {name}(", prec.c_type())),
                    "{name}"
                );
            }
            assert!(!lib.contains("#include"));
            assert!(!lib.contains("expf("));
        }
    }

    #[test]
    fn test_vector_wrapper_suppresses_vectorization() {
        let registry = Registry::builtin();
        let profile = registry.lookup(Arch::Neon, ElemType::Float32).unwrap();
        let tier = profile.primary_tier().unwrap();
        let w = vector_wrapper(MathFn::Exp, Precision::F32, profile, tier);
        assert_eq!(w.name, "pv_exp_v4_f32");
        assert!(w
            .definition
            .starts_with("static inline float32x4_t pv_exp_v4_f32(float32x4_t v) {"));
        assert!(w.definition.contains(SUPPRESS_VECTORIZE));
        assert!(w.definition.contains("lanes[k] = (float)pv_exp_f32((float)lanes[k]);"));
    }
}
