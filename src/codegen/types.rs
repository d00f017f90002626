//! Per-invocation variable typing.
//!
//! Every name gets one static type, fixed by its first definition and looked
//! up on every later reference.

use indexmap::IndexMap;

use crate::ir::{BinOp, DeclType, Expr, Literal, UnOp, VOCABULARY_PREFIX};
use crate::profile::{IntrinsicProfile, OpResult, Tier, VecOp};

use super::calls::conversion_target;
use super::mathlib::MathFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    /// The wide integer scalar parameters arrive as (`long`).
    Int,
    Int32,
    Int64,
    Uint8,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Bool,
    /// A scalar at the profile's working precision.
    Elem,
    /// Pointer into element storage.
    ElemPtr,
    Vector,
    /// One half of a [VarType::Vector].
    HalfVector,
    Mask,
    /// The combined result of a multi-register load.
    Multi,
    /// Bits packed from a mask.
    Bits,
}

impl VarType {
    pub fn c_type(&self, profile: &IntrinsicProfile, tier: &Tier) -> String {
        match self {
            VarType::Int => "long".to_string(),
            VarType::Int32 => "int32_t".to_string(),
            VarType::Int64 => "int64_t".to_string(),
            VarType::Uint8 => "uint8_t".to_string(),
            VarType::Uint32 => "uint32_t".to_string(),
            VarType::Uint64 | VarType::Bits => "uint64_t".to_string(),
            VarType::Float32 => "float".to_string(),
            VarType::Float64 => "double".to_string(),
            VarType::Bool => "int".to_string(),
            VarType::Elem => profile.work_type.clone(),
            VarType::ElemPtr => format!("{} *", profile.storage_type),
            VarType::Vector => tier.vec_type.clone(),
            VarType::HalfVector => match &profile.conversions.split {
                Some(split) if !tier.scalar => split.half_type.clone(),
                _ => tier.vec_type.clone(),
            },
            VarType::Mask => tier.mask_type.clone(),
            VarType::Multi => match &tier.multi {
                Some(m) => m.ty.clone(),
                None => tier.vec_type.clone(),
            },
        }
    }

    /// Declares `name` of this type, e.g. `float *a` or `long i`.
    pub fn declare(&self, name: &str, profile: &IntrinsicProfile, tier: &Tier) -> String {
        let ty = self.c_type(profile, tier);
        if ty.ends_with('*') {
            format!("{ty}{name}")
        } else {
            format!("{ty} {name}")
        }
    }
}

impl From<DeclType> for VarType {
    fn from(ty: DeclType) -> Self {
        match ty {
            DeclType::Int => VarType::Int,
            DeclType::Int32 => VarType::Int32,
            DeclType::Int64 => VarType::Int64,
            DeclType::Uint8 => VarType::Uint8,
            DeclType::Uint32 => VarType::Uint32,
            DeclType::Uint64 => VarType::Uint64,
            DeclType::Float32 => VarType::Float32,
            DeclType::Float64 => VarType::Float64,
            DeclType::Bool => VarType::Bool,
            DeclType::Elem => VarType::Elem,
            DeclType::Vector => VarType::Vector,
            DeclType::Mask => VarType::Mask,
        }
    }
}

#[derive(Debug, Default)]
pub struct TypeEnv {
    vars: IndexMap<String, VarType>,
}

impl TypeEnv {
    /// Records the type of `name` unless it already has one. Returns the type
    /// in force.
    pub fn define(&mut self, name: &str, ty: VarType) -> VarType {
        *self.vars.entry(name.to_string()).or_insert(ty)
    }

    pub fn get(&self, name: &str) -> Option<VarType> {
        self.vars.get(name).copied()
    }

    /// Infers the type of `e`. Unknown names default to [VarType::Int].
    pub fn infer(&self, e: &Expr, profile: &IntrinsicProfile) -> VarType {
        match e {
            Expr::Ident(n) => self.get(n).unwrap_or(VarType::Int),
            Expr::Lit(Literal::Int(_)) => VarType::Int,
            Expr::Lit(Literal::Float(_)) => {
                if profile.elem.is_float() {
                    VarType::Elem
                } else {
                    VarType::Float64
                }
            }
            Expr::Lit(Literal::Bool(_)) => VarType::Bool,
            Expr::Binary { op, lhs, rhs } => {
                if op.is_comparison() || op.is_logical() {
                    return VarType::Bool;
                }
                let (l, r) = (self.infer(lhs, profile), self.infer(rhs, profile));
                match (l, r) {
                    (VarType::Int, other) if !matches!(op, BinOp::Shl | BinOp::Shr) => other,
                    (VarType::ElemPtr, _) => VarType::ElemPtr,
                    (l, _) => l,
                }
            }
            Expr::Unary { op: UnOp::Not, .. } => VarType::Bool,
            Expr::Unary { expr, .. } | Expr::Paren(expr) => self.infer(expr, profile),
            Expr::Index { base, .. } => match self.infer(base, profile) {
                VarType::ElemPtr | VarType::Vector => VarType::Elem,
                _ => VarType::Int,
            },
            Expr::Slice { .. } => VarType::ElemPtr,
            Expr::Deref(_) => VarType::Elem,
            Expr::Field { .. } => VarType::Vector,
            Expr::Call { func, args } => self.infer_call(func, args, profile),
            Expr::Unsupported { .. } => VarType::Int,
        }
    }

    fn infer_call(&self, func: &str, args: &[Expr], profile: &IntrinsicProfile) -> VarType {
        if let Some(ty) = conversion_target(func) {
            return ty;
        }
        if MathFn::from_callee(func).is_some() {
            return match args.first().map(|a| self.infer(a, profile)) {
                Some(VarType::Vector) => VarType::Vector,
                _ => VarType::Elem,
            };
        }
        if let Some(op) = func.strip_prefix(VOCABULARY_PREFIX) {
            if matches!(op, "MaxLanes" | "Lanes" | "NumLanes") {
                return VarType::Int;
            }
            return match op.parse::<VecOp>().map(|op| op.result()) {
                Ok(OpResult::Vector) => VarType::Vector,
                Ok(OpResult::Mask) => VarType::Mask,
                Ok(OpResult::Scalar) => VarType::Elem,
                Ok(OpResult::Bits) => VarType::Bits,
                Ok(OpResult::MultiVector) => VarType::Multi,
                Ok(OpResult::HalfVector) => VarType::HalfVector,
                Ok(OpResult::Nothing) | Err(_) => VarType::Int,
            };
        }
        match func {
            "min" | "max" => args
                .first()
                .map(|a| self.infer(a, profile))
                .unwrap_or(VarType::Int),
            "math.Float32bits" => VarType::Uint32,
            "math.Float64bits" => VarType::Uint64,
            _ => VarType::Int,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Arch, ElemType};
    use crate::profile::Registry;

    #[test]
    fn test_first_definition_wins() {
        let mut env = TypeEnv::default();
        assert_eq!(env.define("x", VarType::Vector), VarType::Vector);
        assert_eq!(env.define("x", VarType::Int), VarType::Vector);
        assert_eq!(env.get("x"), Some(VarType::Vector));
    }

    #[test]
    fn test_infers_vocabulary_results() {
        let registry = Registry::builtin();
        let profile = registry.lookup(Arch::Neon, ElemType::Float32).unwrap();
        let mut env = TypeEnv::default();
        env.define("a", VarType::ElemPtr);
        let load = Expr::simd("Load", vec![Expr::slice_from(Expr::ident("a"), Expr::ident("i"))]);
        assert_eq!(env.infer(&load, profile), VarType::Vector);
        let cmp = Expr::simd("Less", vec![load.clone(), load.clone()]);
        assert_eq!(env.infer(&cmp, profile), VarType::Mask);
        let sum = Expr::simd("ReduceSum", vec![load]);
        assert_eq!(env.infer(&sum, profile), VarType::Elem);
        assert_eq!(
            env.infer(&Expr::index(Expr::ident("a"), Expr::int(0)), profile),
            VarType::Elem
        );
        assert_eq!(env.infer(&Expr::call("simd.MaxLanes", vec![]), profile), VarType::Int);
    }

    #[test]
    fn test_declarations_spell_pointers_without_gap() {
        let registry = Registry::builtin();
        let profile = registry.lookup(Arch::Avx2, ElemType::Bfloat16).unwrap();
        let tier = profile.primary_tier().unwrap();
        assert_eq!(VarType::ElemPtr.declare("a", profile, tier), "uint16_t *a");
        assert_eq!(VarType::Elem.declare("x", profile, tier), "float x");
        assert_eq!(VarType::Vector.declare("v", profile, tier), "__m256 v");
    }
}
