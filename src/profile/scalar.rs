//! The one-lane tier every ladder ends in.
//!
//! Operations are spelled as plain C expressions at the profile's working
//! precision, so the scalar tier of any profile lowers to portable code
//! except for the square root, which each architecture spells itself.

use super::{Conversions, FmaOrder, Intrinsic, SelectOrder, Tier, TierId};
use crate::common::ElemType;

pub(super) struct ScalarSpelling<'a> {
    pub elem: ElemType,
    pub work_type: &'a str,
    pub fma_order: FmaOrder,
    pub select_order: SelectOrder,
    pub conversions: &'a Conversions,
    /// Scalar square root at working precision, for floating profiles.
    pub sqrt: Option<&'a str>,
}

pub(super) fn scalar_tier(s: ScalarSpelling<'_>) -> Tier {
    let t = Intrinsic::template;
    let work = s.work_type;

    let demoted = s.conversions.demote.apply(&["$0".to_string()]);
    let store_pattern = format!("(*($1) = {demoted})");
    let store = if s.conversions.demote.helpers().is_empty() {
        Intrinsic::Template(store_pattern)
    } else {
        Intrinsic::TemplateWith(store_pattern, s.conversions.demote.helpers().to_vec())
    };

    let mut ops = op_table! {
        Load => s.conversions.promote.around("(*($0))"),
        Store => store,
        Set => t("($0)"),
        Zero => Intrinsic::Template(format!("(({work})0)")),
        MulAdd => match s.fma_order {
            FmaOrder::AccFirst => t("(($1) * ($2) + ($0))"),
            FmaOrder::AccLast => t("(($0) * ($1) + ($2))"),
        },
        Add => t("(($0) + ($1))"),
        Sub => t("(($0) - ($1))"),
        Mul => t("(($0) * ($1))"),
        Div => t("(($0) / ($1))"),
        Min => t("(($0) < ($1) ? ($0) : ($1))"),
        Max => t("(($0) > ($1) ? ($0) : ($1))"),
        ReduceSum => t("($0)"),
        ReduceMin => t("($0)"),
        ReduceMax => t("($0)"),
        GetLane => t("($0)"),
        Less => t("(($0) < ($1))"),
        LessEqual => t("(($0) <= ($1))"),
        Greater => t("(($0) > ($1))"),
        GreaterEqual => t("(($0) >= ($1))"),
        Equal => t("(($0) == ($1))"),
        IfThenElse => match s.select_order {
            SelectOrder::MaskFirst => t("(($0) ? ($1) : ($2))"),
            SelectOrder::MaskLast => t("(($2) ? ($1) : ($0))"),
        },
        BitsFromMask => t("((uint64_t)(($0) != 0))"),
    };

    let signed = !matches!(
        s.elem,
        ElemType::Uint8 | ElemType::Uint32 | ElemType::Uint64
    );
    if signed {
        ops.insert(super::VecOp::Neg, t("(-($0))"));
        ops.insert(super::VecOp::Abs, t("(($0) < 0 ? -($0) : ($0))"));
    }
    if s.elem.is_float() {
        if let Some(sqrt) = s.sqrt {
            ops.insert(super::VecOp::Sqrt, t(sqrt));
        }
    } else {
        ops.extend(op_table! {
            And => t("(($0) & ($1))"),
            Or => t("(($0) | ($1))"),
            Xor => t("(($0) ^ ($1))"),
            AndNot => t("(($0) & ~($1))"),
            Not => t("(~($0))"),
            PopCount => Intrinsic::Template(format!("(({work})__builtin_popcountll($0))")),
        });
    }

    Tier {
        id: TierId::Scalar,
        lanes: 1,
        unroll: 1,
        scalar: true,
        vec_type: work.to_string(),
        mask_type: "int".to_string(),
        multi: None,
        popcount_accum: None,
        ops,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::VecOp;

    fn spelled(elem: ElemType, work: &str, fma: FmaOrder, select: SelectOrder) -> Tier {
        scalar_tier(ScalarSpelling {
            elem,
            work_type: work,
            fma_order: fma,
            select_order: select,
            conversions: &Conversions::identity(),
            sqrt: Some("__sqrt($0)"),
        })
    }

    fn args(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_muladd_follows_fma_order() {
        let first = spelled(ElemType::Float32, "float", FmaOrder::AccFirst, SelectOrder::MaskFirst);
        let last = spelled(ElemType::Float32, "float", FmaOrder::AccLast, SelectOrder::MaskLast);
        // Both spellings compute a * b + acc once operands are reordered.
        assert_eq!(
            first.op(VecOp::MulAdd).unwrap().apply(&args(&["acc", "a", "b"])),
            "((a) * (b) + (acc))"
        );
        assert_eq!(
            last.op(VecOp::MulAdd).unwrap().apply(&args(&["a", "b", "acc"])),
            "((a) * (b) + (acc))"
        );
    }

    #[test]
    fn test_select_follows_select_order() {
        let first = spelled(ElemType::Sint32, "int32_t", FmaOrder::AccFirst, SelectOrder::MaskFirst);
        let last = spelled(ElemType::Sint32, "int32_t", FmaOrder::AccLast, SelectOrder::MaskLast);
        assert_eq!(
            first.op(VecOp::IfThenElse).unwrap().apply(&args(&["m", "y", "n"])),
            "((m) ? (y) : (n))"
        );
        assert_eq!(
            last.op(VecOp::IfThenElse).unwrap().apply(&args(&["n", "y", "m"])),
            "((m) ? (y) : (n))"
        );
    }

    #[test]
    fn test_bitwise_ops_only_for_integers() {
        let f = spelled(ElemType::Float64, "double", FmaOrder::AccLast, SelectOrder::MaskLast);
        assert!(f.op(VecOp::And).is_none());
        assert!(f.op(VecOp::Sqrt).is_some());
        let u = spelled(ElemType::Uint64, "uint64_t", FmaOrder::AccLast, SelectOrder::MaskLast);
        assert_eq!(
            u.op(VecOp::PopCount).unwrap().apply(&args(&["x"])),
            "((uint64_t)__builtin_popcountll(x))"
        );
        assert!(u.op(VecOp::Neg).is_none());
        assert!(u.op(VecOp::Sqrt).is_none());
    }

    #[test]
    fn test_store_writes_through_demotion() {
        let conv = Conversions {
            promote: Intrinsic::template("((float)($0))"),
            demote: Intrinsic::template("((_Float16)($0))"),
            ..Conversions::identity()
        };
        let tier = scalar_tier(ScalarSpelling {
            elem: ElemType::Float16,
            work_type: "float",
            fma_order: FmaOrder::AccFirst,
            select_order: SelectOrder::MaskFirst,
            conversions: &conv,
            sqrt: None,
        });
        assert_eq!(
            tier.op(VecOp::Store).unwrap().apply(&args(&["v", "p + i"])),
            "(*(p + i) = ((_Float16)(v)))"
        );
        assert_eq!(
            tier.op(VecOp::Load).unwrap().apply(&args(&["p + i"])),
            "((float)((*(p + i))))"
        );
    }
}
