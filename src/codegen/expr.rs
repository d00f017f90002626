use super::c_utils::{float_literal, operand, strip_parens, LEN_NAME};
use super::types::VarType;
use super::{KernelGenerator, LowerError};
use crate::ir::{BinOp, Expr, Literal, UnOp};

impl KernelGenerator<'_> {
    pub(super) fn expr(&mut self, e: &Expr) -> Result<String, LowerError> {
        match e {
            Expr::Ident(name) => Ok(name.clone()),
            Expr::Lit(lit) => Ok(self.literal(lit)),
            Expr::Binary { op, lhs, rhs } => {
                let l = operand(lhs, self.expr(lhs)?);
                let r = operand(rhs, self.expr(rhs)?);
                Ok(match op {
                    BinOp::AndNot => format!("{l} & ~{r}"),
                    _ => format!("{l} {} {r}", op.c_op()),
                })
            }
            Expr::Unary { op, expr } => {
                let x = operand(expr, self.expr(expr)?);
                let sign = match op {
                    UnOp::Neg => "-",
                    UnOp::Not => "!",
                    UnOp::BitNot => "~",
                    UnOp::Addr => "&",
                };
                if x.starts_with(sign) {
                    Ok(format!("{sign}({x})"))
                } else {
                    Ok(format!("{sign}{x}"))
                }
            }
            Expr::Index { base, index } => {
                let raw = self.index_raw(base, index)?;
                if self.types.infer(base, self.profile) == VarType::ElemPtr {
                    Ok(self.promote(raw))
                } else {
                    Ok(raw)
                }
            }
            Expr::Slice { base, lo, .. } => {
                let b = operand(base, self.expr(base)?);
                match lo.as_deref() {
                    None | Some(Expr::Lit(Literal::Int(0))) => Ok(b),
                    Some(lo) => {
                        let offset = operand(lo, self.expr(lo)?);
                        Ok(format!("{b} + {offset}"))
                    }
                }
            }
            Expr::Field { base, field } => {
                let b = operand(base, self.expr(base)?);
                Ok(format!("{b}.{field}"))
            }
            Expr::Paren(inner) => Ok(format!("({})", self.expr(inner)?)),
            Expr::Deref(inner) => {
                let x = operand(inner, self.expr(inner)?);
                Ok(format!("(*{x})"))
            }
            Expr::Call { func, args } => self.call(func, args),
            Expr::Unsupported { kind, loc } => {
                let comment = self.unsupported(kind, &loc.to_string())?;
                Ok(format!("{comment} 0"))
            }
        }
    }

    /// The element count of an array expression. Whole arrays span the
    /// hidden length; `a[lo:]` spans `lo` fewer and `a[lo:hi]` spans
    /// `hi - lo`.
    pub(super) fn extent(&mut self, array: &Expr) -> Result<String, LowerError> {
        let Expr::Slice { base, lo, hi } = strip_parens(array) else {
            self.len_used = true;
            return Ok(LEN_NAME.to_string());
        };
        let upper = match hi {
            Some(hi) => operand(hi, self.expr(hi)?),
            None => self.extent(base)?,
        };
        match lo.as_deref() {
            None | Some(Expr::Lit(Literal::Int(0))) => Ok(upper),
            Some(lo) => {
                let lower = operand(lo, self.expr(lo)?);
                Ok(format!("({upper} - {lower})"))
            }
        }
    }

    /// Floating literals carry the element precision's suffix, except under
    /// promoted math, which always runs at working precision.
    fn literal(&self, lit: &Literal) -> String {
        match lit {
            Literal::Int(v) => v.to_string(),
            Literal::Float(v) => {
                let suffix = if self.profile.is_promoted() {
                    ""
                } else {
                    self.profile.literal_suffix.as_str()
                };
                float_literal(*v, suffix)
            }
            Literal::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        }
    }

    /// `base[index]` as stored, without promotion.
    fn index_raw(&mut self, base: &Expr, index: &Expr) -> Result<String, LowerError> {
        let b = operand(base, self.expr(base)?);
        let i = self.expr(index)?;
        Ok(format!("{b}[{i}]"))
    }

    /// Lowers an assignment target. Array elements are addressed in storage
    /// precision.
    pub(super) fn lvalue(&mut self, e: &Expr) -> Result<String, LowerError> {
        match e {
            Expr::Index { base, index } => self.index_raw(base, index),
            _ => self.expr(e),
        }
    }

    /// Widens a stored element to working precision.
    pub(super) fn promote(&mut self, stored: String) -> String {
        let promote = &self.profile.conversions.promote;
        self.headers.use_helpers(promote.helpers());
        promote.apply(&[stored])
    }

    /// Narrows a working-precision value for storage.
    pub(super) fn demote(&mut self, value: String) -> String {
        let demote = &self.profile.conversions.demote;
        self.headers.use_helpers(demote.helpers());
        demote.apply(&[value])
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::Lowerer;
    use crate::common::{Arch, ElemType};
    use crate::ir::{BinOp, Expr, Literal, ParamType, ParsedFunction, Stmt, UnOp};
    use crate::profile::Registry;

    fn lower_expr(e: Expr, arch: Arch, elem: ElemType) -> String {
        let f = ParsedFunction::new("k")
            .param("a", ParamType::Array)
            .param("i", ParamType::ScalarInt)
            .param("x", ParamType::ScalarFloat)
            .body(vec![Stmt::Expr(e)]);
        let registry = Registry::builtin();
        let profile = registry.lookup(arch, elem).unwrap();
        let c = Lowerer::new()
            .with_header(false)
            .translate(&f, profile, elem)
            .unwrap();
        let line = c.lines().rev().nth(1).unwrap();
        line.trim().trim_end_matches(';').to_string()
    }

    #[test]
    fn test_float_literal_suffix_follows_precision() {
        let lit = Expr::binary(BinOp::Mul, Expr::ident("x"), Expr::float(0.5));
        assert_eq!(lower_expr(lit.clone(), Arch::Neon, ElemType::Float32), "x * 0.5f");
        assert_eq!(lower_expr(lit.clone(), Arch::Neon, ElemType::Float64), "x * 0.5");
        assert_eq!(lower_expr(lit, Arch::Avx2, ElemType::Float16), "x * 0.5");
    }

    #[test]
    fn test_nested_operands_keep_grouping() {
        let e = Expr::binary(
            BinOp::Mul,
            Expr::binary(BinOp::Add, Expr::ident("i"), Expr::int(1)),
            Expr::Unary {
                op: UnOp::Neg,
                expr: Box::new(Expr::int(-2)),
            },
        );
        assert_eq!(lower_expr(e, Arch::Avx2, ElemType::Sint32), "(i + 1) * (-(-2))");
    }

    #[test]
    fn test_slices_are_pointer_offsets() {
        let at = |lo: Expr| Expr::index(Expr::slice_from(Expr::ident("a"), lo), Expr::int(1));
        assert_eq!(lower_expr(at(Expr::int(0)), Arch::Neon, ElemType::Uint8), "a[1]");
        assert_eq!(lower_expr(at(Expr::ident("i")), Arch::Neon, ElemType::Uint8), "(a + i)[1]");
    }

    #[test]
    fn test_element_reads_are_promoted() {
        let e = Expr::index(Expr::ident("a"), Expr::ident("i"));
        assert_eq!(lower_expr(e.clone(), Arch::Neon, ElemType::Float16), "((float)(a[i]))");
        assert_eq!(lower_expr(e.clone(), Arch::Avx512, ElemType::Float16), "_cvtsh_ss(a[i])");
        assert_eq!(lower_expr(e, Arch::Avx512, ElemType::Float32), "a[i]");
    }

    #[test]
    fn test_booleans_and_logic() {
        let e = Expr::binary(
            BinOp::LogAnd,
            Expr::Lit(Literal::Bool(true)),
            Expr::Unary {
                op: UnOp::Not,
                expr: Box::new(Expr::binary(BinOp::Eq, Expr::ident("i"), Expr::int(0))),
            },
        );
        assert_eq!(lower_expr(e, Arch::Neon, ElemType::Sint64), "1 && (!(i == 0))");
    }
}
