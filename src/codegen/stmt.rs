use std::fmt::Write;

use super::accum::Run;
use super::c_utils::{operand, SUPPRESS_VECTORIZE};
use super::types::VarType;
use super::{KernelGenerator, LowerError};
use crate::ir::{AssignOp, BinOp, Expr, Stmt};
use crate::profile::VecOp;
use crate::utils::indent;

/// Returns `true` for a non-empty body made only of `panic(..)` calls.
fn panics_only(body: &[Stmt]) -> bool {
    !body.is_empty()
        && body
            .iter()
            .all(|s| matches!(s, Stmt::Expr(Expr::Call { func, .. }) if func == "panic"))
}

impl KernelGenerator<'_> {
    /// The value a declared-but-uninitialized `ty` starts at.
    pub(super) fn zero_value(&self, ty: VarType) -> String {
        match ty {
            VarType::Vector => match self.tier.op(VecOp::Zero) {
                Some(zero) => zero.apply(&[]),
                None => "{0}".to_string(),
            },
            VarType::Mask => {
                if self.tier.scalar || self.tier.mask_type.starts_with("__mmask") {
                    "0".to_string()
                } else {
                    "{0}".to_string()
                }
            }
            VarType::Multi | VarType::HalfVector => "{0}".to_string(),
            _ => "0".to_string(),
        }
    }

    pub(super) fn block(
        &mut self,
        stmts: &[Stmt],
        depth: usize,
        out: &mut String,
    ) -> Result<(), LowerError> {
        let mut runs = self.plan_deferral(stmts).into_iter().peekable();
        let mut open = None;
        for (i, s) in stmts.iter().enumerate() {
            if let Some(run) = runs.next_if(|r| r.start == i) {
                self.open_run(&run, depth, out)?;
                open = Some(run);
            }
            self.statement(s, depth, out)?;
            if open.as_ref().is_some_and(|r: &Run| r.end == i) {
                if let Some(run) = open.take() {
                    self.close_run(&run, depth, out)?;
                }
            }
        }
        Ok(())
    }

    /// Lowers one statement, placing any declarations its expressions needed
    /// ahead of it.
    fn statement(&mut self, s: &Stmt, depth: usize, out: &mut String) -> Result<(), LowerError> {
        let saved = std::mem::take(&mut self.pending);
        let mut text = String::new();
        self.stmt(s, depth, &mut text)?;
        let hoisted = std::mem::replace(&mut self.pending, saved);
        for line in hoisted {
            writeln!(out, "{}{line}", indent(depth))?;
        }
        out.push_str(&text);
        Ok(())
    }

    fn stmt(&mut self, s: &Stmt, depth: usize, out: &mut String) -> Result<(), LowerError> {
        let pad = indent(depth);
        match s {
            Stmt::Assign { lhs, op, rhs } if lhs.len() > 1 => {
                for line in self.multi_assign(lhs, *op, rhs)? {
                    writeln!(out, "{pad}{line}")?;
                }
            }
            Stmt::Assign { .. } | Stmt::IncDec { .. } | Stmt::VarDecl { .. } => {
                let text = self.simple(s)?;
                writeln!(out, "{pad}{text};")?;
            }
            Stmt::Expr(e) => {
                let text = self.expr(e)?;
                writeln!(out, "{pad}{text};")?;
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
            } => {
                let init = match init {
                    Some(s) => self.simple(s)?,
                    None => String::new(),
                };
                let cond = match cond {
                    Some(c) => self.expr(c)?,
                    None => String::new(),
                };
                let post = match post {
                    Some(s) => self.simple(s)?,
                    None => String::new(),
                };
                self.loop_directive(depth, out)?;
                writeln!(out, "{pad}for ({init}; {cond}; {post}) {{")?;
                self.block(body, depth + 1, out)?;
                writeln!(out, "{pad}}}")?;
            }
            Stmt::Range {
                key,
                value,
                over,
                body,
            } => self.range(key.as_deref(), value.as_deref(), over, body, depth, out)?,
            Stmt::If {
                init,
                cond,
                then,
                els,
            } => {
                if els.is_none() && panics_only(then) {
                    log::debug!("Eliding bounds check");
                    return Ok(());
                }
                match init {
                    Some(init) => {
                        writeln!(out, "{pad}{{")?;
                        self.statement(init, depth + 1, out)?;
                        let inner = indent(depth + 1);
                        self.if_chain(cond, then, els.as_deref(), depth + 1, &inner, out)?;
                        writeln!(out, "{pad}}}")?;
                    }
                    None => self.if_chain(cond, then, els.as_deref(), depth, &pad, out)?,
                }
            }
            Stmt::Block(body) => {
                writeln!(out, "{pad}{{")?;
                self.block(body, depth + 1, out)?;
                writeln!(out, "{pad}}}")?;
            }
            Stmt::Return(values) => self.ret(values, depth, out)?,
            Stmt::Break => writeln!(out, "{pad}break;")?,
            Stmt::Continue => writeln!(out, "{pad}continue;")?,
            Stmt::Unsupported { kind, loc } => {
                let comment = self.unsupported(kind, &loc.to_string())?;
                writeln!(out, "{pad}{comment}")?;
            }
        }
        Ok(())
    }

    /// Lowers a statement that fits in a `for` header, without the `;`.
    fn simple(&mut self, s: &Stmt) -> Result<String, LowerError> {
        match s {
            Stmt::Assign { lhs, op, rhs } if lhs.len() == 1 && rhs.len() == 1 => {
                self.assign_one(&lhs[0], *op, &rhs[0])
            }
            Stmt::IncDec { target, inc } => {
                let target = self.lvalue(target)?;
                Ok(format!("{target}{}", if *inc { "++" } else { "--" }))
            }
            Stmt::VarDecl { name, ty, init } => {
                let ty = self.types.define(name, VarType::from(*ty));
                let value = match init {
                    Some(e) => self.expr(e)?,
                    None => self.zero_value(ty),
                };
                Ok(format!(
                    "{} = {value}",
                    ty.declare(name, self.profile, self.tier)
                ))
            }
            Stmt::Expr(e) => self.expr(e),
            other => Err(LowerError::Malformed(format!(
                "cannot lower this {} as a single statement",
                other.kind_name()
            ))),
        }
    }

    fn assign_one(&mut self, lhs: &Expr, op: AssignOp, rhs: &Expr) -> Result<String, LowerError> {
        if let Some(accumulate) =
            self.deferred_accumulate(std::slice::from_ref(lhs), op, std::slice::from_ref(rhs))?
        {
            return Ok(accumulate);
        }
        if lhs.as_ident() == Some("_") {
            let value = self.expr(rhs)?;
            return Ok(format!("(void)({value})"));
        }
        if op == AssignOp::Define {
            let Some(name) = lhs.as_ident() else {
                return Err(LowerError::Malformed(
                    "only names can be defined with :=".to_string(),
                ));
            };
            let inferred = self.types.infer(rhs, self.profile);
            let value = self.expr(rhs)?;
            let ty = self.types.define(name, inferred);
            return Ok(format!(
                "{} = {value}",
                ty.declare(name, self.profile, self.tier)
            ));
        }

        if self.profile.is_promoted() && self.is_element(lhs) {
            let target = self.lvalue(lhs)?;
            let value = match op.binop() {
                None => self.expr(rhs)?,
                Some(bin) => {
                    let current = self.promote(target.clone());
                    let r = operand(rhs, self.expr(rhs)?);
                    match bin {
                        BinOp::AndNot => format!("{current} & ~{r}"),
                        _ => format!("{current} {} {r}", bin.c_op()),
                    }
                }
            };
            let narrowed = self.demote(value);
            return Ok(format!("{target} = {narrowed}"));
        }

        let target = self.lvalue(lhs)?;
        let value = self.expr(rhs)?;
        Ok(match op {
            AssignOp::AndNot => format!("{target} &= ~{}", operand(rhs, value)),
            _ => format!("{target} {} {value}", op.c_op().unwrap_or("=")),
        })
    }

    /// Returns `true` if `e` names one element of an array.
    fn is_element(&self, e: &Expr) -> bool {
        match e {
            Expr::Index { base, .. } => self.types.infer(base, self.profile) == VarType::ElemPtr,
            Expr::Deref(inner) => self.types.infer(inner, self.profile) == VarType::ElemPtr,
            _ => false,
        }
    }

    fn multi_assign(
        &mut self,
        lhs: &[Expr],
        op: AssignOp,
        rhs: &[Expr],
    ) -> Result<Vec<String>, LowerError> {
        if let [source] = rhs {
            if let Some(("Load4", [ptr])) = source.as_simd_call() {
                if lhs.len() == 4 && matches!(op, AssignOp::Define | AssignOp::Assign) {
                    return self.load4(lhs, op, ptr);
                }
            }
        }
        if lhs.len() != rhs.len() {
            return Err(LowerError::Malformed(format!(
                "assignment of {} values to {} targets",
                rhs.len(),
                lhs.len()
            )));
        }
        lhs.iter()
            .zip(rhs)
            .map(|(l, r)| self.assign_one(l, op, r).map(|line| format!("{line};")))
            .collect()
    }

    /// `v0, v1, v2, v3 := Load4(p)`, as one combined load where the tier has
    /// it and four offset loads otherwise.
    fn load4(
        &mut self,
        lhs: &[Expr],
        op: AssignOp,
        ptr: &Expr,
    ) -> Result<Vec<String>, LowerError> {
        let mut names = vec![];
        for target in lhs {
            match target.as_ident() {
                Some("_") => names.push(None),
                Some(name) => names.push(Some(name)),
                None => {
                    return Err(LowerError::Malformed(
                        "Load4 results must be assigned to names".to_string(),
                    ))
                }
            }
        }
        let base = self.expr(ptr)?;
        let tier = self.tier;
        let mut lines = vec![];

        if let (Some(multi), Some(combined)) = (&tier.multi, tier.op(VecOp::Load4)) {
            let tmp = self.namer.fresh_name("multi");
            self.headers.use_helpers(combined.helpers());
            let cast = self.load_pointer(base);
            lines.push(format!("{} {tmp} = {};", multi.ty, combined.apply(&[cast])));
            let field = crate::profile::Intrinsic::template(&multi.field);
            for (k, name) in names.iter().enumerate() {
                if let Some(name) = name {
                    let value = field.apply(&[tmp.clone(), k.to_string()]);
                    lines.push(self.bind(name, op, VarType::Vector, value));
                }
            }
            return Ok(lines);
        }

        log::debug!(
            "No combined Load4 on the {} tier; loading registers one at a time",
            tier.id
        );
        let Some(load) = tier.op(VecOp::Load) else {
            let placeholder = self.missing(VecOp::Load.as_ref(), &[base])?;
            return Ok(vec![format!("(void)({placeholder});")]);
        };
        self.headers.use_helpers(load.helpers());
        for (k, name) in names.iter().enumerate() {
            let Some(name) = name else { continue };
            let at = match k {
                0 => base.clone(),
                _ => format!("{base} + {}", k as u32 * tier.lanes),
            };
            let value = load.apply(&[self.load_pointer(at)]);
            lines.push(self.bind(name, op, VarType::Vector, value));
        }
        Ok(lines)
    }

    fn bind(&mut self, name: &str, op: AssignOp, ty: VarType, value: String) -> String {
        if op == AssignOp::Define {
            let ty = self.types.define(name, ty);
            format!("{} = {value};", ty.declare(name, self.profile, self.tier))
        } else {
            format!("{name} = {value};")
        }
    }

    fn loop_directive(&self, depth: usize, out: &mut String) -> Result<(), LowerError> {
        if !self.deferred.in_run() {
            writeln!(out, "{}{SUPPRESS_VECTORIZE}", indent(depth))?;
        }
        Ok(())
    }

    /// `for key, value := range over`, over a count or an array.
    fn range(
        &mut self,
        key: Option<&str>,
        value: Option<&str>,
        over: &Expr,
        body: &[Stmt],
        depth: usize,
        out: &mut String,
    ) -> Result<(), LowerError> {
        let pad = indent(depth);
        let over_ty = self.types.infer(over, self.profile);
        let index = match key {
            Some(k) if k != "_" => k.to_string(),
            _ => self.namer.fresh_name("i"),
        };
        self.types.define(&index, VarType::Int);

        let array = over_ty == VarType::ElemPtr;
        let bound = if array {
            self.extent(over)?
        } else {
            self.expr(over)?
        };
        let binding = match value.filter(|v| *v != "_") {
            Some(_) if !array => {
                return Err(LowerError::Malformed(
                    "range over a count has no element value".to_string(),
                ))
            }
            Some(v) => {
                let base = operand(over, self.expr(over)?);
                let element = self.promote(format!("{base}[{index}]"));
                let ty = self.types.define(v, VarType::Elem);
                Some(format!(
                    "{} = {element};",
                    ty.declare(v, self.profile, self.tier)
                ))
            }
            None => None,
        };

        self.loop_directive(depth, out)?;
        writeln!(
            out,
            "{pad}for (long {index} = 0; {index} < {bound}; {index}++) {{"
        )?;
        if let Some(binding) = binding {
            writeln!(out, "{}{binding}", indent(depth + 1))?;
        }
        self.block(body, depth + 1, out)?;
        writeln!(out, "{pad}}}")?;
        Ok(())
    }

    /// Lowers an `if` and any `else if` chained to it. `lead` precedes the
    /// first `if`.
    fn if_chain(
        &mut self,
        cond: &Expr,
        then: &[Stmt],
        els: Option<&Stmt>,
        depth: usize,
        lead: &str,
        out: &mut String,
    ) -> Result<(), LowerError> {
        let pad = indent(depth);
        let cond = self.expr(cond)?;
        writeln!(out, "{lead}if ({cond}) {{")?;
        self.block(then, depth + 1, out)?;
        match els {
            None => writeln!(out, "{pad}}}")?,
            Some(Stmt::If {
                init: None,
                cond,
                then,
                els,
            }) => {
                let lead = format!("{pad}}} else ");
                self.if_chain(cond, then, els.as_deref(), depth, &lead, out)?;
            }
            Some(Stmt::Block(body)) => {
                writeln!(out, "{pad}}} else {{")?;
                self.block(body, depth + 1, out)?;
                writeln!(out, "{pad}}}")?;
            }
            Some(other) => {
                writeln!(out, "{pad}}} else {{")?;
                self.statement(other, depth + 1, out)?;
                writeln!(out, "{pad}}}")?;
            }
        }
        Ok(())
    }

    /// Writes each result through its output pointer, then returns.
    fn ret(&mut self, values: &[Expr], depth: usize, out: &mut String) -> Result<(), LowerError> {
        let pad = indent(depth);
        let outputs = self.outputs.clone();
        if values.is_empty() {
            for o in &outputs {
                let Some(local) = &o.local else {
                    return Err(LowerError::Malformed(format!(
                        "bare return from a function with unnamed result {}",
                        o.ptr
                    )));
                };
                writeln!(out, "{pad}*{} = {local};", o.ptr)?;
            }
        } else {
            if values.len() != outputs.len() {
                return Err(LowerError::Malformed(format!(
                    "return of {} values from a function with {} results",
                    values.len(),
                    outputs.len()
                )));
            }
            let lowered = values
                .iter()
                .map(|v| self.expr(v))
                .collect::<Result<Vec<_>, _>>()?;
            for (o, v) in outputs.iter().zip(lowered) {
                writeln!(out, "{pad}*{} = {v};", o.ptr)?;
            }
        }
        writeln!(out, "{pad}return;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::{LowerError, Lowerer};
    use crate::common::{Arch, ElemType};
    use crate::ir::{AssignOp, DeclType, Expr, ParamType, ParsedFunction, Stmt};
    use crate::profile::Registry;

    fn lower(f: &ParsedFunction, arch: Arch, elem: ElemType) -> Result<String, LowerError> {
        let registry = Registry::builtin();
        let profile = registry.lookup(arch, elem).unwrap();
        Lowerer::new().with_header(false).translate(f, profile, elem)
    }

    #[test]
    fn test_declared_locals_start_at_zero() {
        let f = ParsedFunction::new("k").body(vec![
            Stmt::var("n", DeclType::Int),
            Stmt::var("x", DeclType::Elem),
            Stmt::var("v", DeclType::Vector),
            Stmt::var("m", DeclType::Mask),
        ]);
        let c = lower(&f, Arch::Avx512, ElemType::Float64).unwrap();
        assert!(c.contains("  long n = 0;\n"));
        assert!(c.contains("  double x = 0;\n"));
        assert!(c.contains("  __m512d v = _mm512_setzero_pd();\n"));
        assert!(c.contains("  __mmask8 m = 0;\n"));

        let c = lower(&f, Arch::Neon, ElemType::Float32).unwrap();
        assert!(c.contains("  uint32x4_t m = {0};\n"));
    }

    #[test]
    fn test_first_definition_fixes_the_type() {
        let f = ParsedFunction::new("k")
            .param("a", ParamType::Array)
            .body(vec![
                Stmt::define("x", Expr::index(Expr::ident("a"), Expr::int(0))),
                Stmt::assign(Expr::ident("x"), Expr::int(3)),
                Stmt::incr("x"),
            ]);
        let c = lower(&f, Arch::Neon, ElemType::Sint64).unwrap();
        assert!(c.contains("  int64_t x = a[0];\n  x = 3;\n  x++;\n"));
    }

    #[test]
    fn test_blank_targets_discard_values() {
        let f = ParsedFunction::new("k")
            .param("a", ParamType::Array)
            .body(vec![Stmt::assign(
                Expr::ident("_"),
                Expr::simd("Load", vec![Expr::ident("a")]),
            )]);
        let c = lower(&f, Arch::Avx2, ElemType::Float32).unwrap();
        assert!(c.contains("  (void)(_mm256_loadu_ps(a));\n"));
    }

    #[test]
    fn test_and_not_assignment_complements_right_side() {
        let f = ParsedFunction::new("k")
            .param("x", ParamType::ScalarInt)
            .param("y", ParamType::ScalarInt)
            .body(vec![Stmt::compound(
                AssignOp::AndNot,
                Expr::ident("x"),
                Expr::binary(crate::ir::BinOp::Or, Expr::ident("y"), Expr::int(1)),
            )]);
        let c = lower(&f, Arch::Avx2, ElemType::Uint32).unwrap();
        assert!(c.contains("  x &= ~(y | 1);\n"));
    }

    #[test]
    fn test_for_without_init_or_condition() {
        let f = ParsedFunction::new("k").body(vec![
            Stmt::define("i", Expr::int(0)),
            Stmt::For {
                init: None,
                cond: None,
                post: Some(Box::new(Stmt::incr("i"))),
                body: vec![Stmt::Break],
            },
        ]);
        let c = lower(&f, Arch::Neon, ElemType::Uint8).unwrap();
        assert!(c.contains("  for (; ; i++) {\n    break;\n  }\n"));
    }

    #[test]
    fn test_if_with_init_is_scoped() {
        let f = ParsedFunction::new("k")
            .param("n", ParamType::ScalarInt)
            .body(vec![Stmt::If {
                init: Some(Box::new(Stmt::define(
                    "r",
                    Expr::binary(crate::ir::BinOp::Rem, Expr::ident("n"), Expr::int(4)),
                ))),
                cond: Expr::binary(crate::ir::BinOp::Ne, Expr::ident("r"), Expr::int(0)),
                then: vec![Stmt::Continue],
                els: None,
            }]);
        let c = lower(&f, Arch::Neon, ElemType::Float32).unwrap();
        assert!(c.contains("  {\n    long r = n % 4;\n    if (r != 0) {\n      continue;\n    }\n  }\n"));
    }

    #[test]
    fn test_panic_with_else_branch_traps() {
        let f = ParsedFunction::new("k")
            .param("n", ParamType::ScalarInt)
            .body(vec![Stmt::If {
                init: None,
                cond: Expr::binary(crate::ir::BinOp::Lt, Expr::ident("n"), Expr::int(0)),
                then: vec![Stmt::Expr(Expr::call("panic", vec![]))],
                els: Some(Box::new(Stmt::Block(vec![Stmt::incr("n")]))),
            }]);
        let c = lower(&f, Arch::Avx2, ElemType::Sint32).unwrap();
        assert!(c.contains("    __builtin_trap();\n  } else {\n    n++;\n  }\n"));
    }

    #[test]
    fn test_mismatched_returns_are_malformed() {
        let f = ParsedFunction::new("k")
            .returns(ParamType::ScalarInt)
            .returns(ParamType::ScalarInt)
            .body(vec![Stmt::Return(vec![Expr::int(1)])]);
        assert!(matches!(
            lower(&f, Arch::Neon, ElemType::Float32),
            Err(LowerError::Malformed(_))
        ));
        let bare = ParsedFunction::new("k")
            .returns(ParamType::ScalarInt)
            .body(vec![Stmt::Return(vec![])]);
        assert!(matches!(
            lower(&bare, Arch::Neon, ElemType::Float32),
            Err(LowerError::Malformed(_))
        ));
    }

    #[test]
    fn test_load4_skips_blank_registers() {
        let f = ParsedFunction::new("k")
            .param("a", ParamType::Array)
            .param("i", ParamType::ScalarInt)
            .body(vec![Stmt::Assign {
                lhs: ["v0", "_", "_", "v3"].map(Expr::ident).to_vec(),
                op: AssignOp::Define,
                rhs: vec![Expr::simd(
                    "Load4",
                    vec![Expr::slice_from(Expr::ident("a"), Expr::ident("i"))],
                )],
            }]);
        let c = lower(&f, Arch::Avx2, ElemType::Uint32).unwrap();
        assert!(c.contains("  __m256i v0 = _mm256_loadu_si256((const __m256i *)(a + i));\n"));
        assert!(c.contains("  __m256i v3 = _mm256_loadu_si256((const __m256i *)(a + i + 24));\n"));
        assert_eq!(c.matches("_mm256_loadu_si256").count(), 2);
    }
}
