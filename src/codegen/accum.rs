//! Deferred accumulation of vector population counts.
//!
//! A loop body of the form
//!
//! ```text
//! count += ReduceSum(PopCount(And(x, y)))
//! ```
//!
//! pays for a full horizontal reduction every iteration. When the tier has a
//! partial population count that widens into an accumulator vector, the
//! reduction moves out of the loop: the accumulator is declared before the
//! loop, each match becomes a vector add, and `count` is finalized once after
//! the loop. Adjacent loops feeding the same variable (a wide main loop and
//! its remainder loop) share one accumulator.

use indexmap::IndexMap;
use std::fmt::Write;

use super::c_utils::strip_parens;
use super::calls::conversion_target;
use super::types::VarType;
use super::{KernelGenerator, LowerError};
use crate::ir::{AssignOp, Expr, Stmt};
use crate::utils::indent;

/// Consecutive loops `block[start..=end]` sharing accumulators for `vars`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Run {
    pub start: usize,
    pub end: usize,
    pub vars: Vec<String>,
}

#[derive(Debug, Default)]
pub(super) struct DeferredState {
    /// Scalar variable to the accumulator standing in for it.
    active: IndexMap<String, String>,
    depth: usize,
}

impl DeferredState {
    pub fn accumulator(&self, var: &str) -> Option<&str> {
        self.active.get(var).map(String::as_str)
    }

    pub fn in_run(&self) -> bool {
        self.depth > 0
    }
}

fn simd_arg<'a>(e: &'a Expr, op: &str) -> Option<&'a [Expr]> {
    match strip_parens(e).as_simd_call() {
        Some((name, args)) if name == op => Some(args),
        _ => None,
    }
}

/// Matches `var += [conv](ReduceSum(PopCount(And(x, y))))`, returning
/// `(var, x, y)`.
pub(super) fn match_idiom<'a>(
    lhs: &'a [Expr],
    op: AssignOp,
    rhs: &'a [Expr],
) -> Option<(&'a str, &'a Expr, &'a Expr)> {
    if op != AssignOp::Add || lhs.len() != 1 || rhs.len() != 1 {
        return None;
    }
    let var = lhs[0].as_ident()?;
    let mut sum = strip_parens(&rhs[0]);
    if let Expr::Call { func, args } = sum {
        if conversion_target(func).is_some() && args.len() == 1 {
            sum = &args[0];
        }
    }
    let [counted] = simd_arg(sum, "ReduceSum")? else {
        return None;
    };
    let [masked] = simd_arg(counted, "PopCount")? else {
        return None;
    };
    let [x, y] = simd_arg(masked, "And")? else {
        return None;
    };
    if x.mentions(var) || y.mentions(var) {
        return None;
    }
    Some((var, x, y))
}

/// Variables the idiom accumulates into anywhere in `s`, in order of first
/// appearance.
fn candidates(s: &Stmt) -> Vec<String> {
    let mut vars: Vec<String> = vec![];
    s.walk(&mut |s| {
        if let Stmt::Assign { lhs, op, rhs } = s {
            if let Some((var, _, _)) = match_idiom(lhs, *op, rhs) {
                if !vars.iter().any(|v| v == var) {
                    vars.push(var.to_string());
                }
            }
        }
    });
    vars
}

/// Returns `true` if `var` is touched in `s` other than by the idiom.
fn mentioned_outside_idiom(s: &Stmt, var: &str) -> bool {
    let mut found = false;
    s.walk(&mut |s| {
        match s {
            Stmt::Assign { lhs, op, rhs } if match_idiom(lhs, *op, rhs).is_some() => return,
            Stmt::VarDecl { name, .. } if name == var => found = true,
            Stmt::Range { key, value, .. }
                if key.as_deref() == Some(var) || value.as_deref() == Some(var) =>
            {
                found = true
            }
            _ => {}
        }
        if s.exprs().iter().any(|e| e.mentions(var)) {
            found = true;
        }
    });
    found
}

/// Returns `true` if `s` can return from the kernel.
fn contains_return(s: &Stmt) -> bool {
    let mut found = false;
    s.walk(&mut |s| found |= matches!(s, Stmt::Return(_)));
    found
}

impl KernelGenerator<'_> {
    fn is_named_result(&self, var: &str) -> bool {
        self.outputs.iter().any(|o| o.local.as_deref() == Some(var))
    }

    /// Finds the loop runs in `block` whose reductions can be deferred.
    pub(super) fn plan_deferral(&self, block: &[Stmt]) -> Vec<Run> {
        if !self.profile.elem.is_bit_countable() || self.tier.popcount_accum.is_none() {
            return vec![];
        }
        let loop_vars = |s: &Stmt| -> Vec<String> {
            if !s.is_loop() {
                return vec![];
            }
            candidates(s)
                .into_iter()
                .filter(|v| self.deferred.accumulator(v).is_none())
                .collect()
        };

        let mut runs = vec![];
        let mut i = 0;
        while i < block.len() {
            let vars = loop_vars(&block[i]);
            if vars.is_empty() {
                i += 1;
                continue;
            }
            let mut run = Run {
                start: i,
                end: i,
                vars,
            };
            while let Some(next) = block.get(run.end + 1) {
                let next_vars = loop_vars(next);
                if !next_vars.iter().any(|v| run.vars.contains(v)) {
                    break;
                }
                for v in next_vars {
                    if !run.vars.contains(&v) {
                        run.vars.push(v);
                    }
                }
                run.end += 1;
            }
            let loops = &block[run.start..=run.end];
            let returns = loops.iter().any(contains_return);
            run.vars.retain(|v| {
                if loops.iter().any(|s| mentioned_outside_idiom(s, v)) {
                    log::debug!("Not deferring {v}: it is used outside the reduction");
                    return false;
                }
                // A bare return writes the result before the accumulator is folded in.
                if returns && self.is_named_result(v) {
                    log::debug!("Not deferring {v}: the loop returns it early");
                    return false;
                }
                true
            });
            i = run.end + 1;
            if !run.vars.is_empty() {
                runs.push(run);
            }
        }
        runs
    }

    /// Declares one zero accumulator per variable of `run`.
    pub(super) fn open_run(
        &mut self,
        run: &Run,
        depth: usize,
        out: &mut String,
    ) -> Result<(), LowerError> {
        let tier = self.tier;
        let Some(pa) = &tier.popcount_accum else {
            return Ok(());
        };
        for var in &run.vars {
            let acc = self.namer.fresh_name("acc");
            self.headers.use_helpers(pa.zero.helpers());
            writeln!(out, "{}{} {acc} = {};", indent(depth), pa.ty, pa.zero.apply(&[]))?;
            log::debug!("Deferring the reduction into {var} through {acc}");
            self.deferred.active.insert(var.clone(), acc);
        }
        self.deferred.depth += 1;
        Ok(())
    }

    /// Folds each accumulator of `run` into its variable.
    pub(super) fn close_run(
        &mut self,
        run: &Run,
        depth: usize,
        out: &mut String,
    ) -> Result<(), LowerError> {
        let tier = self.tier;
        let Some(pa) = &tier.popcount_accum else {
            return Ok(());
        };
        for var in &run.vars {
            let Some(acc) = self.deferred.active.shift_remove(var) else {
                continue;
            };
            let ty = self
                .types
                .get(var)
                .unwrap_or(VarType::Int)
                .c_type(self.profile, tier);
            self.headers.use_helpers(pa.reduce.helpers());
            writeln!(
                out,
                "{}{var} += ({ty}){};",
                indent(depth),
                pa.reduce.apply(&[acc])
            )?;
        }
        self.deferred.depth -= 1;
        Ok(())
    }

    /// The accumulate replacing a matched statement, if its variable is
    /// deferred.
    pub(super) fn deferred_accumulate(
        &mut self,
        lhs: &[Expr],
        op: AssignOp,
        rhs: &[Expr],
    ) -> Result<Option<String>, LowerError> {
        let Some((var, x, y)) = match_idiom(lhs, op, rhs) else {
            return Ok(None);
        };
        let tier = self.tier;
        let (Some(acc), Some(pa)) = (self.deferred.accumulator(var), &tier.popcount_accum) else {
            return Ok(None);
        };
        let acc = acc.to_string();
        let masked = self.expr(&Expr::simd("And", vec![x.clone(), y.clone()]))?;
        self.headers.use_helpers(pa.partial.helpers());
        self.headers.use_helpers(pa.add.helpers());
        let partial = pa.partial.apply(&[masked]);
        Ok(Some(format!(
            "{acc} = {}",
            pa.add.apply(&[acc.clone(), partial])
        )))
    }
}
