use crate::ir::Expr;

/// Directive placed on loops the downstream compiler must not re-vectorize.
pub const SUPPRESS_VECTORIZE: &str = "#pragma clang loop vectorize(disable) interleave(disable)";

/// Name of the synthesized length parameter.
pub const LEN_NAME: &str = "pv_len";

/// Spells a floating literal. Integral values keep one decimal place so they
/// stay floating in C.
pub fn float_literal(v: f64, suffix: &str) -> String {
    if v.is_nan() {
        return "(0.0 / 0.0)".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" }.to_string();
    }
    if v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}{suffix}")
    } else {
        format!("{v}{suffix}")
    }
}

/// Wraps a lowered operand in parentheses when its source was compound.
pub fn operand(source: &Expr, lowered: String) -> String {
    match source {
        Expr::Binary { .. } | Expr::Unary { .. } => format!("({lowered})"),
        // An offset slice lowers to pointer arithmetic.
        Expr::Slice { .. } if lowered.contains(' ') => format!("({lowered})"),
        _ => lowered,
    }
}

pub fn strip_parens(mut e: &Expr) -> &Expr {
    while let Expr::Paren(inner) = e {
        e = inner;
    }
    e
}

/// Turns a qualified callee such as `pkg.Fn` into a C identifier.
pub fn c_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
