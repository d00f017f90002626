//! Reference kernels, as a front end would hand them over.
//!
//! Each is written once against the portable vocabulary and can be lowered
//! for any registered profile. They double as fixtures for the lowering
//! tests and as the inputs of the command-line driver.

use crate::ir::{AssignOp, BinOp, DeclType, Expr, ParamType, ParsedFunction, Stmt};

pub const NAMES: [&str; 7] = [
    "add",
    "scale",
    "dot",
    "relu",
    "sigmoid",
    "and_popcount",
    "extract_lane",
];

pub fn by_name(name: &str) -> Option<ParsedFunction> {
    match name {
        "add" => Some(add()),
        "scale" => Some(scale()),
        "dot" => Some(dot()),
        "relu" => Some(relu()),
        "sigmoid" => Some(sigmoid()),
        "and_popcount" => Some(and_popcount()),
        "extract_lane" => Some(extract_lane()),
        _ => None,
    }
}

fn id(name: &str) -> Expr {
    Expr::ident(name)
}

fn add_exprs(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinOp::Add, lhs, rhs)
}

/// `simd.Load(arr[at:])`
fn load(arr: &str, at: Expr) -> Expr {
    Expr::simd("Load", vec![Expr::slice_from(id(arr), at)])
}

/// `simd.Store(v, arr[i:])`
fn store(v: Expr, arr: &str) -> Stmt {
    Stmt::Expr(Expr::simd("Store", vec![v, Expr::slice_from(id(arr), id("i"))]))
}

fn elem(arr: &str) -> Expr {
    Expr::index(id(arr), id("i"))
}

/// `for ; i+step <= n; i += step { body }`
fn vector_loop(step: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::For {
        init: None,
        cond: Some(Expr::binary(
            BinOp::Le,
            add_exprs(id("i"), step.clone()),
            id("n"),
        )),
        post: Some(Box::new(Stmt::compound(AssignOp::Add, id("i"), step))),
        body,
    }
}

/// `for ; i < n; i++ { body }`
fn tail_loop(body: Vec<Stmt>) -> Stmt {
    Stmt::For {
        init: None,
        cond: Some(Expr::binary(BinOp::Lt, id("i"), id("n"))),
        post: Some(Box::new(Stmt::incr("i"))),
        body,
    }
}

/// `lanes := simd.MaxLanes(); i := 0`
fn prelude() -> Vec<Stmt> {
    vec![
        Stmt::define("lanes", Expr::simd("MaxLanes", vec![])),
        Stmt::define("i", Expr::int(0)),
    ]
}

/// `out[i] = a[i] + b[i]`
pub fn add() -> ParsedFunction {
    let mut body = prelude();
    body.push(vector_loop(
        id("lanes"),
        vec![store(
            Expr::simd("Add", vec![load("a", id("i")), load("b", id("i"))]),
            "out",
        )],
    ));
    body.push(tail_loop(vec![Stmt::assign(
        elem("out"),
        add_exprs(elem("a"), elem("b")),
    )]));
    ParsedFunction::new("add")
        .param("a", ParamType::Array)
        .param("b", ParamType::Array)
        .param("out", ParamType::Array)
        .param("n", ParamType::ScalarInt)
        .body(body)
}

/// `a[i] *= alpha`, in place.
pub fn scale() -> ParsedFunction {
    let alpha = || Expr::call("T", vec![id("alpha")]);
    let mut body = vec![Stmt::define("s", Expr::simd("Set", vec![alpha()]))];
    body.extend(prelude());
    body.push(vector_loop(
        id("lanes"),
        vec![store(
            Expr::simd("Mul", vec![load("a", id("i")), id("s")]),
            "a",
        )],
    ));
    body.push(tail_loop(vec![Stmt::compound(
        AssignOp::Mul,
        elem("a"),
        alpha(),
    )]));
    ParsedFunction::new("scale")
        .param("a", ParamType::Array)
        .param("alpha", ParamType::ScalarFloat)
        .param("n", ParamType::ScalarInt)
        .body(body)
}

/// The sum of `a[i] * b[i]`.
pub fn dot() -> ParsedFunction {
    let mut body = vec![Stmt::define("acc", Expr::simd("Zero", vec![]))];
    body.extend(prelude());
    body.push(vector_loop(
        id("lanes"),
        vec![Stmt::assign(
            id("acc"),
            Expr::simd(
                "MulAdd",
                vec![load("a", id("i")), load("b", id("i")), id("acc")],
            ),
        )],
    ));
    body.push(Stmt::define("sum", Expr::simd("ReduceSum", vec![id("acc")])));
    body.push(tail_loop(vec![Stmt::compound(
        AssignOp::Add,
        id("sum"),
        Expr::binary(BinOp::Mul, elem("a"), elem("b")),
    )]));
    body.push(Stmt::Return(vec![id("sum")]));
    ParsedFunction::new("dot")
        .param("a", ParamType::Array)
        .param("b", ParamType::Array)
        .param("n", ParamType::ScalarInt)
        .returns(ParamType::ScalarFloat)
        .body(body)
}

/// `out[i] = max(x[i], 0)` through a compare and a lane select.
pub fn relu() -> ParsedFunction {
    let mut body = vec![Stmt::define("zero", Expr::simd("Zero", vec![]))];
    body.extend(prelude());
    body.push(vector_loop(
        id("lanes"),
        vec![
            Stmt::define("v", load("x", id("i"))),
            store(
                Expr::simd(
                    "IfThenElse",
                    vec![
                        Expr::simd("Greater", vec![id("v"), id("zero")]),
                        id("v"),
                        id("zero"),
                    ],
                ),
                "out",
            ),
        ],
    ));
    body.push(tail_loop(vec![Stmt::assign(
        elem("out"),
        Expr::call("max", vec![elem("x"), Expr::call("T", vec![Expr::int(0)])]),
    )]));
    ParsedFunction::new("relu")
        .param("x", ParamType::Array)
        .param("out", ParamType::Array)
        .param("n", ParamType::ScalarInt)
        .body(body)
}

/// `out[i] = 1 / (1 + exp(-x[i]))`
pub fn sigmoid() -> ParsedFunction {
    let mut body = prelude();
    body.push(vector_loop(
        id("lanes"),
        vec![store(
            Expr::simd("Sigmoid", vec![load("x", id("i"))]),
            "out",
        )],
    ));
    body.push(tail_loop(vec![Stmt::assign(
        elem("out"),
        Expr::call("math.Sigmoid", vec![elem("x")]),
    )]));
    ParsedFunction::new("sigmoid")
        .param("x", ParamType::Array)
        .param("out", ParamType::Array)
        .param("n", ParamType::ScalarInt)
        .body(body)
}

/// `count += uint64(ReduceSum(PopCount(And(Load(a[at:]), Load(b[at:])))))`
fn count_common_bits(at: Expr) -> Stmt {
    Stmt::compound(
        AssignOp::Add,
        id("count"),
        Expr::call(
            "uint64",
            vec![Expr::simd(
                "ReduceSum",
                vec![Expr::simd(
                    "PopCount",
                    vec![Expr::simd(
                        "And",
                        vec![load("a", at.clone()), load("b", at)],
                    )],
                )],
            )],
        ),
    )
}

/// The number of bits set in both `a` and `b`: a two-register main loop, a
/// one-register remainder loop, then a scalar tail.
pub fn and_popcount() -> ParsedFunction {
    let two = || Expr::binary(BinOp::Mul, Expr::int(2), id("lanes"));
    let mut body = vec![Stmt::var("count", DeclType::Uint64)];
    body.extend(prelude());
    body.push(vector_loop(
        two(),
        vec![
            count_common_bits(id("i")),
            count_common_bits(add_exprs(id("i"), id("lanes"))),
        ],
    ));
    body.push(vector_loop(id("lanes"), vec![count_common_bits(id("i"))]));
    body.push(tail_loop(vec![Stmt::compound(
        AssignOp::Add,
        id("count"),
        Expr::call(
            "uint64",
            vec![Expr::call(
                "bits.OnesCount64",
                vec![Expr::call(
                    "uint64",
                    vec![Expr::binary(BinOp::And, elem("a"), elem("b"))],
                )],
            )],
        ),
    )]));
    body.push(Stmt::Return(vec![Expr::call("int", vec![id("count")])]));
    ParsedFunction::new("and_popcount")
        .param("a", ParamType::Array)
        .param("b", ParamType::Array)
        .param("n", ParamType::ScalarInt)
        .returns(ParamType::ScalarInt)
        .body(body)
}

/// Copies lane `k` and lane 0 of the first vector of `a` into `out`.
pub fn extract_lane() -> ParsedFunction {
    ParsedFunction::new("extract_lane")
        .param("a", ParamType::Array)
        .param("out", ParamType::Array)
        .param("k", ParamType::ScalarInt)
        .body(vec![
            Stmt::define("v", Expr::simd("Load", vec![id("a")])),
            Stmt::assign(
                Expr::index(id("out"), Expr::int(0)),
                Expr::simd("GetLane", vec![id("v"), id("k")]),
            ),
            Stmt::assign(
                Expr::index(id("out"), Expr::int(1)),
                Expr::simd("GetLane", vec![id("v"), Expr::int(0)]),
            ),
        ])
}
