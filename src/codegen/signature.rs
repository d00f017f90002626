//! Parameter binding under the pointer-only calling convention.
//!
//! Every argument the kernel receives is a pointer: arrays point at element
//! storage, scalars and vectors point at a value that is copied into a local
//! on entry, and each declared result is a trailing pointer the kernel writes
//! before returning.

use super::c_utils::LEN_NAME;
use super::types::VarType;
use super::KernelGenerator;
use crate::ir::{ParamType, ParsedFunction};

/// Where a declared result is written.
#[derive(Debug, Clone)]
pub(super) struct Output {
    pub ptr: String,
    /// The local holding a named result, written on a bare `return`.
    pub local: Option<String>,
}

#[derive(Debug, Default)]
pub(super) struct Signature {
    inputs: Vec<String>,
    len: Option<String>,
    outputs: Vec<String>,
    /// Entry-time declarations, in parameter order.
    pub prologue: Vec<String>,
    input_derefs: usize,
}

impl Signature {
    /// Appends the hidden array length after the declared inputs.
    pub fn add_len(&mut self) {
        self.len = Some(format!("long *{LEN_NAME}_ptr"));
        self.prologue.insert(
            self.input_derefs,
            format!("long {LEN_NAME} = *{LEN_NAME}_ptr;"),
        );
    }

    pub fn params(&self) -> Vec<String> {
        self.inputs
            .iter()
            .chain(&self.len)
            .chain(&self.outputs)
            .cloned()
            .collect()
    }
}

fn value_type(ty: ParamType) -> VarType {
    match ty {
        ParamType::ScalarInt => VarType::Int,
        ParamType::ScalarFloat => VarType::Float64,
        ParamType::Array => VarType::ElemPtr,
        ParamType::Vector => VarType::Vector,
    }
}

impl KernelGenerator<'_> {
    pub(super) fn bind_params(&mut self, function: &ParsedFunction) -> Signature {
        let mut sig = Signature::default();
        for p in &function.params {
            let ty = self.types.define(&p.name, value_type(p.ty));
            if ty == VarType::ElemPtr {
                sig.inputs.push(ty.declare(&p.name, self.profile, self.tier));
                continue;
            }
            let ptr = format!("{}_ptr", p.name);
            sig.inputs.push(self.pointer_to(ty, &ptr));
            sig.prologue.push(format!(
                "{} = *{ptr};",
                ty.declare(&p.name, self.profile, self.tier)
            ));
        }
        sig.input_derefs = sig.prologue.len();

        for (i, r) in function.returns.iter().enumerate() {
            let ty = value_type(r.ty);
            let output = match &r.name {
                Some(name) => {
                    let ty = self.types.define(name, ty);
                    sig.prologue.push(format!(
                        "{} = {};",
                        ty.declare(name, self.profile, self.tier),
                        self.zero_value(ty)
                    ));
                    Output {
                        ptr: format!("{name}_out"),
                        local: Some(name.clone()),
                    }
                }
                None => Output {
                    ptr: format!("ret{i}"),
                    local: None,
                },
            };
            sig.outputs.push(self.pointer_to(ty, &output.ptr));
            self.outputs.push(output);
        }
        sig
    }

    /// Declares `name` as a pointer to a `ty`.
    fn pointer_to(&self, ty: VarType, name: &str) -> String {
        let pointee = ty.c_type(self.profile, self.tier);
        if pointee.ends_with('*') {
            format!("{pointee}*{name}")
        } else {
            format!("{pointee} *{name}")
        }
    }
}
