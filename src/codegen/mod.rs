//! The lowering engine.
//!
//! [Lowerer::translate] turns one [ParsedFunction] into one C function for a
//! single [IntrinsicProfile]. Scalars arrive through pointers and results
//! leave through trailing output pointers; the downstream assembler accepts
//! nothing else.

mod accum;
mod c_utils;
mod calls;
pub mod clang;
mod expr;
mod header;
mod mathlib;
mod namegen;
mod signature;
mod stmt;
mod types;

pub use c_utils::SUPPRESS_VECTORIZE;
pub use mathlib::{MathFn, Precision};

use itertools::Itertools;
use std::fmt::{self, Write};

use crate::common::{Arch, ElemType};
use crate::ir::ParsedFunction;
use crate::profile::{IntrinsicProfile, RegistryError, Tier, TierId};
use crate::utils::indent;

use accum::DeferredState;
use header::HeaderEmitter;
use namegen::NameGenerator;
use signature::Output;
use types::TypeEnv;

/// What to do with constructs outside the kernel dialect and with operations
/// the active tier can't spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Strictness {
    /// Omit the construct, leaving a comment (or a non-compiling placeholder
    /// for missing mappings) where it was.
    #[default]
    Permissive,
    /// Fail the whole lowering.
    Strict,
}

#[derive(thiserror::Error, Debug)]
pub enum LowerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("The {arch} {elem} profile has no {tier} tier")]
    UnknownTier {
        tier: String,
        arch: Arch,
        elem: ElemType,
    },
    #[error("Profile is for {profile} but {requested} was requested")]
    ElemMismatch {
        profile: ElemType,
        requested: ElemType,
    },
    #[error("Unsupported {what} at {location}")]
    Unsupported { what: String, location: String },
    #[error("No mapping for simd.{op} on the {tier} tier of {arch} {elem}")]
    MissingMapping {
        op: String,
        tier: TierId,
        arch: Arch,
        elem: ElemType,
    },
    #[error("Malformed input: {0}")]
    Malformed(String),
    #[error(transparent)]
    Fmt(#[from] fmt::Error),
}

/// Lowering options.
#[derive(Debug, Clone)]
pub struct Lowerer {
    pub strictness: Strictness,
    /// Lower against this tier instead of the profile's primary tier.
    pub tier: Option<TierId>,
    /// Prefix the function with includes, helpers and the math library.
    pub emit_header: bool,
    /// Appended to the function name. `None` means `_<arch>_<elem>`.
    pub kernel_suffix: Option<String>,
}

impl Default for Lowerer {
    fn default() -> Self {
        Lowerer {
            strictness: Strictness::Permissive,
            tier: None,
            emit_header: true,
            kernel_suffix: None,
        }
    }
}

impl Lowerer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_tier(mut self, tier: Option<TierId>) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_header(mut self, emit_header: bool) -> Self {
        self.emit_header = emit_header;
        self
    }

    pub fn with_kernel_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.kernel_suffix = Some(suffix.into());
        self
    }

    pub fn kernel_name(&self, function: &ParsedFunction, profile: &IntrinsicProfile) -> String {
        match &self.kernel_suffix {
            Some(suffix) => format!("{}{suffix}", function.name),
            None => format!(
                "{}_{}_{}",
                function.name,
                profile.arch,
                profile.elem.short_name()
            ),
        }
    }

    /// Lowers `function` for `profile`, whose element type must be `elem`.
    pub fn translate(
        &self,
        function: &ParsedFunction,
        profile: &IntrinsicProfile,
        elem: ElemType,
    ) -> Result<String, LowerError> {
        if profile.elem != elem {
            return Err(LowerError::ElemMismatch {
                profile: profile.elem,
                requested: elem,
            });
        }
        let tier = match self.tier {
            Some(id) => profile.tier(id).ok_or_else(|| LowerError::UnknownTier {
                tier: id.to_string(),
                arch: profile.arch,
                elem,
            })?,
            None => profile
                .primary_tier()
                .ok_or_else(|| LowerError::UnknownTier {
                    tier: "primary".to_string(),
                    arch: profile.arch,
                    elem,
                })?,
        };
        log::debug!(
            "Lowering {} for {} {} on the {} tier ({} lanes)",
            function.name,
            profile.arch,
            elem,
            tier.id,
            tier.lanes
        );

        let mut generator = KernelGenerator::new(self, profile, tier);
        let kernel = generator.emit_kernel(function, &self.kernel_name(function, profile))?;
        log::debug!(
            "{} uses helpers [{}]{}",
            function.name,
            generator.headers.helper_names().join(", "),
            if generator.headers.uses_math() {
                " and the math library"
            } else {
                ""
            }
        );

        let mut out = String::new();
        if self.emit_header {
            generator.headers.emit(&mut out)?;
        }
        out.push_str(&kernel);
        Ok(out)
    }
}

/// Lowers `function` for `profile` with default options.
pub fn translate(
    function: &ParsedFunction,
    profile: &IntrinsicProfile,
    elem: ElemType,
) -> Result<String, LowerError> {
    Lowerer::default().translate(function, profile, elem)
}

/// State for lowering one function. Nothing here outlives the invocation.
struct KernelGenerator<'a> {
    options: &'a Lowerer,
    profile: &'a IntrinsicProfile,
    tier: &'a Tier,
    namer: NameGenerator,
    types: TypeEnv,
    headers: HeaderEmitter,
    /// Declarations to place ahead of the statement being lowered.
    pending: Vec<String>,
    deferred: DeferredState,
    outputs: Vec<Output>,
    len_used: bool,
}

impl<'a> KernelGenerator<'a> {
    fn new(options: &'a Lowerer, profile: &'a IntrinsicProfile, tier: &'a Tier) -> Self {
        KernelGenerator {
            options,
            profile,
            tier,
            namer: NameGenerator::new(),
            types: TypeEnv::default(),
            headers: HeaderEmitter::new(&profile.includes),
            pending: vec![],
            deferred: DeferredState::default(),
            outputs: vec![],
            len_used: false,
        }
    }

    fn emit_kernel(&mut self, function: &ParsedFunction, name: &str) -> Result<String, LowerError> {
        let mut sig = self.bind_params(function);
        let mut body = String::new();
        self.block(&function.body, 1, &mut body)?;
        if self.len_used {
            sig.add_len();
        }

        let mut out = String::new();
        let params = sig.params();
        if params.is_empty() {
            writeln!(out, "void {name}(void) {{")?;
        } else {
            writeln!(out, "void {name}({}) {{", params.iter().join(", "))?;
        }
        for line in &sig.prologue {
            writeln!(out, "{}{line}", indent(1))?;
        }
        out.push_str(&body);
        writeln!(out, "}}")?;
        Ok(out)
    }

    /// Reports a construct outside the dialect. Returns the comment left in
    /// its place.
    fn unsupported(&self, what: &str, location: &str) -> Result<String, LowerError> {
        if self.options.strictness == Strictness::Strict {
            return Err(LowerError::Unsupported {
                what: what.to_string(),
                location: location.to_string(),
            });
        }
        log::warn!("Omitting unsupported {what} at {location}");
        Ok(format!("/* unsupported: {what} at {location} */"))
    }
}
