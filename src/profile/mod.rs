//! The intrinsic profile registry.
//!
//! A [Registry] maps each (architecture, element type) pair to an
//! [IntrinsicProfile]: the concrete instruction spellings, tier ladder and
//! operand conventions the lowering engine needs. The registry is an ordinary
//! value, built once and then only read; share it by reference.

/// Builds an [OpTable] from `Op => intrinsic` pairs.
macro_rules! op_table {
    ($($op:ident => $intr:expr),* $(,)?) => {{
        let mut table = $crate::profile::OpTable::new();
        $( table.insert($crate::profile::VecOp::$op, $intr); )*
        table
    }};
}

mod helpers;
mod neon;
mod scalar;
mod x86;

use crate::common::{Arch, ElemType};

use indexmap::IndexMap;
use std::fmt;

/// The portable vector vocabulary.
///
/// Variant names are the callee spellings after the `simd.` prefix.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum VecOp {
    Load,
    Store,
    /// Broadcast a scalar to every lane.
    Set,
    Zero,
    /// `MulAdd(a, b, acc)` computes `a * b + acc`.
    MulAdd,
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Neg,
    Abs,
    Sqrt,
    ReduceSum,
    InterleaveLower,
    InterleaveUpper,
    And,
    Or,
    Xor,
    /// `AndNot(a, b)` computes `a & ~b`.
    AndNot,
    Not,
    PopCount,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    /// `IfThenElse(mask, yes, no)`.
    IfThenElse,
    BitsFromMask,
    TableLookup,
    ReduceMin,
    ReduceMax,
    GetLane,
    Load4,
    /// The lower half of a vector, as a half-width register.
    LowerHalf,
    UpperHalf,
    /// `Combine(lower, upper)` joins two half-width registers.
    Combine,
}

impl VecOp {
    /// The number of operands the portable call takes.
    pub fn arity(&self) -> usize {
        match self {
            VecOp::Zero => 0,
            VecOp::Load
            | VecOp::Set
            | VecOp::Neg
            | VecOp::Abs
            | VecOp::Sqrt
            | VecOp::ReduceSum
            | VecOp::Not
            | VecOp::PopCount
            | VecOp::BitsFromMask
            | VecOp::ReduceMin
            | VecOp::ReduceMax
            | VecOp::Load4
            | VecOp::LowerHalf
            | VecOp::UpperHalf => 1,
            VecOp::MulAdd | VecOp::IfThenElse => 3,
            _ => 2,
        }
    }

    /// The kind of value the operation produces.
    pub fn result(&self) -> OpResult {
        match self {
            VecOp::Store => OpResult::Nothing,
            VecOp::Less
            | VecOp::LessEqual
            | VecOp::Greater
            | VecOp::GreaterEqual
            | VecOp::Equal => OpResult::Mask,
            VecOp::ReduceSum | VecOp::ReduceMin | VecOp::ReduceMax | VecOp::GetLane => {
                OpResult::Scalar
            }
            VecOp::BitsFromMask => OpResult::Bits,
            VecOp::Load4 => OpResult::MultiVector,
            VecOp::LowerHalf | VecOp::UpperHalf => OpResult::HalfVector,
            _ => OpResult::Vector,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpResult {
    Nothing,
    Vector,
    Mask,
    Scalar,
    Bits,
    MultiVector,
    HalfVector,
}

/// A static inline C function emitted ahead of the kernel when first used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HelperFn {
    pub name: String,
    pub definition: String,
}

/// How one operation is spelled for a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intrinsic {
    /// A flat call, `name(arg0, arg1, ...)`.
    Call(String),
    /// An expression with positional operand holes `$0`..`$9`.
    Template(String),
    /// A flat call to an inlined helper, whose definition must be emitted.
    Helper(HelperFn),
    /// A template whose expansion calls helpers that must be emitted.
    TemplateWith(String, Vec<HelperFn>),
}

impl Intrinsic {
    pub fn call(name: &str) -> Self {
        Intrinsic::Call(name.to_string())
    }

    pub fn template(pattern: &str) -> Self {
        Intrinsic::Template(pattern.to_string())
    }

    pub fn helper(h: HelperFn) -> Self {
        Intrinsic::Helper(h)
    }

    pub fn template_with(pattern: &str, helpers: Vec<HelperFn>) -> Self {
        Intrinsic::TemplateWith(pattern.to_string(), helpers)
    }

    /// Spell the operation applied to already-lowered operands.
    pub fn apply(&self, args: &[String]) -> String {
        match self {
            Intrinsic::Call(name) => format!("{}({})", name, args.join(", ")),
            Intrinsic::Helper(h) => format!("{}({})", h.name, args.join(", ")),
            Intrinsic::Template(pattern) | Intrinsic::TemplateWith(pattern, _) => {
                substitute(pattern, args)
            }
        }
    }

    /// Helpers whose definitions the expansion depends on.
    pub fn helpers(&self) -> &[HelperFn] {
        match self {
            Intrinsic::Helper(h) => std::slice::from_ref(h),
            Intrinsic::TemplateWith(_, hs) => hs,
            Intrinsic::Call(_) | Intrinsic::Template(_) => &[],
        }
    }

    /// Wraps `inner` (a pattern which may itself contain operand holes) in
    /// this intrinsic, keeping helper dependencies.
    pub fn around(&self, inner: &str) -> Intrinsic {
        let pattern = self.apply(&[inner.to_string()]);
        if self.helpers().is_empty() {
            Intrinsic::Template(pattern)
        } else {
            Intrinsic::TemplateWith(pattern, self.helpers().to_vec())
        }
    }
}

impl HelperFn {
    pub fn new(name: &str, definition: impl Into<String>) -> Self {
        HelperFn {
            name: name.to_string(),
            definition: definition.into(),
        }
    }
}

fn substitute(pattern: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(pattern.len() + 16);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(d) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                match args.get(d as usize) {
                    Some(a) => out.push_str(a),
                    None => out.push_str("/* missing operand */"),
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

pub type OpTable = IndexMap<VecOp, Intrinsic>;

/// Identifies one rung of a vector-width ladder.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::AsRefStr, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum TierId {
    Zmm,
    Ymm,
    Q,
    Scalar,
}

/// A combined multi-register load (`simd.Load4`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiLoad {
    /// The C type holding all four registers.
    pub ty: String,
    /// Extracts register `$1` from the combined value `$0`.
    pub field: String,
}

/// Partial population count returning a wide accumulator vector, which lets
/// a per-iteration horizontal reduction be deferred past the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopCountAccum {
    pub ty: String,
    pub zero: Intrinsic,
    /// Per-lane counts of `$0`, widened so repeated accumulation can't overflow.
    pub partial: Intrinsic,
    pub add: Intrinsic,
    pub reduce: Intrinsic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub id: TierId,
    pub lanes: u32,
    /// Loop unroll factor suggested to front ends for this tier. Lowering
    /// keeps the loop structure it is given.
    pub unroll: u32,
    pub scalar: bool,
    pub vec_type: String,
    pub mask_type: String,
    pub multi: Option<MultiLoad>,
    pub popcount_accum: Option<PopCountAccum>,
    pub ops: OpTable,
}

impl Tier {
    pub fn op(&self, op: VecOp) -> Option<&Intrinsic> {
        self.ops.get(&op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathStrategy {
    Native,
    /// Arithmetic runs at a wider working precision; values are promoted on
    /// load and demoted on store.
    Promoted,
}

/// Operand order the target's fused multiply-add expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmaOrder {
    AccFirst,
    AccLast,
}

/// Operand order the target's lane select expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOrder {
    /// `select(mask, yes, no)`
    MaskFirst,
    /// `select(no, yes, mask)`
    MaskLast,
}

/// Halving a working-precision vector of the profile's vector tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// C type of one half, e.g. `float32x2_t` or `__m128`.
    pub half_type: String,
    pub lower: Intrinsic,
    pub upper: Intrinsic,
}

/// Conversions a profile applies between representations.
///
/// `promote` and `demote` move scalars between storage and working
/// precision, and are the identity for native profiles. `split` and
/// `combine` move between a vector and its two half-width registers; the
/// scalar tier has neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversions {
    pub promote: Intrinsic,
    pub demote: Intrinsic,
    pub split: Option<Split>,
    /// `combine(lower, upper)`
    pub combine: Option<Intrinsic>,
}

impl Conversions {
    pub fn identity() -> Self {
        Conversions {
            promote: Intrinsic::template("$0"),
            demote: Intrinsic::template("$0"),
            split: None,
            combine: None,
        }
    }

    pub fn with_halves(mut self, split: Split, combine: Intrinsic) -> Self {
        self.split = Some(split);
        self.combine = Some(combine);
        self
    }

    /// The intrinsic behind a half-register vocabulary operation.
    pub fn half_op(&self, op: VecOp) -> Option<&Intrinsic> {
        match op {
            VecOp::LowerHalf => self.split.as_ref().map(|s| &s.lower),
            VecOp::UpperHalf => self.split.as_ref().map(|s| &s.upper),
            VecOp::Combine => self.combine.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrinsicProfile {
    pub arch: Arch,
    pub elem: ElemType,
    /// C type of array elements.
    pub storage_type: String,
    /// C type scalar arithmetic on elements runs at.
    pub work_type: String,
    pub math: MathStrategy,
    pub fma_order: FmaOrder,
    pub select_order: SelectOrder,
    pub conversions: Conversions,
    /// Cast applied to the pointer operand of loads when the instruction's
    /// pointer type differs from the storage type.
    pub load_ptr_cast: Option<String>,
    pub store_ptr_cast: Option<String>,
    /// Suffix for floating literals at element precision.
    pub literal_suffix: String,
    pub includes: Vec<String>,
    /// Ordered from widest to the scalar tier.
    pub tiers: Vec<Tier>,
}

impl IntrinsicProfile {
    /// The smallest-lane non-scalar tier. Falls back to the last tier for
    /// scalar-only ladders, and is `None` only for an empty ladder.
    pub fn primary_tier(&self) -> Option<&Tier> {
        self.tiers
            .iter()
            .filter(|t| !t.scalar)
            .min_by_key(|t| t.lanes)
            .or_else(|| self.tiers.last())
    }

    pub fn tier(&self, id: TierId) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.id == id)
    }

    pub fn is_promoted(&self) -> bool {
        self.math == MathStrategy::Promoted
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No intrinsic profile for {elem} on {arch}")]
    MissingProfile { arch: Arch, elem: ElemType },
    #[error("Unknown element type: {0}")]
    UnknownElemType(String),
}

/// Every known profile, plus spellings accepted for element types.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    profiles: IndexMap<(Arch, ElemType), IntrinsicProfile>,
    aliases: IndexMap<String, ElemType>,
}

impl Registry {
    /// An empty registry with only the element-type alias table.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        for (alias, elem) in ALIASES {
            registry.aliases.insert(alias.to_string(), *elem);
        }
        registry
    }

    /// The registry of every built-in profile.
    pub fn builtin() -> Self {
        let mut registry = Registry::new();
        for profile in neon::profiles()
            .into_iter()
            .chain(x86::avx2_profiles())
            .chain(x86::avx512_profiles())
        {
            registry.register(profile);
        }
        log::debug!("Registered {} intrinsic profiles", registry.profiles.len());
        registry
    }

    /// Adds or replaces the profile for its (architecture, element type).
    pub fn register(&mut self, profile: IntrinsicProfile) {
        self.profiles.insert((profile.arch, profile.elem), profile);
    }

    pub fn lookup(&self, arch: Arch, elem: ElemType) -> Result<&IntrinsicProfile, RegistryError> {
        self.profiles
            .get(&(arch, elem))
            .ok_or(RegistryError::MissingProfile { arch, elem })
    }

    /// Resolves a canonical or alias element-type spelling.
    pub fn resolve_elem(&self, spelling: &str) -> Result<ElemType, RegistryError> {
        self.aliases
            .get(spelling)
            .copied()
            .ok_or_else(|| RegistryError::UnknownElemType(spelling.to_string()))
    }

    pub fn lookup_by_name(
        &self,
        arch: Arch,
        spelling: &str,
    ) -> Result<&IntrinsicProfile, RegistryError> {
        self.lookup(arch, self.resolve_elem(spelling)?)
    }

    /// Profiles in registration order.
    pub fn profiles(&self) -> impl Iterator<Item = &IntrinsicProfile> {
        self.profiles.values()
    }
}

const ALIASES: &[(&str, ElemType)] = &[
    ("float32", ElemType::Float32),
    ("f32", ElemType::Float32),
    ("float", ElemType::Float32),
    ("float64", ElemType::Float64),
    ("f64", ElemType::Float64),
    ("double", ElemType::Float64),
    ("float16", ElemType::Float16),
    ("f16", ElemType::Float16),
    ("Float16", ElemType::Float16),
    ("half", ElemType::Float16),
    ("bfloat16", ElemType::Bfloat16),
    ("bf16", ElemType::Bfloat16),
    ("BFloat16", ElemType::Bfloat16),
    ("int32", ElemType::Sint32),
    ("i32", ElemType::Sint32),
    ("int64", ElemType::Sint64),
    ("i64", ElemType::Sint64),
    ("uint8", ElemType::Uint8),
    ("u8", ElemType::Uint8),
    ("byte", ElemType::Uint8),
    ("uint32", ElemType::Uint32),
    ("u32", ElemType::Uint32),
    ("uint64", ElemType::Uint64),
    ("u64", ElemType::Uint64),
];

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl fmt::Display for VecOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_template_substitutes_positional_operands() {
        let t = Intrinsic::template("vst1q_f32($1, $0)");
        assert_eq!(
            t.apply(&["v".to_string(), "a + i".to_string()]),
            "vst1q_f32(a + i, v)"
        );
        let c = Intrinsic::call("vaddq_f32");
        assert_eq!(c.apply(&["x".into(), "y".into()]), "vaddq_f32(x, y)");
    }

    #[test]
    fn test_around_keeps_operand_holes_and_helpers() {
        let h = HelperFn::new("pv_widen", "static inline float pv_widen(short x) { return x; }");
        let promote = Intrinsic::helper(h.clone());
        let load = promote.around("(*($0))");
        assert_eq!(load.apply(&["p".to_string()]), "pv_widen((*(p)))");
        assert_eq!(load.helpers(), &[h]);
        assert_eq!(
            Intrinsic::template("((float)($0))").around("(*($0))").helpers(),
            &[]
        );
    }

    #[test]
    fn test_vecop_round_trips_through_callee_spelling() {
        for op in VecOp::iter() {
            assert_eq!(VecOp::from_str(op.as_ref()).unwrap(), op);
        }
        assert!(VecOp::from_str("Frobnicate").is_err());
    }

    #[test]
    fn test_missing_profile_is_a_configuration_error() {
        let registry = Registry::new();
        assert_eq!(
            registry.lookup(Arch::Neon, ElemType::Float32),
            Err(RegistryError::MissingProfile {
                arch: Arch::Neon,
                elem: ElemType::Float32
            })
        );
    }

    #[test]
    fn test_aliases_resolve_to_canonical() {
        let registry = Registry::new();
        assert_eq!(registry.resolve_elem("f32"), Ok(ElemType::Float32));
        assert_eq!(registry.resolve_elem("Float16"), Ok(ElemType::Float16));
        assert_eq!(registry.resolve_elem("bfloat16"), Ok(ElemType::Bfloat16));
        assert!(registry.resolve_elem("complex64").is_err());
    }

    #[test]
    fn test_every_profile_ladder_ends_in_scalar() {
        let registry = Registry::builtin();
        for profile in registry.profiles() {
            let last = profile.tiers.last().unwrap();
            assert!(last.scalar, "{} {}", profile.arch, profile.elem);
            assert_eq!(last.lanes, 1);
            assert_eq!(last.unroll, 1);
            assert!(profile.primary_tier().unwrap().unroll > 1);
            assert!(!profile.primary_tier().unwrap().scalar);
            for pair in profile.tiers.windows(2) {
                assert!(pair[0].lanes > pair[1].lanes);
            }
        }
    }

    #[test]
    fn test_bit_countable_profiles_expose_partial_popcount() {
        let registry = Registry::builtin();
        for profile in registry.profiles() {
            let accum = profile.primary_tier().unwrap().popcount_accum.is_some();
            assert_eq!(
                accum,
                profile.elem.is_bit_countable(),
                "{} {}",
                profile.arch,
                profile.elem
            );
        }
    }

    #[test]
    fn test_vector_profiles_split_and_combine() {
        let registry = Registry::builtin();
        for profile in registry.profiles() {
            let conv = &profile.conversions;
            let split = conv.split.as_ref().unwrap();
            for op in [VecOp::LowerHalf, VecOp::UpperHalf, VecOp::Combine] {
                assert!(conv.half_op(op).is_some(), "{} {} {}", op, profile.arch, profile.elem);
            }
            assert!(conv.half_op(VecOp::Add).is_none());
            let vec_type = &profile.primary_tier().unwrap().vec_type;
            assert_ne!(&split.half_type, vec_type);
        }
        let neon = registry.lookup(Arch::Neon, ElemType::Float32).unwrap();
        let split = neon.conversions.split.as_ref().unwrap();
        assert_eq!(split.half_type, "float32x2_t");
        assert_eq!(split.upper.apply(&["v".to_string()]), "vget_high_f32(v)");
        let combine = neon.conversions.combine.as_ref().unwrap();
        assert_eq!(combine.apply(&["lo".into(), "hi".into()]), "vcombine_f32(lo, hi)");
        let avx2 = registry.lookup(Arch::Avx2, ElemType::Uint64).unwrap();
        let split = avx2.conversions.split.as_ref().unwrap();
        assert_eq!(split.upper.apply(&["v".to_string()]), "_mm256_extracti128_si256(v, 1)");
        assert_eq!(
            avx2.conversions.combine.as_ref().unwrap().apply(&["lo".into(), "hi".into()]),
            "_mm256_set_m128i(hi, lo)"
        );
    }

    proptest! {
        #[test]
        fn test_builtin_registry_covers_every_pair(arch in any::<Arch>(), elem in any::<ElemType>()) {
            let registry = Registry::builtin();
            let profile = registry.lookup(arch, elem).unwrap();
            prop_assert_eq!(profile.arch, arch);
            prop_assert_eq!(profile.elem, elem);
            prop_assert_eq!(profile.is_promoted(), matches!(elem, ElemType::Float16 | ElemType::Bfloat16));
        }

        #[test]
        fn test_core_ops_resolve_on_primary_tier(arch in any::<Arch>(), elem in any::<ElemType>()) {
            let registry = Registry::builtin();
            let tier = registry.lookup(arch, elem).unwrap().primary_tier().unwrap();
            for op in [VecOp::Load, VecOp::Store, VecOp::Set, VecOp::Zero, VecOp::Add, VecOp::ReduceSum, VecOp::GetLane] {
                prop_assert!(tier.op(op).is_some(), "{} missing on {} {}", op, arch, elem);
            }
        }
    }
}
