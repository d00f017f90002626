use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use prettytable::{self, format, row, Cell};
use rayon::prelude::*;
use std::fmt::Write;
use std::path;

use portavec::codegen::{clang, LowerError, Lowerer, Strictness};
use portavec::common::Arch;
use portavec::ir::ParsedFunction;
use portavec::kernels;
use portavec::profile::{IntrinsicProfile, Registry, TierId};
use portavec::utils::{join_into_string, ToWriteFmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target architecture
    #[arg(long, value_enum, default_value_t = Arch::Avx2)]
    arch: Arch,

    /// Element type, by canonical name or alias (e.g. `f32`, `bf16`, `u64`)
    #[arg(long, default_value = "float32")]
    elem: String,

    /// Lower against this tier instead of the profile's primary tier
    #[arg(long, value_enum)]
    tier: Option<TierId>,

    #[arg(long, value_enum, default_value_t = Strictness::Permissive)]
    strictness: Strictness,

    /// Print only the kernel, without includes and helpers
    #[arg(long)]
    no_header: bool,

    /// Syntax-check the output with the compiler named by `CLANG`
    #[arg(long)]
    check: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    #[command(about = "Lower one of the built-in kernels")]
    Emit { kernel: String },
    #[command(about = "Lower a bincode-serialized ParsedFunction")]
    Lower { path: path::PathBuf },
    #[command(about = "Lower a built-in kernel for every registered profile")]
    All { kernel: String },
    #[command(about = "List the registered intrinsic profiles")]
    Profiles,
    #[command(about = "List the built-in kernels")]
    Kernels,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let registry = Registry::builtin();
    let lowerer = Lowerer::new()
        .with_strictness(args.strictness)
        .with_tier(args.tier)
        .with_header(!args.no_header);

    match &args.command {
        Command::Emit { kernel } => {
            let function = builtin_kernel(kernel)?;
            let profile = registry.lookup_by_name(args.arch, &args.elem)?;
            emit(&args, &lowerer, &function, profile)
        }
        Command::Lower { path } => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Couldn't read {}", path.display()))?;
            let function: ParsedFunction = bincode::deserialize(&bytes)
                .with_context(|| format!("{} is not a serialized function", path.display()))?;
            let profile = registry.lookup_by_name(args.arch, &args.elem)?;
            emit(&args, &lowerer, &function, profile)
        }
        Command::All { kernel } => main_all(&args, &lowerer, &registry, kernel),
        Command::Profiles => {
            print_profiles(&registry);
            Ok(())
        }
        Command::Kernels => {
            println!("{}", join_into_string(kernels::NAMES, "\n"));
            Ok(())
        }
    }
}

fn builtin_kernel(name: &str) -> Result<ParsedFunction> {
    match kernels::by_name(name) {
        Some(f) => Ok(f),
        None => bail!(
            "Unknown kernel {name}; expected one of {}",
            join_into_string(kernels::NAMES, ", ")
        ),
    }
}

fn emit(
    args: &Args,
    lowerer: &Lowerer,
    function: &ParsedFunction,
    profile: &IntrinsicProfile,
) -> Result<()> {
    let source = lowerer.translate(function, profile, profile.elem)?;
    if args.check {
        clang::check_syntax(&source, profile.arch)?;
    }
    let mut stdout = ToWriteFmt(std::io::stdout().lock());
    stdout.write_str(&source)?;
    Ok(())
}

/// Lowers `kernel` for every profile in parallel, printing in registration
/// order.
fn main_all(args: &Args, lowerer: &Lowerer, registry: &Registry, kernel: &str) -> Result<()> {
    let function = builtin_kernel(kernel)?;
    let profiles = registry.profiles().collect::<Vec<_>>();
    let start_time = std::time::Instant::now();
    let results = profiles
        .par_iter()
        .map(|profile| -> Result<String> {
            let source = lowerer.translate(&function, profile, profile.elem)?;
            if args.check {
                clang::check_syntax(&source, profile.arch)?;
            }
            Ok(source)
        })
        .collect::<Vec<_>>();
    info!(
        "Lowered {kernel} for {} profiles in {:?}",
        profiles.len(),
        start_time.elapsed()
    );

    let mut stdout = ToWriteFmt(std::io::stdout().lock());
    let mut failures = 0;
    for (profile, result) in profiles.iter().zip(results) {
        match result {
            Ok(source) => {
                writeln!(stdout, "// {} {}", profile.arch, profile.elem)?;
                writeln!(stdout, "{source}")?;
            }
            Err(e)
                if matches!(
                    e.downcast_ref::<LowerError>(),
                    Some(LowerError::MissingMapping { .. })
                ) =>
            {
                warn!("Skipping {} {}: {e}", profile.arch, profile.elem);
            }
            Err(e) => {
                warn!("{} {} failed: {e:#}", profile.arch, profile.elem);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} profiles failed", profiles.len());
    }
    Ok(())
}

fn print_profiles(registry: &Registry) {
    let mut table = prettytable::Table::new();
    table.set_titles(row!["Arch", "Elem", "Storage", "Work", "Math", "Tiers", "Unroll"]);
    for profile in registry.profiles() {
        let tiers = profile
            .tiers
            .iter()
            .map(|t| format!("{}x{}", t.id, t.lanes))
            .collect::<Vec<_>>();
        let unroll = profile.primary_tier().map_or(1, |t| t.unroll);
        let mut r = row![profile.arch, profile.elem, profile.storage_type, profile.work_type];
        r.add_cell(Cell::new(&format!("{:?}", profile.math)));
        r.add_cell(Cell::new(&join_into_string(tiers, " ")));
        r.add_cell(Cell::new(&unroll.to_string()));
        table.add_row(r);
    }

    let format = format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build();
    table.set_format(format);
    table.printstd();
}
