use crate::common::Arch;
use crate::utils::ToWriteFmt;

use anyhow::{bail, Result};
use std::fmt::Write;
use std::process::Command;
use tempfile::tempdir;

const CLI_FLAGS: [&str; 3] = ["-std=gnu11", "-ffreestanding", "-fsyntax-only"];

pub fn clang_path() -> Result<String> {
    match std::env::var("CLANG") {
        Ok(v) => Ok(v),
        Err(_) => bail!("Environment variable CLANG is not set"),
    }
}

/// Target and feature flags for compiling kernels for `arch`.
pub fn target_flags(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::Neon => &["--target=aarch64-linux-gnu"],
        Arch::Avx2 => &["--target=x86_64-linux-gnu", "-mavx2", "-mfma", "-mf16c"],
        Arch::Avx512 => &[
            "--target=x86_64-linux-gnu",
            "-mavx2",
            "-mfma",
            "-mf16c",
            "-mavx512f",
            "-mavx512bw",
            "-mavx512dq",
            "-mavx512vl",
            "-mavx512vpopcntdq",
            "-mavx512bitalg",
            "-mavx512vbmi",
        ],
    }
}

/// Runs the compiler named by `CLANG` over `source` without producing code,
/// failing with its diagnostics if it rejects the kernel.
pub fn check_syntax(source: &str, arch: Arch) -> Result<()> {
    let dir = tempdir()?;
    let source_path = dir.path().join("kernel.c");
    let mut source_file = ToWriteFmt(std::fs::File::create(&source_path)?);
    source_file.write_str(source)?;
    drop(source_file);

    let clang_proc = Command::new(clang_path()?)
        .args(target_flags(arch))
        .args(CLI_FLAGS)
        .arg(source_path.to_string_lossy().to_string())
        .output()?;
    if !clang_proc.status.success() {
        bail!(
            "Clang exited with {}\n{}",
            clang_proc.status,
            String::from_utf8_lossy(&clang_proc.stderr).into_owned()
        );
    }
    log::debug!("{} kernel passed the syntax check", arch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{LowerError, Lowerer, Strictness};
    use crate::common::ElemType;
    use crate::kernels;
    use crate::profile::Registry;
    use proptest::prelude::*;

    #[test]
    fn test_avx512_flags_extend_avx2() {
        let avx2 = target_flags(Arch::Avx2);
        let avx512 = target_flags(Arch::Avx512);
        assert!(avx2.iter().all(|f| avx512.contains(f)));
        assert!(avx512.contains(&"-mavx512vpopcntdq"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_kernels_pass_syntax_check(
            arch in any::<Arch>(),
            elem in any::<ElemType>(),
            kernel in prop::sample::select(kernels::NAMES.to_vec()),
        ) {
            if clang_path().is_err() {
                return Ok(());
            }
            let registry = Registry::builtin();
            let profile = registry.lookup(arch, elem).unwrap();
            let f = kernels::by_name(kernel).unwrap();
            let lowered = Lowerer::new()
                .with_strictness(Strictness::Strict)
                .translate(&f, profile, elem);
            // Kernels using an operation the tier lacks have nothing to compile.
            if let Err(LowerError::MissingMapping { .. }) = lowered {
                return Ok(());
            }
            check_syntax(&lowered.unwrap(), arch).unwrap();
        }
    }
}
