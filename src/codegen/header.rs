use indexmap::{IndexMap, IndexSet};
use std::fmt;

use super::mathlib::Precision;
use crate::profile::HelperFn;

/// Collects everything the kernel needs ahead of it: includes, the profile
/// helpers it referenced, and the math library with any lane-wise wrappers.
#[derive(Debug, Default)]
pub struct HeaderEmitter {
    pub includes: Vec<String>,
    helpers: IndexMap<String, String>,
    math: IndexSet<Precision>,
    math_wrappers: IndexMap<String, String>,
}

impl HeaderEmitter {
    pub fn new(includes: &[String]) -> Self {
        HeaderEmitter {
            includes: includes.to_vec(),
            ..Default::default()
        }
    }

    /// Records a helper. Only the first use of a name positions it.
    pub fn use_helper(&mut self, helper: &HelperFn) {
        if !self.helpers.contains_key(&helper.name) {
            self.helpers
                .insert(helper.name.clone(), helper.definition.clone());
        }
    }

    pub fn use_helpers(&mut self, helpers: &[HelperFn]) {
        for h in helpers {
            self.use_helper(h);
        }
    }

    pub fn use_math(&mut self, prec: Precision) {
        self.math.insert(prec);
    }

    pub fn use_math_wrapper(&mut self, prec: Precision, wrapper: &HelperFn) {
        self.use_math(prec);
        if !self.math_wrappers.contains_key(&wrapper.name) {
            self.math_wrappers
                .insert(wrapper.name.clone(), wrapper.definition.clone());
        }
    }

    pub fn helper_names(&self) -> impl Iterator<Item = &str> {
        self.helpers.keys().map(String::as_str)
    }

    pub fn uses_math(&self) -> bool {
        !self.math.is_empty()
    }

    pub fn emit<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        for include in &self.includes {
            writeln!(out, "#include <{include}>")?;
        }
        out.write_char('\n')?;

        for definition in self.helpers.values() {
            out.write_str(definition)?;
            out.write_str("\n\n")?;
        }
        for prec in &self.math {
            out.write_str(prec.library())?;
            out.write_char('\n')?;
        }
        for definition in self.math_wrappers.values() {
            out.write_str(definition)?;
            out.write_str("\n\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_emit_once_in_first_use_order() {
        let mut h = HeaderEmitter::new(&["stdint.h".to_string()]);
        let b = HelperFn::new("pv_b", "static inline int pv_b(void) { return 2; }");
        let a = HelperFn::new("pv_a", "static inline int pv_a(void) { return 1; }");
        h.use_helper(&b);
        h.use_helper(&a);
        h.use_helper(&b);
        assert_eq!(h.helper_names().collect::<Vec<_>>(), vec!["pv_b", "pv_a"]);

        let mut out = String::new();
        h.emit(&mut out).unwrap();
        assert!(out.starts_with("#include <stdint.h>\n\n"));
        assert_eq!(out.matches("pv_b(void)").count(), 1);
        assert!(out.find("pv_b(void)").unwrap() < out.find("pv_a(void)").unwrap());
        assert!(!h.uses_math());
    }

    #[test]
    fn test_math_library_precedes_wrappers() {
        let mut h = HeaderEmitter::new(&[]);
        let w = HelperFn::new("pv_exp_v4_f32", "static inline int pv_exp_v4_f32(void);");
        h.use_math_wrapper(Precision::F32, &w);
        let mut out = String::new();
        h.emit(&mut out).unwrap();
        assert!(out.find("pv_exp_f32(float x)").unwrap() < out.find("pv_exp_v4_f32").unwrap());
    }
}
