/// Hands out synthetic C identifiers, numbered in request order.
///
/// One generator lives for one lowering invocation, so the names in an
/// output depend only on that invocation's input.
#[derive(Debug, Default)]
pub struct NameGenerator {
    names_generated: usize,
}

impl NameGenerator {
    pub fn new() -> Self {
        NameGenerator { names_generated: 0 }
    }

    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let new_name = format!("pv_{prefix}{}", self.names_generated);
        self.names_generated += 1;
        new_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_share_one_counter() {
        let mut namer = NameGenerator::new();
        assert_eq!(namer.fresh_name("acc"), "pv_acc0");
        assert_eq!(namer.fresh_name("lanes"), "pv_lanes1");
        assert_eq!(NameGenerator::new().fresh_name("acc"), "pv_acc0");
    }
}
