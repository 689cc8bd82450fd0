/// A candidate in a priority-ordered table.
pub trait Rule {
    fn priority(&self) -> i32;

    /// `input` is already normalized by the caller.
    fn matches(&self, input: &str) -> bool;
}

/// Returns the highest-priority rule that matches `input`.
///
/// Every rule is evaluated. Ties keep the rule declared first because the
/// comparison is strict, so table order still decides between equal
/// priorities.
pub fn select<'a, R: Rule>(rules: &'a [R], input: &str) -> Option<&'a R> {
    let mut best: Option<&'a R> = None;
    for rule in rules {
        if !rule.matches(input) {
            continue;
        }
        match best {
            Some(current) if rule.priority() > current.priority() => best = Some(rule),
            None => best = Some(rule),
            _ => {}
        }
    }
    best
}

/// Substring containment against any keyword. Word boundaries are not
/// considered: "lenses slr lenses" contains "slr lens".
pub fn contains_any(input: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| input.contains(keyword.as_str()))
}

/// Lowercases and trims; `None` for empty or whitespace-only input.
pub fn normalize(input: Option<&str>) -> Option<String> {
    let trimmed = input?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Keyword {
        word: &'static str,
        priority: i32,
        tag: &'static str,
    }

    impl Rule for Keyword {
        fn priority(&self) -> i32 {
            self.priority
        }

        fn matches(&self, input: &str) -> bool {
            input.contains(self.word)
        }
    }

    #[test]
    fn higher_priority_wins_regardless_of_position() {
        let rules = [
            Keyword { word: "camera", priority: 10, tag: "generic" },
            Keyword { word: "digital camera", priority: 90, tag: "digital" },
        ];
        let hit = select(&rules, "sony digital camera").expect("match");
        assert_eq!(hit.tag, "digital");
    }

    #[test]
    fn equal_priority_keeps_first_declared() {
        let rules = [
            Keyword { word: "lens", priority: 50, tag: "first" },
            Keyword { word: "len", priority: 50, tag: "second" },
        ];
        assert_eq!(select(&rules, "zoom lens").map(|r| r.tag), Some("first"));
    }

    #[test]
    fn no_match_returns_none() {
        let rules = [Keyword { word: "tripod", priority: 1, tag: "t" }];
        assert!(select(&rules, "flash").is_none());
    }

    #[test]
    fn normalize_blank_inputs() {
        assert_eq!(normalize(None), None);
        assert_eq!(normalize(Some("")), None);
        assert_eq!(normalize(Some("   ")), None);
        assert_eq!(normalize(Some("  Digital Camera ")), Some("digital camera".into()));
    }
}
