use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
};

use super::rule::{is_regex, Rule};

#[derive(Debug)]
pub struct RulesMatcher {
    substrs: HashMap<u64, Vec<usize>>,
    generic: Vec<usize>,
    rules: Vec<Rule>,
}

impl RulesMatcher {
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut substrs = HashMap::<_, Vec<_>>::new();
        let mut generic = Vec::new();
        for (i, rule) in rules.iter().enumerate() {
            match shortcut(&rule.pattern) {
                Some(token) => substrs.entry(Self::hash(token)).or_default().push(i),
                None => generic.push(i),
            }
        }
        Self {
            substrs,
            generic,
            rules,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    fn hash(s: &str) -> u64 {
        let mut h = DefaultHasher::new();
        s.hash(&mut h);
        h.finish()
    }

    pub fn matches(&self, domain: &str) -> Vec<&Rule> {
        let dots = std::iter::once(0)
            .chain(
                domain
                    .char_indices()
                    .filter_map(|(i, c)| (c == '.').then_some(i)),
            )
            .chain(std::iter::once(domain.len()))
            .collect::<Vec<_>>();
        let mut candidates = dots
            .iter()
            .enumerate()
            .flat_map(|(d_idx, &i)| {
                dots[d_idx + 1..]
                    .iter()
                    .map(move |&j| Self::hash(domain[i..j].trim_matches('.')))
            })
            .filter_map(|h| self.substrs.get(&h))
            .flatten()
            .chain(self.generic.iter())
            .copied()
            .collect::<Vec<_>>();
        candidates.sort_unstable();
        candidates.dedup();
        candidates
            .into_iter()
            .map(|idx| &self.rules[idx])
            .filter(|rule| rule.is_match(domain))
            .collect()
    }
}

fn shortcut(pattern: &str) -> Option<&str> {
    if is_regex(pattern) {
        return None;
    }
    let (body, anchored) = match pattern
        .strip_prefix("||")
        .or_else(|| pattern.strip_prefix('|'))
    {
        Some(body) => (body, true),
        None => (pattern, false),
    };
    let is_token_char = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';

    let mut best: Option<&str> = None;
    let mut start = 0;
    for (end, c) in body
        .char_indices()
        .chain(std::iter::once((body.len(), '\0')))
    {
        if c == '.' || is_token_char(c) {
            continue;
        }
        let token = &body[start..end];
        let trimmed = token.trim_start_matches('.');
        let left_ok = trimmed.len() < token.len() || (start == 0 && anchored);
        let trimmed_both = trimmed.trim_end_matches('.');
        let right_ok = trimmed_both.len() < trimmed.len() || matches!(c, '^' | '|');
        if left_ok
            && right_ok
            && !trimmed_both.is_empty()
            && best.map_or(true, |b| b.len() < trimmed_both.len())
        {
            best = Some(trimmed_both);
        }
        start = end + c.len_utf8();
    }
    best
}
