use std::collections::{
    BTreeMap,
    HashMap,
    HashSet,
};

use md5::{
    Digest,
    Md5,
};
use oa_core::config::{
    RelabelAction,
    RelabelConfig,
};
use regex::Regex;
use tracing::*;

// Applies an ordered relabel pipeline to one label set.  Patterns compile
// once and live in the cache; a pattern that fails to compile is logged once
// and its rule skipped from then on.  Application is a pure function of the
// label set and the rules.
pub struct RelabelEngine {
    regex_cache: HashMap<String, Regex>,
    bad_patterns: HashSet<String>,
}

impl RelabelEngine {
    pub fn new() -> RelabelEngine {
        RelabelEngine {
            regex_cache: HashMap::new(),
            bad_patterns: HashSet::new(),
        }
    }

    // Returns false when the sample should be discarded (keep/drop actions)
    pub fn apply(&mut self, rules: &[RelabelConfig], labels: &mut BTreeMap<String, String>) -> bool {
        for rule in rules {
            let Some(re) = compile(&mut self.regex_cache, &mut self.bad_patterns, &rule.regex) else {
                continue;
            };

            match rule.action {
                RelabelAction::Drop => {
                    if re.is_match(&join_source_labels(rule, labels)) {
                        return false;
                    }
                },
                RelabelAction::Keep => {
                    if !re.is_match(&join_source_labels(rule, labels)) {
                        return false;
                    }
                },
                RelabelAction::Replace => {
                    // an unset target label makes replace a no-op
                    if rule.target_label.is_empty() {
                        continue;
                    }
                    if let Some(caps) = re.captures(&join_source_labels(rule, labels)) {
                        let mut replaced = String::new();
                        caps.expand(&rule.replacement, &mut replaced);
                        labels.insert(rule.target_label.clone(), replaced);
                    }
                },
                RelabelAction::Hashmod => {
                    if rule.target_label.is_empty() || rule.modulus == 0 {
                        continue;
                    }
                    let hashed = hashmod(&join_source_labels(rule, labels), rule.modulus);
                    labels.insert(rule.target_label.clone(), hashed.to_string());
                },
                RelabelAction::Labelmap => {
                    let mapped: Vec<(String, String)> = labels
                        .iter()
                        .filter_map(|(name, value)| {
                            re.captures(name).map(|caps| {
                                let mut new_name = String::new();
                                caps.expand(&rule.replacement, &mut new_name);
                                (new_name, value.clone())
                            })
                        })
                        .collect();
                    labels.extend(mapped);
                },
                RelabelAction::Labeldrop => {
                    labels.retain(|name, _| !re.is_match(name));
                },
                RelabelAction::Labelkeep => {
                    labels.retain(|name, _| re.is_match(name));
                },
            }
        }
        true
    }
}

impl Default for RelabelEngine {
    fn default() -> Self {
        Self::new()
    }
}

// Patterns are fully anchored, as in Prometheus relabeling
fn compile<'a>(
    cache: &'a mut HashMap<String, Regex>,
    bad_patterns: &mut HashSet<String>,
    pattern: &str,
) -> Option<&'a Regex> {
    if bad_patterns.contains(pattern) {
        return None;
    }

    if !cache.contains_key(pattern) {
        match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => {
                cache.insert(pattern.to_string(), re);
            },
            Err(err) => {
                warn!("invalid relabel regex {pattern:?}, skipping this rule: {err}");
                bad_patterns.insert(pattern.to_string());
                return None;
            },
        }
    }
    cache.get(pattern)
}

fn join_source_labels(rule: &RelabelConfig, labels: &BTreeMap<String, String>) -> String {
    rule.source_labels
        .iter()
        .map(|name| labels.get(name).map(|v| v.as_str()).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(&rule.separator)
}

// MD5 of the joined source value, high 8 bytes big-endian, mod `modulus`
pub fn hashmod(value: &str, modulus: u64) -> u64 {
    let digest = Md5::digest(value.as_bytes());
    let high = u64::from_be_bytes(digest[..8].try_into().unwrap());
    high % modulus
}
