// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Payload Generators
 * Sniper, pitchfork and clusterbomb attack iteration over payload sets
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::errors::TemplateError;

/// Strategy for combining multiple payload lists into attack iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackType {
    /// One payload position at a time.
    #[default]
    Sniper,
    /// Parallel zip over equally sized lists.
    Pitchfork,
    /// Full cartesian product.
    Clusterbomb,
}

/// A payload entry as written in a template: either an inline list of
/// literals or a path to a wordlist file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadSource {
    List(Vec<String>),
    File(String),
}

/// One concrete assignment of payload variables for one iteration.
pub type PayloadBinding = HashMap<String, String>;

/// Compiled payload set for a request block. Wordlist files are resolved
/// against the template's directory and loaded exactly once; iteration is
/// lazy from then on.
#[derive(Debug, Clone, Default)]
pub struct PayloadGenerator {
    attack: AttackType,
    names: Vec<String>,
    lists: Vec<Vec<String>>,
}

impl PayloadGenerator {
    pub fn new(
        attack: AttackType,
        payloads: &BTreeMap<String, PayloadSource>,
        template_dir: &Path,
    ) -> Result<Self, TemplateError> {
        let mut names = Vec::with_capacity(payloads.len());
        let mut lists = Vec::with_capacity(payloads.len());

        for (name, source) in payloads {
            let values = match source {
                PayloadSource::List(values) => values.clone(),
                PayloadSource::File(path) => load_wordlist(name, path, template_dir)?,
            };
            if values.is_empty() {
                return Err(TemplateError::PayloadEmpty { name: name.clone() });
            }
            names.push(name.clone());
            lists.push(values);
        }

        if attack == AttackType::Pitchfork && !lists.is_empty() {
            let expected = lists[0].len();
            for (name, list) in names.iter().zip(&lists) {
                if list.len() != expected {
                    return Err(TemplateError::PayloadUnevenLengths {
                        name: name.clone(),
                        got: list.len(),
                        expected,
                    });
                }
            }
        }

        Ok(Self {
            attack,
            names,
            lists,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Total number of iterations this generator will produce.
    pub fn total(&self) -> usize {
        if self.lists.is_empty() {
            return 0;
        }
        match self.attack {
            AttackType::Sniper => self.lists.iter().map(Vec::len).sum(),
            AttackType::Pitchfork => self.lists[0].len(),
            AttackType::Clusterbomb => self.lists.iter().map(Vec::len).product(),
        }
    }

    pub fn iterator(&self) -> PayloadIterator<'_> {
        PayloadIterator {
            generator: self,
            position: 0,
            total: self.total(),
        }
    }

    fn binding_at(&self, index: usize) -> PayloadBinding {
        let mut binding = PayloadBinding::new();
        match self.attack {
            AttackType::Sniper => {
                // locate the slot owning this linear index
                let mut offset = index;
                for (name, list) in self.names.iter().zip(&self.lists) {
                    if offset < list.len() {
                        binding.insert(name.clone(), list[offset].clone());
                        break;
                    }
                    offset -= list.len();
                }
            }
            AttackType::Pitchfork => {
                for (name, list) in self.names.iter().zip(&self.lists) {
                    binding.insert(name.clone(), list[index].clone());
                }
            }
            AttackType::Clusterbomb => {
                // odometer decomposition, last list spins fastest
                let mut remainder = index;
                for (name, list) in self.names.iter().zip(&self.lists).rev() {
                    binding.insert(name.clone(), list[remainder % list.len()].clone());
                    remainder /= list.len();
                }
            }
        }
        binding
    }
}

/// Lazy cursor over a generator's iterations.
pub struct PayloadIterator<'a> {
    generator: &'a PayloadGenerator,
    position: usize,
    total: usize,
}

impl<'a> PayloadIterator<'a> {
    /// The binding at the current position without advancing.
    pub fn value(&self) -> Option<PayloadBinding> {
        if self.position >= self.total {
            return None;
        }
        Some(self.generator.binding_at(self.position))
    }

    /// Return the current binding and advance the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<PayloadBinding> {
        let current = self.value()?;
        self.position += 1;
        Some(current)
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.position)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

fn load_wordlist(name: &str, raw: &str, template_dir: &Path) -> Result<Vec<String>, TemplateError> {
    let direct = Path::new(raw);
    let path = if direct.is_absolute() && direct.is_file() {
        direct.to_path_buf()
    } else {
        let relative = template_dir.join(raw);
        if relative.is_file() {
            relative
        } else if direct.is_file() {
            direct.to_path_buf()
        } else {
            return Err(TemplateError::PayloadFileNotFound {
                name: name.to_string(),
                path: relative,
            });
        }
    };

    let content = std::fs::read_to_string(&path)?;
    Ok(content
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn payloads(entries: &[(&str, &[&str])]) -> BTreeMap<String, PayloadSource> {
        entries
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    PayloadSource::List(values.iter().map(|v| v.to_string()).collect()),
                )
            })
            .collect()
    }

    #[test]
    fn test_sniper_total_is_sum() {
        let gen = PayloadGenerator::new(
            AttackType::Sniper,
            &payloads(&[("a", &["1", "2", "3"]), ("b", &["x", "y"])]),
            Path::new("."),
        )
        .unwrap();
        assert_eq!(gen.total(), 5);

        let mut it = gen.iterator();
        let mut singles = 0;
        while let Some(binding) = it.next() {
            assert_eq!(binding.len(), 1);
            singles += 1;
        }
        assert_eq!(singles, 5);
    }

    #[test]
    fn test_pitchfork_total_is_length() {
        let gen = PayloadGenerator::new(
            AttackType::Pitchfork,
            &payloads(&[("user", &["a", "b"]), ("pass", &["1", "2"])]),
            Path::new("."),
        )
        .unwrap();
        assert_eq!(gen.total(), 2);

        let mut it = gen.iterator();
        let first = it.next().unwrap();
        assert_eq!(first["user"], "a");
        assert_eq!(first["pass"], "1");
        let second = it.next().unwrap();
        assert_eq!(second["user"], "b");
        assert_eq!(second["pass"], "2");
        assert!(it.next().is_none());
    }

    #[test]
    fn test_pitchfork_uneven_lengths_rejected() {
        let err = PayloadGenerator::new(
            AttackType::Pitchfork,
            &payloads(&[("user", &["a", "b"]), ("pass", &["1"])]),
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::PayloadUnevenLengths { .. }));
    }

    #[test]
    fn test_clusterbomb_is_cartesian_product() {
        let gen = PayloadGenerator::new(
            AttackType::Clusterbomb,
            &payloads(&[("user", &["a", "b"]), ("pass", &["1", "2"])]),
            Path::new("."),
        )
        .unwrap();
        assert_eq!(gen.total(), 4);

        let mut it = gen.iterator();
        let mut seen = HashSet::new();
        while let Some(binding) = it.next() {
            seen.insert(format!("{}:{}", binding["user"], binding["pass"]));
        }
        let expected: HashSet<String> = ["a:1", "a:2", "b:1", "b:2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_iterator_reset_and_remaining() {
        let gen = PayloadGenerator::new(
            AttackType::Clusterbomb,
            &payloads(&[("a", &["1", "2"]), ("b", &["x", "y", "z"])]),
            Path::new("."),
        )
        .unwrap();

        let mut it = gen.iterator();
        assert_eq!(it.total(), 6);
        it.next();
        it.next();
        assert_eq!(it.remaining(), 4);
        it.reset();
        assert_eq!(it.remaining(), 6);
    }

    #[test]
    fn test_empty_payload_rejected() {
        let err = PayloadGenerator::new(
            AttackType::Sniper,
            &payloads(&[("a", &[])]),
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::PayloadEmpty { .. }));
    }

    #[test]
    fn test_wordlist_loading() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.txt"), "admin\nroot\n\n").unwrap();

        let mut map = BTreeMap::new();
        map.insert(
            "user".to_string(),
            PayloadSource::File("users.txt".to_string()),
        );

        let gen = PayloadGenerator::new(AttackType::Sniper, &map, dir.path()).unwrap();
        assert_eq!(gen.total(), 2);

        map.insert(
            "user".to_string(),
            PayloadSource::File("missing.txt".to_string()),
        );
        let err = PayloadGenerator::new(AttackType::Sniper, &map, dir.path()).unwrap_err();
        assert!(matches!(err, TemplateError::PayloadFileNotFound { .. }));
    }
}
