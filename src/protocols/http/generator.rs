// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - HTTP Request Generator
 * Iterates template slots (paths or raw requests) against payloads
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::generators::{PayloadBinding, PayloadGenerator, PayloadIterator};

/// Sequential generator over a request block's inputs. Paths and raw
/// requests are the slots; when payloads are present the payload iterator
/// is consumed fully for each slot before advancing to the next.
pub struct RequestGenerator<'a> {
    slots: &'a [String],
    current_index: usize,
    payload_iterator: Option<PayloadIterator<'a>>,
}

impl<'a> RequestGenerator<'a> {
    pub fn new(slots: &'a [String], payloads: Option<&'a PayloadGenerator>) -> Self {
        Self {
            slots,
            current_index: 0,
            payload_iterator: payloads.filter(|g| !g.is_empty()).map(|g| g.iterator()),
        }
    }

    /// The next (slot, payload binding) pair, or `None` when every slot
    /// and payload combination has been produced.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<(String, Option<PayloadBinding>)> {
        loop {
            if self.current_index >= self.slots.len() {
                return None;
            }
            let slot = &self.slots[self.current_index];

            match &mut self.payload_iterator {
                None => {
                    self.current_index += 1;
                    return Some((slot.clone(), None));
                }
                Some(iterator) => match iterator.next() {
                    Some(binding) => return Some((slot.clone(), Some(binding))),
                    None => {
                        iterator.reset();
                        self.current_index += 1;
                    }
                },
            }
        }
    }

    /// Total requests this generator will produce.
    pub fn total(&self) -> usize {
        let per_slot = self
            .payload_iterator
            .as_ref()
            .map(|i| i.total())
            .unwrap_or(1)
            .max(1);
        self.slots.len() * per_slot
    }

    /// Requests not yet produced, including the rest of the current
    /// slot's payload iterations.
    pub fn remaining(&self) -> usize {
        let slots_left = self.slots.len().saturating_sub(self.current_index);
        match &self.payload_iterator {
            None => slots_left,
            Some(iterator) => {
                if slots_left == 0 {
                    return 0;
                }
                iterator.remaining() + (slots_left - 1) * iterator.total()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{AttackType, PayloadSource};
    use std::collections::BTreeMap;
    use std::path::Path;

    fn generator(entries: &[(&str, &[&str])], attack: AttackType) -> PayloadGenerator {
        let map: BTreeMap<String, PayloadSource> = entries
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    PayloadSource::List(values.iter().map(|v| v.to_string()).collect()),
                )
            })
            .collect();
        PayloadGenerator::new(attack, &map, Path::new(".")).unwrap()
    }

    #[test]
    fn test_slots_without_payloads() {
        let slots = vec!["{{BaseURL}}/a".to_string(), "{{BaseURL}}/b".to_string()];
        let mut gen = RequestGenerator::new(&slots, None);
        assert_eq!(gen.total(), 2);

        assert_eq!(gen.next().unwrap().0, "{{BaseURL}}/a");
        assert_eq!(gen.next().unwrap().0, "{{BaseURL}}/b");
        assert!(gen.next().is_none());
    }

    #[test]
    fn test_payloads_consumed_per_slot() {
        let slots = vec!["r1".to_string(), "r2".to_string()];
        let payloads = generator(&[("user", &["a", "b"])], AttackType::Sniper);
        let mut gen = RequestGenerator::new(&slots, Some(&payloads));
        assert_eq!(gen.total(), 4);

        let mut produced = Vec::new();
        while let Some((slot, binding)) = gen.next() {
            produced.push((slot, binding.unwrap()["user"].clone()));
        }
        assert_eq!(
            produced,
            vec![
                ("r1".to_string(), "a".to_string()),
                ("r1".to_string(), "b".to_string()),
                ("r2".to_string(), "a".to_string()),
                ("r2".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_remaining_counts_down() {
        let slots = vec!["r".to_string()];
        let payloads = generator(&[("u", &["1", "2"]), ("p", &["x", "y"])], AttackType::Clusterbomb);
        let mut gen = RequestGenerator::new(&slots, Some(&payloads));
        assert_eq!(gen.remaining(), 4);
        gen.next();
        assert_eq!(gen.remaining(), 3);
    }
}
