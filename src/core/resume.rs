// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Resume Context
 * Per-template completion state enabling interruption and restart
 *
 * A scan tracks, per template, which target indices completed, which were
 * in flight when interrupted, and whether the whole template finished.
 * Restarting with the same file skips completed work and repeats in-flight
 * indices (at-least-once across restarts).
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const RESUME_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeInfo {
    #[serde(default)]
    pub completed: bool,
    /// Indices strictly below this value are done unless in-flight.
    #[serde(rename = "skip-under", default)]
    pub skip_under: u32,
    /// Indices strictly above this value were never started.
    #[serde(rename = "do-above", default)]
    pub do_above: u32,
    /// Indices started but not completed at interruption time.
    #[serde(rename = "in-flight", default)]
    pub in_flight: BTreeSet<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResumeFile {
    version: u32,
    templates: HashMap<String, ResumeInfo>,
}

/// Live resume state for the running scan plus the snapshot loaded from a
/// previous interrupted run.
#[derive(Default)]
pub struct ResumeConfig {
    current: Mutex<HashMap<String, ResumeInfo>>,
    resume_from: HashMap<String, ResumeInfo>,
}

impl ResumeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ResumeFile = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if file.version != RESUME_FORMAT_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported resume file version {}", file.version),
            ));
        }
        debug!(templates = file.templates.len(), "loaded resume context");
        Ok(Self {
            current: Mutex::new(HashMap::new()),
            resume_from: file.templates,
        })
    }

    /// The scheduling decision for a (template, index) pair, following the
    /// previous run's snapshot:
    /// completed template -> skip; below the window and not in-flight ->
    /// skip; in-flight -> repeat; everything else -> execute.
    pub fn should_skip(&self, template_id: &str, index: u32) -> bool {
        let Some(info) = self.resume_from.get(template_id) else {
            return false;
        };
        if info.completed {
            return true;
        }
        if info.in_flight.contains(&index) {
            return false;
        }
        index < info.skip_under
    }

    pub fn mark_in_flight(&self, template_id: &str, index: u32) {
        let mut current = self.current.lock().expect("resume lock poisoned");
        current
            .entry(template_id.to_string())
            .or_default()
            .in_flight
            .insert(index);
    }

    pub fn complete(&self, template_id: &str, index: u32) {
        let mut current = self.current.lock().expect("resume lock poisoned");
        if let Some(info) = current.get_mut(template_id) {
            info.in_flight.remove(&index);
        }
    }

    pub fn mark_template_completed(&self, template_id: &str) {
        let mut current = self.current.lock().expect("resume lock poisoned");
        let info = current.entry(template_id.to_string()).or_default();
        info.completed = true;
        info.in_flight.clear();
    }

    /// Serialize the live state. The sliding window bounds are derived
    /// from the surviving in-flight set at snapshot time.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut templates = HashMap::new();
        {
            let current = self.current.lock().expect("resume lock poisoned");
            for (id, info) in current.iter() {
                let mut snapshot = info.clone();
                if !snapshot.completed {
                    snapshot.skip_under = snapshot.in_flight.iter().next().copied().unwrap_or(0);
                    snapshot.do_above = snapshot.in_flight.iter().last().copied().unwrap_or(0);
                }
                templates.insert(id.clone(), snapshot);
            }
        }
        let file = ResumeFile {
            version: RESUME_FORMAT_VERSION,
            templates,
        };
        let serialized = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_decisions_from_snapshot() {
        let mut resume_from = HashMap::new();
        resume_from.insert(
            "t1".to_string(),
            ResumeInfo {
                completed: false,
                skip_under: 5,
                do_above: 6,
                in_flight: [3u32, 5u32].into_iter().collect(),
            },
        );
        resume_from.insert(
            "t2".to_string(),
            ResumeInfo {
                completed: true,
                ..Default::default()
            },
        );
        let cfg = ResumeConfig {
            current: Mutex::new(HashMap::new()),
            resume_from,
        };

        // below skip-under and not in-flight: done in the previous run
        assert!(cfg.should_skip("t1", 0));
        assert!(cfg.should_skip("t1", 4));
        // in-flight indices repeat
        assert!(!cfg.should_skip("t1", 3));
        assert!(!cfg.should_skip("t1", 5));
        // above the window: never started
        assert!(!cfg.should_skip("t1", 9));
        // completed template skips everything
        assert!(cfg.should_skip("t2", 0));
        // unknown template executes
        assert!(!cfg.should_skip("t3", 0));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let cfg = ResumeConfig::new();
        for i in 0..8u32 {
            cfg.mark_in_flight("t", i);
        }
        for i in 0..5u32 {
            cfg.complete("t", i);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.cfg");
        cfg.save(&path).unwrap();

        let restored = ResumeConfig::load(&path).unwrap();
        // 0..5 completed in the interrupted run
        for i in 0..5u32 {
            assert!(restored.should_skip("t", i), "index {} should skip", i);
        }
        // 5..8 were in flight: repeat
        for i in 5..8u32 {
            assert!(!restored.should_skip("t", i), "index {} should repeat", i);
        }
        // beyond the window: execute
        assert!(!restored.should_skip("t", 9));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.cfg");
        std::fs::write(&path, r#"{"version":99,"templates":{}}"#).unwrap();
        assert!(ResumeConfig::load(&path).is_err());
    }

    #[test]
    fn test_completed_template_roundtrip() {
        let cfg = ResumeConfig::new();
        cfg.mark_in_flight("t", 0);
        cfg.complete("t", 0);
        cfg.mark_template_completed("t");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.cfg");
        cfg.save(&path).unwrap();

        let restored = ResumeConfig::load(&path).unwrap();
        assert!(restored.should_skip("t", 42));
    }
}
