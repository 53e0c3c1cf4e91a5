// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Template Filters
 * Tag/severity/author admission and include/exclude path globs
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use glob::Pattern;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::errors::TemplateError;
use crate::templates::Template;
use crate::types::Severity;

/// Admits templates whose metadata matches the requested tags, severities
/// and authors. Exclusions always win over inclusions.
#[derive(Debug, Default)]
pub struct TagFilter {
    include_tags: HashSet<String>,
    exclude_tags: HashSet<String>,
    severities: HashSet<Severity>,
    authors: HashSet<String>,
}

impl TagFilter {
    pub fn new(
        include_tags: &[String],
        exclude_tags: &[String],
        severities: &[Severity],
        authors: &[String],
    ) -> Self {
        let normalize =
            |values: &[String]| values.iter().map(|v| v.trim().to_lowercase()).collect();
        Self {
            include_tags: normalize(include_tags),
            exclude_tags: normalize(exclude_tags),
            severities: severities.iter().copied().collect(),
            authors: normalize(authors),
        }
    }

    pub fn matches(&self, template: &Template) -> bool {
        let tags: HashSet<String> = template
            .info
            .tags
            .iter()
            .map(|t| t.to_lowercase())
            .collect();

        if tags.iter().any(|t| self.exclude_tags.contains(t)) {
            return false;
        }
        if !self.include_tags.is_empty() && self.include_tags.is_disjoint(&tags) {
            return false;
        }
        if !self.severities.is_empty() {
            let severity = template.info.severity.unwrap_or(Severity::Unknown);
            if !self.severities.contains(&severity) {
                return false;
            }
        }
        if !self.authors.is_empty()
            && !template
                .info
                .author
                .iter()
                .any(|a| self.authors.contains(&a.to_lowercase()))
        {
            return false;
        }
        true
    }
}

/// Include/exclude glob filtering over enumerated template paths.
#[derive(Debug, Default)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, TemplateError> {
        let compile = |globs: &[String]| {
            globs
                .iter()
                .map(|g| {
                    Pattern::new(g).map_err(|e| TemplateError::InvalidField {
                        field: "path-filter",
                        reason: format!("bad glob '{}': {}", g, e),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    fn matches(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        if self.exclude.iter().any(|p| p.matches(&text)) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|p| p.matches(&text))
    }

    /// Apply the filter keeping input order, without duplicates.
    pub fn apply(&self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        paths
            .into_iter()
            .filter(|path| self.matches(path))
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::Info;

    fn template(tags: &[&str], severity: Severity, authors: &[&str]) -> Template {
        Template {
            id: "t".into(),
            info: Info {
                name: "T".into(),
                author: authors.iter().map(|s| s.to_string()).collect(),
                severity: Some(severity),
                tags: tags.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_include_tags_intersect() {
        let filter = TagFilter::new(&["cve".into()], &[], &[], &[]);
        assert!(filter.matches(&template(&["cve", "apache"], Severity::High, &["a"])));
        assert!(!filter.matches(&template(&["exposure"], Severity::High, &["a"])));
    }

    #[test]
    fn test_exclude_wins() {
        let filter = TagFilter::new(&["cve".into()], &["dos".into()], &[], &[]);
        assert!(!filter.matches(&template(&["cve", "dos"], Severity::High, &["a"])));
    }

    #[test]
    fn test_severity_and_author_filters() {
        let filter = TagFilter::new(&[], &[], &[Severity::Critical], &[]);
        assert!(filter.matches(&template(&[], Severity::Critical, &["a"])));
        assert!(!filter.matches(&template(&[], Severity::Low, &["a"])));

        let filter = TagFilter::new(&[], &[], &[], &["Alice".into()]);
        assert!(filter.matches(&template(&[], Severity::Low, &["alice", "bob"])));
        assert!(!filter.matches(&template(&[], Severity::Low, &["mallory"])));
    }

    #[test]
    fn test_empty_filter_admits_all() {
        let filter = TagFilter::default();
        assert!(filter.matches(&template(&["anything"], Severity::Unknown, &["x"])));
    }

    #[test]
    fn test_path_filter_globs() {
        let filter = PathFilter::new(
            &["*/http/*".to_string()],
            &["*deprecated*".to_string()],
        )
        .unwrap();
        let paths = vec![
            PathBuf::from("templates/http/a.yaml"),
            PathBuf::from("templates/dns/b.yaml"),
            PathBuf::from("templates/http/deprecated/c.yaml"),
            PathBuf::from("templates/http/a.yaml"),
        ];
        let filtered = filter.apply(paths);
        assert_eq!(filtered, vec![PathBuf::from("templates/http/a.yaml")]);
    }
}
