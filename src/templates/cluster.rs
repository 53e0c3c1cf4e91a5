// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Template Clustering
 * Groups templates whose requests are structurally identical so the
 * request goes out once and every member's operators read the response
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::protocols::Protocol;

use super::model::Template;

/// A group of templates sharing one request definition. The first member
/// owns the wire traffic; all members evaluate their own operators.
pub type ClusterGroup = Vec<Arc<Template>>;

/// Structural equivalence key over everything except matchers and
/// extractors. Race, pipeline and unsafe blocks never cluster: their
/// execution is stateful.
fn cluster_key(template: &Template) -> Option<String> {
    if template.is_workflow() || template.requests.len() != 1 {
        return None;
    }
    let Protocol::Http(request) = &template.requests[0] else {
        return None;
    };
    if request.race || request.pipeline || request.unsafe_raw {
        return None;
    }
    Some(
        json!({
            "method": request.method,
            "path": request.path,
            "raw": request.raw,
            "headers": request.headers,
            "body": request.body,
            "attack": request.attack,
            "payloads": request.payloads,
            "redirects": request.redirects,
            "max-redirects": request.max_redirects,
        })
        .to_string(),
    )
}

/// Partition templates into execution groups. Ordering of first
/// appearance is preserved; unclusterable templates come out as
/// singleton groups.
pub fn cluster_templates(templates: Vec<Arc<Template>>) -> Vec<ClusterGroup> {
    let mut groups: Vec<ClusterGroup> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for template in templates {
        match cluster_key(&template) {
            Some(key) => match index_by_key.get(&key) {
                Some(&index) => groups[index].push(template),
                None => {
                    index_by_key.insert(key, groups.len());
                    groups.push(vec![template]);
                }
            },
            None => groups.push(vec![template]),
        }
    }

    let clustered = groups.iter().filter(|g| g.len() > 1).count();
    if clustered > 0 {
        debug!(clusters = clustered, "clustered templates with shared requests");
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{TemplateLoader, TrustStore};
    use crate::types::ScanOptions;
    use std::path::Path;

    fn load(dir: &Path, name: &str, content: &str) -> Arc<Template> {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        let loader = TemplateLoader::new(
            Arc::new(ScanOptions::default()),
            Arc::new(TrustStore::new()),
        );
        loader.load(&path).unwrap()
    }

    fn probe(id: &str, path: &str, word: &str) -> String {
        format!(
            r#"
id: {}
info:
  name: Probe
  author: tester
  severity: info
http:
  - method: GET
    path: ["{}"]
    matchers:
      - type: word
        words: ["{}"]
"#,
            id, path, word
        )
    }

    #[test]
    fn test_identical_requests_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let a = load(dir.path(), "a.yaml", &probe("probe-a", "{{BaseURL}}/x", "apache"));
        let b = load(dir.path(), "b.yaml", &probe("probe-b", "{{BaseURL}}/x", "nginx"));
        let c = load(dir.path(), "c.yaml", &probe("probe-c", "{{BaseURL}}/y", "nginx"));

        let groups = cluster_templates(vec![a, b, c]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][0].id, "probe-a");
        assert_eq!(groups[0][1].id, "probe-b");
        assert_eq!(groups[1][0].id, "probe-c");
    }

    #[test]
    fn test_method_differences_split_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let a = load(dir.path(), "a.yaml", &probe("probe-a", "{{BaseURL}}/x", "w"));
        let post = probe("probe-b", "{{BaseURL}}/x", "w").replace("method: GET", "method: POST");
        let b = load(dir.path(), "b.yaml", &post);

        let groups = cluster_templates(vec![a, b]);
        assert_eq!(groups.len(), 2);
    }
}
