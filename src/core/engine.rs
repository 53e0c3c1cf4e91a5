// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Engine
 * Schedules (template, target) execution with bounded concurrency,
 * rate limiting, host error budgets, resume and result dispatch
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::errors::ScanError;
use crate::interactions::Correlator;
use crate::output::{make_result_events, OutputWriter};
use crate::projectfile::ProjectFile;
use crate::protocols::{http::OperatorSet, ExecutorOptions, InternalWrappedEvent, Protocol};
use crate::templates::{cluster_templates, execute_template, ClusterGroup, Template};
use crate::types::{ProtocolKind, ScanOptions, ScanStrategy};
use crate::workflows::execute_workflow;

use super::cancel::CancelToken;
use super::hosterrors::HostErrorCache;
use super::inputs::{InputProvider, MetaInput};
use super::progress::Progress;
use super::ratelimit::ScanRateLimiter;
use super::resume::ResumeConfig;

/// The engine root object. Every shared registry (rate limiter, host
/// error cache, trust set, progress) is constructed here and passed down;
/// tests build independent engines.
pub struct ScanEngine {
    options: Arc<ScanOptions>,
    executor: ExecutorOptions,
    resume: Arc<ResumeConfig>,
    output: Arc<dyn OutputWriter>,
}

impl ScanEngine {
    pub fn new(
        options: Arc<ScanOptions>,
        output: Arc<dyn OutputWriter>,
        resume: Arc<ResumeConfig>,
        project: Option<Arc<ProjectFile>>,
        interactions: Option<Arc<Correlator>>,
    ) -> Self {
        let cancel = CancelToken::new();
        let executor = ExecutorOptions {
            rate_limiter: Arc::new(ScanRateLimiter::new(
                options.rate_limit,
                options.per_host_rate_limit,
                cancel.clone(),
            )),
            host_errors: Arc::new(HostErrorCache::new(
                options.max_host_errors,
                Duration::from_secs(options.host_error_window),
            )),
            progress: Arc::new(Progress::new()),
            project,
            interactions,
            cancel,
            options: Arc::clone(&options),
        };
        Self {
            options,
            executor,
            resume,
            output,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.executor.cancel.clone()
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.executor.progress)
    }

    pub fn resume_config(&self) -> Arc<ResumeConfig> {
        Arc::clone(&self.resume)
    }

    /// Drop templates whose protocol class is not enabled for this run.
    fn admit(&self, templates: Vec<Arc<Template>>) -> Vec<Arc<Template>> {
        templates
            .into_iter()
            .filter(|template| {
                let kind = template.kind();
                if kind == ProtocolKind::Headless && !self.options.enable_headless {
                    debug!(template = template.id.as_str(), "headless protocol disabled");
                    self.executor.progress.increment_skipped();
                    return false;
                }
                if template.has_code() && !self.options.enable_code {
                    debug!(template = template.id.as_str(), "code protocol disabled");
                    self.executor.progress.increment_skipped();
                    return false;
                }
                true
            })
            .collect()
    }

    /// Execute templates against every input under the configured spray
    /// strategy. Returns whether anything matched.
    pub async fn execute(
        &self,
        templates: Vec<Arc<Template>>,
        inputs: &dyn InputProvider,
    ) -> bool {
        let templates = self.admit(templates);
        let groups = cluster_templates(templates);

        let mut targets = Vec::with_capacity(inputs.count());
        inputs.scan(&mut |input| {
            targets.push(input.clone());
            true
        });

        for group in &groups {
            let requests = group
                .first()
                .map(|t| t.requests_total().max(1))
                .unwrap_or(1);
            self.executor
                .progress
                .add_to_total((requests * targets.len()) as u64);
        }

        let strategy = match self.options.scan_strategy {
            ScanStrategy::Auto => {
                // host spray pays off when there are fewer targets than
                // templates
                if targets.len() < groups.len() {
                    ScanStrategy::HostSpray
                } else {
                    ScanStrategy::TemplateSpray
                }
            }
            other => other,
        };
        debug!(
            templates = groups.len(),
            targets = targets.len(),
            ?strategy,
            "starting scan"
        );

        let results = Arc::new(AtomicBool::new(false));
        let targets = Arc::new(targets);
        match strategy {
            ScanStrategy::TemplateSpray | ScanStrategy::Auto => {
                self.execute_template_spray(groups, targets, Arc::clone(&results))
                    .await
            }
            ScanStrategy::HostSpray => {
                self.execute_host_spray(groups, targets, Arc::clone(&results))
                    .await
            }
        }

        results.load(Ordering::SeqCst)
    }

    /// Outer loop templates, inner loop targets.
    async fn execute_template_spray(
        &self,
        groups: Vec<ClusterGroup>,
        targets: Arc<Vec<MetaInput>>,
        results: Arc<AtomicBool>,
    ) {
        let default_pool = Arc::new(Semaphore::new(self.options.template_threads.max(1)));
        let headless_pool = Arc::new(Semaphore::new(self.options.headless_bulk_size.max(1)));
        let mut templates_in_flight = JoinSet::new();

        for group in groups {
            let pool = if group
                .first()
                .map(|t| t.kind() == ProtocolKind::Headless)
                .unwrap_or(false)
            {
                Arc::clone(&headless_pool)
            } else {
                Arc::clone(&default_pool)
            };
            let runner = self.task_runner(Arc::clone(&results));
            let targets = Arc::clone(&targets);

            templates_in_flight.spawn(async move {
                let Ok(_permit) = pool.acquire().await else {
                    return;
                };
                runner.run_group(group, targets).await;
            });
        }
        while templates_in_flight.join_next().await.is_some() {}
    }

    /// Outer loop targets, inner loop templates.
    async fn execute_host_spray(
        &self,
        groups: Vec<ClusterGroup>,
        targets: Arc<Vec<MetaInput>>,
        results: Arc<AtomicBool>,
    ) {
        let host_pool = Arc::new(Semaphore::new(self.options.bulk_size.max(1)));
        let groups = Arc::new(groups);
        let mut hosts_in_flight = JoinSet::new();

        for (index, target) in targets.iter().enumerate() {
            let pool = Arc::clone(&host_pool);
            let groups = Arc::clone(&groups);
            let target = target.clone();
            let runner = self.task_runner(Arc::clone(&results));

            hosts_in_flight.spawn(async move {
                let Ok(_permit) = pool.acquire().await else {
                    return;
                };
                for group in groups.iter() {
                    runner.run_task(group, &target, index as u32).await;
                }
            });
        }
        while hosts_in_flight.join_next().await.is_some() {}
    }

    fn task_runner(&self, results: Arc<AtomicBool>) -> TaskRunner {
        TaskRunner {
            executor: self.executor.clone(),
            resume: Arc::clone(&self.resume),
            output: Arc::clone(&self.output),
            options: Arc::clone(&self.options),
            results,
        }
    }
}

/// Per-task execution state shared by both spray strategies.
#[derive(Clone)]
struct TaskRunner {
    executor: ExecutorOptions,
    resume: Arc<ResumeConfig>,
    output: Arc<dyn OutputWriter>,
    options: Arc<ScanOptions>,
    results: Arc<AtomicBool>,
}

impl TaskRunner {
    /// One template group against every target, bounded by bulk-size.
    async fn run_group(&self, group: ClusterGroup, targets: Arc<Vec<MetaInput>>) {
        let bulk = Arc::new(Semaphore::new(self.options.bulk_size.max(1)));
        let mut tasks = JoinSet::new();
        let group = Arc::new(group);

        for (index, target) in targets.iter().enumerate() {
            if self.executor.cancel.is_canceled() {
                break;
            }
            let bulk = Arc::clone(&bulk);
            let group = Arc::clone(&group);
            let target = target.clone();
            let runner = self.clone();

            tasks.spawn(async move {
                let Ok(_permit) = bulk.acquire().await else {
                    return;
                };
                runner.run_task(&group, &target, index as u32).await;
            });
        }
        while tasks.join_next().await.is_some() {}

        if !self.executor.cancel.is_canceled() {
            if let Some(owner) = group.first() {
                self.resume.mark_template_completed(&owner.id);
            }
        }
    }

    /// One (template group, target) execution under the scheduling
    /// contract: host budget, resume decision, execute, raise results,
    /// error accounting, in-flight cleanup.
    async fn run_task(&self, group: &ClusterGroup, target: &MetaInput, index: u32) {
        let Some(owner) = group.first() else {
            return;
        };
        if self.executor.cancel.is_canceled() {
            // interrupted before start: leave nothing in flight
            return;
        }

        // host budget first so tripped hosts don't touch the resume state
        if self.executor.host_errors.check(&target.id()) {
            self.executor.progress.increment_skipped();
            return;
        }

        if self.resume.should_skip(&owner.id, index) {
            debug!(
                template = owner.id.as_str(),
                target = target.input.as_str(),
                "resume: already processed"
            );
            return;
        }
        self.resume.mark_in_flight(&owner.id, index);

        let outcome = self.execute_group(group, target).await;

        match outcome {
            Ok(matched) => {
                if matched {
                    self.results.store(true, Ordering::SeqCst);
                }
                self.resume.complete(&owner.id, index);
            }
            Err(ScanError::Canceled) => {
                // stays in flight: re-executed on resume
            }
            Err(e) => {
                if e.counts_against_host() {
                    self.executor.host_errors.record(&target.id());
                }
                self.executor.progress.record_error(e.kind(), &e.to_string());
                self.resume.complete(&owner.id, index);
            }
        }
    }

    async fn execute_group(
        &self,
        group: &ClusterGroup,
        target: &MetaInput,
    ) -> Result<bool, ScanError> {
        let owner = group.first().expect("groups are never empty");

        let callback_output = Arc::clone(&self.output);
        let callback_progress = Arc::clone(&self.executor.progress);
        let store_dumps = self.options.store_responses;
        // workflow children raise events under their own template ids
        let mut group_for_callback: Vec<Arc<Template>> = group.clone();
        if let Some(workflow) = &owner.compiled_workflow {
            group_for_callback.extend(crate::workflows::collect_templates(workflow));
        }
        let callback = move |wrapped: InternalWrappedEvent| {
            if !wrapped.positive {
                return;
            }
            let Some(template) = group_for_callback
                .iter()
                .find(|t| t.id == wrapped.template_id)
            else {
                warn!(
                    template = wrapped.template_id.as_str(),
                    "event for unknown cluster member"
                );
                return;
            };
            callback_progress.increment_matched();
            for event in make_result_events(template, &wrapped, store_dumps) {
                callback_output.write(&event);
            }
        };

        if let Some(workflow) = &owner.compiled_workflow {
            return execute_workflow(workflow, target, &self.executor, &callback).await;
        }

        if group.len() > 1 {
            // clustered execution: one request stream, every member's
            // operators evaluated on the shared responses
            let Some(Protocol::Http(request)) = owner.requests.first() else {
                return Err(ScanError::Protocol {
                    target: target.input.clone(),
                    reason: "clustered group without an http request".into(),
                });
            };
            let members: Vec<OperatorSet<'_>> = group
                .iter()
                .filter_map(|template| match template.requests.first() {
                    Some(Protocol::Http(http)) => Some(OperatorSet {
                        template_id: &template.id,
                        operators: &http.operators,
                        stop_at_first_match: http.stop_at_first_match,
                    }),
                    _ => None,
                })
                .collect();
            return request
                .execute_with_members(
                    target,
                    &crate::dsl::DynamicValues::new(),
                    &self.executor,
                    &members,
                    &callback,
                )
                .await;
        }

        execute_template(
            owner,
            target,
            &crate::dsl::DynamicValues::new(),
            &self.executor,
            &callback,
        )
        .await
        .map(|(matched, _)| matched)
    }
}
