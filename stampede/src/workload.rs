use std::sync::Arc;

use anyhow::Context as _;
use stampede_core::metrics::{MetricHandle, TagSet};
use stampede_core::{CHECKS, CHECK_TAG, IterationContext, RunContext};
use stampede_http::{Check, HttpClient, HttpMetrics, HttpRequest, Method, apply_checks, send};

use crate::scenario::{BodyYaml, Outcome, RequestYaml, Scenario, TimingPhase};

/// Sends a scenario's requests in order, once per iteration. Cheap to clone.
#[derive(Debug, Clone)]
pub(crate) struct Workload {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: HttpClient,
    http: HttpMetrics,
    tags: Vec<(String, String)>,
    steps: Vec<Step>,
    record: Vec<(MetricHandle, Outcome)>,
}

#[derive(Debug)]
struct Step {
    request: HttpRequest,
    group: Option<String>,
    checks: Vec<Check>,
    trends: Vec<(MetricHandle, TimingPhase)>,
}

impl Workload {
    /// Registers the scenario's metrics on `ctx` and prepares every request.
    pub(crate) fn build(scenario: &Scenario, ctx: &RunContext) -> anyhow::Result<Self> {
        let http = HttpMetrics::register(ctx.metrics())?;

        for (name, kind) in &scenario.metrics {
            ctx.register_metric(name, *kind)
                .with_context(|| format!("failed to register metric `{name}`"))?;
        }

        let handle = |name: &str| {
            ctx.metrics()
                .handle(name)
                .with_context(|| format!("metric `{name}` is not registered"))
        };

        let mut steps = Vec::with_capacity(scenario.requests.len());
        for req in &scenario.requests {
            for check in &req.checks {
                // Per-check pass/fail counts show up in the summary.
                ctx.metrics().declare_submetric(
                    CHECKS,
                    TagSet::new([(CHECK_TAG.to_string(), check.display_name())]),
                )?;
            }

            let trends = req
                .trends
                .iter()
                .map(|(name, phase)| Ok((handle(name)?, *phase)))
                .collect::<anyhow::Result<Vec<_>>>()?;

            steps.push(Step {
                request: build_request(scenario, req)?,
                group: req.group.clone(),
                checks: req.checks.clone(),
                trends,
            });
        }

        let record = scenario
            .record
            .iter()
            .map(|(name, outcome)| Ok((handle(name)?, *outcome)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client: HttpClient::default(),
                http,
                tags: scenario
                    .tags
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                steps,
                record,
            }),
        })
    }

    /// One iteration. A transport error ends the iteration early and fails it;
    /// failed checks do not.
    pub(crate) async fn iteration(self, ctx: IterationContext) -> stampede_http::Result<()> {
        let ctx = self
            .inner
            .tags
            .iter()
            .fold(ctx, |ctx, (k, v)| ctx.with_tag(k, v));

        let outcome = self.run_steps(&ctx).await;

        let passed = outcome.is_ok();
        for (metric, when) in &self.inner.record {
            let hit = match when {
                Outcome::Passed => passed,
                Outcome::Failed => !passed,
            };
            ctx.record(metric, if hit { 1.0 } else { 0.0 });
        }

        outcome
    }

    async fn run_steps(&self, ctx: &IterationContext) -> stampede_http::Result<()> {
        let Inner {
            client, http, steps, ..
        } = self.inner.as_ref();

        for step in steps {
            let ctx = match &step.group {
                Some(group) => ctx.group(group),
                None => ctx.clone(),
            };

            match send(client, http, &ctx, step.request.clone()).await {
                Ok(res) => {
                    apply_checks(&ctx, Some(&res), &step.checks);
                    for (metric, phase) in &step.trends {
                        ctx.record(metric, millis(phase.pick(&res.timings)));
                    }
                }
                Err(err) => {
                    apply_checks(&ctx, None, &step.checks);
                    return Err(err);
                }
            }
        }

        Ok(())
    }
}

fn millis(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn build_request(scenario: &Scenario, req: &RequestYaml) -> anyhow::Result<HttpRequest> {
    let method = Method::from_bytes(req.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid http method `{}`", req.method))?;

    let mut out = HttpRequest::new(method, scenario.resolve_url(&req.url));
    for (k, v) in &req.headers {
        out = out.header(k, v.as_str());
    }
    for (k, v) in &req.tags {
        out = out.tag(k, v);
    }
    if let Some(name) = &req.name {
        out = out.name(name.as_str());
    }
    if let Some(auth) = &req.basic_auth {
        out = out.basic_auth(&auth.user, &auth.password);
    }
    if let Some(timeout) = req.timeout {
        out = out.timeout(timeout.into_inner());
    }
    out = match &req.body {
        Some(BodyYaml::Json(value)) => out.json(value)?,
        Some(BodyYaml::Form(fields)) => out.form(fields),
        Some(BodyYaml::Text(text)) => out.body(text.clone()),
        None => out,
    };

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvVars;
    use crate::scenario;
    use stampede_core::metrics::CollectorSnapshot;

    fn scenario(raw: &str) -> Scenario {
        scenario::parse(raw, &EnvVars::new()).unwrap_or_else(|e| panic!("{e:#}"))
    }

    #[test]
    fn builds_requests_from_yaml() {
        let s = scenario(
            r#"
baseUrl: http://localhost:8080/
vus: 1
duration: 1s
requests:
  - name: form
    method: post
    url: /post
    headers: {X-Trace: abc}
    tags: {type: POST}
    body:
      form: {field1: value1, field2: value2}
    timeout: 2s
"#,
        );
        let req = build_request(&s, &s.requests[0]).unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url, "http://localhost:8080/post");
        assert_eq!(req.display_name(), "form");
        assert_eq!(req.tags.get("type"), Some("POST"));
        assert_eq!(&req.body[..], b"field1=value1&field2=value2");
        assert_eq!(req.timeout, Some(std::time::Duration::from_secs(2)));
        assert!(req.headers.iter().any(|(k, v)| k == "X-Trace" && v == "abc"));
    }

    #[test]
    fn build_registers_metrics_and_check_submetrics() {
        let s = scenario(
            r#"
vus: 1
duration: 1s
metrics: {errors: rate, waiting_time: trend}
requests:
  - url: http://localhost/status/200
    checks:
      - {type: status, equals: 200}
    trends: {waiting_time: waiting}
record: {errors: failed}
"#,
        );
        let ctx = RunContext::new().unwrap_or_else(|e| panic!("{e}"));
        Workload::build(&s, &ctx).unwrap_or_else(|e| panic!("{e:#}"));

        let snap = ctx.metrics().snapshot(std::time::Duration::from_secs(1));
        assert!(matches!(snap.get("errors"), Some(CollectorSnapshot::Rate(_))));
        assert!(matches!(snap.get("waiting_time"), Some(CollectorSnapshot::Trend(_))));
        assert!(snap.contains_key("http_req_duration"));
        assert!(snap.contains_key("checks{check:status is 200}"));
    }

    #[test]
    fn custom_metric_clashing_with_builtin_is_rejected() {
        let s = scenario(
            "vus: 1\nduration: 1s\nmetrics: {http_reqs: trend}\nrequests:\n  - url: http://x/\n",
        );
        let ctx = RunContext::new().unwrap_or_else(|e| panic!("{e}"));
        assert!(Workload::build(&s, &ctx).is_err());
    }
}
