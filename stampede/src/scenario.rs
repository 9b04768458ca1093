use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use stampede_core::metrics::MetricKind;
use stampede_core::{Stage, StagePlan, ThresholdSpec};
use stampede_http::Check;

use crate::env::{EnvVars, expand_env};

/// A scenario file: load shape, custom metrics, thresholds and the requests
/// every iteration sends in order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct Scenario {
    /// Prefix for request URLs that start with `/`.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: u64,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    /// Constant load, used when `stages` is empty.
    #[serde(default)]
    pub vus: Option<u64>,
    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(default)]
    pub think_time: Option<YamlDuration>,
    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    /// Tags on every sample of the run.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,

    /// Custom metrics, name to kind.
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricKind>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdYaml>,

    pub requests: Vec<RequestYaml>,

    /// Custom rate/counter metrics fed with each iteration's outcome.
    #[serde(default)]
    pub record: BTreeMap<String, Outcome>,

    #[serde(default)]
    pub summary: SummaryYaml,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub duration: YamlDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    /// `name` tag value; defaults to the URL.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub body: Option<BodyYaml>,
    #[serde(default)]
    pub basic_auth: Option<BasicAuthYaml>,
    #[serde(default)]
    pub timeout: Option<YamlDuration>,
    #[serde(default)]
    pub checks: Vec<Check>,
    /// Custom trend metrics fed with one timing phase of the response.
    #[serde(default)]
    pub trends: BTreeMap<String, TimingPhase>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BodyYaml {
    Json(serde_json::Value),
    Form(BTreeMap<String, String>),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BasicAuthYaml {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TimingPhase {
    Duration,
    Waiting,
    Receiving,
}

impl TimingPhase {
    pub(crate) fn pick(self, timings: &stampede_http::HttpTimings) -> Duration {
        match self {
            Self::Duration => timings.duration,
            Self::Waiting => timings.waiting,
            Self::Receiving => timings.receiving,
        }
    }
}

/// Which iteration outcome a recorded metric counts as a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Outcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SummaryYaml {
    /// Relative path for the JSON summary.
    #[serde(default)]
    pub json: Option<String>,
    /// Relative path for the text summary.
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdYaml {
    One(ThresholdItemYaml),
    Many(Vec<ThresholdItemYaml>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdItemYaml {
    Expr(String),
    Full(ThresholdObjectYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThresholdObjectYaml {
    pub threshold: String,
    #[serde(default)]
    pub abort_on_fail: bool,
    #[serde(default)]
    pub windowed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 30s, 1m30s) or number of seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration cannot be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|_| E::custom("duration must be a finite, non-negative number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                humantime::parse_duration(v.trim())
                    .map(YamlDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => {
                return Err(serde::de::Error::custom(format!(
                    "tag `{k}` must be a string, number or bool"
                )));
            }
        };
        out.insert(k, s);
    }

    Ok(out)
}

pub(crate) async fn load(path: &Path, env: &EnvVars) -> anyhow::Result<Scenario> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read scenario: {}", path.display()))?;
    parse(&raw, env).with_context(|| format!("invalid scenario: {}", path.display()))
}

pub(crate) fn parse(raw: &str, env: &EnvVars) -> anyhow::Result<Scenario> {
    let expanded = expand_env(raw, env)?;
    let scenario: Scenario = serde_yaml::from_str(&expanded)?;
    scenario.validate()?;
    Ok(scenario)
}

impl Scenario {
    fn validate(&self) -> anyhow::Result<()> {
        if self.requests.is_empty() {
            anyhow::bail!("scenario has no requests");
        }

        for (name, outcome) in &self.record {
            match self.metrics.get(name) {
                Some(MetricKind::Rate | MetricKind::Counter) => {}
                Some(MetricKind::Trend) => {
                    anyhow::bail!("record `{name}: {outcome:?}` needs a rate or counter metric")
                }
                None => anyhow::bail!("record refers to undeclared metric `{name}`"),
            }
        }

        for req in &self.requests {
            if !req.url.starts_with('/') && !is_absolute_url(&req.url) {
                anyhow::bail!("request url must be absolute or start with `/`: {}", req.url);
            }
            if req.url.starts_with('/') && self.base_url.is_none() {
                anyhow::bail!("relative request url {} needs `baseUrl`", req.url);
            }
            for name in req.trends.keys() {
                match self.metrics.get(name) {
                    Some(MetricKind::Trend) => {}
                    Some(kind) => anyhow::bail!("trend `{name}` is declared as a {kind}"),
                    None => anyhow::bail!("trend refers to undeclared metric `{name}`"),
                }
            }
        }

        Ok(())
    }

    /// Stages as written, or a constant stage from `vus`/`duration`.
    pub(crate) fn stages(&self) -> anyhow::Result<Vec<Stage>> {
        if !self.stages.is_empty() {
            return Ok(self
                .stages
                .iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect());
        }
        match (self.vus, self.duration) {
            (Some(vus), Some(duration)) => Ok(vec![Stage::new(duration.into_inner(), vus)]),
            _ => anyhow::bail!("scenario defines neither `stages` nor `vus` with `duration`"),
        }
    }

    /// Explicit stages ramp from `startVUs`; `vus` with `duration` holds a
    /// constant load from the first tick.
    pub(crate) fn plan(&self) -> anyhow::Result<StagePlan> {
        let plan = match (self.stages.is_empty(), self.vus, self.duration) {
            (true, Some(vus), Some(duration)) => StagePlan::constant(vus, duration.into_inner()),
            _ => StagePlan::new(self.start_vus, self.stages()?),
        };
        plan.context("invalid stage plan")
    }

    pub(crate) fn threshold_specs(&self) -> anyhow::Result<Vec<ThresholdSpec>> {
        let mut specs = Vec::new();
        for (key, value) in &self.thresholds {
            let items = match value {
                ThresholdYaml::One(item) => std::slice::from_ref(item),
                ThresholdYaml::Many(items) => items.as_slice(),
            };
            for item in items {
                let spec = match item {
                    ThresholdItemYaml::Expr(expr) => ThresholdSpec::from_key(key, expr.as_str())?,
                    ThresholdItemYaml::Full(obj) => {
                        ThresholdSpec::from_key(key, obj.threshold.as_str())?
                            .abort_on_fail(obj.abort_on_fail)
                            .windowed(obj.windowed)
                    }
                };
                specs.push(spec);
            }
        }
        Ok(specs)
    }

    pub(crate) fn resolve_url(&self, url: &str) -> String {
        match (&self.base_url, url.starts_with('/')) {
            (Some(base), true) => format!("{}{url}", base.trim_end_matches('/')),
            _ => url.to_string(),
        }
    }
}

fn is_absolute_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
