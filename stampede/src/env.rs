use std::collections::BTreeMap;

use anyhow::Context as _;

pub(crate) type EnvVars = BTreeMap<String, String>;

/// Process environment with `KEY=VALUE` overrides applied on top.
pub(crate) fn merged_env(overrides: &[String]) -> anyhow::Result<EnvVars> {
    let mut map: EnvVars = std::env::vars().collect();
    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }
    Ok(map)
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

/// Expands `${VAR}` and `${VAR:-default}`. A variable that is unset (or
/// empty, for the `:-` form) without a default is an error.
pub(crate) fn expand_env(raw: &str, env: &EnvVars) -> anyhow::Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("unterminated `${{` in: {}", first_line(&rest[start..])))?;
        let expr = &after[..end];

        let value = match expr.split_once(":-") {
            Some((name, default)) => match env.get(name) {
                Some(v) if !v.is_empty() => v.as_str(),
                _ => default,
            },
            None => env
                .get(expr)
                .map(String::as_str)
                .with_context(|| format!("environment variable `{expr}` is not set"))?,
        };
        out.push_str(value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}
