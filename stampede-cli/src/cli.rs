use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use clap::Parser;
use stampede::{RunConfig, vu::BASE_URL_VAR};

#[derive(Parser, Debug)]
#[command(name = "stampede")]
#[command(about = "Run a load profile against an HTTP endpoint", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Load profile (YAML, or JSON with a .json extension)
    pub profile: PathBuf,

    /// Run a constant number of VUs instead of the profile's plan
    #[arg(long)]
    pub vus: Option<usize>,

    /// Duration of the constant plan, e.g. `10s` or `2m`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Base URL of the system under test
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Workload variable, repeatable: `-e KEY=VALUE`
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub vars: Vec<(String, String)>,

    /// Write the JSON summary here, overriding the profile
    #[arg(long)]
    pub summary_export: Option<PathBuf>,

    /// Do not print the text summary
    #[arg(long, short)]
    pub quiet: bool,
}

impl Cli {
    /// `--vus` / `--duration` replace the profile's plan with a constant one.
    pub fn apply(&self, config: &mut RunConfig) {
        if self.vus.is_none() && self.duration.is_none() {
            return;
        }
        config.stages = None;
        if let Some(vus) = self.vus {
            config.vus = Some(vus);
        }
        if let Some(duration) = self.duration {
            config.duration = Some(duration);
        }
    }

    /// `-e` variables, with `--base-url` as `BASE_URL` unless `-e` already set it.
    pub fn vars(&self) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<_, _> = self.vars.iter().cloned().collect();
        if let Some(base_url) = &self.base_url {
            vars.entry(BASE_URL_VAR.to_owned())
                .or_insert_with(|| base_url.clone());
        }
        vars
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        serde_json::from_value(serde_json::json!({
            "name": "spike-test",
            "stages": [{ "duration": "2s", "target": 50 }]
        }))
        .unwrap()
    }

    #[test]
    fn vus_and_duration_override_the_plan() {
        let cli = Cli::try_parse_from([
            "stampede",
            "profile.yaml",
            "--vus",
            "50",
            "--duration",
            "10s",
        ])
        .unwrap();
        let mut config = config();
        cli.apply(&mut config);

        assert_eq!(config.stages, None);
        assert_eq!(config.vus, Some(50));
        assert_eq!(config.duration, Some(Duration::from_secs(10)));
    }

    #[test]
    fn profile_plan_is_kept_without_overrides() {
        let cli = Cli::try_parse_from(["stampede", "profile.yaml"]).unwrap();
        let mut config = config();
        cli.apply(&mut config);
        assert!(config.stages.is_some());
    }

    #[test]
    fn env_flag_beats_base_url_flag() {
        let cli = Cli::try_parse_from([
            "stampede",
            "profile.yaml",
            "--base-url",
            "http://flag:1",
            "-e",
            "BASE_URL=http://var:1",
            "-e",
            "TOKEN=a=b",
        ])
        .unwrap();
        let vars = cli.vars();
        assert_eq!(vars[BASE_URL_VAR], "http://var:1");
        assert_eq!(vars["TOKEN"], "a=b");
    }

    #[test]
    fn malformed_vars_are_rejected() {
        assert!(Cli::try_parse_from(["stampede", "p.yaml", "-e", "NOPE"]).is_err());
        assert!(Cli::try_parse_from(["stampede", "p.yaml", "-e", "=x"]).is_err());
    }
}
