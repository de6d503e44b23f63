use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, Map};
use serde::Deserialize;

use crate::collection::CollisionPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/77.0.3865.90 Safari/537.36";

/// Settings for one run, after defaults, `SITEMAP_*` environment variables and CLI
/// flags have been layered.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Site root; `robots.txt` is read from here.
    pub base_url: String,
    /// Prefix stripped before splitting URLs into subdirs. Defaults to `{base_url}/`.
    pub prefix: Option<String>,
    pub output_dir: PathBuf,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub concurrency: usize,
    pub retries: u32,
    pub deadline_secs: Option<u64>,
    pub collision_policy: CollisionPolicy,
    pub report: Option<PathBuf>,
}

/// Values given on the command line; `None` leaves the lower layers in charge.
#[derive(Debug, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub prefix: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub concurrency: Option<usize>,
    pub retries: Option<u32>,
    pub deadline_secs: Option<u64>,
    pub collision_policy: Option<CollisionPolicy>,
    pub report: Option<PathBuf>,
}

impl CrawlConfig {
    pub fn load(overrides: Overrides) -> Result<Self> {
        Self::load_with(None, overrides)
    }

    /// `env` replaces the process environment when given.
    fn load_with(env: Option<Map<String, String>>, o: Overrides) -> Result<Self> {
        let path_str = |p: Option<PathBuf>| p.map(|p| p.to_string_lossy().into_owned());

        let settings = Config::builder()
            .set_default("output_dir", "sitemaps")?
            .set_default("timeout_secs", 30_i64)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("concurrency", 4_i64)?
            .set_default("retries", 0_i64)?
            .set_default("collision_policy", "overwrite")?
            .add_source(Environment::with_prefix("SITEMAP").try_parsing(true).source(env))
            .set_override_option("base_url", o.base_url)?
            .set_override_option("prefix", o.prefix)?
            .set_override_option("output_dir", path_str(o.output_dir))?
            .set_override_option("timeout_secs", o.timeout_secs.map(|v| v as i64))?
            .set_override_option("user_agent", o.user_agent)?
            .set_override_option("concurrency", o.concurrency.map(|v| v as i64))?
            .set_override_option("retries", o.retries.map(i64::from))?
            .set_override_option("deadline_secs", o.deadline_secs.map(|v| v as i64))?
            .set_override_option(
                "collision_policy",
                o.collision_policy.map(|p| policy_name(p).to_string()),
            )?
            .set_override_option("report", path_str(o.report))?
            .build()
            .context("Failed to build configuration")?;

        let cfg: Self = settings
            .try_deserialize()
            .context("Invalid configuration (is a base URL set?)")?;
        anyhow::ensure!(cfg.concurrency > 0, "concurrency must be at least 1");
        Ok(cfg)
    }

    pub fn prefix(&self) -> String {
        self.prefix
            .clone()
            .unwrap_or_else(|| format!("{}/", self.base_url.trim_end_matches('/')))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

fn policy_name(p: CollisionPolicy) -> &'static str {
    match p {
        CollisionPolicy::Overwrite => "overwrite",
        CollisionPolicy::Reject => "reject",
        CollisionPolicy::Namespace => "namespace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_apply() {
        let cfg = CrawlConfig::load_with(
            env(&[]),
            Overrides {
                base_url: Some("https://www.datacamp.com".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(cfg.output_dir, PathBuf::from("sitemaps"));
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(cfg.collision_policy, CollisionPolicy::Overwrite);
        assert_eq!(cfg.deadline(), None);
        assert_eq!(cfg.prefix(), "https://www.datacamp.com/");
    }

    #[test]
    fn environment_then_flags() {
        let cfg = CrawlConfig::load_with(
            env(&[
                ("SITEMAP_BASE_URL", "https://env.example"),
                ("SITEMAP_OUTPUT_DIR", "from-env"),
                ("SITEMAP_CONCURRENCY", "8"),
                ("SITEMAP_COLLISION_POLICY", "namespace"),
            ]),
            Overrides {
                output_dir: Some(PathBuf::from("from-flag")),
                deadline_secs: Some(60),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(cfg.base_url, "https://env.example");
        assert_eq!(cfg.output_dir, PathBuf::from("from-flag"));
        assert_eq!(cfg.concurrency, 8);
        assert_eq!(cfg.collision_policy, CollisionPolicy::Namespace);
        assert_eq!(cfg.deadline(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn explicit_prefix_wins() {
        let cfg = CrawlConfig::load_with(
            env(&[]),
            Overrides {
                base_url: Some("https://example.com/".into()),
                prefix: Some("https://www.example.com/".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.prefix(), "https://www.example.com/");
    }

    #[test]
    fn missing_base_url_is_error() {
        assert!(CrawlConfig::load_with(env(&[]), Overrides::default()).is_err());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let result = CrawlConfig::load_with(
            env(&[]),
            Overrides {
                base_url: Some("https://example.com".into()),
                concurrency: Some(0),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }
}
