/// Config file loading and creation for the duelrank CLI.
///
/// Config lives at ~/.config/duelrank/config.toml.
/// All fields are optional; CLI args override config values.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use duelrank_core::{PhaseParams, RatingMetric, TrialBudget};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DuelrankConfig {
    pub random_phase_limit: Option<u32>,
    pub rating_diff_threshold: Option<f64>,
    pub partial_random_chance: Option<f64>,
    pub under_comparison_threshold: Option<u32>,
    pub bootstrap_samples: Option<usize>,
    pub trials: Option<usize>,
    pub low_power: Option<bool>,
    pub metric: Option<String>,
}

const DEFAULT_CONFIG_TEMPLATE: &str = "\
# duelrank configuration
# All values here can be overridden by CLI flags.

# Votes before the scheduler stops picking pairs uniformly at random
# random_phase_limit = 50

# Rating gap under which two items count as a close match
# rating_diff_threshold = 150.0

# Chance of a uniform pick even after the random phase
# partial_random_chance = 0.2

# Items with fewer comparisons than this are paired first
# under_comparison_threshold = 5

# Bootstrap resamples for Bradley-Terry rank probabilities (0 = skip)
# bootstrap_samples = 1000

# Monte Carlo trials for leaderboard probabilities
# trials = 50000

# Use the reduced trial count meant for slow machines
# low_power = false

# Rating the scheduler compares: \"glicko\" or \"elo\"
# metric = \"glicko\"
";

impl DuelrankConfig {
    /// Scheduler knobs from config, falling back to the core defaults.
    pub fn phase_params(&self) -> Result<PhaseParams> {
        let defaults = PhaseParams::default();
        let metric = match self.metric.as_deref() {
            Some(m) => parse_metric(m)?,
            None => defaults.metric,
        };
        let partial_random_chance = self
            .partial_random_chance
            .unwrap_or(defaults.partial_random_chance);
        if !(0.0..=1.0).contains(&partial_random_chance) {
            bail!("partial_random_chance must be between 0.0 and 1.0, got {partial_random_chance}");
        }

        Ok(PhaseParams {
            random_phase_limit: self.random_phase_limit.unwrap_or(defaults.random_phase_limit),
            rating_diff_threshold: self
                .rating_diff_threshold
                .unwrap_or(defaults.rating_diff_threshold),
            partial_random_chance,
            under_comparison_threshold: self
                .under_comparison_threshold
                .unwrap_or(defaults.under_comparison_threshold),
            metric,
            ..defaults
        })
    }

    /// Trial budget: explicit count > low-power flag > full.
    pub fn trial_budget(&self, trials: Option<usize>, low_power: bool) -> TrialBudget {
        match trials.or(self.trials) {
            Some(n) => TrialBudget::Exact(n),
            None if low_power || self.low_power.unwrap_or(false) => TrialBudget::Constrained,
            None => TrialBudget::Full,
        }
    }
}

pub fn parse_metric(value: &str) -> Result<RatingMetric> {
    match value.trim().to_ascii_lowercase().as_str() {
        "glicko" => Ok(RatingMetric::Glicko),
        "elo" => Ok(RatingMetric::Elo),
        other => bail!("Unknown metric \"{other}\". Use \"glicko\" or \"elo\"."),
    }
}

/// Returns the default config path: ~/.config/duelrank/config.toml
pub fn config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("duelrank").join("config.toml"))
}

/// Load config from a file path. Returns default (all None) if file doesn't exist.
pub fn load_config(path: &Path) -> Result<DuelrankConfig> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DuelrankConfig::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read config at {}", path.display())),
    }
}

/// Create the default config file. Errors if it already exists.
pub fn create_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Config file already exists at {}", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write config to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.toml")).unwrap();
        assert!(cfg.random_phase_limit.is_none());
        assert_eq!(cfg.trial_budget(None, false), TrialBudget::Full);
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duelrank").join("config.toml");
        create_default_config(&path).unwrap();

        let cfg = load_config(&path).unwrap();
        let params = cfg.phase_params().unwrap();
        let defaults = PhaseParams::default();
        assert_eq!(params.random_phase_limit, defaults.random_phase_limit);
        assert_eq!(params.metric, RatingMetric::Glicko);

        assert!(create_default_config(&path).is_err());
    }

    #[test]
    fn test_values_override_defaults() {
        let cfg: DuelrankConfig = toml::from_str(
            "random_phase_limit = 0\nmetric = \"elo\"\nlow_power = true\npartial_random_chance = 0.0\n",
        )
        .unwrap();
        let params = cfg.phase_params().unwrap();
        assert_eq!(params.random_phase_limit, 0);
        assert_eq!(params.metric, RatingMetric::Elo);
        assert_eq!(params.partial_random_chance, 0.0);
        assert_eq!(cfg.trial_budget(None, false), TrialBudget::Constrained);
        assert_eq!(cfg.trial_budget(Some(10), false), TrialBudget::Exact(10));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let cfg: DuelrankConfig = toml::from_str("metric = \"trueskill\"").unwrap();
        assert!(cfg.phase_params().is_err());

        let cfg: DuelrankConfig = toml::from_str("partial_random_chance = 1.5").unwrap();
        assert!(cfg.phase_params().is_err());

        assert!(toml::from_str::<DuelrankConfig>("endpoint = \"x\"").is_err());
    }
}
