//! Search space definitions: the per-family parameter grid and repair rules.

use sf_types::{ConfigError, ModelFamily, ParameterError, ParameterValue, Parameters};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::sampler::RandomSampler;

/// Id reported for the blended predictor; no search space may use it.
pub const ENSEMBLE_ID: &str = "ensemble";

/// Draws pushed through the rules when a space is validated.
const PROBE_DRAWS: usize = 64;
const PROBE_SEED: u64 = 0x5eed;

/// Ordered mapping from parameter name to its candidate values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterGrid {
    parameters: BTreeMap<String, Vec<ParameterValue>>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit list of candidate values.
    pub fn add_values<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParameterValue>,
    {
        self.parameters
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Integers in `[start, stop)`.
    pub fn add_int_range(self, name: impl Into<String>, start: i64, stop: i64) -> Self {
        self.add_values(name, start..stop)
    }

    /// Floats `start, start + step, ...` strictly below `stop`. A non-positive
    /// or non-finite step yields no values, which validation rejects.
    pub fn add_float_steps(self, name: impl Into<String>, start: f64, stop: f64, step: f64) -> Self {
        let values: Vec<f64> = if step > 0.0 && step.is_finite() && stop > start {
            let count = ((stop - start) / step).ceil() as usize;
            (0..count)
                .map(|i| start + i as f64 * step)
                .filter(|v| *v < stop)
                .collect()
        } else {
            Vec::new()
        };
        self.add_values(name, values)
    }

    pub fn values(&self, name: &str) -> Option<&[ParameterValue]> {
        self.parameters.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ParameterValue])> {
        self.parameters
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Total number of distinct assignments, `None` on overflow.
    pub fn grid_size(&self) -> Option<usize> {
        self.parameters
            .values()
            .try_fold(1usize, |total, values| total.checked_mul(values.len()))
    }
}

type RuleFn = dyn Fn(&mut Parameters) -> Result<(), ParameterError> + Send + Sync;

/// Repair function applied to every sampled assignment before training.
///
/// `keys` lists every parameter the function reads or writes; each must be
/// present in the grid. At sampling time the function sees a [`Parameters`]
/// holding exactly the grid keys, so touching anything else fails.
#[derive(Clone)]
pub struct ParameterRules {
    keys: Vec<String>,
    apply: Arc<RuleFn>,
}

impl ParameterRules {
    pub fn new<I, S, F>(keys: I, apply: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&mut Parameters) -> Result<(), ParameterError> + Send + Sync + 'static,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            apply: Arc::new(apply),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn apply(&self, parameters: &mut Parameters) -> Result<(), ParameterError> {
        (self.apply)(parameters)
    }
}

impl fmt::Debug for ParameterRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterRules")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// One model family's search space.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    id: String,
    family: Arc<dyn ModelFamily>,
    grid: ParameterGrid,
    rules: Option<ParameterRules>,
}

impl SearchSpace {
    pub fn new(id: impl Into<String>, family: Arc<dyn ModelFamily>) -> Self {
        Self {
            id: id.into(),
            family,
            grid: ParameterGrid::new(),
            rules: None,
        }
    }

    pub fn with_grid(mut self, grid: ParameterGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn add_values<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParameterValue>,
    {
        self.grid = self.grid.add_values(name, values);
        self
    }

    pub fn add_int_range(mut self, name: impl Into<String>, start: i64, stop: i64) -> Self {
        self.grid = self.grid.add_int_range(name, start, stop);
        self
    }

    pub fn add_float_steps(mut self, name: impl Into<String>, start: f64, stop: f64, step: f64) -> Self {
        self.grid = self.grid.add_float_steps(name, start, stop, step);
        self
    }

    pub fn with_rules(mut self, rules: ParameterRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn family(&self) -> &Arc<dyn ModelFamily> {
        &self.family
    }

    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    pub fn rules(&self) -> Option<&ParameterRules> {
        self.rules.as_ref()
    }

    /// Apply the rules, if any, mapping rule failures to configuration errors.
    pub fn repair(&self, parameters: &mut Parameters) -> Result<(), ConfigError> {
        match &self.rules {
            Some(rules) => rules
                .apply(parameters)
                .map_err(|e| rule_error(&self.id, e)),
            None => Ok(()),
        }
    }

    /// Check the space eagerly so mistakes surface at construction rather than
    /// inside the search loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyId);
        }
        if self.id == ENSEMBLE_ID {
            return Err(ConfigError::ReservedId {
                id: self.id.clone(),
            });
        }

        for (name, values) in self.grid.iter() {
            if values.is_empty() {
                return Err(ConfigError::EmptyParameterValues {
                    id: self.id.clone(),
                    parameter: name.to_string(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ConfigError::NonFiniteValue {
                    id: self.id.clone(),
                    parameter: name.to_string(),
                });
            }
        }

        if let Some(rules) = &self.rules {
            if let Some(key) = rules.keys().iter().find(|k| !self.grid.contains(k)) {
                return Err(ConfigError::UnknownRuleKey {
                    id: self.id.clone(),
                    key: key.clone(),
                });
            }
            self.probe_rules(rules)?;
        }

        Ok(())
    }

    fn probe_rules(&self, rules: &ParameterRules) -> Result<(), ConfigError> {
        let mut sampler = RandomSampler::seeded(PROBE_SEED);
        for _ in 0..PROBE_DRAWS {
            let mut once = sampler.draw(&self.grid);
            rules
                .apply(&mut once)
                .map_err(|e| rule_error(&self.id, e))?;

            let mut twice = once.clone();
            rules
                .apply(&mut twice)
                .map_err(|e| rule_error(&self.id, e))?;

            if once != twice {
                return Err(ConfigError::RuleNotIdempotent {
                    id: self.id.clone(),
                });
            }
        }
        Ok(())
    }
}

fn rule_error(id: &str, error: ParameterError) -> ConfigError {
    match error {
        ParameterError::UnknownKey { key } => ConfigError::UnknownRuleKey {
            id: id.to_string(),
            key,
        },
        other => ConfigError::RuleFailed {
            id: id.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sf_types::{FittedModel, ModelError};

    pub(crate) struct NoopFamily;

    impl ModelFamily for NoopFamily {
        fn name(&self) -> &str {
            "noop"
        }

        fn fit(
            &self,
            _parameters: &Parameters,
            _features: &[Vec<f64>],
            _target: &[f64],
        ) -> Result<Arc<dyn FittedModel>, ModelError> {
            Err(ModelError::NotFitted)
        }
    }

    pub(crate) fn logistic_space() -> SearchSpace {
        SearchSpace::new("Logistic Regression", Arc::new(NoopFamily))
            .add_values("penalty", ["l1", "l2"])
            .add_float_steps("C", 0.1, 2.0, 0.1)
            .add_int_range("max_iter", 50, 300)
            .add_values("solver", ["newton-cg", "lbfgs", "liblinear", "sag", "saga"])
            .add_values("random_state", [0i64])
            .with_rules(ParameterRules::new(["solver", "penalty"], |params| {
                if matches!(params.get_str("solver")?, "newton-cg" | "sag" | "lbfgs") {
                    params.set("penalty", "l2")?;
                }
                Ok(())
            }))
    }

    #[test]
    fn grid_size_counts_combinations() {
        let grid = ParameterGrid::new()
            .add_int_range("a", 1, 4) // 3 values
            .add_values("b", [true, false]); // 2 values
        assert_eq!(grid.grid_size(), Some(6));
        assert_eq!(ParameterGrid::new().grid_size(), Some(1));
    }

    #[test]
    fn float_steps_exclude_stop() {
        let grid = ParameterGrid::new().add_float_steps("C", 0.1, 2.0, 0.1);
        let values = grid.values("C").unwrap();
        assert_eq!(values.len(), 19);
        let last = values.last().unwrap().as_f64().unwrap();
        assert!(last < 2.0 && last > 1.8);
    }

    #[test]
    fn bad_float_step_is_rejected_at_validation() {
        let space =
            SearchSpace::new("bad", Arc::new(NoopFamily)).add_float_steps("C", 1.0, 0.0, 0.1);
        assert_eq!(
            space.validate().unwrap_err(),
            ConfigError::EmptyParameterValues {
                id: "bad".into(),
                parameter: "C".into()
            }
        );
    }

    #[test]
    fn valid_space_passes() {
        assert!(logistic_space().validate().is_ok());
    }

    #[test]
    fn reserved_and_empty_ids_rejected() {
        let space = SearchSpace::new(ENSEMBLE_ID, Arc::new(NoopFamily));
        assert!(matches!(space.validate(), Err(ConfigError::ReservedId { .. })));
        let space = SearchSpace::new("  ", Arc::new(NoopFamily));
        assert_eq!(space.validate().unwrap_err(), ConfigError::EmptyId);
    }

    #[test]
    fn non_finite_values_rejected() {
        let space = SearchSpace::new("nan", Arc::new(NoopFamily)).add_values("lr", [0.1, f64::NAN]);
        assert!(matches!(space.validate(), Err(ConfigError::NonFiniteValue { .. })));
    }

    #[test]
    fn declared_rule_key_must_exist() {
        let space = SearchSpace::new("lr", Arc::new(NoopFamily))
            .add_values("solver", ["lbfgs"])
            .with_rules(ParameterRules::new(["solver", "penalty"], |_| Ok(())));
        assert_eq!(
            space.validate().unwrap_err(),
            ConfigError::UnknownRuleKey {
                id: "lr".into(),
                key: "penalty".into()
            }
        );
    }

    #[test]
    fn undeclared_rule_access_caught_by_probe() {
        // Declares only grid keys but writes one that is not sampled.
        let space = SearchSpace::new("lr", Arc::new(NoopFamily))
            .add_values("solver", ["lbfgs"])
            .with_rules(ParameterRules::new(["solver"], |params| {
                params.set("penalty", "l2")
            }));
        assert_eq!(
            space.validate().unwrap_err(),
            ConfigError::UnknownRuleKey {
                id: "lr".into(),
                key: "penalty".into()
            }
        );
    }

    #[test]
    fn non_idempotent_rule_rejected() {
        let space = SearchSpace::new("toggle", Arc::new(NoopFamily))
            .add_values("flag", [true, false])
            .with_rules(ParameterRules::new(["flag"], |params| {
                let flag = params.get("flag")?.as_bool().unwrap_or(false);
                params.set("flag", !flag)
            }));
        assert_eq!(
            space.validate().unwrap_err(),
            ConfigError::RuleNotIdempotent { id: "toggle".into() }
        );
    }

    #[test]
    fn failing_rule_reported_as_rule_failure() {
        let space = SearchSpace::new("fails", Arc::new(NoopFamily))
            .add_values("x", [1i64])
            .with_rules(ParameterRules::new(["x"], |_| {
                Err(ParameterError::Rule("always fails".into()))
            }));
        assert!(matches!(space.validate(), Err(ConfigError::RuleFailed { .. })));
    }
}
