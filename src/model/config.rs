use super::{parse_popsize_tokens, Model, DEFAULT_DELTA};
use crate::error::{ArgError, Result};

/// Population sizes as they appear in a model configuration. Sizes can be given as a single
/// number, as a list with one entry per time point, or as the comma-separated token string
/// used on command lines.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum PopSizes {
    Constant(f64),
    PerEpoch(Vec<f64>),
    Tokens(String),
}

impl Default for PopSizes {
    fn default() -> Self {
        PopSizes::Constant(1e4)
    }
}

/// Declarative description of a [`Model`]. Drivers deserialize this from their configuration
/// source and call [`ModelConfig::build`], which performs all validation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// number of time points
    pub ntimes: usize,

    /// oldest time point (generations)
    pub maxtime: f64,

    /// spacing constant of the log grid
    pub delta: f64,

    /// explicit time points, overriding `ntimes`, `maxtime` and `delta`
    pub times: Option<Vec<f64>>,

    pub popsize: PopSizes,
    pub rho: f64,
    pub mu: f64,
    pub infsites_penalty: f64,
    pub unphased: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            ntimes: 20,
            maxtime: 200_000.0,
            delta: DEFAULT_DELTA,
            times: None,
            popsize: PopSizes::default(),
            rho: 1.5e-8,
            mu: 2.5e-8,
            infsites_penalty: 1.0,
            unphased: false,
        }
    }
}

impl ModelConfig {
    /// Validate the configuration and construct the model.
    ///
    /// # Errors
    /// Returns a configuration error if the time grid is invalid, if the number of population
    /// sizes matches neither one nor the number of time points, or if a rate is negative.
    pub fn build(&self) -> Result<Model> {
        if self.rho < 0.0 || self.mu < 0.0 {
            return Err(ArgError::config(format!(
                "rates must not be negative (rho = {}, mu = {})",
                self.rho, self.mu
            )));
        }

        let ntimes = self.times.as_ref().map_or(self.ntimes, Vec::len);
        let popsizes = match &self.popsize {
            PopSizes::Constant(size) => vec![*size; ntimes],
            PopSizes::PerEpoch(sizes) => sizes.clone(),
            PopSizes::Tokens(tokens) => {
                let tokens = parse_popsize_tokens(tokens)?;
                if tokens.len() == 1 {
                    vec![tokens[0]; ntimes]
                } else {
                    tokens
                }
            }
        };

        let mut model = match &self.times {
            Some(times) => Model::with_times(times.clone(), popsizes, self.rho, self.mu)?,
            None => Model::with_spaced_times(
                self.ntimes,
                self.maxtime,
                self.delta,
                &popsizes,
                self.rho,
                self.mu,
            )?,
        };
        model.infsites_penalty = self.infsites_penalty;
        model.unphased = self.unphased;

        tracing::debug!(
            ntimes = model.ntimes(),
            rho = model.rho,
            mu = model.mu,
            "built model from configuration"
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds() {
        let model = ModelConfig::default().build().unwrap();
        assert_eq!(model.ntimes(), 20);
        assert_eq!(model.popsizes(), &[1e4; 20]);
        assert_eq!(model.infsites_penalty, 1.0);
    }

    #[test]
    fn mismatched_popsizes() {
        let config = ModelConfig {
            ntimes: 4,
            popsize: PopSizes::Tokens("1e4,2e4".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.build(), Err(ArgError::Config { .. })));

        let config = ModelConfig {
            ntimes: 4,
            popsize: PopSizes::PerEpoch(vec![1e4; 5]),
            ..Default::default()
        };
        assert!(config.build().is_err());
    }

    #[test]
    fn explicit_times() {
        let config = ModelConfig {
            times: Some(vec![0.0, 10.0, 100.0]),
            popsize: PopSizes::Tokens("1,2,3".to_string()),
            ..Default::default()
        };
        let model = config.build().unwrap();
        assert_eq!(model.ntimes(), 3);
        assert_eq!(model.popsizes(), &[1.0, 2.0, 3.0]);
    }
}
