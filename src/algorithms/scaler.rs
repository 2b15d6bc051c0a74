use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Fitted numeric scaler exported alongside the model, one entry per
/// numerical column in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    /// `(x - mean) / scale`
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// `x * scale + min`
    MinMax { min: Vec<f64>, scale: Vec<f64> },
}

impl Scaler {
    pub fn width(&self) -> usize {
        match self {
            Scaler::Standard { mean, .. } => mean.len(),
            Scaler::MinMax { min, .. } => min.len(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (offsets, scale) = match self {
            Scaler::Standard { mean, scale } => (mean, scale),
            Scaler::MinMax { min, scale } => (min, scale),
        };

        if offsets.len() != scale.len() {
            return Err(anyhow!(
                "Scaler parameter lengths differ: {} offsets, {} scales",
                offsets.len(),
                scale.len()
            ));
        }

        if offsets.iter().chain(scale.iter()).any(|v| !v.is_finite()) {
            return Err(anyhow!("Scaler parameters contain NaN or Infinity"));
        }

        Ok(())
    }

    /// Scales `values` in place. Callers guarantee `values.len() == self.width()`.
    pub fn transform(&self, values: &mut [f64]) {
        match self {
            Scaler::Standard { mean, scale } => {
                for ((v, m), s) in values.iter_mut().zip(mean).zip(scale) {
                    let s = if *s == 0.0 { 1.0 } else { *s };
                    *v = (*v - m) / s;
                }
            }
            Scaler::MinMax { min, scale } => {
                for ((v, m), s) in values.iter_mut().zip(min).zip(scale) {
                    *v = *v * s + m;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_transform() {
        let scaler = Scaler::Standard {
            mean: vec![10.0, 0.0],
            scale: vec![2.0, 0.0],
        };
        let mut values = vec![14.0, 3.0];
        scaler.transform(&mut values);
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn test_min_max_transform() {
        let scaler = Scaler::MinMax {
            min: vec![-0.5],
            scale: vec![0.25],
        };
        let mut values = vec![4.0];
        scaler.transform(&mut values);
        assert_eq!(values, vec![0.5]);
    }

    #[test]
    fn test_deserialize_tagged() {
        let scaler: Scaler =
            serde_json::from_str(r#"{"kind": "min_max", "min": [0.0, 1.0], "scale": [1.0, 2.0]}"#)
                .unwrap();
        assert_eq!(scaler.width(), 2);
        assert!(scaler.validate().is_ok());

        let broken = Scaler::Standard {
            mean: vec![0.0],
            scale: vec![1.0, 1.0],
        };
        assert!(broken.validate().is_err());
    }
}
