//! The `check_P` limit chain for writable numeric parameters (spec §4.3),
//! grounded in frappy's `Parameter` sibling-limit convention
//! (`<name>_min`/`<name>_max`, see `frappy/params.py` and `HasLimits`-style
//! mixins referenced from `frappy/modulebase.py`).

use crate::errors::{Result, SecopError};
use crate::types::{DataType, Value};

/// Holds the current `min`/`max` bound values plus the datatype they are
/// validated against; `<name>_min`/`<name>_max` parameters mutate this
/// through `set_min`/`set_max`, and `check` is consulted by `Parameter::check`
/// on every write to the bounded parameter.
#[derive(Debug, Clone)]
pub struct LimitChain {
    pub datatype: DataType,
    pub min: f64,
    pub max: f64,
}

impl LimitChain {
    pub fn new(datatype: DataType, min: f64, max: f64) -> Self {
        LimitChain { datatype, min, max }
    }

    pub fn check(&self, value: &Value) -> Result<()> {
        let v = value
            .as_f64()
            .ok_or_else(|| SecopError::WrongType("limit chain needs a numeric value".into()))?;
        if v < self.min || v > self.max {
            return Err(SecopError::RangeError(format!(
                "{v} is outside the configured limits [{}, {}]",
                self.min, self.max
            )));
        }
        Ok(())
    }

    pub fn set_min(&mut self, min: f64) -> Result<()> {
        if min > self.max {
            return Err(SecopError::BadValue("min must not exceed max".into()));
        }
        self.min = min;
        Ok(())
    }

    pub fn set_max(&mut self, max: f64) -> Result<()> {
        if max < self.min {
            return Err(SecopError::BadValue("max must not be below min".into()));
        }
        self.max = max;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_value_outside_bounds() {
        let chain = LimitChain::new(DataType::float(-1000.0, 1000.0), -10.0, 10.0);
        assert!(chain.check(&Value::Float(20.0)).is_err());
        assert!(chain.check(&Value::Float(-20.0)).is_err());
        assert!(chain.check(&Value::Float(0.0)).is_ok());
    }

    #[test]
    fn set_min_above_max_is_rejected() {
        let mut chain = LimitChain::new(DataType::float(-1000.0, 1000.0), -10.0, 10.0);
        assert!(chain.set_min(20.0).is_err());
        assert_eq!(chain.min, -10.0);
    }
}
