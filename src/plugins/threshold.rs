//! Coverage validator with a fixed minimum percentage.

use std::path::Path;

use testrig_core::CodeCoverageValidator;

pub const NAME: &str = "minimum";

/// Accepts any total coverage at or above a fixed minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimumCoverageValidator {
    minimum: f64,
}

impl MinimumCoverageValidator {
    pub fn new(minimum: f64) -> Self {
        Self { minimum }
    }

    pub fn minimum(&self) -> f64 {
        self.minimum
    }
}

impl CodeCoverageValidator for MinimumCoverageValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn validate(&self, item: &Path, total_percentage: f64) -> (i32, Option<f64>) {
        if total_percentage >= self.minimum {
            (0, Some(self.minimum))
        } else {
            tracing::debug!(
                item = %item.display(),
                total_percentage,
                minimum = self.minimum,
                "coverage below minimum"
            );
            (-1, Some(self.minimum))
        }
    }
}
