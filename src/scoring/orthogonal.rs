// =============================================================================
// Gram–Schmidt residualizer with a protected leading factor
// =============================================================================
//
// Sequential orthogonalization over an ordered factor tuple. The first
// factor is PROTECTED: it is copied into the output bit-for-bit, never
// projected or scaled. Every subsequent factor has its projection onto all
// previously residualized factors removed:
//
//   r_0 = f_0                       (protected copy)
//   r_k = f_k - Σ_{j<k} (⟨f_k, r_j⟩ / ⟨r_j, r_j⟩) r_j
//
// A basis vector with near-zero norm contributes no projection, so a zero
// factor leaves later factors unchanged rather than producing NaNs.
// =============================================================================

use crate::errors::{ScanError, ScanResult};

/// Norm-squared below this is treated as the zero vector.
const ZERO_NORM_EPS: f64 = 1e-12;

/// One named factor vector in the ordered tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorVector {
    pub name: String,
    /// Only the first factor in the tuple may be protected, and it must be.
    pub protected: bool,
    pub values: Vec<f64>,
}

impl FactorVector {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            protected: false,
            values,
        }
    }

    pub fn protected(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            protected: true,
            values,
        }
    }

    pub fn norm(&self) -> f64 {
        dot(&self.values, &self.values).sqrt()
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Residualize the ordered tuple. The first factor must carry the protected
/// marker (the scorer constructs the tuple, so a missing marker is a
/// programming error on the caller's side and surfaces as `InvalidInput`).
pub fn residualize(factors: &[FactorVector]) -> ScanResult<Vec<FactorVector>> {
    let first = factors
        .first()
        .ok_or_else(|| ScanError::InvalidInput("empty factor tuple".into()))?;
    if !first.protected {
        return Err(ScanError::InvalidInput(format!(
            "first factor '{}' is not marked protected",
            first.name
        )));
    }

    let dim = first.values.len();
    if dim == 0 {
        return Err(ScanError::InvalidInput("zero-length factor vectors".into()));
    }
    for f in factors {
        if f.values.len() != dim {
            return Err(ScanError::InvalidInput(format!(
                "factor '{}' has {} values, expected {dim}",
                f.name,
                f.values.len()
            )));
        }
        if f.values.iter().any(|v| !v.is_finite()) {
            return Err(ScanError::InvalidInput(format!(
                "factor '{}' contains non-finite values",
                f.name
            )));
        }
        if f.protected && f.name != first.name {
            return Err(ScanError::InvalidInput(format!(
                "only the leading factor may be protected, found marker on '{}'",
                f.name
            )));
        }
    }

    let mut residuals: Vec<FactorVector> = Vec::with_capacity(factors.len());

    // Protected copy, untouched.
    residuals.push(first.clone());

    for f in &factors[1..] {
        let mut r = f.values.clone();
        for basis in &residuals {
            let denom = dot(&basis.values, &basis.values);
            if denom < ZERO_NORM_EPS {
                continue;
            }
            let coeff = dot(&f.values, &basis.values) / denom;
            for (ri, bi) in r.iter_mut().zip(&basis.values) {
                *ri -= coeff * bi;
            }
        }
        residuals.push(FactorVector {
            name: f.name.clone(),
            protected: false,
            values: r,
        });
    }

    Ok(residuals)
}
