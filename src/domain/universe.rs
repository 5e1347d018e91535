//! Asset universe, explicit asset-class tags and allocation constraints.
//!
//! Classes come from configuration only. An asset without a tag belongs to no
//! class and is never matched by a constraint.

use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("asset class tag given for unknown asset {0}")]
    UnknownAsset(String),

    #[error("empty asset class for {0}")]
    EmptyClass(String),

    #[error("constraint {name}: expected `<class> >= <bound>` or `<class> <= <bound>`, got `{expr}`")]
    Syntax { name: String, expr: String },

    #[error("constraint {name}: bound {bound} outside [0, 1]")]
    BoundOutOfRange { name: String, bound: f64 },

    #[error("constraint {name}: no asset is tagged {class}")]
    EmptySubset { name: String, class: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetUniverse {
    assets: Vec<String>,
    classes: Vec<Option<String>>,
}

impl AssetUniverse {
    /// Build a universe, attaching `(asset, class)` tags.
    pub fn new(assets: Vec<String>, tags: &[(String, String)]) -> Result<Self, UniverseError> {
        let mut classes = vec![None; assets.len()];
        for (asset, class) in tags {
            let class = class.trim();
            if class.is_empty() {
                return Err(UniverseError::EmptyClass(asset.clone()));
            }
            let index = assets
                .iter()
                .position(|a| a == asset)
                .ok_or_else(|| UniverseError::UnknownAsset(asset.clone()))?;
            classes[index] = Some(class.to_lowercase());
        }
        Ok(Self { assets, classes })
    }

    /// A universe with no class tags.
    pub fn untagged(assets: Vec<String>) -> Self {
        let classes = vec![None; assets.len()];
        Self { assets, classes }
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn class_of(&self, index: usize) -> Option<&str> {
        self.classes.get(index).and_then(|c| c.as_deref())
    }

    /// Indices of assets tagged `class`.
    pub fn members(&self, class: &str) -> Vec<usize> {
        let class = class.to_lowercase();
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_deref() == Some(class.as_str()))
            .map(|(i, _)| i)
            .collect()
    }

    /// Distinct class names, sorted.
    pub fn class_names(&self) -> Vec<String> {
        self.classes
            .iter()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    AtLeast,
    AtMost,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::AtLeast => write!(f, ">="),
            Comparator::AtMost => write!(f, "<="),
        }
    }
}

/// Bound on the summed weight of one asset class.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationConstraint {
    pub name: String,
    pub class: String,
    pub comparator: Comparator,
    pub bound: f64,
}

impl fmt::Display for AllocationConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.class, self.comparator, self.bound)
    }
}

/// Parse `stock >= 0.6` / `bond <= 0.35`.
pub fn parse_constraint(name: &str, expr: &str) -> Result<AllocationConstraint, UniverseError> {
    let syntax = || UniverseError::Syntax {
        name: name.to_string(),
        expr: expr.to_string(),
    };

    let (class, comparator, bound) = if let Some((lhs, rhs)) = expr.split_once(">=") {
        (lhs, Comparator::AtLeast, rhs)
    } else if let Some((lhs, rhs)) = expr.split_once("<=") {
        (lhs, Comparator::AtMost, rhs)
    } else {
        return Err(syntax());
    };

    let class = class.trim();
    if class.is_empty() || class.contains(char::is_whitespace) {
        return Err(syntax());
    }
    let bound: f64 = bound.trim().parse().map_err(|_| syntax())?;
    if !(0.0..=1.0).contains(&bound) {
        return Err(UniverseError::BoundOutOfRange {
            name: name.to_string(),
            bound,
        });
    }

    Ok(AllocationConstraint {
        name: name.to_string(),
        class: class.to_lowercase(),
        comparator,
        bound,
    })
}

/// Constraint row in the optimizer's canonical form `a·w >= b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub coefficients: Vec<f64>,
    pub bound: f64,
}

impl LinearConstraint {
    pub fn value(&self, w: &[f64]) -> f64 {
        self.coefficients.iter().zip(w).map(|(a, x)| a * x).sum()
    }

    /// Amount by which `w` falls short of the constraint (0 when satisfied).
    pub fn violation(&self, w: &[f64]) -> f64 {
        (self.bound - self.value(w)).max(0.0)
    }
}

/// Translate class constraints into `a·w >= b` rows over the universe.
pub fn resolve_constraints(
    universe: &AssetUniverse,
    constraints: &[AllocationConstraint],
) -> Result<Vec<LinearConstraint>, UniverseError> {
    constraints
        .iter()
        .map(|c| {
            let members = universe.members(&c.class);
            if members.is_empty() {
                return Err(UniverseError::EmptySubset {
                    name: c.name.clone(),
                    class: c.class.clone(),
                });
            }
            let sign = match c.comparator {
                Comparator::AtLeast => 1.0,
                Comparator::AtMost => -1.0,
            };
            let mut coefficients = vec![0.0; universe.len()];
            for i in members {
                coefficients[i] = sign;
            }
            Ok(LinearConstraint {
                coefficients,
                bound: sign * c.bound,
            })
        })
        .collect()
}
