//! Route matrix API response types.
//!
//! Only the fields the matcher reads are modelled; everything else in the
//! response is ignored.

use serde::Deserialize;

/// Top-level route matrix response.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteMatrixResponse {
    /// `matrix[i][j]` is the route from origin `i` to destination `j`.
    pub matrix: Vec<Vec<RouteElement>>,
}

/// One origin/destination route.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteElement {
    pub distance: Option<Measure>,
    #[serde(default)]
    pub duration: Option<Measure>,
}

/// A measured value with its display text.
#[derive(Debug, Clone, Deserialize)]
pub struct Measure {
    pub value: f64,
    #[serde(default)]
    pub text: Option<String>,
}
