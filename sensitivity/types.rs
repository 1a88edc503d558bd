// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One measured (or imputed) observation. `response` is percent inhibition:
/// 0 means no effect, 100 complete inhibition. Noise may push it outside that range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoseResponsePoint {
    pub dose: f64,
    pub response: f64,
}

/// The dose-response relationship of a single drug, all partner doses held fixed.
///
/// Construction enforces the curve invariants: at most one point per distinct dose
/// (duplicates are averaged) and ascending dose order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DoseResponseCurve {
    points: Vec<DoseResponsePoint>,
}

impl DoseResponseCurve {
    /// Builds a curve from raw observations, averaging the response of duplicate doses.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = DoseResponsePoint>,
    {
        let mut raw: Vec<DoseResponsePoint> = points.into_iter().collect();
        raw.sort_by(|a, b| a.dose.total_cmp(&b.dose));

        let mut merged: Vec<DoseResponsePoint> = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            let dose = raw[i].dose;
            let mut sum = 0.0;
            let mut count = 0usize;
            while i < raw.len() && raw[i].dose.total_cmp(&dose) == Ordering::Equal {
                sum += raw[i].response;
                count += 1;
                i += 1;
            }
            merged.push(DoseResponsePoint {
                dose,
                response: sum / count as f64,
            });
        }

        Self { points: merged }
    }

    /// Convenience constructor from parallel dose/response slices.
    pub fn from_pairs(doses: &[f64], responses: &[f64]) -> Self {
        Self::from_points(
            doses
                .iter()
                .zip(responses)
                .map(|(&dose, &response)| DoseResponsePoint { dose, response }),
        )
    }

    pub fn points(&self) -> &[DoseResponsePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn doses(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.dose).collect()
    }

    pub fn responses(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.response).collect()
    }

    /// The curve restricted to strictly positive doses (the zero-dose anchor removed).
    pub fn without_zero_dose(&self) -> Self {
        Self {
            points: self.points.iter().copied().filter(|p| p.dose > 0.0).collect(),
        }
    }

    /// Largest tested dose, or `None` for an empty curve.
    pub fn max_dose(&self) -> Option<f64> {
        self.points.last().map(|p| p.dose)
    }

    /// True when every response is numerically identical (zero sample variance).
    pub fn has_constant_response(&self) -> bool {
        match self.points.first() {
            Some(first) => self.points.iter().all(|p| p.response == first.response),
            None => true,
        }
    }

    pub fn mean_response(&self) -> f64 {
        if self.points.is_empty() {
            return f64::NAN;
        }
        self.points.iter().map(|p| p.response).sum::<f64>() / self.points.len() as f64
    }

    /// Replaces the response at the highest dose. Used by the zero-variance perturbation.
    pub(crate) fn with_last_response(&self, response: f64) -> Self {
        let mut points = self.points.clone();
        if let Some(last) = points.last_mut() {
            last.response = response;
        }
        Self { points }
    }
}

// ========================================================================================
//                                 Fitted Curve Models
// ========================================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelFamilyError {
    #[error(
        "Unsupported dose-response model family '{0}'. Only 'LL4' (log-logistic on dose) and 'L4' (logistic on log10 dose) are recognized."
    )]
    UnsupportedModelFamily(String),
}

/// The two parameterizations of the four-parameter dose-response model.
///
/// `LL4` acts on the raw dose and is always tried first. `L4` acts on `log10(dose)` and
/// is only used when the `LL4` optimization fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelFamily {
    LL4,
    L4,
}

impl ModelFamily {
    pub fn tag(self) -> &'static str {
        match self {
            ModelFamily::LL4 => "LL4",
            ModelFamily::L4 => "L4",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelFamily {
    type Err = ModelFamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LL4" | "LL.4" => Ok(ModelFamily::LL4),
            "L4" | "L.4" => Ok(ModelFamily::L4),
            other => Err(ModelFamilyError::UnsupportedModelFamily(other.to_string())),
        }
    }
}

impl TryFrom<String> for ModelFamily {
    type Error = ModelFamilyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelFamily> for String {
    fn from(family: ModelFamily) -> Self {
        family.tag().to_string()
    }
}

/// An immutable fit of `f(x) = c + (d - c) / (1 + exp(b * (t(x) - t(e))))`.
///
/// For `LL4` the predictor is the natural log of the dose and `e` is a dose.
/// For `L4` the predictor is `log10(dose)` and `e` lives on that log10 scale too.
/// `c` and `d` are expressed on the percent-inhibition scale of the input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub family: ModelFamily,
    /// Slope.
    pub b: f64,
    /// Lower asymptote.
    pub c: f64,
    /// Upper asymptote.
    pub d: f64,
    /// Inflection (EC50-like) parameter.
    pub e: f64,
}

impl FittedModel {
    /// Evaluates the fitted curve at a raw (untransformed) dose.
    pub fn evaluate(&self, dose: f64) -> f64 {
        let s = match self.family {
            ModelFamily::LL4 => {
                if dose <= 0.0 {
                    zero_dose_limit(self.b)
                } else {
                    decay(self.b * (dose.ln() - self.e.ln()))
                }
            }
            ModelFamily::L4 => {
                if dose <= 0.0 {
                    zero_dose_limit(self.b)
                } else {
                    decay(self.b * (dose.log10() - self.e))
                }
            }
        };
        self.c + (self.d - self.c) * s
    }
}

/// `1 / (1 + exp(u))`, evaluated without overflow for large `|u|`.
#[inline]
pub(crate) fn decay(u: f64) -> f64 {
    if u >= 0.0 {
        let t = (-u).exp();
        t / (1.0 + t)
    } else {
        1.0 / (1.0 + u.exp())
    }
}

/// Limit of `decay(b * (t(x) - t(e)))` as the dose goes to zero.
#[inline]
pub(crate) fn zero_dose_limit(b: f64) -> f64 {
    match b.partial_cmp(&0.0) {
        Some(Ordering::Greater) => 1.0,
        Some(Ordering::Less) => 0.0,
        _ => 0.5,
    }
}

// ========================================================================================
//                               Typed Output Identifiers
// ========================================================================================

/// A directed drug pair inside a block: `varied` is scanned along its doses while
/// `fixed` is held at its IC50. Indices are 0-based drug positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrugPair {
    pub varied: usize,
    pub fixed: usize,
}

/// Identifies one scalar output of the sensitivity pipeline.
///
/// Statistics are matched across bootstrap iterations by this identifier. The
/// `Display` impl yields the column name used in the output tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScoreField {
    Ic50(usize),
    Ri(usize),
    Css(DrugPair),
    CssOverall,
}

impl ScoreField {
    /// The canonical column order for a block with `num_drugs` drugs.
    pub fn layout(num_drugs: usize) -> Vec<ScoreField> {
        let mut fields = Vec::with_capacity(2 * num_drugs + num_drugs * num_drugs + 1);
        fields.extend((0..num_drugs).map(ScoreField::Ic50));
        fields.extend((0..num_drugs).map(ScoreField::Ri));
        fields.extend(directed_pairs(num_drugs).into_iter().map(ScoreField::Css));
        fields.push(ScoreField::CssOverall);
        fields
    }
}

impl fmt::Display for ScoreField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreField::Ic50(i) => write!(f, "ic50_{}", i + 1),
            ScoreField::Ri(i) => write!(f, "ri_{}", i + 1),
            ScoreField::Css(pair) => write!(f, "css{}_ic50{}", pair.varied + 1, pair.fixed + 1),
            ScoreField::CssOverall => f.write_str("css"),
        }
    }
}

/// All `2 * C(n, 2)` directed pairs, each unordered pair emitted in both directions.
pub fn directed_pairs(num_drugs: usize) -> Vec<DrugPair> {
    let mut pairs = Vec::with_capacity(num_drugs * num_drugs.saturating_sub(1));
    for a in 0..num_drugs {
        for b in (a + 1)..num_drugs {
            pairs.push(DrugPair { varied: a, fixed: b });
            pairs.push(DrugPair { varied: b, fixed: a });
        }
    }
    pairs
}

// ========================================================================================
//                                  Pipeline Results
// ========================================================================================

/// Per-block sensitivity scores.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityResult {
    /// Relative IC50 of each drug, capped at its maximum tested dose.
    pub ic50: Vec<f64>,
    /// Relative inhibition of each drug.
    pub ri: Vec<f64>,
    /// CSS of each directed pair, in `directed_pairs` order.
    pub css_pairs: Vec<(DrugPair, f64)>,
    /// Arithmetic mean of all `css_pairs` values.
    pub css: f64,
}

impl SensitivityResult {
    pub fn num_drugs(&self) -> usize {
        self.ic50.len()
    }

    /// Flattens the result into `(field, value)` entries in `ScoreField::layout` order.
    pub fn fields(&self) -> Vec<(ScoreField, f64)> {
        let mut out = Vec::with_capacity(2 * self.ic50.len() + self.css_pairs.len() + 1);
        out.extend(self.ic50.iter().enumerate().map(|(i, &v)| (ScoreField::Ic50(i), v)));
        out.extend(self.ri.iter().enumerate().map(|(i, &v)| (ScoreField::Ri(i), v)));
        out.extend(self.css_pairs.iter().map(|&(pair, v)| (ScoreField::Css(pair), v)));
        out.push((ScoreField::CssOverall, self.css));
        out
    }

    pub fn value(&self, field: ScoreField) -> Option<f64> {
        match field {
            ScoreField::Ic50(i) => self.ic50.get(i).copied(),
            ScoreField::Ri(i) => self.ri.get(i).copied(),
            ScoreField::Css(pair) => self
                .css_pairs
                .iter()
                .find(|(p, _)| *p == pair)
                .map(|&(_, v)| v),
            ScoreField::CssOverall => Some(self.css),
        }
    }
}

/// Values below this floor are reported as `< 1e-10` instead of a number.
pub const P_VALUE_DISPLAY_FLOOR: f64 = 1e-10;

/// An approximate two-sided p-value. See `bootstrap::approximate_p_value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PValue(pub f64);

impl fmt::Display for PValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_nan() {
            f.write_str("NA")
        } else if self.0 < P_VALUE_DISPLAY_FLOOR {
            write!(f, "< {P_VALUE_DISPLAY_FLOOR:e}")
        } else {
            write!(f, "{:.2e}", self.0)
        }
    }
}

/// Bootstrap summary of one scalar output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldStatistics {
    pub mean: f64,
    pub sd: f64,
    pub sem: f64,
    pub ci_left: f64,
    pub ci_right: f64,
    pub p_value: PValue,
}

/// Bootstrap summaries for every scalar output of one replicated block.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityStatistics {
    pub iterations: usize,
    pub fields: Vec<(ScoreField, FieldStatistics)>,
}

impl SensitivityStatistics {
    pub fn get(&self, field: ScoreField) -> Option<&FieldStatistics> {
        self.fields.iter().find(|(f, _)| *f == field).map(|(_, s)| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_construction_averages_duplicates_and_sorts() {
        let curve = DoseResponseCurve::from_pairs(&[10.0, 0.0, 10.0, 1.0], &[40.0, 1.0, 60.0, 20.0]);
        assert_eq!(curve.doses(), vec![0.0, 1.0, 10.0]);
        assert_eq!(curve.responses(), vec![1.0, 20.0, 50.0]);
        assert_eq!(curve.max_dose(), Some(10.0));
        assert_eq!(curve.without_zero_dose().len(), 2);
    }

    #[test]
    fn constant_response_detection() {
        let flat = DoseResponseCurve::from_pairs(&[1.0, 2.0, 4.0], &[10.0, 10.0, 10.0]);
        assert!(flat.has_constant_response());
        let sloped = DoseResponseCurve::from_pairs(&[1.0, 2.0], &[10.0, 10.5]);
        assert!(!sloped.has_constant_response());
    }

    #[test]
    fn model_family_parsing_rejects_unknown_tags() {
        assert_eq!("LL4".parse::<ModelFamily>().unwrap(), ModelFamily::LL4);
        assert_eq!("L.4".parse::<ModelFamily>().unwrap(), ModelFamily::L4);
        match "W1.4".parse::<ModelFamily>() {
            Err(ModelFamilyError::UnsupportedModelFamily(tag)) => assert_eq!(tag, "W1.4"),
            other => panic!("Expected UnsupportedModelFamily, got {:?}", other),
        }
    }

    #[test]
    fn fitted_model_evaluates_asymptotes_and_midpoint() {
        let model = FittedModel {
            family: ModelFamily::LL4,
            b: -1.5,
            c: 0.0,
            d: 100.0,
            e: 2.0,
        };
        assert!((model.evaluate(2.0) - 50.0).abs() < 1e-12);
        assert_eq!(model.evaluate(0.0), 0.0);
        assert!(model.evaluate(1e9) > 99.9);

        let log_model = FittedModel {
            family: ModelFamily::L4,
            e: 2.0_f64.log10(),
            ..model
        };
        assert!((log_model.evaluate(2.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn score_field_layout_and_names() {
        let layout = ScoreField::layout(3);
        assert_eq!(layout.len(), 3 + 3 + 6 + 1);
        let names: Vec<String> = layout.iter().map(|f| f.to_string()).collect();
        assert_eq!(names[0], "ic50_1");
        assert_eq!(names[3], "ri_1");
        assert_eq!(names[6], "css1_ic502");
        assert_eq!(names[7], "css2_ic501");
        assert_eq!(names.last().unwrap(), "css");
    }

    #[test]
    fn p_value_display_uses_floor() {
        assert_eq!(PValue(1e-12).to_string(), "< 1e-10");
        assert_eq!(PValue(0.0).to_string(), "< 1e-10");
        assert_eq!(PValue(0.0123).to_string(), "1.23e-2");
        assert_eq!(PValue(f64::NAN).to_string(), "NA");
    }
}
