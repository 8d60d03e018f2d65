use serde::{Deserialize, Serialize};

/// Pass/fail outcome stored alongside every mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Pass,
    Fail,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Pass => "Pass",
            ResultStatus::Fail => "Fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pass" => Some(ResultStatus::Pass),
            "Fail" => Some(ResultStatus::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub symbol: String,
    pub min_percent: f64,
    pub max_percent: f64,
}

impl GradeBand {
    pub fn new(symbol: &str, min_percent: f64, max_percent: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            min_percent,
            max_percent,
        }
    }

    fn contains(&self, percent: f64) -> bool {
        percent >= self.min_percent && percent <= self.max_percent
    }

    fn has_width(&self) -> bool {
        self.min_percent < self.max_percent
    }

    /// Bands may only share a point where one ends and the other begins,
    /// and both have width. A point band inside another is an overlap.
    fn overlaps(&self, other: &GradeBand) -> bool {
        let lo = self.min_percent.max(other.min_percent);
        let hi = self.max_percent.min(other.max_percent);
        if lo < hi {
            return true;
        }
        if lo > hi {
            return false;
        }
        let touching = self.max_percent == other.min_percent || other.max_percent == self.min_percent;
        !(touching && self.has_width() && other.has_width())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScaleError {
    #[error("grading scale must have at least one band")]
    Empty,
    #[error("band at index {0} has a blank symbol")]
    BlankSymbol(usize),
    #[error("duplicate grade symbol: {0}")]
    DuplicateSymbol(String),
    #[error("band {symbol} has invalid bounds [{min}, {max}]")]
    InvalidBounds { symbol: String, min: f64, max: f64 },
    #[error("bands {first} and {second} overlap")]
    Overlap { first: String, second: String },
    #[error("fallback symbol {0} is not one of the configured bands")]
    UnknownFallback(String),
}

/// Ordered percentage bands plus the symbol used when no band matches.
///
/// Bands are scanned in the order given, so a boundary point shared by two
/// touching bands belongs to whichever is listed first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScale {
    bands: Vec<GradeBand>,
    fallback_symbol: String,
}

/// Unvalidated wire/settings shape of a scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScaleConfig {
    pub bands: Vec<GradeBand>,
    #[serde(default)]
    pub fallback_symbol: Option<String>,
}

impl GradingScale {
    pub fn new(bands: Vec<GradeBand>, fallback: Option<&str>) -> Result<Self, ScaleError> {
        if bands.is_empty() {
            return Err(ScaleError::Empty);
        }

        let mut cleaned: Vec<GradeBand> = Vec::with_capacity(bands.len());
        for (i, band) in bands.into_iter().enumerate() {
            let symbol = band.symbol.trim().to_string();
            if symbol.is_empty() {
                return Err(ScaleError::BlankSymbol(i));
            }
            if cleaned.iter().any(|b| b.symbol == symbol) {
                return Err(ScaleError::DuplicateSymbol(symbol));
            }
            let (min, max) = (band.min_percent, band.max_percent);
            if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
                return Err(ScaleError::InvalidBounds { symbol, min, max });
            }
            let candidate = GradeBand {
                symbol: symbol.clone(),
                min_percent: min,
                max_percent: max,
            };
            if let Some(other) = cleaned.iter().find(|b| b.overlaps(&candidate)) {
                return Err(ScaleError::Overlap {
                    first: other.symbol.clone(),
                    second: symbol,
                });
            }
            cleaned.push(candidate);
        }

        let fallback_symbol = lowest_band(&cleaned).symbol.clone();
        let mut scale = Self {
            bands: cleaned,
            fallback_symbol,
        };
        if let Some(f) = fallback.map(str::trim).filter(|s| !s.is_empty()) {
            if !scale.contains_symbol(f) {
                return Err(ScaleError::UnknownFallback(f.to_string()));
            }
            scale.fallback_symbol = f.to_string();
        }
        Ok(scale)
    }

    pub fn from_config(cfg: GradingScaleConfig) -> Result<Self, ScaleError> {
        Self::new(cfg.bands, cfg.fallback_symbol.as_deref())
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    pub fn fallback_symbol(&self) -> &str {
        &self.fallback_symbol
    }

    pub fn contains_symbol(&self, symbol: &str) -> bool {
        self.bands.iter().any(|b| b.symbol == symbol)
    }
}

impl From<&GradingScale> for GradingScaleConfig {
    fn from(scale: &GradingScale) -> Self {
        Self {
            bands: scale.bands.clone(),
            fallback_symbol: Some(scale.fallback_symbol.clone()),
        }
    }
}

impl Default for GradingScale {
    fn default() -> Self {
        Self {
            bands: vec![
                GradeBand::new("A", 90.0, 100.0),
                GradeBand::new("B", 75.0, 90.0),
                GradeBand::new("C", 60.0, 75.0),
                GradeBand::new("F", 0.0, 60.0),
            ],
            fallback_symbol: "F".to_string(),
        }
    }
}

fn lowest_band(bands: &[GradeBand]) -> &GradeBand {
    let mut lowest = &bands[0];
    for b in &bands[1..] {
        if b.min_percent < lowest.min_percent {
            lowest = b;
        }
    }
    lowest
}

/// Course-owned limits the evaluator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseThresholds {
    pub max_marks: i64,
    pub pass_marks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub grade: String,
    pub status: ResultStatus,
    pub percent: f64,
}

pub fn percent_of(score_obtained: f64, max_marks: f64) -> f64 {
    score_obtained / max_marks * 100.0
}

/// Symbol of the first band containing the score's percentage, or the
/// scale's fallback. `max_marks` must be positive.
pub fn calculate_grade(scale: &GradingScale, score_obtained: f64, max_marks: f64) -> &str {
    let percent = percent_of(score_obtained, max_marks);
    scale
        .bands
        .iter()
        .find(|b| b.contains(percent))
        .map(|b| b.symbol.as_str())
        .unwrap_or(scale.fallback_symbol.as_str())
}

pub fn calculate_status(score_obtained: f64, pass_marks: f64) -> ResultStatus {
    if score_obtained >= pass_marks {
        ResultStatus::Pass
    } else {
        ResultStatus::Fail
    }
}

pub fn evaluate(
    scale: &GradingScale,
    score_obtained: f64,
    thresholds: CourseThresholds,
) -> Evaluation {
    let max_marks = thresholds.max_marks as f64;
    Evaluation {
        grade: calculate_grade(scale, score_obtained, max_marks).to_string(),
        status: calculate_status(score_obtained, thresholds.pass_marks as f64),
        percent: percent_of(score_obtained, max_marks),
    }
}
