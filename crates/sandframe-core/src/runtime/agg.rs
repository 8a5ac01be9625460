//! Reductions shared by tables, series and groupings.

use crate::dataset::{CellValue, ColumnType};
use crate::script::{ScriptError, ScriptResult};

use super::frame::cells_equal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agg {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    Size,
    Std,
    Var,
    Nunique,
    First,
    Last,
    Prod,
}

impl Agg {
    pub fn from_name(name: &str) -> Option<Agg> {
        Some(match name {
            "sum" => Agg::Sum,
            "mean" | "average" => Agg::Mean,
            "median" => Agg::Median,
            "min" => Agg::Min,
            "max" => Agg::Max,
            "count" => Agg::Count,
            "size" => Agg::Size,
            "std" => Agg::Std,
            "var" => Agg::Var,
            "nunique" => Agg::Nunique,
            "first" => Agg::First,
            "last" => Agg::Last,
            "prod" | "product" => Agg::Prod,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Agg::Sum => "sum",
            Agg::Mean => "mean",
            Agg::Median => "median",
            Agg::Min => "min",
            Agg::Max => "max",
            Agg::Count => "count",
            Agg::Size => "size",
            Agg::Std => "std",
            Agg::Var => "var",
            Agg::Nunique => "nunique",
            Agg::First => "first",
            Agg::Last => "last",
            Agg::Prod => "prod",
        }
    }

    /// Whether the reduction only makes sense for numbers.
    pub fn numeric_only(self) -> bool {
        matches!(
            self,
            Agg::Sum | Agg::Mean | Agg::Median | Agg::Std | Agg::Var | Agg::Prod
        )
    }

    /// Whether a column of `dtype` takes part in a whole-table reduction.
    pub fn applies_to(self, dtype: ColumnType) -> bool {
        !self.numeric_only() || matches!(dtype, ColumnType::Numeric | ColumnType::Boolean)
    }

    /// Reduce a slice of cells. Nulls are skipped except by `Size`.
    pub fn apply(self, values: &[CellValue]) -> ScriptResult<CellValue> {
        let present = || values.iter().filter(|v| !v.is_null());
        match self {
            Agg::Size => Ok(CellValue::Int(values.len() as i64)),
            Agg::Count => Ok(CellValue::Int(present().count() as i64)),
            Agg::Nunique => {
                let mut seen: Vec<&CellValue> = Vec::new();
                for v in present() {
                    if !seen.iter().any(|s| cells_equal(s, v)) {
                        seen.push(v);
                    }
                }
                Ok(CellValue::Int(seen.len() as i64))
            }
            Agg::First => Ok(present().next().cloned().unwrap_or(CellValue::Null)),
            Agg::Last => Ok(present().last().cloned().unwrap_or(CellValue::Null)),
            Agg::Min => Ok(present()
                .min_by(|a, b| a.total_cmp(b))
                .cloned()
                .unwrap_or(CellValue::Null)),
            Agg::Max => Ok(present()
                .max_by(|a, b| a.total_cmp(b))
                .cloned()
                .unwrap_or(CellValue::Null)),
            Agg::Sum | Agg::Prod => {
                let identity = if self == Agg::Sum { 0 } else { 1 };
                let mut int_acc: Option<i64> = Some(identity);
                let mut float_acc = identity as f64;
                for v in present() {
                    let x = numeric(v, self)?;
                    int_acc = match (int_acc, v) {
                        (Some(acc), CellValue::Int(i)) => {
                            if self == Agg::Sum { acc.checked_add(*i) } else { acc.checked_mul(*i) }
                        }
                        (Some(acc), CellValue::Bool(b)) => {
                            let i = i64::from(*b);
                            if self == Agg::Sum { acc.checked_add(i) } else { acc.checked_mul(i) }
                        }
                        _ => None,
                    };
                    if self == Agg::Sum {
                        float_acc += x;
                    } else {
                        float_acc *= x;
                    }
                }
                Ok(match int_acc {
                    Some(i) => CellValue::Int(i),
                    None => CellValue::Float(float_acc),
                })
            }
            Agg::Mean => {
                let xs = numbers(values, self)?;
                Ok(mean(&xs).map_or(CellValue::Null, CellValue::Float))
            }
            Agg::Median => {
                let xs = numbers(values, self)?;
                Ok(quantile(&xs, 0.5).map_or(CellValue::Null, CellValue::Float))
            }
            Agg::Var => {
                let xs = numbers(values, self)?;
                Ok(variance(&xs).map_or(CellValue::Null, CellValue::Float))
            }
            Agg::Std => {
                let xs = numbers(values, self)?;
                Ok(variance(&xs).map_or(CellValue::Null, |v| CellValue::Float(v.sqrt())))
            }
        }
    }
}

fn numeric(value: &CellValue, agg: Agg) -> ScriptResult<f64> {
    value.as_f64().ok_or_else(|| {
        ScriptError::type_error(format!(
            "cannot compute {} of non-numeric value '{}'",
            agg.name(),
            value
        ))
    })
}

fn numbers(values: &[CellValue], agg: Agg) -> ScriptResult<Vec<f64>> {
    values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| numeric(v, agg))
        .collect()
}

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Sample variance (one delta degree of freedom).
pub fn variance(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs)?;
    Some(xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64)
}

/// Linear-interpolated quantile, `q` in `[0, 1]`.
pub fn quantile(xs: &[f64], q: f64) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Pearson correlation over pairwise-complete observations.
pub fn pearson(a: &[CellValue], b: &[CellValue]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some((x.as_f64()?, y.as_f64()?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    if denom == 0.0 { None } else { Some(sxy / denom) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(xs: &[i64]) -> Vec<CellValue> {
        xs.iter().map(|&i| CellValue::Int(i)).collect()
    }

    #[test]
    fn test_sum_keeps_integers() {
        assert_eq!(Agg::Sum.apply(&ints(&[1, 2, 3])).unwrap(), CellValue::Int(6));
        let mixed = vec![CellValue::Int(1), CellValue::Float(0.5), CellValue::Null];
        assert_eq!(Agg::Sum.apply(&mixed).unwrap(), CellValue::Float(1.5));
        assert_eq!(Agg::Sum.apply(&[]).unwrap(), CellValue::Int(0));
    }

    #[test]
    fn test_mean_median_std() {
        let values = ints(&[1, 2, 3, 4]);
        assert_eq!(Agg::Mean.apply(&values).unwrap(), CellValue::Float(2.5));
        assert_eq!(Agg::Median.apply(&values).unwrap(), CellValue::Float(2.5));
        match Agg::Std.apply(&values).unwrap() {
            CellValue::Float(s) => assert!((s - 1.2909944).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(Agg::Mean.apply(&[CellValue::Null]).unwrap(), CellValue::Null);
    }

    #[test]
    fn test_counts_skip_nulls() {
        let values = vec![
            CellValue::Text("a".into()),
            CellValue::Null,
            CellValue::Text("a".into()),
            CellValue::Text("b".into()),
        ];
        assert_eq!(Agg::Count.apply(&values).unwrap(), CellValue::Int(3));
        assert_eq!(Agg::Size.apply(&values).unwrap(), CellValue::Int(4));
        assert_eq!(Agg::Nunique.apply(&values).unwrap(), CellValue::Int(2));
        assert_eq!(Agg::Max.apply(&values).unwrap(), CellValue::Text("b".into()));
    }

    #[test]
    fn test_numeric_agg_rejects_text() {
        let err = Agg::Mean.apply(&[CellValue::Text("x".into())]).unwrap_err();
        assert!(err.message.contains("mean"));
    }

    #[test]
    fn test_pearson() {
        let a = ints(&[1, 2, 3, 4]);
        let b = ints(&[2, 4, 6, 8]);
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!(pearson(&a, &ints(&[1, 1, 1, 1])).is_none());
    }

    #[test]
    fn test_quantile_interpolates() {
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.25), Some(1.75));
    }
}
