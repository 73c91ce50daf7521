//! Site amplification correction.
//!
//! Combines a Vs30 grid with the Borcherdt (1994) amplification table.
//! Observed peaks are divided by the returned factors before they enter the
//! station magnitude estimator.

use std::fmt;
use std::path::Path;

use tracing::{debug, error};

use crate::errors::VsMagError;
use crate::timeline::ValueType;

/// Reference shear-wave velocity of the Borcherdt table (m/s).
const VREF: f64 = 1050.0;

/// Vs30 above which a site counts as rock (m/s).
const ROCK_VS30: f64 = 464.0;

const GRAVITY: f64 = 9.81;

/// Input ground-motion levels (g) of the table columns.
const TIERS_G: [f64; 4] = [0.1, 0.2, 0.3, 0.4];

/// Exponents for short-period (acceleration) amplification.
const MA: [f64; 4] = [0.35, 0.25, 0.10, -0.05];

/// Exponents for mid-period (velocity, displacement) amplification.
const MV: [f64; 4] = [0.65, 0.60, 0.53, 0.45];

/// Site class used to select attenuation coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoilClass {
    Rock,
    Soil,
}

impl SoilClass {
    #[must_use]
    pub fn from_vs30(vs30: f64) -> Self {
        if vs30 > ROCK_VS30 { Self::Rock } else { Self::Soil }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rock => "rock",
            Self::Soil => "soil",
        }
    }
}

impl fmt::Display for SoilClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column of the table closest to the given peak acceleration.
fn tier(pga_g: f64) -> usize {
    TIERS_G
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (pga_g - **a).abs().total_cmp(&(pga_g - **b).abs()))
        .map_or(0, |(i, _)| i)
}

/// Borcherdt amplification factor `(VREF / vs30)^m`.
#[must_use]
pub fn amplification(vs30: f64, pga_g: f64, value_type: ValueType) -> f64 {
    let t = tier(pga_g);
    let m = match value_type {
        ValueType::Acceleration => MA[t],
        ValueType::Velocity | ValueType::Displacement => MV[t],
    };
    (VREF / vs30).powf(m)
}

/// Regular lon/lat grid of Vs30 values.
#[derive(Debug, Clone)]
pub struct Vs30Grid {
    lons: Vec<f64>,
    lats: Vec<f64>,
    /// Row-major by latitude; NaN marks a node missing from the file
    values: Vec<f64>,
}

/// Index of the node nearest to `x` in sorted `axis`, `None` outside.
fn nearest(axis: &[f64], x: f64) -> Option<usize> {
    let (first, last) = (axis.first()?, axis.last()?);
    if x < *first || x > *last {
        return None;
    }
    let i = axis.partition_point(|v| *v < x);
    if i == 0 {
        return Some(0);
    }
    if i == axis.len() {
        return Some(i - 1);
    }
    if (x - axis[i - 1]) <= (axis[i] - x) {
        Some(i - 1)
    } else {
        Some(i)
    }
}

fn sorted_unique(mut v: Vec<f64>) -> Vec<f64> {
    v.sort_by(f64::total_cmp);
    v.dedup();
    v
}

impl Vs30Grid {
    /// Parse `lon lat vs30` lines. Blank lines and `#` comments are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`VsMagError::Vs30Grid`] on malformed lines or an empty grid.
    pub fn parse(text: &str, origin: &str) -> Result<Self, VsMagError> {
        let bad = |message: String| VsMagError::Vs30Grid {
            path: origin.to_string(),
            message,
        };

        let mut nodes = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<f64> = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<_, _>>()
                .map_err(|e| bad(format!("line {}: {e}", lineno + 1)))?;
            let [lon, lat, vs30] = fields[..] else {
                return Err(bad(format!(
                    "line {}: expected 3 columns, got {}",
                    lineno + 1,
                    fields.len()
                )));
            };
            if vs30 <= 0.0 {
                return Err(bad(format!("line {}: non-positive Vs30 {vs30}", lineno + 1)));
            }
            nodes.push((lon, lat, vs30));
        }
        if nodes.is_empty() {
            return Err(bad("no grid nodes".into()));
        }

        let lons = sorted_unique(nodes.iter().map(|n| n.0).collect());
        let lats = sorted_unique(nodes.iter().map(|n| n.1).collect());
        let mut values = vec![f64::NAN; lons.len() * lats.len()];
        for (lon, lat, vs30) in nodes {
            let i = lons.partition_point(|v| *v < lon);
            let j = lats.partition_point(|v| *v < lat);
            values[j * lons.len() + i] = vs30;
        }

        Ok(Self { lons, lats, values })
    }

    /// Load a grid file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, VsMagError> {
        let text = std::fs::read_to_string(path).map_err(|source| VsMagError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let grid = Self::parse(&text, &path.display().to_string())?;
        debug!(
            "loaded Vs30 grid {} ({} x {} nodes)",
            path.display(),
            grid.lons.len(),
            grid.lats.len()
        );
        Ok(grid)
    }

    /// Vs30 at the nearest grid node, `None` outside the grid.
    #[must_use]
    pub fn lookup(&self, lat: f64, lon: f64) -> Option<f64> {
        let i = nearest(&self.lons, lon)?;
        let j = nearest(&self.lats, lat)?;
        let v = self.values[j * self.lons.len() + i];
        (!v.is_nan()).then_some(v)
    }
}

/// Per value type correction factors for one station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteCorrection {
    pub soil: SoilClass,
    pub acceleration: f64,
    pub velocity: f64,
    pub displacement: f64,
}

impl SiteCorrection {
    const NONE: Self = Self {
        soil: SoilClass::Rock,
        acceleration: 1.0,
        velocity: 1.0,
        displacement: 1.0,
    };

    #[must_use]
    pub fn factor(&self, value_type: ValueType) -> f64 {
        match value_type {
            ValueType::Acceleration => self.acceleration,
            ValueType::Velocity => self.velocity,
            ValueType::Displacement => self.displacement,
        }
    }
}

/// Site correction service. Without a grid every site is uncorrected rock.
#[derive(Debug, Clone)]
pub struct SiteEffect {
    grid: Option<Vs30Grid>,
    vs30_default: f64,
}

impl SiteEffect {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            grid: None,
            vs30_default: VREF,
        }
    }

    #[must_use]
    pub fn new(grid: Vs30Grid, vs30_default: f64) -> Self {
        Self {
            grid: Some(grid),
            vs30_default,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.grid.is_some()
    }

    /// Correction for a station given its peak acceleration in m/s².
    #[must_use]
    pub fn correction(&self, lat: f64, lon: f64, pga: f64) -> SiteCorrection {
        let Some(grid) = &self.grid else {
            return SiteCorrection::NONE;
        };
        let vs30 = grid.lookup(lat, lon).unwrap_or(self.vs30_default);
        if vs30 <= 0.0 {
            error!("Vs30 value can't be negative (lat: {lat:.2}; lon: {lon:.2})");
            return SiteCorrection::NONE;
        }
        let pga_g = pga / GRAVITY;
        SiteCorrection {
            soil: SoilClass::from_vs30(vs30),
            acceleration: amplification(vs30, pga_g, ValueType::Acceleration),
            velocity: amplification(vs30, pga_g, ValueType::Velocity),
            displacement: amplification(vs30, pga_g, ValueType::Displacement),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const GRID: &str = "# lon lat vs30\n\
                        8.0 46.0 300\n\
                        8.5 46.0 600\n\
                        8.0 46.5 1050\n\
                        8.5 46.5 200\n";

    #[test]
    fn test_nearest_lookup() {
        let grid = Vs30Grid::parse(GRID, "inline").unwrap();
        assert_eq!(grid.lookup(46.1, 8.1), Some(300.0));
        assert_eq!(grid.lookup(46.1, 8.4), Some(600.0));
        assert_eq!(grid.lookup(46.4, 8.2), Some(1050.0));
        assert_eq!(grid.lookup(46.5, 8.5), Some(200.0));
        assert_eq!(grid.lookup(47.0, 8.2), None);
        assert_eq!(grid.lookup(46.2, 7.9), None);
    }

    #[test]
    fn test_malformed_grid() {
        assert!(Vs30Grid::parse("8.0 46.0\n", "inline").is_err());
        assert!(Vs30Grid::parse("8.0 46.0 abc\n", "inline").is_err());
        assert!(Vs30Grid::parse("# empty\n", "inline").is_err());
        assert!(Vs30Grid::parse("8.0 46.0 -5\n", "inline").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GRID.as_bytes()).unwrap();
        let grid = Vs30Grid::from_file(file.path()).unwrap();
        assert_eq!(grid.lookup(46.0, 8.0), Some(300.0));
    }

    #[test]
    fn test_disabled_is_uncorrected_rock() {
        let c = SiteEffect::disabled().correction(46.0, 8.0, 5.0);
        assert_eq!(c.soil, SoilClass::Rock);
        assert!((c.factor(ValueType::Velocity) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reference_site_is_unamplified() {
        let site = SiteEffect::new(Vs30Grid::parse(GRID, "inline").unwrap(), 910.0);
        let c = site.correction(46.5, 8.0, 1.0);
        assert_eq!(c.soil, SoilClass::Rock);
        assert!((c.acceleration - 1.0).abs() < 1e-12);
        assert!((c.displacement - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_soft_soil_amplifies() {
        let site = SiteEffect::new(Vs30Grid::parse(GRID, "inline").unwrap(), 910.0);
        let c = site.correction(46.0, 8.0, 0.98);
        assert_eq!(c.soil, SoilClass::Soil);
        // 0.1 g column
        assert!((c.acceleration - 3.5f64.powf(0.35)).abs() < 1e-9);
        assert!((c.velocity - 3.5f64.powf(0.65)).abs() < 1e-9);
    }

    #[test]
    fn test_outside_grid_uses_default() {
        let site = SiteEffect::new(Vs30Grid::parse(GRID, "inline").unwrap(), 400.0);
        let c = site.correction(10.0, 10.0, 0.0);
        assert_eq!(c.soil, SoilClass::Soil);
        assert!(c.acceleration > 1.0);
    }

    #[test]
    fn test_tier_selection() {
        assert_eq!(tier(0.0), 0);
        assert_eq!(tier(0.16), 1);
        assert_eq!(tier(0.3), 2);
        assert_eq!(tier(2.0), 3);
        // Strong shaking de-amplifies short periods on soft soil
        assert!(amplification(300.0, 0.5, ValueType::Acceleration) < 1.0);
    }

    #[test]
    fn test_soil_class_boundary() {
        assert_eq!(SoilClass::from_vs30(464.0), SoilClass::Soil);
        assert_eq!(SoilClass::from_vs30(464.1), SoilClass::Rock);
    }
}
