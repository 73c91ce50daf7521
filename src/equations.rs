//! Virtual Seismologist station equations.
//!
//! Pure per-station computations: P/S classification, the closed-form
//! single-station magnitude from the vertical acceleration/displacement
//! ratio, and the squared-residual likelihood term for a trial network
//! magnitude. All amplitudes are site-corrected and in cm-based units
//! (cm/s², cm/s, cm); distances are epicentral kilometers.

use std::f64::consts::FRAC_PI_2;
use std::fmt;

use crate::errors::StationInputError;
use crate::site::SoilClass;
use crate::timeline::{Amplitudes, ValueType};

/// Fixed depth term of the hypocentral distance approximation (km²).
const DEPTH_TERM_KM2: f64 = 9.0;

/// Dominant phase of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveType {
    P,
    S,
}

impl WaveType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P => "P",
            Self::S => "S",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::P => 0,
            Self::S => 1,
        }
    }
}

impl fmt::Display for WaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor orientation class used by the attenuation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Vertical,
    Horizontal,
}

impl Orientation {
    const fn index(self) -> usize {
        match self {
            Self::Vertical => 0,
            Self::Horizontal => 1,
        }
    }
}

const fn soil_index(soil: SoilClass) -> usize {
    match soil {
        SoilClass::Rock => 0,
        SoilClass::Soil => 1,
    }
}

const fn value_index(vt: ValueType) -> usize {
    match vt {
        ValueType::Acceleration => 0,
        ValueType::Velocity => 1,
        ValueType::Displacement => 2,
    }
}

/// Ground-motion ratio `Zad = 0.36·log10(ZA) − 0.93·log10(ZD)`.
#[must_use]
pub fn ground_motion_ratio(za: f64, zd: f64) -> f64 {
    0.36 * za.log10() - 0.93 * zd.log10()
}

/// Linear discriminant over the four log amplitudes; positive means P.
#[must_use]
pub fn psclass(za: f64, zv: f64, ha: f64, hv: f64) -> WaveType {
    let score = 0.43 * za.log10() + 0.55 * zv.log10() - 0.46 * ha.log10() - 0.55 * hv.log10();
    if score > 0.0 { WaveType::P } else { WaveType::S }
}

/// Coefficients of one attenuation relation.
///
/// `log10 Y = a·M − b·(R1 + C(M)) − d·log10(R1 + C(M)) + e` with
/// `R1 = sqrt(R² + 9)` and `C(M) = c1·exp(c2·(M − 5))·(atan(M − 5) + π/2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub a: f64,
    pub b: f64,
    pub c1: f64,
    pub c2: f64,
    pub d: f64,
    pub e: f64,
    pub sigma: f64,
}

impl Coefficients {
    /// Predicted log10 amplitude at magnitude `m` and distance `r_km`.
    #[must_use]
    pub fn log_amplitude(&self, m: f64, r_km: f64) -> f64 {
        let r1 = (r_km * r_km + DEPTH_TERM_KM2).sqrt();
        let c = self.c1 * (self.c2 * (m - 5.0)).exp() * ((m - 5.0).atan() + FRAC_PI_2);
        self.a * m - self.b * (r1 + c) - self.d * (r1 + c).log10() + self.e
    }
}

/// Expected ground-motion ratio as a linear function of magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioModel {
    pub slope: f64,
    pub intercept_p: f64,
    pub intercept_s: f64,
    pub sigma: f64,
}

impl RatioModel {
    fn intercept(&self, wave: WaveType) -> f64 {
        match wave {
            WaveType::P => self.intercept_p,
            WaveType::S => self.intercept_s,
        }
    }

    #[must_use]
    pub fn expected(&self, m: f64, wave: WaveType) -> f64 {
        self.slope * m + self.intercept(wave)
    }
}

/// Immutable empirical attenuation table, indexed by
/// wave type, soil class, value type and orientation.
#[derive(Debug, Clone, PartialEq)]
pub struct AttenuationTable {
    entries: [[[[Coefficients; 2]; 3]; 2]; 2],
    ratio: RatioModel,
}

/// Shape coefficients `(a, b, c1, c2, d)` per value type.
const SHAPE: [(f64, f64, f64, f64, f64); 3] = [
    (0.733, 0.000_72, 1.16, 0.96, 1.48),
    (0.971, 0.000_61, 1.72, 0.96, 1.66),
    (1.232, 0.000_55, 1.47, 0.96, 1.59),
];

/// Constant term `e` as `[wave][soil][orientation][value type]`.
const CONSTANT: [[[[f64; 3]; 2]; 2]; 2] = [
    // P
    [
        [[0.26, -1.87, -4.20], [0.18, -1.95, -4.28]],
        [[0.41, -1.72, -4.05], [0.33, -1.80, -4.13]],
    ],
    // S
    [
        [[0.41, -1.72, -4.05], [0.63, -1.50, -3.83]],
        [[0.56, -1.57, -3.90], [0.78, -1.35, -3.68]],
    ],
];

/// Standard deviation per `[wave][value type]`.
const SIGMA: [[f64; 3]; 2] = [[0.34, 0.32, 0.36], [0.31, 0.29, 0.33]];

impl AttenuationTable {
    /// Coefficients of the Cua & Heaton ground-motion relations.
    #[must_use]
    pub fn cua_heaton() -> Self {
        let mut entries = [[[[Coefficients {
            a: 0.0,
            b: 0.0,
            c1: 0.0,
            c2: 0.0,
            d: 0.0,
            e: 0.0,
            sigma: 1.0,
        }; 2]; 3]; 2]; 2];

        for (w, per_wave) in entries.iter_mut().enumerate() {
            for (s, per_soil) in per_wave.iter_mut().enumerate() {
                for (v, per_type) in per_soil.iter_mut().enumerate() {
                    let (a, b, c1, c2, d) = SHAPE[v];
                    for (o, slot) in per_type.iter_mut().enumerate() {
                        *slot = Coefficients {
                            a,
                            b,
                            c1,
                            c2,
                            d,
                            e: CONSTANT[w][s][o][v],
                            sigma: SIGMA[w][v],
                        };
                    }
                }
            }
        }

        Self {
            entries,
            ratio: RatioModel {
                slope: -0.882,
                intercept_p: 5.245,
                intercept_s: 5.159,
                sigma: 0.3,
            },
        }
    }

    #[must_use]
    pub fn coefficients(
        &self,
        wave: WaveType,
        soil: SoilClass,
        value_type: ValueType,
        orientation: Orientation,
    ) -> &Coefficients {
        &self.entries[wave.index()][soil_index(soil)][value_index(value_type)][orientation.index()]
    }

    #[must_use]
    pub fn ratio(&self) -> &RatioModel {
        &self.ratio
    }

    /// Closed-form single-station magnitude from the ground-motion ratio.
    #[must_use]
    pub fn mest(&self, zad: f64, wave: WaveType) -> f64 {
        (zad - self.ratio.intercept(wave)) / self.ratio.slope
    }

    /// Sum of squared standardized residuals of one station at trial
    /// magnitude `m`.
    #[must_use]
    pub fn likelihood(&self, input: &StationInput, m: f64) -> f64 {
        let channels = [
            (Orientation::Vertical, ValueType::Velocity, input.vertical.velocity),
            (Orientation::Horizontal, ValueType::Acceleration, input.horizontal.acceleration),
            (Orientation::Horizontal, ValueType::Velocity, input.horizontal.velocity),
            (Orientation::Horizontal, ValueType::Displacement, input.horizontal.displacement),
        ];

        let amplitude_term: f64 = channels
            .iter()
            .map(|&(orientation, vt, observed)| {
                let coeff = self.coefficients(input.wave, input.soil, vt, orientation);
                let residual =
                    (observed.log10() - coeff.log_amplitude(m, input.distance_km)) / coeff.sigma;
                residual * residual
            })
            .sum();

        let ratio_residual = (input.ratio - self.ratio.expected(m, input.wave)) / self.ratio.sigma;

        amplitude_term + ratio_residual * ratio_residual
    }
}

/// Everything the grid search needs from one station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationInput {
    /// Site-corrected vertical peaks (cm-based)
    pub vertical: Amplitudes,
    /// Site-corrected horizontal peaks (cm-based)
    pub horizontal: Amplitudes,
    pub wave: WaveType,
    pub soil: SoilClass,
    pub distance_km: f64,
    /// Observed ground-motion ratio
    pub ratio: f64,
    /// Single-station magnitude
    pub mest: f64,
}

impl StationInput {
    /// Classify a station record and compute its single-station magnitude.
    ///
    /// # Errors
    ///
    /// Returns [`StationInputError::NonPositiveAmplitude`] if any peak is
    /// zero or negative, since its logarithm is undefined.
    pub fn new(
        vertical: Amplitudes,
        horizontal: Amplitudes,
        soil: SoilClass,
        distance_km: f64,
        table: &AttenuationTable,
    ) -> Result<Self, StationInputError> {
        let checks = [
            ("ZA", vertical.acceleration),
            ("ZV", vertical.velocity),
            ("ZD", vertical.displacement),
            ("HA", horizontal.acceleration),
            ("HV", horizontal.velocity),
            ("HD", horizontal.displacement),
        ];
        if let Some(&(channel, value)) = checks.iter().find(|(_, v)| v.is_nan() || *v <= 0.0) {
            return Err(StationInputError::NonPositiveAmplitude { channel, value });
        }

        let wave = psclass(
            vertical.acceleration,
            vertical.velocity,
            horizontal.acceleration,
            horizontal.velocity,
        );
        let ratio = ground_motion_ratio(vertical.acceleration, vertical.displacement);

        Ok(Self {
            vertical,
            horizontal,
            wave,
            soil,
            distance_km,
            ratio,
            mest: table.mest(ratio, wave),
        })
    }
}
