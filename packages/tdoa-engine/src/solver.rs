//! # solver
//!
//! Planar TDOA multilateration.
//!
//! The anchor that heard the packet first is the time reference, so every
//! range difference is non-negative. For each other anchor `i`:
//!
//! ```text
//! |P - Aᵢ| - |P - A₀| = c · (tᵢ - t₀) = dᵢ
//! ```
//!
//! With A₀ moved to the origin and r₀ = |P|, squaring and subtracting the
//! reference equation removes |P|² and leaves one linear row per anchor:
//!
//! ```text
//! Aᵢ · P + dᵢ r₀ = (|Aᵢ|² - dᵢ²) / 2
//! ```
//!
//! Least squares over the rows gives P = u - v·r₀. Substituting into r₀² = |P|²
//! yields a quadratic in r₀. Every non-negative root becomes a candidate,
//! each candidate is polished by Gauss-Newton on the hyperbolic residuals,
//! and the lowest residual wins. Three anchors can produce two exact
//! solutions; the tie goes to the smaller reference range.
//!
//! Collinear or coincident anchors make the 2×2 normal matrix singular. That
//! is detected from its normalised determinant and reported, never solved
//! into a finite-but-wrong answer.

use tdoa_types::{range_difference_m, PositionEstimate};
use tracing::debug;

use crate::error::SolveError;
use crate::registry::AnchorRegistry;
use crate::store::{Arrival, MeasurementRecord};

/// Minimum anchors for a 2D fix (two independent range differences).
pub const MIN_ANCHORS: usize = 3;

/// `det / trace²` of the normal matrix below this is treated as singular.
const DEGENERACY_THRESHOLD: f64 = 1e-9;
const MAX_REFINE_ITERATIONS: u32 = 20;
/// Stop refining once the update is below this (meters).
const CONVERGENCE_M: f64 = 1e-7;
/// Final update above this means the refinement never settled (meters).
const NOT_CONVERGED_M: f64 = 1e-3;
/// Squared-residual difference under which two candidates count as tied (m²).
const RESIDUAL_TIE_M2: f64 = 1e-9;

/// Solve the record, reporting failure as `valid == false`.
pub fn solve(record: &MeasurementRecord, registry: &AnchorRegistry) -> PositionEstimate {
    match try_solve(record.arrivals(), registry) {
        Ok(estimate) => estimate,
        Err(e) => {
            debug!("TDOA: no fix for EUID:{}: {e}", record.identity());
            PositionEstimate::invalid()
        }
    }
}

/// Anchor offset from the reference anchor and its measured range difference.
#[derive(Debug, Clone, Copy)]
struct Hyperbola {
    x: f64,
    y: f64,
    range_diff_m: f64,
}

/// Solve from raw arrivals, with the reason on failure.
pub fn try_solve(arrivals: &[Arrival], registry: &AnchorRegistry) -> Result<PositionEstimate, SolveError> {
    if arrivals.len() < MIN_ANCHORS {
        return Err(SolveError::InsufficientAnchors { available: arrivals.len() });
    }

    let resolved: Vec<(f64, f64, f64)> = arrivals
        .iter()
        .filter_map(|a| registry.lookup(a.anchor_id).map(|r| (r.x, r.y, a.rx_timestamp_us)))
        .collect();
    if resolved.len() < MIN_ANCHORS {
        return Err(SolveError::InsufficientAnchors { available: resolved.len() });
    }
    if resolved.iter().any(|&(_, _, t)| !t.is_finite()) {
        return Err(SolveError::Degenerate);
    }

    // Earliest arrival is the reference.
    let mut ref_idx = 0;
    for (i, r) in resolved.iter().enumerate().skip(1) {
        if r.2 < resolved[ref_idx].2 {
            ref_idx = i;
        }
    }
    let (ox, oy, t0) = resolved[ref_idx];

    let hyperbolas: Vec<Hyperbola> = resolved
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ref_idx)
        .map(|(_, &(x, y, t))| Hyperbola { x: x - ox, y: y - oy, range_diff_m: range_difference_m(t - t0) })
        .collect();

    // Normal matrix of the anchor offsets: MᵀM.
    let (mut m00, mut m01, mut m11) = (0.0, 0.0, 0.0);
    for h in &hyperbolas {
        m00 += h.x * h.x;
        m01 += h.x * h.y;
        m11 += h.y * h.y;
    }
    let det = m00 * m11 - m01 * m01;
    let trace = m00 + m11;
    if !det.is_finite() || trace <= 0.0 || det / (trace * trace) < DEGENERACY_THRESHOLD {
        return Err(SolveError::Degenerate);
    }

    // P = u - v·r₀  where u = (MᵀM)⁻¹Mᵀb, v = (MᵀM)⁻¹Mᵀd (Cramer's rule).
    let (mut bx, mut by, mut dx, mut dy) = (0.0, 0.0, 0.0, 0.0);
    for h in &hyperbolas {
        let b = (h.x * h.x + h.y * h.y - h.range_diff_m * h.range_diff_m) / 2.0;
        bx += h.x * b;
        by += h.y * b;
        dx += h.x * h.range_diff_m;
        dy += h.y * h.range_diff_m;
    }
    let u = ((m11 * bx - m01 * by) / det, (m00 * by - m01 * bx) / det);
    let v = ((m11 * dx - m01 * dy) / det, (m00 * dy - m01 * dx) / det);

    let candidates = reference_range_candidates(u, v);
    if candidates.is_empty() {
        return Err(SolveError::NoSolution);
    }

    let mut best: Option<Candidate> = None;
    for r0 in candidates {
        let start = (u.0 - v.0 * r0, u.1 - v.1 * r0);
        let candidate = refine(start, &hyperbolas);
        if !candidate.x.is_finite() || !candidate.y.is_finite() || !candidate.ssr.is_finite() {
            continue;
        }
        best = Some(match best {
            None => candidate,
            Some(b) if candidate.better_than(&b) => candidate,
            Some(b) => b,
        });
    }

    let best = best.ok_or(SolveError::Degenerate)?;
    if best.last_step_m > NOT_CONVERGED_M {
        return Err(SolveError::NotConverged);
    }

    let rms = (best.ssr / hyperbolas.len() as f64).sqrt();
    Ok(PositionEstimate::fix(best.x + ox, best.y + oy, hyperbolas.len() + 1, rms))
}

/// Non-negative roots of (v·v - 1)·r₀² - 2(u·v)·r₀ + u·u = 0.
///
/// A negative discriminant (noisy data) falls back to the parabola vertex,
/// which the refinement then has to justify through its residual.
fn reference_range_candidates(u: (f64, f64), v: (f64, f64)) -> Vec<f64> {
    let a = v.0 * v.0 + v.1 * v.1 - 1.0;
    let b = -2.0 * (u.0 * v.0 + u.1 * v.1);
    let c = u.0 * u.0 + u.1 * u.1;

    let roots: Vec<f64> = if a.abs() < 1e-12 {
        if b.abs() < 1e-12 {
            Vec::new()
        } else {
            vec![-c / b]
        }
    } else {
        let disc = b * b - 4.0 * a * c;
        if disc >= 0.0 {
            let sq = disc.sqrt();
            vec![(-b + sq) / (2.0 * a), (-b - sq) / (2.0 * a)]
        } else {
            vec![-b / (2.0 * a)]
        }
    };

    roots.into_iter().filter(|r| r.is_finite() && *r >= 0.0).collect()
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    x: f64,
    y: f64,
    /// Sum of squared hyperbolic residuals (m²)
    ssr: f64,
    last_step_m: f64,
}

impl Candidate {
    fn reference_range(&self) -> f64 {
        self.x.hypot(self.y)
    }

    fn better_than(&self, other: &Candidate) -> bool {
        if (self.ssr - other.ssr).abs() <= RESIDUAL_TIE_M2 {
            self.reference_range() < other.reference_range()
        } else {
            self.ssr < other.ssr
        }
    }
}

/// Residuals fᵢ(P) = |P - Aᵢ| - |P| - dᵢ  (reference at the origin).
fn sum_squared_residuals(p: (f64, f64), hyperbolas: &[Hyperbola]) -> f64 {
    let r0 = p.0.hypot(p.1);
    hyperbolas
        .iter()
        .map(|h| {
            let f = (p.0 - h.x).hypot(p.1 - h.y) - r0 - h.range_diff_m;
            f * f
        })
        .sum()
}

/// Gauss-Newton on the hyperbolic residuals, 2×2 normal equations by Cramer's rule.
fn refine(start: (f64, f64), hyperbolas: &[Hyperbola]) -> Candidate {
    let mut p = start;
    let mut last_step = 0.0;

    for _ in 0..MAX_REFINE_ITERATIONS {
        let r0 = p.0.hypot(p.1).max(1e-9);
        let (mut jtj00, mut jtj01, mut jtj11) = (0.0, 0.0, 0.0);
        let (mut jtf0, mut jtf1) = (0.0, 0.0);

        for h in hyperbolas {
            let ri = (p.0 - h.x).hypot(p.1 - h.y).max(1e-9);
            let f = ri - r0 - h.range_diff_m;
            // ∂f/∂P = (P - Aᵢ)/|P - Aᵢ| - P/|P|
            let jx = (p.0 - h.x) / ri - p.0 / r0;
            let jy = (p.1 - h.y) / ri - p.1 / r0;
            jtj00 += jx * jx;
            jtj01 += jx * jy;
            jtj11 += jy * jy;
            jtf0 += jx * f;
            jtf1 += jy * f;
        }

        let det = jtj00 * jtj11 - jtj01 * jtj01;
        let trace = jtj00 + jtj11;
        if !det.is_finite() || trace <= 0.0 || det / (trace * trace) < DEGENERACY_THRESHOLD {
            // Flat direction: keep the closed-form point.
            break;
        }
        let step_x = -(jtj11 * jtf0 - jtj01 * jtf1) / det;
        let step_y = -(jtj00 * jtf1 - jtj01 * jtf0) / det;

        let before = sum_squared_residuals(p, hyperbolas);
        let next = (p.0 + step_x, p.1 + step_y);
        let after = sum_squared_residuals(next, hyperbolas);
        if !(after <= before) {
            // Step made things worse (or NaN): stop at the current point.
            last_step = 0.0;
            break;
        }

        p = next;
        last_step = step_x.hypot(step_y);
        if last_step < CONVERGENCE_M {
            break;
        }
    }

    Candidate { x: p.0, y: p.1, ssr: sum_squared_residuals(p, hyperbolas), last_step_m: last_step }
}
