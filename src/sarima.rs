//! Weekly seasonal ARIMA fit for daily price series.
//!
//! Model: SARIMA(1,1,1)(1,1,1)[7], estimated by conditional sum of squares
//! on the regular+seasonal differenced series. Initialization uses a
//! Hannan-Rissanen style long-AR regression (least squares), refined with
//! a bounded Nelder-Mead search capped at a fixed evaluation budget so fit
//! time is bounded. Forecast standard errors come from the psi weights of
//! the full integrated process and the fitted innovation variance.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

pub const SEASONAL_PERIOD: usize = 7;

/// Minimum input length: four full seasonal cycles. Below this the
/// differenced series leaves too few effective observations for CSS.
pub const MIN_SERIES_LEN: usize = 4 * SEASONAL_PERIOD;

const MAX_LAG: usize = SEASONAL_PERIOD + 1;
const PARAM_BOUND: f64 = 0.99;
const NM_MAX_EVALS: usize = 400;
const NM_TOLERANCE: f64 = 1e-8;
const LONG_AR_ORDER: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum SarimaError {
    #[error("series of length {len} is too short to fit (minimum {min})")]
    TooShort { len: usize, min: usize },
    #[error("objective became non-finite during fitting")]
    NonFinite,
    #[error("degenerate fit: innovation variance is not positive")]
    Degenerate,
}

/// Fitted SARIMA(1,1,1)(1,1,1)[7] model over one series.
#[derive(Debug, Clone)]
pub struct SarimaFit {
    /// (phi, theta, seasonal phi, seasonal theta).
    pub params: [f64; 4],
    pub sigma2: f64,
    history: Vec<f64>,
    diffed: Vec<f64>,
    residuals: Vec<f64>,
}

/// Point forecast plus its standard error for one step ahead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastStep {
    pub point: f64,
    pub std_err: f64,
}

/// Fit the weekly seasonal model on a daily series.
pub fn fit_weekly(series: &[f64]) -> Result<SarimaFit, SarimaError> {
    if series.len() < MIN_SERIES_LEN {
        return Err(SarimaError::TooShort {
            len: series.len(),
            min: MIN_SERIES_LEN,
        });
    }
    if series.iter().any(|value| !value.is_finite()) {
        return Err(SarimaError::NonFinite);
    }

    let diffed = difference(series);
    let initial = initial_params(&diffed);

    let objective = |params: &[f64; 4]| css_objective(&diffed, params).0;
    let params = nelder_mead(initial, &objective);

    let (css, residuals) = css_objective(&diffed, &params);
    if !css.is_finite() {
        return Err(SarimaError::NonFinite);
    }

    let n_eff = diffed.len() - MAX_LAG;
    let sigma2 = css / n_eff as f64;
    if !(sigma2 > 0.0) || !sigma2.is_finite() {
        return Err(SarimaError::Degenerate);
    }

    Ok(SarimaFit {
        params,
        sigma2,
        history: series.to_vec(),
        diffed,
        residuals,
    })
}

impl SarimaFit {
    /// Project `horizon` steps ahead on the original (undifferenced) scale.
    pub fn forecast(&self, horizon: usize) -> Vec<ForecastStep> {
        let [phi, theta, sphi, stheta] = self.params;

        // Extend the differenced series with its own forecasts; future
        // innovations are zero, past ones are the CSS residuals.
        let hist_len = self.diffed.len();
        let mut w_ext = self.diffed.clone();
        for step in 0..horizon {
            let idx = hist_len + step;
            let w_at = |at: isize| {
                if at < 0 {
                    0.0
                } else {
                    w_ext[at as usize]
                }
            };
            let e_at = |at: isize| {
                if at < 0 || at as usize >= self.residuals.len() {
                    0.0
                } else {
                    self.residuals[at as usize]
                }
            };
            let idx = idx as isize;
            let value = phi * w_at(idx - 1) + sphi * w_at(idx - 7) - phi * sphi * w_at(idx - 8)
                + theta * e_at(idx - 1)
                + stheta * e_at(idx - 7)
                + theta * stheta * e_at(idx - 8);
            w_ext.push(value);
        }

        // Undo the seasonal difference, then the regular difference:
        // z[j] = z[j-7] + w[j-7]   (w index offset by the seasonal lag)
        // y[k] = y[k-1] + z[k-1]
        let mut z_ext: Vec<f64> = self
            .history
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect();
        let z_hist_len = z_ext.len();
        for step in 0..horizon {
            let j = z_hist_len + step;
            let value = z_ext[j - SEASONAL_PERIOD] + w_ext[j - SEASONAL_PERIOD];
            z_ext.push(value);
        }

        let mut points = Vec::with_capacity(horizon);
        let mut last_y = *self.history.last().expect("fit requires non-empty series");
        for step in 0..horizon {
            last_y += z_ext[z_hist_len + step];
            points.push(last_y);
        }

        let psi = psi_weights(&self.params, horizon);
        let mut cum_psi_sq = 0.0;
        points
            .into_iter()
            .zip(psi)
            .map(|(point, psi_j)| {
                cum_psi_sq += psi_j * psi_j;
                ForecastStep {
                    point,
                    std_err: (self.sigma2 * cum_psi_sq).sqrt(),
                }
            })
            .collect()
    }
}

/// Regular difference followed by a lag-7 seasonal difference.
fn difference(series: &[f64]) -> Vec<f64> {
    let z: Vec<f64> = series.windows(2).map(|pair| pair[1] - pair[0]).collect();
    z.windows(SEASONAL_PERIOD + 1)
        .map(|window| window[SEASONAL_PERIOD] - window[0])
        .collect()
}

/// Conditional sum of squares and the residual sequence (zeros over the
/// conditioning prefix). Returns infinity outside the stationarity box.
fn css_objective(diffed: &[f64], params: &[f64; 4]) -> (f64, Vec<f64>) {
    let [phi, theta, sphi, stheta] = *params;
    if params.iter().any(|param| param.abs() >= PARAM_BOUND) {
        return (f64::INFINITY, Vec::new());
    }

    let mut residuals = vec![0.0; diffed.len()];
    let mut css = 0.0;
    for t in MAX_LAG..diffed.len() {
        let e = diffed[t]
            - phi * diffed[t - 1]
            - sphi * diffed[t - 7]
            + phi * sphi * diffed[t - 8]
            - theta * residuals[t - 1]
            - stheta * residuals[t - 7]
            - theta * stheta * residuals[t - 8];
        residuals[t] = e;
        css += e * e;
        if !css.is_finite() {
            return (f64::INFINITY, residuals);
        }
    }
    (css, residuals)
}

/// Hannan-Rissanen initialization: long-AR residuals, then one regression
/// of the differenced series on its own lags {1,7} and residual lags {1,7}.
fn initial_params(diffed: &[f64]) -> [f64; 4] {
    const DEFAULT: [f64; 4] = [0.1, 0.1, 0.1, 0.1];

    let Some(innovations) = long_ar_residuals(diffed) else {
        return DEFAULT;
    };

    let start = LONG_AR_ORDER.max(SEASONAL_PERIOD);
    let rows = diffed.len().saturating_sub(start);
    if rows < 8 {
        return DEFAULT;
    }

    let mut design = DMatrix::zeros(rows, 4);
    let mut target = DVector::zeros(rows);
    for (row, t) in (start..diffed.len()).enumerate() {
        design[(row, 0)] = diffed[t - 1];
        design[(row, 1)] = innovations[t - 1];
        design[(row, 2)] = diffed[t - 7];
        design[(row, 3)] = innovations[t - 7];
        target[row] = diffed[t];
    }

    match solve_least_squares(&design, &target) {
        Some(beta) => [
            clamp_param(beta[0]),
            clamp_param(beta[1]),
            clamp_param(beta[2]),
            clamp_param(beta[3]),
        ],
        None => DEFAULT,
    }
}

/// Residuals of an AR(`LONG_AR_ORDER`) regression, used as innovation
/// proxies. `None` when the regression cannot be solved.
fn long_ar_residuals(diffed: &[f64]) -> Option<Vec<f64>> {
    let order = LONG_AR_ORDER;
    let rows = diffed.len().checked_sub(order)?;
    if rows < order + 2 {
        return None;
    }

    let mut design = DMatrix::zeros(rows, order);
    let mut target = DVector::zeros(rows);
    for (row, t) in (order..diffed.len()).enumerate() {
        for lag in 1..=order {
            design[(row, lag - 1)] = diffed[t - lag];
        }
        target[row] = diffed[t];
    }

    let beta = solve_least_squares(&design, &target)?;
    let mut residuals = vec![0.0; diffed.len()];
    for t in order..diffed.len() {
        let fitted: f64 = (1..=order).map(|lag| beta[lag - 1] * diffed[t - lag]).sum();
        residuals[t] = diffed[t] - fitted;
    }
    Some(residuals)
}

/// SVD least squares with a tolerance ladder; `None` when the system is
/// too ill-conditioned to trust.
fn solve_least_squares(design: &DMatrix<f64>, target: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = design.clone().svd(true, true);
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(target, tol) {
            if beta.iter().all(|value| value.is_finite()) {
                return Some(beta);
            }
        }
    }
    None
}

fn clamp_param(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-0.9, 0.9)
    } else {
        0.1
    }
}

/// Psi weights of the full integrated process. The generalized AR operator
/// is (1 - phi B)(1 - sphi B^7)(1 - B)(1 - B^7); the MA operator is
/// (1 + theta B)(1 + stheta B^7).
fn psi_weights(params: &[f64; 4], horizon: usize) -> Vec<f64> {
    let [phi, theta, sphi, stheta] = *params;

    let mut ar_full = poly_mul(&[1.0, -phi], &seasonal_poly(-sphi));
    ar_full = poly_mul(&ar_full, &[1.0, -1.0]);
    ar_full = poly_mul(&ar_full, &seasonal_poly(-1.0));

    let ma_full = poly_mul(&[1.0, theta], &seasonal_poly(stheta));

    let mut psi = Vec::with_capacity(horizon);
    psi.push(1.0);
    for j in 1..horizon {
        let mut value = ma_full.get(j).copied().unwrap_or(0.0);
        for i in 1..ar_full.len().min(j + 1) {
            // ar_full is 1 - sum g_i B^i, so g_i = -coefficient.
            value += -ar_full[i] * psi[j - i];
        }
        psi.push(value);
    }
    psi
}

/// Polynomial 1 + c B^7 as a coefficient vector.
fn seasonal_poly(c: f64) -> Vec<f64> {
    let mut poly = vec![0.0; SEASONAL_PERIOD + 1];
    poly[0] = 1.0;
    poly[SEASONAL_PERIOD] = c;
    poly
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            out[i + j] += ai * bj;
        }
    }
    out
}

/// Nelder-Mead over the 4 ARMA parameters with a fixed evaluation budget.
/// Reaching the budget accepts the best candidate found so far.
fn nelder_mead(initial: [f64; 4], objective: &dyn Fn(&[f64; 4]) -> f64) -> [f64; 4] {
    const DIM: usize = 4;
    const ALPHA: f64 = 1.0;
    const GAMMA: f64 = 2.0;
    const RHO: f64 = 0.5;
    const SIGMA: f64 = 0.5;
    const INITIAL_STEP: f64 = 0.2;

    let evals = std::cell::Cell::new(0usize);
    let eval = |point: &[f64; 4]| {
        evals.set(evals.get() + 1);
        objective(point)
    };

    let mut simplex: Vec<([f64; 4], f64)> = Vec::with_capacity(DIM + 1);
    simplex.push((initial, eval(&initial)));
    for axis in 0..DIM {
        let mut vertex = initial;
        vertex[axis] = clamp_param(vertex[axis] + INITIAL_STEP);
        let value = eval(&vertex);
        simplex.push((vertex, value));
    }

    while evals.get() < NM_MAX_EVALS {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best = simplex[0].1;
        let worst = simplex[DIM].1;
        if (worst - best).abs() <= NM_TOLERANCE * (1.0 + best.abs()) {
            break;
        }

        let mut centroid = [0.0; DIM];
        for (vertex, _) in &simplex[..DIM] {
            for axis in 0..DIM {
                centroid[axis] += vertex[axis] / DIM as f64;
            }
        }

        let worst_vertex = simplex[DIM].0;
        let mut reflected = [0.0; DIM];
        for axis in 0..DIM {
            reflected[axis] = centroid[axis] + ALPHA * (centroid[axis] - worst_vertex[axis]);
        }
        let reflected_value = eval(&reflected);

        if reflected_value < simplex[0].1 {
            let mut expanded = [0.0; DIM];
            for axis in 0..DIM {
                expanded[axis] = centroid[axis] + GAMMA * (reflected[axis] - centroid[axis]);
            }
            let expanded_value = eval(&expanded);
            simplex[DIM] = if expanded_value < reflected_value {
                (expanded, expanded_value)
            } else {
                (reflected, reflected_value)
            };
            continue;
        }

        if reflected_value < simplex[DIM - 1].1 {
            simplex[DIM] = (reflected, reflected_value);
            continue;
        }

        let mut contracted = [0.0; DIM];
        for axis in 0..DIM {
            contracted[axis] = centroid[axis] + RHO * (worst_vertex[axis] - centroid[axis]);
        }
        let contracted_value = eval(&contracted);
        if contracted_value < simplex[DIM].1 {
            simplex[DIM] = (contracted, contracted_value);
            continue;
        }

        let best_vertex = simplex[0].0;
        for entry in simplex.iter_mut().skip(1) {
            let mut shrunk = [0.0; DIM];
            for axis in 0..DIM {
                shrunk[axis] = best_vertex[axis] + SIGMA * (entry.0[axis] - best_vertex[axis]);
            }
            let value = eval(&shrunk);
            *entry = (shrunk, value);
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    simplex[0].0
}
