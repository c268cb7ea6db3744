//! Dense BFGS quasi-Newton minimizer.

use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, Copy)]
pub struct BfgsOptions {
    /// Stop when the largest gradient component falls below this value.
    pub gradient_tol: f64,
    pub max_iters: usize,
    /// Upper bound on the length of a trial step.
    pub max_step: f64,
}

impl Default for BfgsOptions {
    fn default() -> Self {
        Self {
            gradient_tol: 1e-5,
            max_iters: 200,
            max_step: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BfgsResult {
    pub x: DVector<f64>,
    pub f: f64,
    pub gradient: DVector<f64>,
    /// Final inverse-Hessian approximation.
    pub inverse_hessian: DMatrix<f64>,
    pub iterations: usize,
    pub converged: bool,
}

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;

/// Minimize `objective`, which returns the value and gradient at a point.
pub fn minimize(
    objective: impl Fn(&DVector<f64>) -> (f64, DVector<f64>),
    x0: DVector<f64>,
    options: &BfgsOptions,
) -> BfgsResult {
    let n = x0.len();
    let identity = DMatrix::<f64>::identity(n, n);
    let mut h_inv = identity.clone();
    let mut x = x0;
    let (mut fx, mut g) = objective(&x);
    let mut iterations = 0;
    let mut converged = g.amax() < options.gradient_tol;

    while !converged && iterations < options.max_iters {
        iterations += 1;

        let mut p = -(&h_inv * &g);
        let mut slope = p.dot(&g);
        if !(slope < 0.0) {
            // Not a descent direction: restart from steepest descent.
            h_inv = identity.clone();
            p = -g.clone();
            slope = p.dot(&g);
        }

        let p_norm = p.norm();
        let mut alpha = if p_norm > options.max_step {
            options.max_step / p_norm
        } else {
            1.0
        };

        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let x_new = &x + alpha * &p;
            let (f_new, g_new) = objective(&x_new);
            if f_new.is_finite() && f_new <= fx + ARMIJO_C1 * alpha * slope {
                accepted = Some((x_new, f_new, g_new));
                break;
            }
            alpha *= 0.5;
        }
        let Some((x_new, f_new, g_new)) = accepted else {
            break;
        };

        let s = &x_new - &x;
        let y = &g_new - &g;
        let sy = s.dot(&y);
        if sy > 1e-12 {
            let rho = 1.0 / sy;
            let left = &identity - rho * &s * y.transpose();
            let right = &identity - rho * &y * s.transpose();
            h_inv = left * h_inv * right + rho * &s * s.transpose();
        }

        x = x_new;
        fx = f_new;
        g = g_new;
        converged = g.amax() < options.gradient_tol;
    }

    BfgsResult {
        x,
        f: fx,
        gradient: g,
        inverse_hessian: h_inv,
        iterations,
        converged,
    }
}
