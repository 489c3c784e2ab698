//! Minimal P3P solver (Grunert's formulation).
//!
//! Given three bearing vectors and the corresponding world points, the
//! distances along the rays satisfy the law of cosines for each pair of
//! points. Eliminating two unknowns leaves a quartic in `v = s3 / s1`;
//! each positive real root yields one candidate pose, recovered by rigid
//! alignment of the world triangle onto the camera-frame triangle.

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::geometry::SE3;

const EPS: f64 = 1e-12;

/// Tolerance on the imaginary part of a quartic root to treat it as real.
const IMAG_TOLERANCE: f64 = 1e-5;

/// Solve P3P.
///
/// `bearings` are unit vectors in the camera frame, `points` are world
/// points. Returns up to four candidate `T_cw` poses.
pub fn solve_p3p(bearings: &[Vector3<f64>; 3], points: &[Vector3<f64>; 3]) -> Vec<SE3> {
    let a = (points[1] - points[2]).norm();
    let b = (points[0] - points[2]).norm();
    let c = (points[0] - points[1]).norm();
    if a < EPS || b < EPS || c < EPS {
        return Vec::new();
    }

    let cos_alpha = bearings[1].dot(&bearings[2]);
    let cos_beta = bearings[0].dot(&bearings[2]);
    let cos_gamma = bearings[0].dot(&bearings[1]);

    let b_sq = b * b;
    let k = (a * a - c * c) / b_sq;
    let c_ratio = c * c / b_sq;

    // u(v) = N(v) / D(v); coefficients are lowest order first.
    let num = [k + 1.0, -2.0 * k * cos_beta, k - 1.0];
    let den = [2.0 * cos_gamma, -2.0 * cos_alpha];
    let ray = [1.0, -2.0 * cos_beta, 1.0];

    // D² + N² - 2 cosγ N D - (c²/b²)(1 + v² - 2v cosβ) D² = 0
    let den_sq = poly_mul(&den, &den);
    let quartic = poly_add(
        &poly_add(&den_sq, &poly_mul(&num, &num)),
        &poly_add(
            &poly_scale(&poly_mul(&num, &den), -2.0 * cos_gamma),
            &poly_scale(&poly_mul(&ray, &den_sq), -c_ratio),
        ),
    );

    let mut poses = Vec::new();
    for v in real_roots(&quartic) {
        let d = den[0] + den[1] * v;
        if d.abs() < 1e-9 {
            continue;
        }
        let u = (num[0] + num[1] * v + num[2] * v * v) / d;

        let ray_sq = 1.0 + v * v - 2.0 * v * cos_beta;
        if ray_sq <= EPS {
            continue;
        }
        let s1 = b / ray_sq.sqrt();
        let s2 = u * s1;
        let s3 = v * s1;
        if s1 <= 0.0 || s2 <= 0.0 || s3 <= 0.0 {
            continue;
        }

        let cam_points = [bearings[0] * s1, bearings[1] * s2, bearings[2] * s3];
        if let Some(pose) = align_points(points, &cam_points) {
            poses.push(pose);
        }
    }
    poses
}

/// Rigid alignment (Kabsch): the transform `T` minimizing `Σ |dst_i - T src_i|²`.
pub fn align_points(src: &[Vector3<f64>], dst: &[Vector3<f64>]) -> Option<SE3> {
    if src.len() != dst.len() || src.len() < 3 {
        return None;
    }
    let n = src.len() as f64;
    let src_c = src.iter().sum::<Vector3<f64>>() / n;
    let dst_c = dst.iter().sum::<Vector3<f64>>() / n;

    let mut h = Matrix3::zeros();
    for (s, d) in src.iter().zip(dst) {
        h += (s - src_c) * (d - dst_c).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();
    let sign = (v * u.transpose()).determinant().signum();
    let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, sign));
    let rotation = v * correction * u.transpose();
    let translation = dst_c - rotation * src_c;

    Some(SE3::from_rt(&rotation, &translation))
}

// ─────────────────────────────────────────────────────────────────────────────
// Polynomial helpers (coefficients lowest order first)
// ─────────────────────────────────────────────────────────────────────────────

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

fn poly_add(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len().max(b.len())];
    for (i, x) in a.iter().enumerate() {
        out[i] += x;
    }
    for (i, y) in b.iter().enumerate() {
        out[i] += y;
    }
    out
}

fn poly_scale(a: &[f64], s: f64) -> Vec<f64> {
    a.iter().map(|x| x * s).collect()
}

fn poly_eval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

fn poly_derivative(coeffs: &[f64]) -> Vec<f64> {
    coeffs
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, c)| c * i as f64)
        .collect()
}

/// Real roots of a polynomial via companion-matrix eigenvalues, polished
/// with a few Newton steps.
fn real_roots(coeffs: &[f64]) -> Vec<f64> {
    let scale = coeffs.iter().fold(0.0_f64, |m, c| m.max(c.abs()));
    if scale < EPS {
        return Vec::new();
    }
    let mut degree = coeffs.len() - 1;
    while degree > 0 && coeffs[degree].abs() < 1e-10 * scale {
        degree -= 1;
    }
    match degree {
        0 => return Vec::new(),
        1 => return vec![-coeffs[0] / coeffs[1]],
        _ => {}
    }

    let lead = coeffs[degree];
    let mut companion = DMatrix::<f64>::zeros(degree, degree);
    for i in 1..degree {
        companion[(i, i - 1)] = 1.0;
    }
    for i in 0..degree {
        companion[(i, degree - 1)] = -coeffs[i] / lead;
    }

    let poly = &coeffs[..=degree];
    let deriv = poly_derivative(poly);
    companion
        .complex_eigenvalues()
        .iter()
        .filter(|z| z.im.abs() <= IMAG_TOLERANCE * (1.0 + z.re.abs()))
        .map(|z| {
            let mut x = z.re;
            for _ in 0..3 {
                let dp = poly_eval(&deriv, x);
                if dp.abs() < EPS {
                    break;
                }
                x -= poly_eval(poly, x) / dp;
            }
            x
        })
        .collect()
}
