//! Iterative linear solves of the motion estimate.
//!
//! Each iteration accumulates the normal equations `AᵀA x = Aᵀb` from the
//! selected residual rows and solves them by column-pivoted QR. The
//! closed-form Jacobian entries encode the z-x-y rotation order of the
//! working frame; their exact trig products are part of the contract with
//! the frame conventions and must not be rearranged.
//!
//! On the first iteration of every solve the eigenvalues of `AᵀA` are
//! inspected; directions with eigenvalues below a fixed threshold are
//! treated as unobservable and later updates are projected off them.

use crate::core::types::{Point, PointCloud};
use nalgebra::{Matrix3, Matrix6, SymmetricEigen, Vector3, Vector6};

const RAD2DEG: f32 = 180.0 / std::f32::consts::PI;

/// Eigenvalue floor below which a direction counts as unobservable.
const EIGEN_THRESHOLD: f32 = 10.0;

/// Precomputed trig products of the current transform estimate, shared by
/// all Jacobian rows of one iteration.
struct JacobianCoeffs {
    srx: f32,
    crx: f32,
    a1: f32,
    a2: f32,
    a3: f32,
    a4: f32,
    a5: f32,
    a6: f32,
    a7: f32,
    a8: f32,
    a9: f32,
    a10: f32,
    a11: f32,
    b1: f32,
    b2: f32,
    b3: f32,
    b4: f32,
    b5: f32,
    b6: f32,
    b7: f32,
    b8: f32,
    c1: f32,
    c2: f32,
    c3: f32,
    c4: f32,
    c5: f32,
    c6: f32,
    c7: f32,
    c8: f32,
    c9: f32,
}

impl JacobianCoeffs {
    fn new(t: &[f32; 6]) -> Self {
        let srx = t[0].sin();
        let crx = t[0].cos();
        let sry = t[1].sin();
        let cry = t[1].cos();
        let srz = t[2].sin();
        let crz = t[2].cos();
        let tx = t[3];
        let ty = t[4];
        let tz = t[5];

        let a1 = crx * sry * srz;
        let a2 = crx * crz * sry;
        let a3 = srx * sry;
        let a4 = tx * a1 - ty * a2 - tz * a3;
        let a5 = srx * srz;
        let a6 = crz * srx;
        let a7 = ty * a6 - tz * crx - tx * a5;
        let a8 = crx * cry * srz;
        let a9 = crx * cry * crz;
        let a10 = cry * srx;
        let a11 = tz * a10 + ty * a9 - tx * a8;

        let b1 = -crz * sry - cry * srx * srz;
        let b2 = cry * crz * srx - sry * srz;
        let b3 = crx * cry;
        let b4 = tx * -b1 + ty * -b2 + tz * b3;
        let b5 = cry * crz - srx * sry * srz;
        let b6 = cry * srz + crz * srx * sry;
        let b7 = crx * sry;
        let b8 = tz * b7 - ty * b6 - tx * b5;

        let c1 = -b6;
        let c2 = b5;
        let c3 = tx * b6 - ty * b5;
        let c4 = -crx * crz;
        let c5 = crx * srz;
        let c6 = ty * c5 + tx * -c4;
        let c7 = b2;
        let c8 = -b1;
        let c9 = tx * -b2 - ty * -b1;

        Self {
            srx,
            crx,
            a1,
            a2,
            a3,
            a4,
            a5,
            a6,
            a7,
            a8,
            a9,
            a10,
            a11,
            b1,
            b2,
            b3,
            b4,
            b5,
            b6,
            b7,
            b8,
            c1,
            c2,
            c3,
            c4,
            c5,
            c6,
            c7,
            c8,
            c9,
        }
    }

    /// Partial of the weighted residual w.r.t. rx.
    fn arx(&self, p: &Point, coeff: &Point) -> f32 {
        (-self.a1 * p.x + self.a2 * p.y + self.a3 * p.z + self.a4) * coeff.x
            + (self.a5 * p.x - self.a6 * p.y + self.crx * p.z + self.a7) * coeff.y
            + (self.a8 * p.x - self.a9 * p.y - self.a10 * p.z + self.a11) * coeff.z
    }

    /// Partial w.r.t. ry.
    fn ary(&self, p: &Point, coeff: &Point) -> f32 {
        (self.b1 * p.x + self.b2 * p.y - self.b3 * p.z + self.b4) * coeff.x
            + (self.b5 * p.x + self.b6 * p.y - self.b7 * p.z + self.b8) * coeff.z
    }

    /// Partial w.r.t. rz.
    fn arz(&self, p: &Point, coeff: &Point) -> f32 {
        (self.c1 * p.x + self.c2 * p.y + self.c3) * coeff.x
            + (self.c4 * p.x - self.c5 * p.y + self.c6) * coeff.y
            + (self.c7 * p.x + self.c8 * p.y + self.c9) * coeff.z
    }

    /// Partial w.r.t. tx.
    fn atx(&self, coeff: &Point) -> f32 {
        -self.b5 * coeff.x + self.c5 * coeff.y + self.b1 * coeff.z
    }

    /// Partial w.r.t. ty.
    fn aty(&self, coeff: &Point) -> f32 {
        -self.b6 * coeff.x + self.c4 * coeff.y + self.b2 * coeff.z
    }

    /// Partial w.r.t. tz.
    fn atz(&self, coeff: &Point) -> f32 {
        self.b7 * coeff.x - self.srx * coeff.y - self.b3 * coeff.z
    }
}

/// Result of a degeneracy analysis: projection matrix and flag.
fn degeneracy_projection3(ata: &Matrix3<f32>) -> (Matrix3<f32>, bool) {
    let eigen = SymmetricEigen::new(*ata);

    // eigenpairs ordered by descending eigenvalue; eigenvectors as rows
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut v = Matrix3::zeros();
    for (row, &src) in order.iter().enumerate() {
        for col in 0..3 {
            v[(row, col)] = eigen.eigenvectors[(col, src)];
        }
    }

    let mut v2 = v;
    let mut degenerate = false;
    for i in (0..3).rev() {
        if eigen.eigenvalues[order[i]] < EIGEN_THRESHOLD {
            for col in 0..3 {
                v2[(i, col)] = 0.0;
            }
            degenerate = true;
        } else {
            break;
        }
    }

    let p = v.try_inverse().unwrap_or_else(Matrix3::identity) * v2;
    (p, degenerate)
}

fn degeneracy_projection6(ata: &Matrix6<f32>) -> (Matrix6<f32>, bool) {
    let eigen = SymmetricEigen::new(*ata);

    let mut order = [0usize, 1, 2, 3, 4, 5];
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut v = Matrix6::zeros();
    for (row, &src) in order.iter().enumerate() {
        for col in 0..6 {
            v[(row, col)] = eigen.eigenvectors[(col, src)];
        }
    }

    let mut v2 = v;
    let mut degenerate = false;
    for i in (0..6).rev() {
        if eigen.eigenvalues[order[i]] < EIGEN_THRESHOLD {
            for col in 0..6 {
                v2[(i, col)] = 0.0;
            }
            degenerate = true;
        } else {
            break;
        }
    }

    let p = v.try_inverse().unwrap_or_else(Matrix6::identity) * v2;
    (p, degenerate)
}

/// Levenberg-style incremental solver over the selected residuals.
#[derive(Debug)]
pub struct TransformSolver {
    is_degenerate: bool,
    mat_p3: Matrix3<f32>,
    mat_p6: Matrix6<f32>,
}

impl Default for TransformSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformSolver {
    pub fn new() -> Self {
        Self {
            is_degenerate: false,
            mat_p3: Matrix3::identity(),
            mat_p6: Matrix6::identity(),
        }
    }

    /// Whether the last analyzed system had unobservable directions.
    pub fn is_degenerate(&self) -> bool {
        self.is_degenerate
    }

    /// One surface iteration over the observable subset (rx, rz, ty).
    ///
    /// Returns `false` once the update drops below 0.1° / 0.1 cm.
    pub fn solve_surf(
        &mut self,
        cloud_ori: &PointCloud,
        coeff_sel: &PointCloud,
        transform: &mut [f32; 6],
        iter_count: usize,
    ) -> bool {
        let jc = JacobianCoeffs::new(transform);

        let mut ata = Matrix3::zeros();
        let mut atb = Vector3::zeros();
        for i in 0..cloud_ori.len() {
            let p = &cloud_ori[i];
            let coeff = &coeff_sel[i];
            let row = Vector3::new(jc.arx(p, coeff), jc.arz(p, coeff), jc.aty(coeff));
            let b = -0.05 * coeff.intensity;
            ata += row * row.transpose();
            atb += row * b;
        }

        if iter_count == 0 {
            let (p, degenerate) = degeneracy_projection3(&ata);
            self.mat_p3 = p;
            self.is_degenerate = degenerate;
        }

        let mut x = ata
            .col_piv_qr()
            .solve(&atb)
            .unwrap_or_else(Vector3::zeros);
        if self.is_degenerate {
            x = self.mat_p3 * x;
        }

        transform[0] += x[0];
        transform[2] += x[1];
        transform[4] += x[2];
        sanitize(transform);

        let delta_r = ((x[0] * RAD2DEG).powi(2) + (x[1] * RAD2DEG).powi(2)).sqrt();
        let delta_t = ((x[2] * 100.0).powi(2)).sqrt();
        !(delta_r < 0.1 && delta_t < 0.1)
    }

    /// One corner iteration over the observable subset (ry, tx, tz).
    pub fn solve_corner(
        &mut self,
        cloud_ori: &PointCloud,
        coeff_sel: &PointCloud,
        transform: &mut [f32; 6],
        iter_count: usize,
    ) -> bool {
        let jc = JacobianCoeffs::new(transform);

        let mut ata = Matrix3::zeros();
        let mut atb = Vector3::zeros();
        for i in 0..cloud_ori.len() {
            let p = &cloud_ori[i];
            let coeff = &coeff_sel[i];
            let row = Vector3::new(jc.ary(p, coeff), jc.atx(coeff), jc.atz(coeff));
            let b = -0.05 * coeff.intensity;
            ata += row * row.transpose();
            atb += row * b;
        }

        if iter_count == 0 {
            let (p, degenerate) = degeneracy_projection3(&ata);
            self.mat_p3 = p;
            self.is_degenerate = degenerate;
        }

        let mut x = ata
            .col_piv_qr()
            .solve(&atb)
            .unwrap_or_else(Vector3::zeros);
        if self.is_degenerate {
            x = self.mat_p3 * x;
        }

        transform[1] += x[0];
        transform[3] += x[1];
        transform[5] += x[2];
        sanitize(transform);

        let delta_r = ((x[0] * RAD2DEG).powi(2)).sqrt();
        let delta_t = ((x[1] * 100.0).powi(2) + (x[2] * 100.0).powi(2)).sqrt();
        !(delta_r < 0.1 && delta_t < 0.1)
    }

    /// One full 6-DoF iteration; the general kernel the split passes
    /// restrict to their observable parameter subsets.
    pub fn solve_full(
        &mut self,
        cloud_ori: &PointCloud,
        coeff_sel: &PointCloud,
        transform: &mut [f32; 6],
        iter_count: usize,
    ) -> bool {
        let jc = JacobianCoeffs::new(transform);

        let mut ata = Matrix6::zeros();
        let mut atb = Vector6::zeros();
        for i in 0..cloud_ori.len() {
            let p = &cloud_ori[i];
            let coeff = &coeff_sel[i];
            let row = Vector6::new(
                jc.arx(p, coeff),
                jc.ary(p, coeff),
                jc.arz(p, coeff),
                jc.atx(coeff),
                jc.aty(coeff),
                jc.atz(coeff),
            );
            let b = -0.05 * coeff.intensity;
            ata += row * row.transpose();
            atb += row * b;
        }

        if iter_count == 0 {
            let (p, degenerate) = degeneracy_projection6(&ata);
            self.mat_p6 = p;
            self.is_degenerate = degenerate;
        }

        let mut x = ata
            .col_piv_qr()
            .solve(&atb)
            .unwrap_or_else(Vector6::zeros);
        if self.is_degenerate {
            x = self.mat_p6 * x;
        }

        for (t, xi) in transform.iter_mut().zip(x.iter()) {
            *t += *xi;
        }
        sanitize(transform);

        let delta_r = ((x[0] * RAD2DEG).powi(2) + (x[1] * RAD2DEG).powi(2)
            + (x[2] * RAD2DEG).powi(2))
        .sqrt();
        let delta_t =
            ((x[3] * 100.0).powi(2) + (x[4] * 100.0).powi(2) + (x[5] * 100.0).powi(2)).sqrt();
        !(delta_r < 0.1 && delta_t < 0.1)
    }
}

/// Reset NaN components; a bad residual must not poison the estimate.
fn sanitize(transform: &mut [f32; 6]) {
    for t in transform.iter_mut() {
        if t.is_nan() {
            *t = 0.0;
        }
    }
}
