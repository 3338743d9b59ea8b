//! Rotation kernels of the motion model.
//!
//! Every sign and trig product below is load-bearing: the pipeline works
//! in a camera-like frame whose rotations compose as
//! `R(rx, ry, rz) = Ry(ry) · Rx(rx) · Rz(rz)`, and the per-scan transform
//! is scaled by each point's fractional scan time before being applied.
//! Downstream consumers depend on this exact convention.

use crate::core::types::Point;
use crate::sensors::imu::ImuScanState;

/// Warp a point to the scan-start frame.
///
/// The point's fractional scan time (decoded from its tag) scales the
/// incremental transform, then the scaled inverse rotation is applied to
/// the translated point in z-x-y order.
pub fn transform_to_start(pi: &Point, transform: &[f32; 6]) -> Point {
    let s = 10.0 * pi.time_fraction();

    let rx = s * transform[0];
    let ry = s * transform[1];
    let rz = s * transform[2];
    let tx = s * transform[3];
    let ty = s * transform[4];
    let tz = s * transform[5];

    let x1 = rz.cos() * (pi.x - tx) + rz.sin() * (pi.y - ty);
    let y1 = -rz.sin() * (pi.x - tx) + rz.cos() * (pi.y - ty);
    let z1 = pi.z - tz;

    let x2 = x1;
    let y2 = rx.cos() * y1 + rx.sin() * z1;
    let z2 = -rx.sin() * y1 + rx.cos() * z1;

    Point {
        x: ry.cos() * x2 - ry.sin() * z2,
        y: y2,
        z: ry.sin() * x2 + ry.cos() * z2,
        intensity: pi.intensity,
    }
}

/// Warp a point to the scan-end frame.
///
/// First warps to scan start like [`transform_to_start`], then applies the
/// full (unscaled) incremental transform forward, and finally folds in the
/// IMU attitude difference between scan start and scan end so that the
/// output matches what the sensor would have measured at the end instant.
/// The integer ring tag is kept, the fractional time is dropped.
pub fn transform_to_end(pi: &Point, transform: &[f32; 6], imu: &ImuScanState) -> Point {
    let s = 10.0 * pi.time_fraction();

    let rx = s * transform[0];
    let ry = s * transform[1];
    let rz = s * transform[2];
    let tx = s * transform[3];
    let ty = s * transform[4];
    let tz = s * transform[5];

    let x1 = rz.cos() * (pi.x - tx) + rz.sin() * (pi.y - ty);
    let y1 = -rz.sin() * (pi.x - tx) + rz.cos() * (pi.y - ty);
    let z1 = pi.z - tz;

    let x2 = x1;
    let y2 = rx.cos() * y1 + rx.sin() * z1;
    let z2 = -rx.sin() * y1 + rx.cos() * z1;

    let x3 = ry.cos() * x2 - ry.sin() * z2;
    let y3 = y2;
    let z3 = ry.sin() * x2 + ry.cos() * z2;

    let rx = transform[0];
    let ry = transform[1];
    let rz = transform[2];
    let tx = transform[3];
    let ty = transform[4];
    let tz = transform[5];

    let x4 = ry.cos() * x3 + ry.sin() * z3;
    let y4 = y3;
    let z4 = -ry.sin() * x3 + ry.cos() * z3;

    let x5 = x4;
    let y5 = rx.cos() * y4 - rx.sin() * z4;
    let z5 = rx.sin() * y4 + rx.cos() * z4;

    let x6 = rz.cos() * x5 - rz.sin() * y5 + tx;
    let y6 = rz.sin() * x5 + rz.cos() * y5 + ty;
    let z6 = z5 + tz;

    let x7 = imu.cos_roll_start * (x6 - imu.shift_from_start.x)
        - imu.sin_roll_start * (y6 - imu.shift_from_start.y);
    let y7 = imu.sin_roll_start * (x6 - imu.shift_from_start.x)
        + imu.cos_roll_start * (y6 - imu.shift_from_start.y);
    let z7 = z6 - imu.shift_from_start.z;

    let x8 = x7;
    let y8 = imu.cos_pitch_start * y7 - imu.sin_pitch_start * z7;
    let z8 = imu.sin_pitch_start * y7 + imu.cos_pitch_start * z7;

    let x9 = imu.cos_yaw_start * x8 + imu.sin_yaw_start * z8;
    let y9 = y8;
    let z9 = -imu.sin_yaw_start * x8 + imu.cos_yaw_start * z8;

    let x10 = imu.yaw_last.cos() * x9 - imu.yaw_last.sin() * z9;
    let y10 = y9;
    let z10 = imu.yaw_last.sin() * x9 + imu.yaw_last.cos() * z9;

    let x11 = x10;
    let y11 = imu.pitch_last.cos() * y10 + imu.pitch_last.sin() * z10;
    let z11 = -imu.pitch_last.sin() * y10 + imu.pitch_last.cos() * z10;

    Point {
        x: imu.roll_last.cos() * x11 + imu.roll_last.sin() * y11,
        y: -imu.roll_last.sin() * x11 + imu.roll_last.cos() * y11,
        z: z11,
        intensity: (pi.intensity as i32) as f32,
    }
}

/// Compose two rotations given as Euler triples of the working convention.
///
/// Returns the Euler angles of `R(cx, cy, cz) · R(lx, ly, lz)` where
/// `R(x, y, z) = Ry(y) · Rx(x) · Rz(z)`. Used to fold the per-scan
/// increment into the accumulated pose.
pub fn accumulate_rotation(
    cx: f32,
    cy: f32,
    cz: f32,
    lx: f32,
    ly: f32,
    lz: f32,
) -> (f32, f32, f32) {
    let srx = lx.cos() * cx.cos() * ly.sin() * cz.sin() - cx.cos() * cz.cos() * lx.sin()
        - lx.cos() * ly.cos() * cx.sin();
    let ox = -srx.asin();

    let srycrx = lx.sin() * (cy.cos() * cz.sin() - cz.cos() * cx.sin() * cy.sin())
        + lx.cos() * ly.sin() * (cy.cos() * cz.cos() + cx.sin() * cy.sin() * cz.sin())
        + lx.cos() * ly.cos() * cx.cos() * cy.sin();
    let crycrx = lx.cos() * ly.cos() * cx.cos() * cy.cos()
        - lx.cos() * ly.sin() * (cz.cos() * cy.sin() - cy.cos() * cx.sin() * cz.sin())
        - lx.sin() * (cy.sin() * cz.sin() + cy.cos() * cz.cos() * cx.sin());
    let oy = f32::atan2(srycrx / ox.cos(), crycrx / ox.cos());

    let srzcrx = cx.sin() * (lz.cos() * ly.sin() - ly.cos() * lx.sin() * lz.sin())
        + cx.cos() * cz.sin() * (ly.cos() * lz.cos() + lx.sin() * ly.sin() * lz.sin())
        + lx.cos() * cx.cos() * cz.cos() * lz.sin();
    let crzcrx = lx.cos() * lz.cos() * cx.cos() * cz.cos()
        - cx.cos() * cz.sin() * (ly.cos() * lz.sin() - lz.cos() * lx.sin() * ly.sin())
        - cx.sin() * (ly.sin() * lz.sin() + ly.cos() * lz.cos() * lx.sin());
    let oz = f32::atan2(srzcrx / ox.cos(), crzcrx / ox.cos());

    (ox, oy, oz)
}

/// Fold the IMU attitude delta of one scan into an accumulated rotation.
///
/// `bc*` is the accumulated rotation, `bl*` the IMU attitude at scan start
/// and `al*` the IMU attitude at scan end; the result replaces the
/// accumulated rotation.
#[allow(clippy::too_many_arguments)]
pub fn plugin_imu_rotation(
    bcx: f32,
    bcy: f32,
    bcz: f32,
    blx: f32,
    bly: f32,
    blz: f32,
    alx: f32,
    aly: f32,
    alz: f32,
) -> (f32, f32, f32) {
    let sbcx = bcx.sin();
    let cbcx = bcx.cos();
    let sbcy = bcy.sin();
    let cbcy = bcy.cos();
    let sbcz = bcz.sin();
    let cbcz = bcz.cos();

    let sblx = blx.sin();
    let cblx = blx.cos();
    let sbly = bly.sin();
    let cbly = bly.cos();
    let sblz = blz.sin();
    let cblz = blz.cos();

    let salx = alx.sin();
    let calx = alx.cos();
    let saly = aly.sin();
    let caly = aly.cos();
    let salz = alz.sin();
    let calz = alz.cos();

    let srx = -sbcx * (salx * sblx + calx * caly * cblx * cbly + calx * cblx * saly * sbly)
        - cbcx
            * cbcz
            * (calx * saly * (cbly * sblz - cblz * sblx * sbly)
                - calx * caly * (sbly * sblz + cbly * cblz * sblx)
                + cblx * cblz * salx)
        - cbcx
            * sbcz
            * (calx * caly * (cblz * sbly - cbly * sblx * sblz)
                - calx * saly * (cbly * cblz + sblx * sbly * sblz)
                + cblx * salx * sblz);
    let acx = -srx.asin();

    let srycrx = (cbcy * sbcz - cbcz * sbcx * sbcy)
        * (calx * saly * (cbly * sblz - cblz * sblx * sbly)
            - calx * caly * (sbly * sblz + cbly * cblz * sblx)
            + cblx * cblz * salx)
        - (cbcy * cbcz + sbcx * sbcy * sbcz)
            * (calx * caly * (cblz * sbly - cbly * sblx * sblz)
                - calx * saly * (cbly * cblz + sblx * sbly * sblz)
                + cblx * salx * sblz)
        + cbcx * sbcy * (salx * sblx + calx * caly * cblx * cbly + calx * cblx * saly * sbly);
    let crycrx = (cbcz * sbcy - cbcy * sbcx * sbcz)
        * (calx * caly * (cblz * sbly - cbly * sblx * sblz)
            - calx * saly * (cbly * cblz + sblx * sbly * sblz)
            + cblx * salx * sblz)
        - (sbcy * sbcz + cbcy * cbcz * sbcx)
            * (calx * saly * (cbly * sblz - cblz * sblx * sbly)
                - calx * caly * (sbly * sblz + cbly * cblz * sblx)
                + cblx * cblz * salx)
        + cbcx * cbcy * (salx * sblx + calx * caly * cblx * cbly + calx * cblx * saly * sbly);
    let acy = f32::atan2(srycrx / acx.cos(), crycrx / acx.cos());

    let srzcrx = sbcx
        * (cblx * cbly * (calz * saly - caly * salx * salz)
            - cblx * sbly * (caly * calz + salx * saly * salz)
            + calx * salz * sblx)
        - cbcx
            * cbcz
            * ((caly * calz + salx * saly * salz) * (cbly * sblz - cblz * sblx * sbly)
                + (calz * saly - caly * salx * salz) * (sbly * sblz + cbly * cblz * sblx)
                - calx * cblx * cblz * salz)
        + cbcx
            * sbcz
            * ((caly * calz + salx * saly * salz) * (cbly * cblz + sblx * sbly * sblz)
                + (calz * saly - caly * salx * salz) * (cblz * sbly - cbly * sblx * sblz)
                + calx * cblx * salz * sblz);
    let crzcrx = sbcx
        * (cblx * sbly * (caly * salz - calz * salx * saly)
            - cblx * cbly * (saly * salz + caly * calz * salx)
            + calx * calz * sblx)
        + cbcx
            * cbcz
            * ((saly * salz + caly * calz * salx) * (sbly * sblz + cbly * cblz * sblx)
                + (caly * salz - calz * salx * saly) * (cbly * sblz - cblz * sblx * sbly)
                + calx * calz * cblx * cblz)
        - cbcx
            * sbcz
            * ((saly * salz + caly * calz * salx) * (cblz * sbly - cbly * sblx * sblz)
                + (caly * salz - calz * salx * saly) * (cbly * cblz + sblx * sbly * sblz)
                - calx * calz * cblx * sblz);
    let acz = f32::atan2(srzcrx / acx.cos(), crzcrx / acx.cos());

    (acx, acy, acz)
}

/// Quaternion (x, y, z, w) of a roll-pitch-yaw attitude (z-y-x order).
pub fn rpy_to_quaternion(roll: f32, pitch: f32, yaw: f32) -> [f32; 4] {
    let (sr, cr) = (roll * 0.5).sin_cos();
    let (sp, cp) = (pitch * 0.5).sin_cos();
    let (sy, cy) = (yaw * 0.5).sin_cos();

    [
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
        cr * cp * cy + sr * sp * sy,
    ]
}
