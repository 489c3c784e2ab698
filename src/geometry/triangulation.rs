//! Multi-view triangulation.
//!
//! - Linear DLT over any number of views (normalized coordinates)
//! - Depth and parallax validation
//! - Point placement along a viewing ray for monocular bootstrap

use nalgebra::{Matrix3x4, Matrix4, Vector2, Vector3};

use crate::geometry::SE3;

/// A single view of a point: camera pose (T_wc) and normalized image coordinates.
#[derive(Debug, Clone, Copy)]
pub struct View {
    pub pose: SE3,
    pub normalized: Vector2<f64>,
}

/// Triangulate a point from two or more views with the linear DLT.
///
/// Each view contributes `x·P₃ − P₁` and `y·P₃ − P₂` rows; the solution is
/// the eigenvector of `AᵀA` with the smallest eigenvalue. Returns `None` for
/// fewer than two views, a point at infinity, or a point behind any camera.
pub fn triangulate_views(views: &[View]) -> Option<Vector3<f64>> {
    if views.len() < 2 {
        return None;
    }

    let mut ata = Matrix4::<f64>::zeros();
    for view in views {
        let p = projection_matrix(&view.pose.inverse());
        let row_x = view.normalized.x * p.row(2) - p.row(0);
        let row_y = view.normalized.y * p.row(2) - p.row(1);
        ata += row_x.transpose() * row_x + row_y.transpose() * row_y;
    }

    let eigen = ata.symmetric_eigen();
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let x_h = eigen.eigenvectors.column(min_idx);
    if x_h[3].abs() < 1e-12 {
        return None;
    }
    let point = Vector3::new(x_h[0], x_h[1], x_h[2]) / x_h[3];

    let in_front = views
        .iter()
        .all(|v| v.pose.inverse().transform_point(&point).z > 0.0);
    in_front.then_some(point)
}

/// Largest angle (radians) between the viewing rays of `point` from the views.
pub fn max_parallax(views: &[View], point: &Vector3<f64>) -> f64 {
    let rays: Vec<Vector3<f64>> = views
        .iter()
        .map(|v| (point - v.pose.translation).normalize())
        .collect();

    let mut max_angle = 0.0_f64;
    for i in 0..rays.len() {
        for j in (i + 1)..rays.len() {
            let cos = rays[i].dot(&rays[j]).clamp(-1.0, 1.0);
            max_angle = max_angle.max(cos.acos());
        }
    }
    max_angle
}

/// World point at `depth` (camera z) along the ray through `normalized`.
pub fn point_at_depth(pose_wc: &SE3, normalized: &Vector2<f64>, depth: f64) -> Vector3<f64> {
    let p_cam = Vector3::new(normalized.x * depth, normalized.y * depth, depth);
    pose_wc.transform_point(&p_cam)
}

/// Depth (camera z) of a world point seen from `pose_wc`.
pub fn depth_in(pose_wc: &SE3, point: &Vector3<f64>) -> f64 {
    pose_wc.inverse().transform_point(point).z
}

fn projection_matrix(pose_cw: &SE3) -> Matrix3x4<f64> {
    let mut p = Matrix3x4::zeros();
    p.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&pose_cw.rotation_matrix());
    p.fixed_view_mut::<3, 1>(0, 3).copy_from(&pose_cw.translation);
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn view_of(pose: SE3, point: &Vector3<f64>) -> View {
        let pc = pose.inverse().transform_point(point);
        View {
            pose,
            normalized: Vector2::new(pc.x / pc.z, pc.y / pc.z),
        }
    }

    #[test]
    fn test_two_view_exact() {
        let point = Vector3::new(0.4, -0.3, 5.0);
        let a = SE3::identity();
        let b = SE3::new(UnitQuaternion::identity(), Vector3::new(0.5, 0.0, 0.0));

        let est = triangulate_views(&[view_of(a, &point), view_of(b, &point)]).unwrap();
        assert_relative_eq!(est, point, epsilon = 1e-6);
    }

    #[test]
    fn test_straight_line_path() {
        // Camera moving along +x looking down +z.
        let points = [
            Vector3::new(-1.0, 0.5, 4.0),
            Vector3::new(0.0, -0.5, 6.0),
            Vector3::new(1.5, 0.2, 5.0),
            Vector3::new(0.3, 0.9, 3.0),
        ];
        let poses: Vec<SE3> = (0..5)
            .map(|i| SE3::new(UnitQuaternion::identity(), Vector3::new(0.2 * i as f64, 0.0, 0.0)))
            .collect();

        for point in &points {
            let views: Vec<View> = poses.iter().map(|p| view_of(*p, point)).collect();
            let est = triangulate_views(&views).unwrap();
            assert_relative_eq!(est, *point, epsilon = 1e-6);
            assert!(max_parallax(&views, point) > 0.05);
        }
    }

    #[test]
    fn test_rejects_single_view_and_behind() {
        let point = Vector3::new(0.0, 0.0, 5.0);
        assert!(triangulate_views(&[view_of(SE3::identity(), &point)]).is_none());

        // Diverging rays: the lines only meet behind both cameras.
        let a = SE3::identity();
        let b = SE3::new(UnitQuaternion::identity(), Vector3::new(0.5, 0.0, 0.0));
        let views = [
            View { pose: a, normalized: Vector2::new(0.0, 0.0) },
            View { pose: b, normalized: Vector2::new(0.1, 0.0) },
        ];
        assert!(triangulate_views(&views).is_none());
    }

    #[test]
    fn test_point_at_depth() {
        let pose = SE3::new(UnitQuaternion::identity(), Vector3::new(1.0, 0.0, 0.0));
        let p = point_at_depth(&pose, &Vector2::new(0.1, -0.2), 2.0);

        assert_relative_eq!(p, Vector3::new(1.2, -0.4, 2.0), epsilon = 1e-12);
        assert_relative_eq!(depth_in(&pose, &p), 2.0, epsilon = 1e-12);
    }
}
