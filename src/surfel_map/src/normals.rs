//! Per-point surface normal estimation in the sensor frame.
//!
//! Organized clouds use image-grid neighbours (cross product of the
//! horizontal and vertical differences). Unorganized clouds fall back to PCA
//! over a radius neighbourhood found through a KD-tree. Either way every
//! normal is flipped to face the sensor.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

use crate::types::{ColoredPoint, RawCloud};

/// Bucket size for the KD-tree.
///
/// Depth images are dominated by planes, where many points share a
/// coordinate on one axis; the default of 32 overflows buckets there.
const BUCKET_SIZE: usize = 256;

/// Cross products shorter than this are treated as degenerate.
const MIN_CROSS_NORM: f32 = 1e-12;

/// Parameters for unorganized normal estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalEstimation {
    /// Neighbourhood radius in meters
    pub search_radius: f32,
    /// Minimum neighbours (including the point itself) for a defined normal
    pub min_neighbors: usize,
}

impl Default for NormalEstimation {
    fn default() -> Self {
        Self {
            search_radius: 0.03,
            min_neighbors: 5,
        }
    }
}

/// Estimate one normal per point. `None` marks an undefined normal.
///
/// Precomputed normals carried by the cloud take precedence. The result
/// always has one entry per point; points without a precomputed normal get
/// `None`.
pub fn estimate_normals(cloud: &RawCloud, params: &NormalEstimation) -> Vec<Option<Vector3<f32>>> {
    if let Some(normals) = &cloud.normals {
        return cloud
            .points
            .iter()
            .enumerate()
            .map(|(i, point)| {
                let n = Vector3::from(*normals.get(i)?);
                if !point.is_finite() || !n.iter().all(|v| v.is_finite()) {
                    return None;
                }
                n.try_normalize(MIN_CROSS_NORM)
                    .map(|n| orient_towards_sensor(n, &point.xyz))
            })
            .collect();
    }

    if cloud.is_organized() {
        organized_normals(&cloud.points, cloud.width as usize, cloud.height as usize)
    } else {
        unorganized_normals(&cloud.points, params)
    }
}

/// Flip `normal` so that it points at the sensor origin.
pub fn orient_towards_sensor(normal: Vector3<f32>, point: &[f32; 3]) -> Vector3<f32> {
    if normal.dot(&Vector3::from(*point)) > 0.0 {
        -normal
    } else {
        normal
    }
}

fn organized_normals(
    points: &[ColoredPoint],
    width: usize,
    height: usize,
) -> Vec<Option<Vector3<f32>>> {
    let at = |u: usize, v: usize| -> Option<Vector3<f32>> {
        let point = &points[v * width + u];
        point.is_finite().then(|| Vector3::from(point.xyz))
    };

    (0..points.len())
        .into_par_iter()
        .map(|index| {
            let (u, v) = (index % width, index / width);
            let center = at(u, v)?;

            let horizontal = if u + 1 < width {
                at(u + 1, v)? - center
            } else if u > 0 {
                center - at(u - 1, v)?
            } else {
                return None;
            };

            let vertical = if v + 1 < height {
                at(u, v + 1)? - center
            } else if v > 0 {
                center - at(u, v - 1)?
            } else {
                return None;
            };

            let normal = horizontal.cross(&vertical).try_normalize(MIN_CROSS_NORM)?;
            Some(orient_towards_sensor(normal, &points[index].xyz))
        })
        .collect()
}

fn unorganized_normals(
    points: &[ColoredPoint],
    params: &NormalEstimation,
) -> Vec<Option<Vector3<f32>>> {
    // Index only finite points; `finite_index` maps KD-tree items back.
    let (finite, finite_index): (Vec<[f32; 3]>, Vec<usize>) = points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_finite())
        .map(|(i, p)| (p.xyz, i))
        .unzip();

    if finite.is_empty() {
        return vec![None; points.len()];
    }

    let kdtree: ImmutableKdTree<f32, u64, 3, BUCKET_SIZE> = (&*finite).into();
    let radius_sq = params.search_radius * params.search_radius;
    let min_neighbors = params.min_neighbors.max(3);

    let estimated: Vec<Option<Vector3<f32>>> = finite
        .par_iter()
        .map(|query| {
            let neighbours = kdtree.within::<SquaredEuclidean>(query, radius_sq);
            if neighbours.len() < min_neighbors {
                return None;
            }
            let positions: Vec<[f32; 3]> = neighbours
                .iter()
                .map(|nn| finite[nn.item as usize])
                .collect();
            let normal = plane_normal(&positions)?;
            Some(orient_towards_sensor(normal, query))
        })
        .collect();

    let mut normals = vec![None; points.len()];
    for (normal, &original) in estimated.into_iter().zip(&finite_index) {
        normals[original] = normal;
    }
    normals
}

/// Smallest-eigenvalue eigenvector of the neighbourhood covariance.
fn plane_normal(positions: &[[f32; 3]]) -> Option<Vector3<f32>> {
    let n = positions.len() as f64;
    let mean = positions
        .iter()
        .fold(Vector3::<f64>::zeros(), |acc, p| {
            acc + Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64)
        })
        / n;

    let covariance = positions.iter().fold(Matrix3::<f64>::zeros(), |acc, p| {
        let d = Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64) - mean;
        acc + d * d.transpose()
    }) / n;

    let eigen = covariance.symmetric_eigen();
    let (smallest, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;

    let normal = eigen.eigenvectors.column(smallest).into_owned();
    normal
        .cast::<f32>()
        .try_normalize(MIN_CROSS_NORM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraIntrinsics;
    use crate::stamp::Stamp;
    use crate::test_utils::make_plane_cloud;
    use approx::assert_relative_eq;
    use rand::Rng;

    #[test]
    fn test_organized_plane_faces_sensor() {
        let camera = CameraIntrinsics::default();
        let cloud = make_plane_cloud(Stamp::default(), &camera, 16, 12, 1.5, [10, 20, 30]);
        let normals = estimate_normals(&cloud, &NormalEstimation::default());

        assert_eq!(normals.len(), cloud.len());
        for normal in &normals {
            let n = normal.expect("plane normals are defined everywhere");
            assert_relative_eq!(n, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_organized_invalid_neighbour() {
        let camera = CameraIntrinsics::default();
        let mut cloud = make_plane_cloud(Stamp::default(), &camera, 4, 4, 1.0, [0, 0, 0]);
        cloud.points[5].xyz = [f32::NAN; 3];
        let normals = estimate_normals(&cloud, &NormalEstimation::default());

        assert!(normals[5].is_none());
        // Pixel 4 uses its right neighbour 5.
        assert!(normals[4].is_none());
        // Pixel 1 uses its down neighbour 5.
        assert!(normals[1].is_none());
        assert!(normals[0].is_some());
    }

    #[test]
    fn test_unorganized_tilted_plane() {
        let mut rng = rand::thread_rng();
        // Plane z = 2 + 0.5 x, sampled densely around the optical axis.
        let points: Vec<ColoredPoint> = (0..2000)
            .map(|_| {
                let x: f32 = rng.gen_range(-0.1..0.1);
                let y: f32 = rng.gen_range(-0.1..0.1);
                ColoredPoint::new([x, y, 2.0 + 0.5 * x], [0, 0, 0])
            })
            .collect();
        let cloud = RawCloud::unorganized(Stamp::default(), "camera", points);
        let normals = estimate_normals(&cloud, &NormalEstimation::default());

        let expected = Vector3::new(0.5, 0.0, -1.0).normalize();
        let defined: Vec<_> = normals.iter().flatten().collect();
        assert!(defined.len() > 1900);
        for n in defined {
            assert_relative_eq!(*n, expected, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_unorganized_sparse_points_undefined() {
        let points = vec![
            ColoredPoint::new([0.0, 0.0, 1.0], [0, 0, 0]),
            ColoredPoint::new([1.0, 0.0, 1.0], [0, 0, 0]),
            ColoredPoint::new([f32::NAN, 0.0, 1.0], [0, 0, 0]),
        ];
        let cloud = RawCloud::unorganized(Stamp::default(), "camera", points);
        let normals = estimate_normals(&cloud, &NormalEstimation::default());
        assert_eq!(normals, vec![None, None, None]);
    }

    #[test]
    fn test_precomputed_normals_are_oriented() {
        let cloud = RawCloud::unorganized(
            Stamp::default(),
            "camera",
            vec![
                ColoredPoint::new([0.0, 0.0, 1.0], [0, 0, 0]),
                ColoredPoint::new([0.0, 0.0, 1.0], [0, 0, 0]),
            ],
        )
        .with_normals(vec![[0.0, 0.0, 2.0], [0.0, 0.0, 0.0]]);
        let normals = estimate_normals(&cloud, &NormalEstimation::default());
        assert_relative_eq!(normals[0].unwrap(), Vector3::new(0.0, 0.0, -1.0));
        assert!(normals[1].is_none());
    }

    #[test]
    fn test_missing_precomputed_normals_are_undefined() {
        let cloud = RawCloud::unorganized(
            Stamp::default(),
            "camera",
            vec![ColoredPoint::new([0.0, 0.0, 1.0], [0, 0, 0]); 3],
        )
        .with_normals(vec![[0.0, 0.0, -1.0]]);
        let normals = estimate_normals(&cloud, &NormalEstimation::default());
        assert_eq!(normals.len(), 3);
        assert!(normals[0].is_some());
        assert!(normals[1].is_none());
        assert!(normals[2].is_none());
    }
}
