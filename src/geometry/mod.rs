//! Geometry utilities: SE3 transforms, P3P / PnP solving, triangulation.

pub mod p3p;
pub mod pnp;
pub mod se3;
pub mod so3;
pub mod triangulation;

pub use pnp::{estimate_pose, solve_pnp_ransac, solve_pnp_ransac_with_rng, PnPResult, RansacConfig};
pub use se3::SE3;
