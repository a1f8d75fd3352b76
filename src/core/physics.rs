use crate::config::PhysicsConfig;
use crate::node::NodeState;
use crate::vector::Vec3;

/// Result of one integration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
}

impl Motion {
    /// Magnitude of the pull felt this step.
    pub fn gravity(&self) -> f64 {
        self.acceleration.norm()
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite() && self.acceleration.is_finite()
    }
}

/// Inverse-square attraction toward connected neighbors, integrated with
/// semi-implicit Euler.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsIntegrator {
    cfg: PhysicsConfig,
}

impl PhysicsIntegrator {
    pub fn new(cfg: PhysicsConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.cfg
    }

    /// Net acceleration toward `connected` from `position`.
    pub fn attraction(&self, position: Vec3, connected: &[Vec3]) -> Vec3 {
        let min_sq = self.cfg.min_distance * self.cfg.min_distance;
        let mut pull = Vec3::ZERO;
        for &other in connected {
            let delta = other - position;
            let d = delta.norm();
            // Touching (or coincident) neighbors exert no pull.
            if !(d > self.cfg.contact_distance) {
                continue;
            }
            let Some(dir) = delta.normalized() else {
                continue;
            };
            pull += dir * (1.0 / (d * d).max(min_sq));
        }
        pull * self.cfg.gravity
    }

    pub fn step(&self, node: &NodeState, connected: &[Vec3], dt: f64) -> Motion {
        if node.is_anchor {
            return Motion {
                position: node.position,
                velocity: Vec3::ZERO,
                acceleration: Vec3::ZERO,
            };
        }

        let acceleration = self.attraction(node.position, connected);
        let mut velocity = node.velocity + acceleration * dt;

        // Isolated nodes keep drifting; bonds bleed off speed until they settle.
        if !connected.is_empty() {
            velocity = velocity * (1.0 - self.cfg.damping * dt).max(0.0);
            if acceleration == Vec3::ZERO && velocity.norm() < self.cfg.rest_speed {
                velocity = Vec3::ZERO;
            }
        }

        Motion {
            position: node.position + velocity * dt,
            velocity,
            acceleration,
        }
    }
}

impl Default for PhysicsIntegrator {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pos: Vec3, vel: Vec3) -> NodeState {
        NodeState::new(pos, vel, false)
    }

    #[test]
    fn anchors_do_not_move() {
        let phys = PhysicsIntegrator::default();
        let mut s = state(Vec3::new(1.0, 2.0, 3.0), Vec3::new(5.0, 0.0, 0.0));
        s.is_anchor = true;
        let m = phys.step(&s, &[Vec3::new(9.0, 9.0, 9.0)], 1.0);
        assert_eq!(m.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.velocity, Vec3::ZERO);
    }

    #[test]
    fn isolated_nodes_drift_without_acceleration() {
        let phys = PhysicsIntegrator::default();
        let s = state(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        let m = phys.step(&s, &[], 0.5);
        assert_eq!(m.acceleration, Vec3::ZERO);
        assert_eq!(m.velocity, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(m.position, Vec3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn pull_points_at_neighbor_with_inverse_square_strength() {
        let phys = PhysicsIntegrator::new(PhysicsConfig {
            damping: 0.0,
            ..PhysicsConfig::default()
        });
        let s = state(Vec3::ZERO, Vec3::ZERO);

        let near = phys.step(&s, &[Vec3::new(2.0, 0.0, 0.0)], 1.0);
        let far = phys.step(&s, &[Vec3::new(4.0, 0.0, 0.0)], 1.0);

        assert!((near.acceleration.x - 0.25).abs() < 1e-12);
        assert!((far.acceleration.x - 0.0625).abs() < 1e-12);
        assert_eq!(near.acceleration.y, 0.0);
        // Semi-implicit: the new velocity moves the position this step.
        assert!((near.position.x - 0.25).abs() < 1e-12);
    }

    #[test]
    fn near_zero_distance_is_clamped() {
        let phys = PhysicsIntegrator::new(PhysicsConfig {
            contact_distance: 0.0,
            min_distance: 0.1,
            ..PhysicsConfig::default()
        });
        let a = phys.attraction(Vec3::ZERO, &[Vec3::new(1e-9, 0.0, 0.0)]);
        assert!(a.is_finite());
        assert!((a.x - 100.0).abs() < 1e-6);

        // Coincident points have no direction.
        assert_eq!(phys.attraction(Vec3::ZERO, &[Vec3::ZERO]), Vec3::ZERO);
    }

    #[test]
    fn bonded_nodes_in_contact_come_to_rest() {
        let phys = PhysicsIntegrator::default();
        let mut s = state(Vec3::ZERO, Vec3::new(0.01, 0.0, 0.0));
        let neighbor = [Vec3::new(0.2, 0.0, 0.0)];
        for _ in 0..200 {
            let m = phys.step(&s, &neighbor, 0.25);
            s.position = m.position;
            s.velocity = m.velocity;
        }
        assert_eq!(s.velocity, Vec3::ZERO);
    }
}
