//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated room:
//! - True positions of every walker (random walk, wall-aware)
//! - Camera poses, including cameras that sweep back and forth
//! - Detector output synthesized from ground truth (line of sight + pixel noise)

use nalgebra::Point2;
use overwatch_core::overwatch_projection::{bbox_for, is_in_view};
use overwatch_core::schemas::{BoundingBox, CameraPose, DetectionBatch, DetectionRecord, PoseUpdate};
use overwatch_core::validation::GroundTruthEntry;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Direction attempts per step before a walker stands still.
const MAX_STEP_ATTEMPTS: usize = 8;

// ============================================================================
// WALLS
// ============================================================================

/// An opaque wall segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub a: Point2<f64>,
    pub b: Point2<f64>,
}

impl Wall {
    pub fn new(ax: f64, ay: f64, bx: f64, by: f64) -> Self {
        Self {
            a: Point2::new(ax, ay),
            b: Point2::new(bx, by),
        }
    }
}

/// Interior walls of the reference 12m x 10m room.
pub fn default_walls() -> Vec<Wall> {
    vec![
        Wall::new(4.0, 2.0, 4.0, 6.0),
        Wall::new(2.0, 5.0, 7.0, 5.0),
        Wall::new(6.0, 6.5, 6.0, 8.0),
        Wall::new(7.5, 0.5, 7.5, 4.0),
    ]
}

fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// True if segments `pq` and `rs` strictly straddle each other.
/// Touching at an endpoint does not count.
pub fn segments_cross(p: &Point2<f64>, q: &Point2<f64>, r: &Point2<f64>, s: &Point2<f64>) -> bool {
    cross(p, q, r) * cross(p, q, s) < 0.0 && cross(r, s, p) * cross(r, s, q) < 0.0
}

pub fn has_line_of_sight(from: &Point2<f64>, to: &Point2<f64>, walls: &[Wall]) -> bool {
    !walls.iter().any(|w| segments_cross(from, to, &w.a, &w.b))
}

// ============================================================================
// ENTITIES
// ============================================================================

/// A simulated person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Walker {
    pub id: u64,
    pub position: Point2<f64>,
    /// Radians, counter-clockwise from +x
    pub heading: f64,
    /// Metres per second; zero for scripted walkers
    pub speed: f64,
    /// Heading noise standard deviation per step (radians)
    pub wander: f64,
    pub active: bool,
}

/// Sweeps a camera's heading sinusoidally around a centre bearing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Patrol {
    pub center_heading_deg: f64,
    pub sweep_deg: f64,
    pub period_s: f64,
}

impl Patrol {
    pub fn heading_at(&self, t: f64) -> f64 {
        self.center_heading_deg + self.sweep_deg * (2.0 * PI * t / self.period_s).sin()
    }
}

#[derive(Debug, Clone)]
pub struct SimCamera {
    pub pose: CameraPose,
    pub max_range_m: f64,
    pub patrol: Option<Patrol>,
}

// ============================================================================
// ORACLE
// ============================================================================

/// The Oracle - maintains ground truth and generates detector frames.
pub struct Oracle {
    /// RNG for walks and pixel noise
    physics_rng: ChaCha8Rng,

    walkers: BTreeMap<u64, Walker>,
    cameras: Vec<SimCamera>,
    walls: Vec<Wall>,

    room_min: Point2<f64>,
    room_max: Point2<f64>,

    next_id: u64,
    current_time: f64,

    /// Per-coordinate bbox noise standard deviation (pixels)
    bbox_noise_px: f64,
    person_height_m: f64,
}

impl Oracle {
    /// Creates an Oracle over the reference room with no walls or cameras.
    pub fn new(physics_rng: ChaCha8Rng) -> Self {
        Self {
            physics_rng,
            walkers: BTreeMap::new(),
            cameras: Vec::new(),
            walls: Vec::new(),
            room_min: Point2::new(0.4, 0.4),
            room_max: Point2::new(11.6, 9.6),
            next_id: 1,
            current_time: 0.0,
            bbox_noise_px: 1.5,
            person_height_m: overwatch_core::DEFAULT_PERSON_HEIGHT_M,
        }
    }

    pub fn set_walls(&mut self, walls: Vec<Wall>) {
        self.walls = walls;
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn set_room(&mut self, min: Point2<f64>, max: Point2<f64>) {
        self.room_min = min;
        self.room_max = max;
    }

    pub fn set_bbox_noise(&mut self, std_dev_px: f64) {
        self.bbox_noise_px = std_dev_px;
    }

    pub fn add_camera(&mut self, pose: CameraPose, max_range_m: f64) {
        self.cameras.push(SimCamera {
            pose,
            max_range_m,
            patrol: None,
        });
    }

    pub fn add_patrol_camera(&mut self, pose: CameraPose, max_range_m: f64, sweep_deg: f64, period_s: f64) {
        let patrol = Patrol {
            center_heading_deg: pose.heading_deg,
            sweep_deg,
            period_s,
        };
        self.cameras.push(SimCamera {
            pose,
            max_range_m,
            patrol: Some(patrol),
        });
    }

    /// Adds a random walker and returns its id.
    pub fn spawn_walker(&mut self, x: f64, y: f64, speed: f64, wander: f64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let heading = self.physics_rng.gen_range(0.0..2.0 * PI);
        self.walkers.insert(
            id,
            Walker {
                id,
                position: Point2::new(x, y),
                heading,
                speed,
                wander,
                active: true,
            },
        );
        id
    }

    /// Moves a walker directly (scripted scenarios).
    pub fn place_walker(&mut self, id: u64, x: f64, y: f64) {
        if let Some(walker) = self.walkers.get_mut(&id) {
            walker.position = Point2::new(x, y);
        }
    }

    pub fn remove_walker(&mut self, id: u64) {
        if let Some(walker) = self.walkers.get_mut(&id) {
            walker.active = false;
        }
    }

    /// Advances the world by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        let t = self.current_time;

        for camera in &mut self.cameras {
            if let Some(patrol) = camera.patrol {
                camera.pose.heading_deg = patrol.heading_at(t);
            }
        }

        let ids: Vec<u64> = self.walkers.keys().copied().collect();
        for id in ids {
            self.walk(id, dt);
        }
    }

    /// Random heading perturbation; moves crossing a wall are retried with a
    /// bounce, and the walker stands still if every attempt is blocked.
    fn walk(&mut self, id: u64, dt: f64) {
        let Some(walker) = self.walkers.get(&id) else { return };
        if !walker.active || walker.speed <= 0.0 {
            return;
        }
        let (start, mut heading, step, wander) = (walker.position, walker.heading, walker.speed * dt, walker.wander);
        let turn = Normal::new(0.0, wander).ok();

        let mut next = start;
        for _ in 0..MAX_STEP_ATTEMPTS {
            if let Some(turn) = &turn {
                heading += turn.sample(&mut self.physics_rng);
            }
            let candidate = Point2::new(
                (start.x + step * heading.cos()).clamp(self.room_min.x, self.room_max.x),
                (start.y + step * heading.sin()).clamp(self.room_min.y, self.room_max.y),
            );
            if has_line_of_sight(&start, &candidate, &self.walls) {
                next = candidate;
                break;
            }
            heading += self.physics_rng.gen_range(0.5..1.5);
        }

        if let Some(walker) = self.walkers.get_mut(&id) {
            walker.position = next;
            walker.heading = heading;
        }
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn active_walkers(&self) -> impl Iterator<Item = &Walker> {
        self.walkers.values().filter(|w| w.active)
    }

    pub fn walker(&self, id: u64) -> Option<&Walker> {
        self.walkers.get(&id)
    }

    pub fn cameras(&self) -> &[SimCamera] {
        &self.cameras
    }

    /// Current pose of every camera as a pose feed message.
    pub fn pose_updates(&self, timestamp: f64) -> Vec<PoseUpdate> {
        self.cameras
            .iter()
            .map(|c| PoseUpdate {
                camera_id: c.pose.id.clone(),
                position: [c.pose.position.x, c.pose.position.y],
                heading_deg: c.pose.heading_deg,
                timestamp,
                horizontal_fov_deg: Some(c.pose.horizontal_fov_deg),
                image_width: Some(c.pose.image_width),
                image_height: Some(c.pose.image_height),
            })
            .collect()
    }

    pub fn ground_truth(&self, timestamp: f64) -> Vec<GroundTruthEntry> {
        self.active_walkers()
            .map(|w| GroundTruthEntry {
                person_id: w.id,
                position: w.position,
                timestamp,
            })
            .collect()
    }

    /// Whether `camera` would report `walker` right now.
    pub fn sees(&self, camera: &SimCamera, walker: &Walker) -> bool {
        walker.active
            && is_in_view(&camera.pose, walker.position.x, walker.position.y, camera.max_range_m)
            && has_line_of_sight(&camera.pose.position, &walker.position, &self.walls)
    }

    /// One detector frame per camera, stamped with `timestamp`.
    ///
    /// Local track ids equal walker ids. Confidence oscillates slowly per
    /// walker so fusion weighting is exercised.
    pub fn detections(&mut self, timestamp: f64) -> Vec<DetectionBatch> {
        let noise = Normal::new(0.0, self.bbox_noise_px).ok().filter(|_| self.bbox_noise_px > 0.0);
        let t = self.current_time;
        let mut batches = Vec::with_capacity(self.cameras.len());

        for camera in &self.cameras {
            let mut tracks = Vec::new();
            for walker in self.walkers.values() {
                if !self.sees(camera, walker) {
                    continue;
                }
                let Some(bbox) = bbox_for(&camera.pose, walker.position.x, walker.position.y, self.person_height_m)
                else {
                    continue;
                };
                let bbox = match &noise {
                    Some(n) => jitter(bbox, n, &mut self.physics_rng),
                    None => bbox,
                };
                let confidence = (0.85 + 0.1 * (t * 0.7 + walker.id as f64).sin()).min(1.0);
                tracks.push(DetectionRecord {
                    track_id: walker.id,
                    bbox: clamp_to_image(bbox, &camera.pose),
                    confidence,
                });
            }
            batches.push(DetectionBatch {
                camera_id: camera.pose.id.clone(),
                timestamp,
                tracks,
            });
        }
        batches
    }
}

fn jitter(bbox: BoundingBox, noise: &Normal<f64>, rng: &mut ChaCha8Rng) -> BoundingBox {
    BoundingBox::new(
        bbox.x1 + noise.sample(rng),
        bbox.y1 + noise.sample(rng),
        bbox.x2 + noise.sample(rng),
        bbox.y2 + noise.sample(rng),
    )
}

fn clamp_to_image(bbox: BoundingBox, pose: &CameraPose) -> BoundingBox {
    let w = pose.image_width as f64;
    let h = pose.image_height as f64;
    BoundingBox::new(
        bbox.x1.clamp(0.0, w),
        bbox.y1.clamp(0.0, h),
        bbox.x2.clamp(0.0, w),
        bbox.y2.clamp(0.0, h),
    )
}
