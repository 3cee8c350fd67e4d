//! Grid navigation where the rewarded goal depends on a context signal
//!
//! Each goal is a region of the map marked by its own character. One goal is
//! active at a time; the environment announces which through a one-hot
//! context vector and switches to a random goal every `context_delay` time
//! units. The state is the agent's location followed by the context, so a
//! single agent sees both.

use async_trait::async_trait;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use hrl_core::state::one_hot;
use hrl_core::{ActionSet, Environment, Observe, RLError, Result, Reward};

use crate::gridworld::{encode_location, location_dim, map_rows, neighbour, StateEncoding};

/// Configuration for [`ContextGridWorld`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextGridConfig {
    /// Goal region character and the reward for standing in it while its
    /// context is active, in context order
    pub goals: IndexMap<String, f64>,
    /// Reward when no goal is reached
    pub default_reward: f64,
    /// Reward for a move blocked by a wall; replaces every other reward
    pub wall_penalty: f64,
    /// Time between context switches
    pub context_delay: f64,
    /// Time spent rewarded before the agent is moved to a random cell
    pub reward_dwell: f64,
    /// Time between moves
    pub delay: f64,
    /// Time of the first move after a reset
    pub first_move: f64,
    /// Location encoding
    pub encoding: StateEncoding,
    /// Seed for contexts and respawn locations
    pub seed: u64,
}

impl Default for ContextGridConfig {
    fn default() -> Self {
        Self {
            goals: IndexMap::from([("a".to_string(), 1.5), ("b".to_string(), 1.5)]),
            default_reward: -0.075,
            wall_penalty: -0.1,
            context_delay: 60.0,
            reward_dwell: 0.6,
            delay: 0.1,
            first_move: 0.5,
            encoding: StateEncoding::OneHot,
            seed: 0,
        }
    }
}

/// Grid world with context-dependent goals
#[derive(Debug, Clone)]
pub struct ContextGridWorld {
    config: ContextGridConfig,
    chars: Vec<Vec<char>>,
    width: usize,
    goal_chars: Vec<char>,
    actions: ActionSet,
    pos: (usize, usize),
    context_index: usize,
    context: Vec<f64>,
    state: Vec<f64>,
    reward: f64,
    bumped: bool,
    time_in_reward: f64,
    next_move: f64,
    next_context: f64,
    t: f64,
    goals_reached: u64,
    rng: StdRng,
}

impl ContextGridWorld {
    /// Parse a map. `.` is wall, each goal's character marks its region and
    /// anything else is floor.
    pub fn from_map(map: &str, config: ContextGridConfig) -> Result<Self> {
        let (chars, width) = map_rows(map)?;
        if config.goals.is_empty() {
            return Err(RLError::Config("context grid needs at least one goal".into()));
        }

        let mut goal_chars = Vec::with_capacity(config.goals.len());
        for label in config.goals.keys() {
            let mut it = label.chars();
            let c = match (it.next(), it.next()) {
                (Some(c), None) if c != '.' => c,
                _ => {
                    return Err(RLError::Config(format!(
                        "goal label '{label}' must be a single non-wall map character"
                    )))
                }
            };
            if !chars.iter().flatten().any(|m| *m == c) {
                return Err(RLError::Environment(format!("goal '{c}' does not appear in the map")));
            }
            goal_chars.push(c);
        }

        let mut world = Self {
            rng: StdRng::seed_from_u64(config.seed),
            next_move: config.first_move,
            next_context: config.context_delay,
            config,
            chars,
            width,
            goal_chars,
            actions: ActionSet::cardinal(),
            pos: (0, 0),
            context_index: 0,
            context: Vec::new(),
            state: Vec::new(),
            reward: 0.0,
            bumped: false,
            time_in_reward: 0.0,
            t: 0.0,
            goals_reached: 0,
        };
        world.pick_context();
        world.respawn()?;
        info!(
            rows = world.rows(),
            cols = world.cols(),
            goals = world.goal_chars.len(),
            "loaded context grid world"
        );
        Ok(world)
    }

    /// Number of rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.chars.len()
    }

    /// Number of columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.width
    }

    /// The moves the grid understands
    #[must_use]
    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    /// Current `(row, column)`
    #[must_use]
    pub fn position(&self) -> (usize, usize) {
        self.pos
    }

    /// Place the agent at `(row, column)`
    pub fn set_position(&mut self, row: usize, col: usize) -> Result<()> {
        if self.is_wall(row, col) {
            return Err(RLError::InvalidState(format!("({row}, {col}) is not an open cell")));
        }
        self.pos = (row, col);
        self.refresh();
        Ok(())
    }

    /// Label of the goal rewarded in the current context
    #[must_use]
    pub fn active_goal(&self) -> char {
        self.goal_chars[self.context_index]
    }

    /// Switch to the context of goal `label`
    pub fn set_goal(&mut self, label: char) -> Result<()> {
        let index = self
            .goal_chars
            .iter()
            .position(|c| *c == label)
            .ok_or_else(|| RLError::InvalidState(format!("unknown goal '{label}'")))?;
        self.context_index = index;
        self.context = one_hot(self.goal_chars.len(), index);
        self.refresh();
        Ok(())
    }

    /// Times the agent stayed in the active goal long enough to be moved
    #[must_use]
    pub fn goals_reached(&self) -> u64 {
        self.goals_reached
    }

    /// Length of the location part of the state
    #[must_use]
    pub fn location_dim(&self) -> usize {
        location_dim(self.config.encoding, (self.rows(), self.cols()))
    }

    fn char_at(&self, row: usize, col: usize) -> Option<char> {
        self.chars.get(row).and_then(|r| r.get(col)).copied()
    }

    fn is_wall(&self, row: usize, col: usize) -> bool {
        self.char_at(row, col).map_or(true, |c| c == '.')
    }

    fn in_goal(&self, goal: char) -> bool {
        self.char_at(self.pos.0, self.pos.1) == Some(goal)
    }

    fn pick_context(&mut self) {
        let indices: Vec<usize> = (0..self.goal_chars.len()).collect();
        if let Some(index) = indices.choose(&mut self.rng) {
            self.context_index = *index;
        }
        self.context = one_hot(self.goal_chars.len(), self.context_index);
        debug!(goal = %self.active_goal(), "context switched");
    }

    fn respawn(&mut self) -> Result<()> {
        let open: Vec<(usize, usize)> = (0..self.rows())
            .flat_map(|i| (0..self.width).map(move |j| (i, j)))
            .filter(|&(i, j)| {
                self.char_at(i, j)
                    .is_some_and(|c| c != '.' && !self.goal_chars.contains(&c))
            })
            .collect();
        self.pos = *open
            .choose(&mut self.rng)
            .ok_or_else(|| RLError::Environment("context grid has no open cell".into()))?;
        self.refresh();
        Ok(())
    }

    fn refresh(&mut self) {
        self.state = encode_location(self.config.encoding, (self.rows(), self.cols()), self.pos);
        self.state.extend_from_slice(&self.context);
    }

    fn take_turn(&mut self, action: &[f64]) {
        self.bumped = false;
        if let Some((r, c)) = neighbour(&self.actions, action, self.pos) {
            if self.is_wall(r, c) {
                self.bumped = true;
            } else {
                self.pos = (r, c);
            }
        }
    }

    fn update_reward(&mut self) {
        let goal = self.active_goal();
        let mut reward = self.config.default_reward;
        if self.in_goal(goal) {
            reward += self.config.goals.get_index(self.context_index).map_or(0.0, |(_, r)| *r);
        }
        if self.bumped {
            reward = self.config.wall_penalty;
        }
        self.reward = reward;
    }
}

impl Observe for ContextGridWorld {
    fn state_dim(&self) -> usize {
        self.location_dim() + self.goal_chars.len()
    }

    fn state(&self) -> &[f64] {
        &self.state
    }

    fn reward(&self) -> Reward {
        Reward(self.reward)
    }

    fn context(&self) -> Option<&[f64]> {
        Some(&self.context)
    }

    /// `"goal"` (the active goal), `"wall"`, `"floor"` or a raw map character
    fn is_in(&self, label: &str) -> bool {
        let here = self.char_at(self.pos.0, self.pos.1);
        match label {
            "goal" => self.in_goal(self.active_goal()),
            "wall" => here.map_or(true, |c| c == '.'),
            "floor" => here.is_some_and(|c| c != '.' && !self.goal_chars.contains(&c)),
            _ => {
                let mut it = label.chars();
                match (it.next(), it.next()) {
                    (Some(c), None) => here == Some(c),
                    _ => false,
                }
            }
        }
    }
}

#[async_trait]
impl Environment for ContextGridWorld {
    async fn reset(&mut self) -> Result<()> {
        self.next_move = self.t + self.config.first_move;
        self.time_in_reward = 0.0;
        self.bumped = false;
        self.respawn()
    }

    async fn step(&mut self, action: &[f64], t: f64, dt: f64) -> Result<()> {
        self.t = t;
        if t > self.next_move {
            self.next_move = t + self.config.delay;
            self.take_turn(action);
        }
        self.update_reward();

        if self.reward > 0.0 {
            self.time_in_reward += dt;
        }
        if self.time_in_reward > self.config.reward_dwell {
            self.goals_reached += 1;
            self.time_in_reward = 0.0;
            debug!(goal = %self.active_goal(), reached = self.goals_reached, "goal reached");
            self.respawn()?;
        }

        if t > self.next_context {
            self.next_context = t + self.config.context_delay;
            self.pick_context();
        }
        self.refresh();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MAP: &str = "\
......
.a   .
.    .
.   b.
......
";

    fn world() -> ContextGridWorld {
        let config = ContextGridConfig {
            encoding: StateEncoding::Matrix,
            seed: 7,
            ..ContextGridConfig::default()
        };
        ContextGridWorld::from_map(MAP, config).unwrap()
    }

    #[test]
    fn test_state_is_location_then_context() {
        let mut w = world();
        w.set_goal('b').unwrap();
        w.set_position(2, 3).unwrap();
        assert_eq!(w.state_dim(), 4);
        assert_eq!(w.state(), &[3.0, 2.0, 0.0, 1.0]);
        assert_eq!(w.context(), Some(&[0.0, 1.0][..]));
        assert_eq!(w.active_goal(), 'b');
        assert!(w.is_in("floor"));
    }

    #[test]
    fn test_rejects_bad_goals() {
        let config = ContextGridConfig {
            goals: IndexMap::from([("z".to_string(), 1.0)]),
            ..ContextGridConfig::default()
        };
        assert!(ContextGridWorld::from_map(MAP, config).is_err());

        let config = ContextGridConfig {
            goals: IndexMap::from([("ab".to_string(), 1.0)]),
            ..ContextGridConfig::default()
        };
        assert!(matches!(ContextGridWorld::from_map(MAP, config), Err(RLError::Config(_))));
    }

    #[test]
    fn test_spawns_off_goals() {
        for seed in 0..20 {
            let config = ContextGridConfig {
                seed,
                ..ContextGridConfig::default()
            };
            let w = ContextGridWorld::from_map(MAP, config).unwrap();
            assert!(w.is_in("floor"));
        }
    }

    #[tokio::test]
    async fn test_only_active_goal_is_rewarded() {
        let mut w = world();
        w.set_goal('a').unwrap();
        w.set_position(3, 3).unwrap();

        // step right into b while a is active
        w.step(&[1.0, 0.0], 0.6, 0.001).await.unwrap();
        assert!(w.is_in("b"));
        assert!(!w.is_in("goal"));
        assert_relative_eq!(w.reward().value(), -0.075);

        w.set_goal('b').unwrap();
        w.step(&[0.0, 0.0], 0.61, 0.001).await.unwrap();
        assert!(w.is_in("goal"));
        assert_relative_eq!(w.reward().value(), 1.5 - 0.075);
    }

    #[tokio::test]
    async fn test_wall_bump_is_penalised() {
        let mut w = world();
        w.set_position(1, 2).unwrap();
        w.step(&[0.0, 1.0], 0.6, 0.001).await.unwrap();
        assert_eq!(w.position(), (1, 2));
        assert_relative_eq!(w.reward().value(), -0.1);

        w.step(&[0.0, -1.0], 0.8, 0.001).await.unwrap();
        assert_eq!(w.position(), (2, 2));
        assert_relative_eq!(w.reward().value(), -0.075);
    }

    #[tokio::test]
    async fn test_dwelling_in_goal_respawns() {
        let mut w = world();
        w.set_goal('a').unwrap();
        w.set_position(1, 1).unwrap();

        let mut t = 0.0;
        for _ in 0..700 {
            t += 0.001;
            w.step(&[0.0, 0.0], t, 0.001).await.unwrap();
        }
        assert_eq!(w.goals_reached(), 1);
        assert!(w.is_in("floor"));
    }

    #[tokio::test]
    async fn test_context_switches_after_delay() {
        let config = ContextGridConfig {
            context_delay: 1.0,
            seed: 3,
            ..ContextGridConfig::default()
        };
        let mut w = ContextGridWorld::from_map(MAP, config).unwrap();
        let mut seen = std::collections::HashSet::new();
        for k in 1..=40u32 {
            w.step(&[0.0, 0.0], f64::from(k) * 0.5, 0.5).await.unwrap();
            seen.insert(w.active_goal());
            let ctx = w.context().unwrap();
            assert_eq!(ctx.iter().sum::<f64>(), 1.0);
        }
        assert_eq!(seen.len(), 2);
    }
}
