//! Discrete grid navigation environment
//!
//! The map is plain text, one character per cell:
//! - `.` wall
//! - `_` mud (moving out of it takes longer)
//! - `x` / `X` target
//! - anything else is open floor

use std::path::Path;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use hrl_core::state::{norm, one_hot};
use hrl_core::{ActionSet, Environment, Observe, RLError, Result, Reward};

/// How the agent's location is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEncoding {
    /// One-hot over all cells, row-major
    #[default]
    OneHot,
    /// `[column, row]`, origin at the top left
    Matrix,
    /// `[x, y]` with the origin at the map centre and y pointing up
    Cartesian,
}

/// Configuration for [`GridWorld`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridWorldConfig {
    /// Time between moves
    pub delay: f64,
    /// Extra time spent after landing in mud
    pub mud_delay: f64,
    /// Time of the first move after a reset
    pub first_move: f64,
    /// Location encoding
    pub encoding: StateEncoding,
    /// Seed for respawn locations
    pub seed: u64,
}

impl Default for GridWorldConfig {
    fn default() -> Self {
        Self {
            delay: 0.1,
            mud_delay: 3.0,
            first_move: 0.5,
            encoding: StateEncoding::OneHot,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Wall,
    Mud,
    Target,
    Floor,
}

impl Cell {
    fn parse(c: char) -> Self {
        match c {
            '.' => Self::Wall,
            '_' => Self::Mud,
            'x' | 'X' => Self::Target,
            _ => Self::Floor,
        }
    }
}

/// Split a text map into rows of characters. Returns the rows and the
/// width of the widest one.
pub(crate) fn map_rows(map: &str) -> Result<(Vec<Vec<char>>, usize)> {
    let chars: Vec<Vec<char>> = map
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.chars().collect())
        .collect();
    let width = chars.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return Err(RLError::Environment("grid map is empty".into()));
    }
    Ok((chars, width))
}

/// Location `(row, col)` on a `rows` x `cols` grid in the given encoding
#[allow(clippy::cast_precision_loss)]
pub(crate) fn encode_location(
    encoding: StateEncoding,
    (rows, cols): (usize, usize),
    (row, col): (usize, usize),
) -> Vec<f64> {
    match encoding {
        StateEncoding::OneHot => one_hot(rows * cols, row * cols + col),
        StateEncoding::Matrix => vec![col as f64, row as f64],
        StateEncoding::Cartesian => vec![
            col as f64 - (cols / 2) as f64,
            (rows / 2) as f64 - row as f64,
        ],
    }
}

/// Length of a location vector in the given encoding
pub(crate) fn location_dim(encoding: StateEncoding, (rows, cols): (usize, usize)) -> usize {
    match encoding {
        StateEncoding::OneHot => rows * cols,
        StateEncoding::Matrix | StateEncoding::Cartesian => 2,
    }
}

/// Cell one cardinal move away from `(row, col)` in the direction closest to
/// `action`. `None` for a zero action or a move off the top or left edge.
pub(crate) fn neighbour(
    actions: &ActionSet,
    action: &[f64],
    (row, col): (usize, usize),
) -> Option<(usize, usize)> {
    if norm(action) == 0.0 {
        return None;
    }
    let index = actions.closest(action);
    match actions.get(index).map(|a| a.label.as_str()) {
        Some("up") => row.checked_sub(1).map(|r| (r, col)),
        Some("right") => Some((row, col + 1)),
        Some("down") => Some((row + 1, col)),
        Some("left") => col.checked_sub(1).map(|c| (row, c)),
        _ => None,
    }
}

/// Grid navigation task with a fixed set of cardinal moves
#[derive(Debug, Clone)]
pub struct GridWorld {
    config: GridWorldConfig,
    chars: Vec<Vec<char>>,
    cells: Vec<Vec<Cell>>,
    actions: ActionSet,
    pos: (usize, usize),
    state: Vec<f64>,
    reward: f64,
    next_move: f64,
    t: f64,
    step_count: u64,
    optimal_steps: u64,
    latencies: Vec<i64>,
    rng: StdRng,
}

impl GridWorld {
    /// Parse a map. Rows may have different lengths; missing cells are walls.
    pub fn from_map(map: &str, config: GridWorldConfig) -> Result<Self> {
        let (chars, width) = map_rows(map)?;
        let cells: Vec<Vec<Cell>> = chars
            .iter()
            .map(|row| {
                (0..width)
                    .map(|j| row.get(j).map_or(Cell::Wall, |c| Cell::parse(*c)))
                    .collect()
            })
            .collect();

        if !cells.iter().flatten().any(|c| *c == Cell::Target) {
            return Err(RLError::Environment("grid map has no target cell".into()));
        }

        let mut world = Self {
            rng: StdRng::seed_from_u64(config.seed),
            next_move: config.first_move,
            config,
            chars,
            cells,
            actions: ActionSet::cardinal(),
            pos: (0, 0),
            state: Vec::new(),
            reward: 0.0,
            t: 0.0,
            step_count: 0,
            optimal_steps: 0,
            latencies: Vec::new(),
        };
        world.respawn()?;
        info!(
            rows = world.rows(),
            cols = world.cols(),
            encoding = ?world.config.encoding,
            "loaded grid world"
        );
        Ok(world)
    }

    /// Read a map file
    pub fn from_file(path: &Path, config: GridWorldConfig) -> Result<Self> {
        Self::from_map(&std::fs::read_to_string(path)?, config)
    }

    /// Number of rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    /// Number of columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
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
        match self.cell(row, col) {
            Some(Cell::Wall) | None => Err(RLError::InvalidState(format!(
                "({row}, {col}) is not an open cell"
            ))),
            Some(_) => {
                self.pos = (row, col);
                self.optimal_steps = self.manhattan_to_target();
                self.step_count = 0;
                self.refresh();
                Ok(())
            }
        }
    }

    /// Steps above the optimum for every completed trial
    #[must_use]
    pub fn latencies(&self) -> &[i64] {
        &self.latencies
    }

    fn cell(&self, row: usize, col: usize) -> Option<Cell> {
        self.cells.get(row).and_then(|r| r.get(col)).copied()
    }

    fn current_cell(&self) -> Cell {
        self.cell(self.pos.0, self.pos.1).unwrap_or(Cell::Wall)
    }

    fn respawn(&mut self) -> Result<()> {
        let open: Vec<(usize, usize)> = self
            .cells
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, c)| matches!(c, Cell::Floor | Cell::Mud))
                    .map(move |(j, _)| (i, j))
            })
            .collect();
        let pos = *open
            .choose(&mut self.rng)
            .ok_or_else(|| RLError::Environment("grid map has no open cell".into()))?;

        self.pos = pos;
        self.step_count = 0;
        self.optimal_steps = self.manhattan_to_target();
        self.refresh();
        Ok(())
    }

    fn manhattan_to_target(&self) -> u64 {
        let target = self.cells.iter().enumerate().find_map(|(i, row)| {
            row.iter().position(|c| *c == Cell::Target).map(|j| (i, j))
        });
        target.map_or(0, |(i, j)| (self.pos.0.abs_diff(i) + self.pos.1.abs_diff(j)) as u64)
    }

    fn refresh(&mut self) {
        self.state = encode_location(self.config.encoding, (self.rows(), self.cols()), self.pos);
        self.reward = if self.current_cell() == Cell::Target {
            1.0
        } else {
            0.0
        };
    }

    fn apply_move(&mut self, action: &[f64]) {
        if let Some((r, c)) = neighbour(&self.actions, action, self.pos) {
            if matches!(self.cell(r, c), Some(cell) if cell != Cell::Wall) {
                self.pos = (r, c);
            }
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn take_turn(&mut self, action: &[f64]) -> Result<()> {
        self.step_count += 1;
        if self.current_cell() == Cell::Target {
            let latency = self.step_count as i64 - self.optimal_steps as i64 - 1;
            self.latencies.push(latency);
            debug!(latency, trials = self.latencies.len(), "reached target");
            self.respawn()?;
        } else {
            self.apply_move(action);
        }

        if self.current_cell() == Cell::Mud {
            self.next_move += self.config.mud_delay;
        }
        self.refresh();
        Ok(())
    }
}

impl Observe for GridWorld {
    fn state_dim(&self) -> usize {
        location_dim(self.config.encoding, (self.rows(), self.cols()))
    }

    fn state(&self) -> &[f64] {
        &self.state
    }

    fn reward(&self) -> Reward {
        Reward(self.reward)
    }

    /// `"target"`, `"mud"`, `"wall"`, `"floor"` or the raw map character
    fn is_in(&self, label: &str) -> bool {
        let cell = self.current_cell();
        match label {
            "target" => cell == Cell::Target,
            "mud" => cell == Cell::Mud,
            "wall" => cell == Cell::Wall,
            "floor" => cell == Cell::Floor,
            _ => {
                let mut it = label.chars();
                match (it.next(), it.next()) {
                    (Some(c), None) => self
                        .chars
                        .get(self.pos.0)
                        .and_then(|r| r.get(self.pos.1))
                        .is_some_and(|m| *m == c),
                    _ => false,
                }
            }
        }
    }
}

#[async_trait]
impl Environment for GridWorld {
    async fn reset(&mut self) -> Result<()> {
        self.next_move = self.t + self.config.first_move;
        self.respawn()
    }

    async fn step(&mut self, action: &[f64], t: f64, _dt: f64) -> Result<()> {
        self.t = t;
        if t > self.next_move {
            self.next_move = t + self.config.delay;
            self.take_turn(action)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "\
.....
.  x.
. _ .
.....
";

    fn world(encoding: StateEncoding) -> GridWorld {
        let config = GridWorldConfig {
            encoding,
            ..GridWorldConfig::default()
        };
        GridWorld::from_map(MAP, config).unwrap()
    }

    #[test]
    fn test_parse_and_spawn() {
        let w = world(StateEncoding::OneHot);
        assert_eq!((w.rows(), w.cols()), (4, 5));
        assert_eq!(w.state_dim(), 20);
        assert_eq!(w.state().iter().sum::<f64>(), 1.0);
        assert!(!w.is_in("target"));
        assert!(!w.is_in("wall"));
    }

    #[test]
    fn test_rejects_maps_without_target() {
        assert!(GridWorld::from_map("...\n. .\n...", GridWorldConfig::default()).is_err());
        assert!(GridWorld::from_map("", GridWorldConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_moves_only_after_delay() {
        let mut w = world(StateEncoding::Matrix);
        w.set_position(1, 1).unwrap();
        let right = [1.0, 0.0];

        w.step(&right, 0.3, 0.001).await.unwrap();
        assert_eq!(w.position(), (1, 1));

        w.step(&right, 0.51, 0.001).await.unwrap();
        assert_eq!(w.position(), (1, 2));
        assert_eq!(w.state(), &[2.0, 1.0]);

        // next move not before 0.61
        w.step(&right, 0.55, 0.001).await.unwrap();
        assert_eq!(w.position(), (1, 2));
        w.step(&right, 0.62, 0.001).await.unwrap();
        assert_eq!(w.position(), (1, 3));
        assert!(w.is_in("target"));
        assert!(w.is_in("x"));
        assert_eq!(w.reward(), Reward(1.0));
    }

    #[tokio::test]
    async fn test_walls_block_and_mud_slows() {
        let mut w = world(StateEncoding::Matrix);
        w.set_position(1, 1).unwrap();
        w.step(&[0.0, 1.0], 0.6, 0.001).await.unwrap();
        assert_eq!(w.position(), (1, 1));

        w.step(&[0.0, -1.0], 0.8, 0.001).await.unwrap();
        assert_eq!(w.position(), (2, 1));
        w.step(&[1.0, 0.0], 1.0, 0.001).await.unwrap();
        assert_eq!(w.position(), (2, 2));
        assert!(w.is_in("mud"));

        // stuck for the mud delay
        w.step(&[0.0, 1.0], 2.0, 0.001).await.unwrap();
        assert_eq!(w.position(), (2, 2));
        w.step(&[0.0, 1.0], 4.2, 0.001).await.unwrap();
        assert_eq!(w.position(), (1, 2));
    }

    #[tokio::test]
    async fn test_target_respawns_and_records_latency() {
        let mut w = world(StateEncoding::Cartesian);
        w.set_position(1, 2).unwrap();
        w.step(&[1.0, 0.0], 0.6, 0.001).await.unwrap();
        assert!(w.is_in("target"));

        w.step(&[1.0, 0.0], 0.8, 0.001).await.unwrap();
        assert!(!w.is_in("target"));
        // one step optimum, took one step plus the respawn turn
        assert_eq!(w.latencies(), &[0]);
        assert_eq!(w.reward(), Reward(0.0));
    }

    #[test]
    fn test_cartesian_origin_is_centre() {
        let mut w = world(StateEncoding::Cartesian);
        w.set_position(2, 2).unwrap();
        assert_eq!(w.state(), &[0.0, 0.0]);
        w.set_position(1, 3).unwrap();
        assert_eq!(w.state(), &[1.0, 1.0]);
    }

    #[test]
    fn test_zero_action_does_not_move() {
        let mut w = world(StateEncoding::Matrix);
        w.set_position(1, 1).unwrap();
        let before = w.position();
        tokio_test::block_on(w.step(&[0.0, 0.0], 1.0, 0.001)).unwrap();
        assert_eq!(w.position(), before);
    }
}
