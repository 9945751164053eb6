use serde::{Deserialize, Serialize};

/// Problem difficulty. Each level is worth a fixed number of points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn points(&self) -> i32 {
        match self {
            Self::Easy => 100,
            Self::Medium => 200,
            Self::Hard => 300,
        }
    }
}

/// An input / expected-output pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// A problem as seen by the judge. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: Difficulty,
    /// Wall-clock / CPU time limit per test case, in milliseconds.
    pub time_limit_ms: u64,
    /// Memory limit per test case, in megabytes.
    pub memory_limit_mb: u64,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    pub fn points(&self) -> i32 {
        self.difficulty.points()
    }

    pub fn memory_limit_kb(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024)
    }
}

/// Minimal user record. The judge only needs to know that a user exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}
