use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use super::error::CatalogError;
use crate::problem::{Problem, User};

/// Users and problems seeded into the store at startup.
///
/// ```toml
/// [[users]]
/// id = 1
/// username = "alice"
///
/// [[problems]]
/// id = 1
/// title = "Sum"
/// difficulty = "Easy"
/// time_limit_ms = 1000
/// memory_limit_mb = 256
///
/// [[problems.test_cases]]
/// input = "2 2"
/// expected_output = "4"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub problems: Vec<Problem>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = toml::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for user in &self.users {
            if !seen.insert(user.id) {
                return Err(CatalogError::Invalid(format!("duplicate user id {}", user.id)));
            }
        }

        seen.clear();
        for problem in &self.problems {
            if !seen.insert(problem.id) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate problem id {}",
                    problem.id
                )));
            }
            if problem.time_limit_ms == 0 || problem.memory_limit_mb == 0 {
                return Err(CatalogError::Invalid(format!(
                    "problem {} must have positive time and memory limits",
                    problem.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Difficulty;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[users]]
id = 1
username = "alice"

[[problems]]
id = 7
title = "Sum"
difficulty = "Medium"
time_limit_ms = 1000
memory_limit_mb = 128

[[problems.test_cases]]
input = "2 2"
expected_output = "4"

[[problems.test_cases]]
input = "1 2"
expected_output = "3"
"#;

    #[test]
    fn test_parse_sample() {
        let catalog = Catalog::parse(SAMPLE).unwrap();
        assert_eq!(catalog.users.len(), 1);
        let problem = &catalog.problems[0];
        assert_eq!(problem.difficulty, Difficulty::Medium);
        assert_eq!(problem.points(), 200);
        assert_eq!(problem.test_cases.len(), 2);
        assert_eq!(problem.test_cases[1].expected_output, "3");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let raw = "[[users]]\nid = 1\nusername = \"a\"\n[[users]]\nid = 1\nusername = \"b\"\n";
        assert!(matches!(Catalog::parse(raw), Err(CatalogError::Invalid(_))));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let raw = SAMPLE.replace("time_limit_ms = 1000", "time_limit_ms = 0");
        assert!(matches!(Catalog::parse(&raw), Err(CatalogError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let catalog = Catalog::load(file.path()).unwrap();
        assert_eq!(catalog.problems[0].id, 7);

        assert!(matches!(
            Catalog::load("/nonexistent/catalog.toml"),
            Err(CatalogError::Io { .. })
        ));
    }
}
