use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// One executed test in machine readable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub label: String,
    /// "rec" or "ver".
    pub kind: String,
    pub result_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incorrect: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trials: Option<usize>,
}

/// Machine readable summary of one engine run, written next to the
/// per-block text results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub script: String,
    /// Training corpus loads performed; at most one per distinct
    /// (feature set, training range) pair in a sorted run.
    pub train_loads: usize,
    /// Background corpus loads performed; at most one per feature set.
    pub background_loads: usize,
    pub tests: Vec<TestRecord>,
}

/// Saves a run report as pretty-printed JSON.
pub fn save_report(report: &RunReport, path: &Path) -> Result<(), EngineError> {
    let data = serde_json::to_string_pretty(report)?;
    std::fs::write(path, data).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads a previously saved run report.
pub fn load_report(path: &Path) -> Result<RunReport, EngineError> {
    let data = std::fs::read(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let report = RunReport {
            script: "nightly.txt".to_string(),
            train_loads: 2,
            background_loads: 1,
            tests: vec![TestRecord {
                label: "t1_0".to_string(),
                kind: "rec".to_string(),
                result_file: "t1_rec.txt".to_string(),
                correct: Some(5),
                incorrect: Some(1),
                trials: None,
            }],
        };

        save_report(&report, &path).unwrap();
        let loaded = load_report(&path).unwrap();
        assert_eq!(loaded.train_loads, 2);
        assert_eq!(loaded.tests.len(), 1);
        assert_eq!(loaded.tests[0].label, "t1_0");
        assert_eq!(loaded.tests[0].correct, Some(5));
    }
}
