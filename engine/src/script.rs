use std::collections::BTreeMap;

use sprec_recognizer::ScoreNormalization;
use tracing::warn;

use crate::EngineError;

/// Default model order when a descriptor has no `-o` flag.
const DEFAULT_ORDER: usize = 128;

/// Experiment category of a test block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    Recognition,
    Verification,
}

/// Concrete recognizer driving a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecognizerKind {
    Vq,
    Gmm,
}

/// Process-wide background-model sampling range set by `%ubm`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UbmRange {
    pub sf: usize,
    pub gf: usize,
    pub sl: usize,
    pub gl: usize,
}

/// One `%id type` block header.
#[derive(Debug, Clone)]
pub struct TestHeader {
    pub kind: TestKind,
    pub label: String,
    /// Recognition only: id of the block whose manifest aggregates
    /// this block's result file.
    pub target: Option<String>,
}

/// One requested experiment line.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub id: String,
    /// Position within its block, used for default labels and
    /// verification output file names.
    pub index: usize,
    pub kind: TestKind,
    pub features: String,
    pub recognizer: RecognizerKind,

    pub train_sf: usize,
    pub train_gf: usize,
    pub train_sl: usize,
    pub train_gl: usize,

    pub test_sf: usize,
    pub test_gf: usize,
    pub test_sl: usize,
    pub test_gl: usize,

    pub cycles: usize,

    // Verification only.
    pub incorrect_claimed: usize,
    pub correct_claimed: usize,
    pub si: usize,
    pub gi: usize,

    pub order: usize,
    pub normalization: ScoreNormalization,
    pub weighting: bool,
    pub ubm: bool,
    label: String,
}

impl TestCase {
    /// Explicit `-label` text, or `<id>_<index>` when unlabeled.
    pub fn label(&self) -> String {
        if self.label.is_empty() {
            format!("{}_{}", self.id, self.index)
        } else {
            self.label.clone()
        }
    }
}

/// Parsed test script.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub ubm: Option<UbmRange>,
    pub headers: BTreeMap<String, TestHeader>,
    pub tests: Vec<TestCase>,
}

/// Token cursor over one script line with quoted-literal support.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    /// Next whitespace-separated token.
    fn token(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        let end = self
            .rest
            .find(char::is_whitespace)
            .unwrap_or(self.rest.len());
        let (tok, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(tok)
    }

    /// Optional quoted string literal. Returns `Ok(None)` when the
    /// next token is not quoted (the cursor is left untouched) and an
    /// error message for an unterminated quote.
    fn literal(&mut self) -> Result<Option<String>, String> {
        let trimmed = self.rest.trim_start();
        let Some(body) = trimmed.strip_prefix('"') else {
            return Ok(None);
        };
        match body.find('"') {
            Some(end) => {
                self.rest = &body[end + 1..];
                Ok(Some(body[..end].to_string()))
            }
            None => Err("unterminated string literal".to_string()),
        }
    }
}

fn number(cur: &mut Cursor<'_>, line: usize, what: &str) -> Result<usize, EngineError> {
    let token = cur.token().ok_or_else(|| EngineError::Parse {
        line,
        reason: format!("missing '{what}'"),
    })?;
    token.parse().map_err(|_| EngineError::Parse {
        line,
        reason: format!("invalid '{what}': '{token}'"),
    })
}

/// Parses a test script.
///
/// Line oriented; `//` comments and blank lines are skipped. A `%id
/// rec|ver` header opens a block whose subsequent lines are test
/// descriptors; `%ubm` sets the run-wide background sampling range in
/// any state. Every grammar violation is fatal and carries the
/// offending line number.
pub fn parse_script(input: &str) -> Result<Script, EngineError> {
    let mut script = Script::default();

    let mut state: Option<TestKind> = None;
    let mut current_id = String::new();
    let mut index_counter = 0usize;

    for (line_idx, raw) in input.lines().enumerate() {
        let line = line_idx + 1;
        let mut cur = Cursor::new(raw);

        let Some(first) = cur.token() else {
            continue;
        };
        if first.starts_with("//") {
            continue;
        }

        if first == "%ubm" {
            script.ubm = Some(UbmRange {
                sf: number(&mut cur, line, "UBM sf")?,
                gf: number(&mut cur, line, "UBM gf")?,
                sl: number(&mut cur, line, "UBM sl")?,
                gl: number(&mut cur, line, "UBM gl")?,
            });
            continue;
        }

        if let Some(id) = first.strip_prefix('%') {
            let kind = match cur.token() {
                Some("rec") => TestKind::Recognition,
                Some("ver") => TestKind::Verification,
                Some(other) => {
                    return Err(EngineError::Parse {
                        line,
                        reason: format!("unknown test type '{other}'"),
                    });
                }
                None => {
                    return Err(EngineError::Parse {
                        line,
                        reason: "missing test type".to_string(),
                    });
                }
            };

            let label = cur
                .literal()
                .map_err(|reason| EngineError::Parse { line, reason })?
                .unwrap_or_default();
            let target = cur.token().map(str::to_string);

            if script.headers.contains_key(id) {
                return Err(EngineError::DuplicateTestId {
                    id: id.to_string(),
                    line,
                });
            }
            script.headers.insert(
                id.to_string(),
                TestHeader {
                    kind,
                    label,
                    target,
                },
            );

            current_id = id.to_string();
            index_counter = 0;
            state = Some(kind);
            continue;
        }

        let Some(kind) = state else {
            warn!("line {line}: descriptor outside a test block, ignored");
            continue;
        };

        let features = first.to_string();
        let recognizer = match cur.token() {
            Some("vq") => RecognizerKind::Vq,
            Some("gmm") => RecognizerKind::Gmm,
            Some(other) => {
                return Err(EngineError::Parse {
                    line,
                    reason: format!("unknown recognizer type '{other}'"),
                });
            }
            None => {
                return Err(EngineError::Parse {
                    line,
                    reason: "recognizer type not specified".to_string(),
                });
            }
        };

        let mut test = TestCase {
            id: current_id.clone(),
            index: index_counter,
            kind,
            features,
            recognizer,
            train_sf: number(&mut cur, line, "trainSf")?,
            train_gf: number(&mut cur, line, "trainGf")?,
            train_sl: number(&mut cur, line, "trainSl")?,
            train_gl: number(&mut cur, line, "trainGl")?,
            test_sf: number(&mut cur, line, "testSf")?,
            test_gf: number(&mut cur, line, "testGf")?,
            test_sl: number(&mut cur, line, "testSl")?,
            test_gl: number(&mut cur, line, "testGl")?,
            cycles: number(&mut cur, line, "cycles")?,
            incorrect_claimed: 0,
            correct_claimed: 0,
            si: 0,
            gi: 0,
            order: DEFAULT_ORDER,
            normalization: ScoreNormalization::None,
            weighting: false,
            ubm: false,
            label: String::new(),
        };

        if kind == TestKind::Verification {
            test.incorrect_claimed = number(&mut cur, line, "incorrectClaimed")?;
            test.correct_claimed = number(&mut cur, line, "correctClaimed")?;
            test.si = number(&mut cur, line, "si")?;
            test.gi = number(&mut cur, line, "gi")?;
        }

        loop {
            if let Some(flag) = cur.token() {
                if flag.starts_with("//") {
                    break;
                }
                match flag {
                    "-z" => test.normalization = ScoreNormalization::Zero,
                    "-t" => test.normalization = ScoreNormalization::Test,
                    "-zt" => test.normalization = ScoreNormalization::ZeroTest,
                    "-tz" => test.normalization = ScoreNormalization::TestZero,
                    "-wt" => test.weighting = true,
                    "-ubm" => test.ubm = true,
                    "-o" => test.order = number(&mut cur, line, "order")?,
                    "-label" => {
                        test.label = cur
                            .literal()
                            .map_err(|reason| EngineError::Parse { line, reason })?
                            .ok_or_else(|| EngineError::Parse {
                                line,
                                reason: "invalid test label".to_string(),
                            })?;
                    }
                    other => warn!("line {line}: unknown flag '{other}' ignored"),
                }
            } else {
                break;
            }
        }

        script.tests.push(test);
        index_counter += 1;
    }

    Ok(script)
}
