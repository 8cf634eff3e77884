//! Experiment engine for speaker recognition research runs.
//!
//! A declarative test script describes a matrix of recognition and
//! verification experiments. The engine parses it, sorts the requested
//! test cases so that cases sharing a training configuration are
//! adjacent, executes them sequentially while reusing loaded corpora
//! and trained models, and emits per-block result files, `.test`
//! manifests and a JSON run report.
//!
//! Script grammar (line oriented, `//` comments):
//!
//! ```text
//! %ubm <sf> <gf> <sl> <gl>
//! %<testId> <rec|ver> ["label"] [targetId]
//! <featureSet> <vq|gmm> <trainSf> <trainGf> <trainSl> <trainGl> \
//!     <testSf> <testGf> <testSl> <testGl> <cycles> \
//!     [incorrectClaimed correctClaimed si gi] \
//!     [-z|-t|-zt|-tz] [-wt] [-ubm] [-o <order>] [-label "text"]
//! ```
//!
//! Range fields are first-index + count pairs for speakers (`sf`,
//! `gf`) and per-speaker samples (`sl`, `gl`).

mod engine;
mod error;
mod report;
mod schedule;
mod script;

pub use engine::{EngineConfig, TestEngine};
pub use error::EngineError;
pub use report::{load_report, save_report, RunReport, TestRecord};
pub use schedule::{needs_background_reload, needs_train_reload, schedule};
pub use script::{
    parse_script, RecognizerKind, Script, TestCase, TestHeader, TestKind, UbmRange,
};
